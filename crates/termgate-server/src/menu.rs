//! Menu navigation state and the screen it renders to

use termgate_protocol::{Color, Field, FieldRules, Key, Response, Rules, Screen, Validator};

use crate::config::AppConfig;

/// Targets listed per page
pub const PAGE_SIZE: usize = 12;

/// Name of the selection input field
pub const INPUT_FIELD: &str = "input";

/// Name of the error message field
pub const ERROR_FIELD: &str = "errormsg";

const FIRST_PAGE_ERROR: &str = "Already on the first page";
const LAST_PAGE_ERROR: &str = "Already on the last page";

const TITLE_ROW: usize = 0;
const PROMPT_ROW: usize = 2;
const INPUT_COL: usize = 32;
const INPUT_WIDTH: usize = 3;
const FIRST_ENTRY_ROW: usize = 4;
const DISCLAIMER_ROW: usize = 17;
const ERROR_ROW: usize = 20;
const KEYS_ROW: usize = 22;

/// Number of pages needed for `server_count` targets; an empty menu still has one page
pub fn total_pages(server_count: usize) -> usize {
    server_count.div_ceil(PAGE_SIZE).max(1)
}

/// Navigation input derived from a screen response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuEvent {
    PageUp,
    PageDown,
    Submit(String),
    Cancel,
}

/// Where a session's menu stands after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    Listing(usize),
    /// Zero-based index of the chosen target
    Submitted(usize),
    Cancelled,
}

/// Per-connection menu state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    current_page: usize,
    total_pages: usize,
    server_count: usize,
    pending_error: Option<String>,
}

impl UserSession {
    pub fn new(server_count: usize) -> Self {
        Self {
            current_page: 0,
            total_pages: total_pages(server_count),
            server_count,
            pending_error: None,
        }
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn pending_error(&self) -> Option<&str> {
        self.pending_error.as_deref()
    }

    pub fn has_previous_page(&self) -> bool {
        self.current_page > 0
    }

    pub fn has_next_page(&self) -> bool {
        self.current_page + 1 < self.total_pages
    }

    /// Apply one event
    ///
    /// Selection input is parsed again here even though the screen's field rules
    /// already checked it.
    pub fn apply(&mut self, event: MenuEvent) -> MenuState {
        match event {
            MenuEvent::PageUp => {
                self.pending_error = None;
                if self.has_previous_page() {
                    self.current_page -= 1;
                } else {
                    self.pending_error = Some(FIRST_PAGE_ERROR.to_string());
                }
            }
            MenuEvent::PageDown => {
                self.pending_error = None;
                if self.has_next_page() {
                    self.current_page += 1;
                } else {
                    self.pending_error = Some(LAST_PAGE_ERROR.to_string());
                }
            }
            MenuEvent::Submit(raw) => match self.parse_selection(&raw) {
                Some(index) => return MenuState::Submitted(index),
                None => self.pending_error = Some(selection_error(self.server_count)),
            },
            MenuEvent::Cancel => return MenuState::Cancelled,
        }
        MenuState::Listing(self.current_page)
    }

    fn parse_selection(&self, raw: &str) -> Option<usize> {
        let value: i64 = raw.trim().parse().ok()?;
        let value = usize::try_from(value).ok()?;
        (1..=self.server_count).contains(&value).then(|| value - 1)
    }
}

fn selection_error(server_count: usize) -> String {
    if server_count == 0 {
        "No services are configured".to_string()
    } else {
        format!("Enter a number from 1 to {}", server_count)
    }
}

/// Caller-supplied mapping from attention keys to menu events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMap {
    pub submit: Vec<Key>,
    pub cancel: Vec<Key>,
    pub page_up: Vec<Key>,
    pub page_down: Vec<Key>,
}

impl Default for KeyMap {
    /// Enter submits, PF3 exits, PF7/PF8 page back and forward
    fn default() -> Self {
        Self {
            submit: vec![Key::Enter],
            cancel: vec![Key::Pf(3)],
            page_up: vec![Key::Pf(7)],
            page_down: vec![Key::Pf(8)],
        }
    }
}

impl KeyMap {
    /// Keys that must pass field validation before returning
    pub fn accept_keys(&self) -> Vec<Key> {
        self.submit.clone()
    }

    /// Keys returned without field validation
    pub fn unvalidated_keys(&self) -> Vec<Key> {
        self.cancel
            .iter()
            .chain(&self.page_up)
            .chain(&self.page_down)
            .copied()
            .collect()
    }

    /// Classify a response; `None` for keys with no menu meaning
    pub fn classify(&self, response: &Response) -> Option<MenuEvent> {
        let key = response.key;
        if self.cancel.contains(&key) {
            Some(MenuEvent::Cancel)
        } else if self.page_up.contains(&key) {
            Some(MenuEvent::PageUp)
        } else if self.page_down.contains(&key) {
            Some(MenuEvent::PageDown)
        } else if self.submit.contains(&key) {
            let raw = response.value(INPUT_FIELD).unwrap_or_default();
            Some(MenuEvent::Submit(raw.to_string()))
        } else {
            None
        }
    }
}

/// Lay out the menu for the session's current page
///
/// Pure function of its inputs; no session state is changed.
pub fn build_screen(config: &AppConfig, session: &UserSession) -> (Screen, Rules) {
    let mut screen = Screen::new();

    let title_len = config.title.chars().count();
    let title_col = 39usize.saturating_sub(title_len / 2);
    screen.push(Field::text(TITLE_ROW, title_col, config.title.as_str()).intense());

    screen.push(Field::text(PROMPT_ROW, 2, "Select service to connect to:"));
    screen.push(Field::input(PROMPT_ROW, INPUT_COL, INPUT_FIELD, INPUT_WIDTH));
    // Field stop after the input
    screen.push(Field::text(PROMPT_ROW, INPUT_COL + INPUT_WIDTH, ""));

    let first = session.current_page * PAGE_SIZE;
    let last = (first + PAGE_SIZE).min(config.servers.len());
    for (offset, index) in (first..last).enumerate() {
        let row = FIRST_ENTRY_ROW + offset;
        screen.push(Field::text(row, 2, format!("{:3}", index + 1)).intense());
        screen.push(Field::text(row, 6, config.servers[index].name.as_str()));
    }

    let (line1, line2) = config.disclaimer_lines();
    if !line1.is_empty() {
        screen.push(Field::text(DISCLAIMER_ROW, 0, line1));
    }
    if !line2.is_empty() {
        screen.push(Field::text(DISCLAIMER_ROW + 1, 0, line2));
    }

    screen.push(
        Field::named(ERROR_ROW, 0, ERROR_FIELD)
            .with_content(session.pending_error().unwrap_or_default())
            .intense()
            .color(Color::Red),
    );

    screen.push(Field::text(KEYS_ROW, 0, "PF3 Exit"));
    if session.has_previous_page() {
        screen.push(Field::text(KEYS_ROW, 12, "PF7 Prev"));
    }
    if session.has_next_page() {
        screen.push(Field::text(KEYS_ROW, 24, "PF8 Next"));
    }

    let server_count = config.servers.len();
    let mut rules = Rules::new();
    rules.insert(
        INPUT_FIELD,
        FieldRules {
            validator: Some(Validator::IntegerRange {
                min: 1,
                max: server_count as i64,
            }),
            error_text: selection_error(server_count),
        },
    );

    (screen, rules)
}

/// Cursor position for the menu: just inside the input field
pub(crate) fn cursor_position() -> (usize, usize) {
    (PROMPT_ROW, INPUT_COL + 1)
}
