use std::collections::{BTreeMap, HashMap};

/// Rows on the presented terminal screen
pub const SCREEN_ROWS: usize = 24;

/// Columns on the presented terminal screen
pub const SCREEN_COLS: usize = 80;

/// Field colors understood by block-mode terminals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    #[default]
    Default,
    Blue,
    Red,
    Pink,
    Green,
    Turquoise,
    Yellow,
    White,
}

impl Color {
    /// ANSI foreground code; `None` keeps the terminal's default
    pub fn ansi_code(self) -> Option<u8> {
        match self {
            Color::Default => None,
            Color::Red => Some(31),
            Color::Green => Some(32),
            Color::Yellow => Some(33),
            Color::Blue => Some(34),
            Color::Pink => Some(35),
            Color::Turquoise => Some(36),
            Color::White => Some(37),
        }
    }
}

/// A positioned piece of text or input on a screen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Field {
    pub row: usize,
    pub col: usize,
    /// Static text, or the initial value for writable fields
    pub content: String,
    /// Name used to address the field in responses and rules
    pub name: Option<String>,
    /// Whether the client can type into this field
    pub write: bool,
    /// Number of input positions for writable fields
    pub width: usize,
    pub intense: bool,
    pub underscore: bool,
    pub color: Color,
}

impl Field {
    /// Static text at a position
    pub fn text(row: usize, col: usize, content: impl Into<String>) -> Self {
        Self {
            row,
            col,
            content: content.into(),
            ..Default::default()
        }
    }

    /// A named, writable, underscored input field
    pub fn input(row: usize, col: usize, name: impl Into<String>, width: usize) -> Self {
        Self {
            row,
            col,
            name: Some(name.into()),
            write: true,
            width,
            underscore: true,
            ..Default::default()
        }
    }

    /// A named output field whose content can be replaced through response values
    pub fn named(row: usize, col: usize, name: impl Into<String>) -> Self {
        Self {
            row,
            col,
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn intense(mut self) -> Self {
        self.intense = true;
        self
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }
}

/// An ordered set of fields shown for one round trip
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Screen {
    pub fields: Vec<Field>,
}

impl Screen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.name.as_deref() == Some(name))
    }

    /// Name of the first writable field, which receives typed input
    pub fn first_input(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.write)
            .and_then(|f| f.name.as_deref())
    }

    /// Lay the screen out as plain text rows
    ///
    /// Named fields show `values[name]` when present. Empty writable fields are
    /// drawn as underscores of their width. Text past the last column is cut.
    pub fn render_text(&self, values: &HashMap<String, String>) -> Vec<String> {
        self.layout(values)
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(ch, _)| ch)
                    .collect::<String>()
                    .trim_end()
                    .to_string()
            })
            .collect()
    }

    /// Same layout as [`Screen::render_text`], with ANSI SGR codes for each
    /// field's intensity, underscore and color
    pub fn render_ansi(&self, values: &HashMap<String, String>) -> Vec<String> {
        self.layout(values)
            .into_iter()
            .map(|row| {
                let end = row
                    .iter()
                    .rposition(|&(ch, style)| ch != ' ' || style != Style::default())
                    .map_or(0, |i| i + 1);

                let mut line = String::new();
                let mut current = Style::default();
                for &(ch, style) in &row[..end] {
                    if style != current {
                        line.push_str(&style.sgr());
                        current = style;
                    }
                    line.push(ch);
                }
                if current != Style::default() {
                    line.push_str(SGR_RESET);
                }
                line
            })
            .collect()
    }

    fn layout(&self, values: &HashMap<String, String>) -> Vec<Vec<(char, Style)>> {
        let mut grid = vec![vec![(' ', Style::default()); SCREEN_COLS]; SCREEN_ROWS];

        for field in &self.fields {
            if field.row >= SCREEN_ROWS {
                continue;
            }
            let content = field
                .name
                .as_ref()
                .and_then(|name| values.get(name))
                .unwrap_or(&field.content);

            let mut text: Vec<char> = content.chars().collect();
            if field.write {
                text.truncate(field.width);
                while text.len() < field.width {
                    text.push('_');
                }
            }

            let style = Style::of(field);
            let row = &mut grid[field.row];
            for (offset, ch) in text.into_iter().enumerate() {
                let col = field.col + offset;
                if col >= SCREEN_COLS {
                    break;
                }
                row[col] = (ch, style);
            }
        }

        grid
    }
}

const SGR_RESET: &str = "\x1b[0m";

/// Display attributes of one screen cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Style {
    intense: bool,
    underscore: bool,
    color: Color,
}

impl Style {
    fn of(field: &Field) -> Self {
        Self {
            intense: field.intense,
            underscore: field.underscore,
            color: field.color,
        }
    }

    fn sgr(&self) -> String {
        let mut codes = vec![0u8];
        if self.intense {
            codes.push(1);
        }
        if self.underscore {
            codes.push(4);
        }
        if let Some(code) = self.color.ansi_code() {
            codes.push(code);
        }
        let codes: Vec<String> = codes.iter().map(u8::to_string).collect();
        format!("\x1b[{}m", codes.join(";"))
    }
}

/// Declarative input check applied to a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    /// Value must parse as an integer within `min..=max`
    IntegerRange { min: i64, max: i64 },
}

impl Validator {
    pub fn accepts(&self, input: &str) -> bool {
        match *self {
            Validator::IntegerRange { min, max } => input
                .trim()
                .parse::<i64>()
                .map(|v| v >= min && v <= max)
                .unwrap_or(false),
        }
    }
}

/// Validation rule attached to one named field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRules {
    pub validator: Option<Validator>,
    /// Message shown in the error field when validation fails
    pub error_text: String,
}

/// Field rules keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rules {
    fields: BTreeMap<String, FieldRules>,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, rules: FieldRules) {
        self.fields.insert(field.into(), rules);
    }

    pub fn get(&self, field: &str) -> Option<&FieldRules> {
        self.fields.get(field)
    }

    /// Check every rule against the submitted values
    ///
    /// Returns the error text of the first failing field in name order. A
    /// missing value is validated as the empty string.
    pub fn validate(&self, values: &HashMap<String, String>) -> Result<(), String> {
        for (name, rules) in &self.fields {
            let Some(validator) = rules.validator else {
                continue;
            };
            let value = values.get(name).map(String::as_str).unwrap_or("");
            if !validator.accepts(value) {
                return Err(rules.error_text.clone());
            }
        }
        Ok(())
    }
}

/// Attention keys a client can send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Enter,
    Clear,
    Pf(u8),
}

/// The client's answer to a rendered screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub key: Key,
    pub values: HashMap<String, String>,
}

impl Response {
    pub fn value(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }
}

/// Everything needed to show a screen and collect one response
#[derive(Debug, Clone, Copy)]
pub struct ScreenRequest<'a> {
    pub screen: &'a Screen,
    pub rules: &'a Rules,
    /// Initial values for named fields
    pub values: &'a HashMap<String, String>,
    /// Keys whose response is returned only after the rules pass
    pub accept_keys: &'a [Key],
    /// Keys whose response is returned immediately, skipping the rules
    pub cancel_keys: &'a [Key],
    /// Field that receives a rule's error text
    pub error_field: &'a str,
    /// Cursor position when the screen is shown
    pub error_row: usize,
    pub error_col: usize,
}
