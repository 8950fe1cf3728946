//! Menu configuration: the list of backend targets and the screen text
//!
//! The JSON file is parsed into [`ConfigFile`], normalised, validated against
//! the screen's bounds and then frozen into an [`AppConfig`] that every session
//! reads and none mutates.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Title shown when the configuration leaves it blank
pub const DEFAULT_TITLE: &str = "Terminal Gateway";

/// Longest title that fits on the first screen row
pub const MAX_TITLE_LENGTH: usize = 79;

/// Width of each of the two disclaimer rows
pub const MAX_DISCLAIMER_WIDTH: usize = 79;

/// Most targets a menu can number (three input positions)
pub const MAX_SERVERS: usize = 999;

/// Longest target name
pub const MAX_NAME_LENGTH: usize = 65;

/// Punctuation the terminal can display, alongside ASCII letters, digits and space
const ALLOWED_PUNCTUATION: &str = "!\"#$%&'()*+,-./:;<=>?@_|";

/// Configuration errors; each names the field or bound that was violated
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Title is {length} characters: max {max}")]
    TitleTooLong { length: usize, max: usize },

    #[error("Title contains invalid character {0:?}")]
    TitleCharacter(char),

    #[error("Disclaimer contains invalid character {0:?}")]
    DisclaimerCharacter(char),

    #[error("Disclaimer too long: it must fit on two lines of {max} characters")]
    DisclaimerTooLong { max: usize },

    #[error("Too many server configurations ({count}): max {max}")]
    TooManyServers { count: usize, max: usize },

    #[error("Server index {0} has a blank name")]
    BlankName(usize),

    #[error("Server `{name}` name too long: max {max} characters")]
    NameTooLong { name: String, max: usize },

    #[error("Host missing on server `{0}`")]
    MissingHost(String),

    #[error("Port {port} invalid on server `{name}`: must be 1-65535")]
    InvalidPort { name: String, port: i64 },
}

/// One target as written in the config file
///
/// Keys are camelCase; the capitalised spellings of older files are accepted too.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerEntry {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Host")]
    pub host: String,
    /// Wide integer so out-of-range values reach validation
    #[serde(alias = "Port")]
    pub port: i64,
    #[serde(alias = "Secure")]
    pub secure: bool,
    #[serde(alias = "IgnoreCertValidation")]
    pub ignore_cert_validation: bool,
}

/// The config file as parsed, before validation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    #[serde(alias = "Title")]
    pub title: String,
    #[serde(alias = "Disclaimer")]
    pub disclaimer: String,
    #[serde(alias = "Servers")]
    pub servers: Vec<ServerEntry>,
}

/// A backend the gateway can relay a session to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub ignore_cert_validation: bool,
}

impl ServerTarget {
    /// `host:port` form used for dialing and logging
    pub fn address(&self) -> String {
        format!("{}:{}", self.host.trim(), self.port)
    }
}

/// Validated, read-only menu configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub title: String,
    pub disclaimer: String,
    pub servers: Vec<ServerTarget>,
}

/// Split text into at most two lines of `width` characters
///
/// Surrounding whitespace is trimmed first. Text that fits is returned whole.
/// Otherwise the break is the last space within the first `width` characters,
/// and the space itself is dropped. With no such space the text is cut at
/// exactly `width`, in which case the second line may itself exceed `width`.
pub fn wrap(text: &str, width: usize) -> (String, String) {
    let text = text.trim();
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= width {
        return (text.to_string(), String::new());
    }

    let space = (0..width.min(chars.len())).rev().find(|&i| chars[i] == ' ');
    match space {
        Some(i) => {
            let line1: String = chars[..i].iter().collect();
            let line2: String = chars[i + 1..].iter().collect();
            (line1, line2.trim_start().to_string())
        }
        None => (
            chars[..width].iter().collect(),
            chars[width..].iter().collect(),
        ),
    }
}

fn is_displayable(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == ' ' || ALLOWED_PUNCTUATION.contains(c)
}

fn first_invalid_char(text: &str) -> Option<char> {
    text.chars().find(|&c| !is_displayable(c))
}

impl ConfigFile {
    /// Parse a config document
    pub fn from_json(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Fill in the default title and trim the disclaimer
    pub fn normalize(mut self) -> Self {
        if self.title.trim().is_empty() {
            self.title = DEFAULT_TITLE.to_string();
        }
        self.disclaimer = self.disclaimer.trim().to_string();
        self
    }

    /// Check every bound, reporting the first violation
    pub fn validate(&self) -> Result<(), ConfigError> {
        let title_length = self.title.chars().count();
        if title_length > MAX_TITLE_LENGTH {
            return Err(ConfigError::TitleTooLong {
                length: title_length,
                max: MAX_TITLE_LENGTH,
            });
        }
        if let Some(c) = first_invalid_char(&self.title) {
            return Err(ConfigError::TitleCharacter(c));
        }

        if let Some(c) = first_invalid_char(&self.disclaimer) {
            return Err(ConfigError::DisclaimerCharacter(c));
        }
        let (_, second_line) = wrap(&self.disclaimer, MAX_DISCLAIMER_WIDTH);
        if second_line.chars().count() > MAX_DISCLAIMER_WIDTH {
            return Err(ConfigError::DisclaimerTooLong {
                max: MAX_DISCLAIMER_WIDTH,
            });
        }

        if self.servers.len() > MAX_SERVERS {
            return Err(ConfigError::TooManyServers {
                count: self.servers.len(),
                max: MAX_SERVERS,
            });
        }

        for (index, server) in self.servers.iter().enumerate() {
            if server.name.trim().is_empty() {
                return Err(ConfigError::BlankName(index));
            }
            if server.name.chars().count() > MAX_NAME_LENGTH {
                return Err(ConfigError::NameTooLong {
                    name: server.name.clone(),
                    max: MAX_NAME_LENGTH,
                });
            }
            if server.host.trim().is_empty() {
                return Err(ConfigError::MissingHost(server.name.clone()));
            }
            if u16::try_from(server.port).map_or(true, |p| p == 0) {
                return Err(ConfigError::InvalidPort {
                    name: server.name.clone(),
                    port: server.port,
                });
            }
        }

        Ok(())
    }

    /// Normalise, validate and freeze into an [`AppConfig`]
    pub fn into_app_config(self) -> Result<AppConfig, ConfigError> {
        let config = self.normalize();
        config.validate()?;

        let mut servers = Vec::with_capacity(config.servers.len());
        for entry in config.servers {
            let port = u16::try_from(entry.port).map_err(|_| ConfigError::InvalidPort {
                name: entry.name.clone(),
                port: entry.port,
            })?;
            servers.push(ServerTarget {
                name: entry.name,
                host: entry.host.trim().to_string(),
                port,
                use_tls: entry.secure,
                ignore_cert_validation: entry.ignore_cert_validation,
            });
        }

        Ok(AppConfig {
            title: config.title,
            disclaimer: config.disclaimer,
            servers,
        })
    }
}

impl AppConfig {
    /// Load and validate the config file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&content)?;
        tracing::info!(
            "Loaded {} server(s) from {}",
            config.servers.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parse and validate a config document
    pub fn from_json(source: &str) -> Result<Self, ConfigError> {
        ConfigFile::from_json(source)?.into_app_config()
    }

    /// The disclaimer split across its two screen rows
    pub fn disclaimer_lines(&self) -> (String, String) {
        wrap(&self.disclaimer, MAX_DISCLAIMER_WIDTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn server(name: &str, host: &str, port: i64) -> ServerEntry {
        ServerEntry {
            name: name.to_string(),
            host: host.to_string(),
            port,
            ..Default::default()
        }
    }

    fn file_with(servers: Vec<ServerEntry>) -> ConfigFile {
        ConfigFile {
            title: "Test".to_string(),
            disclaimer: String::new(),
            servers,
        }
    }

    #[test]
    fn test_wrap_cases() {
        let cases = [
            ("This is a short line", 80, "This is a short line", ""),
            ("", 80, "", ""),
            ("    This is a short line        ", 23, "This is a short line", ""),
            (
                "Once upon a time, there was a programmer.",
                26,
                "Once upon a time, there",
                "was a programmer.",
            ),
            ("abcdefghijklmnopqrstuvwxyz", 16, "abcdefghijklmnop", "qrstuvwxyz"),
        ];

        for (input, width, line1, line2) in cases {
            assert_eq!(
                wrap(input, width),
                (line1.to_string(), line2.to_string()),
                "wrapping {:?} at {}",
                input,
                width
            );
        }
    }

    #[test]
    fn test_wrap_line_bounds() {
        let text = "the quick brown fox jumps over the lazy dog again and again";
        for width in 1..text.len() + 2 {
            let (line1, line2) = wrap(text, width);
            assert!(line1.chars().count() <= width);
            assert!(line2.len() < text.len());
        }

        // Once the first space is inside the window the break lands on a space
        for width in 4..text.len() {
            let (line1, line2) = wrap(text, width);
            assert!(!line2.starts_with(' '));
            assert!(!line1.ends_with(' '));
            assert_eq!(line1.len() + line2.len() + 1, text.len());
        }
    }

    #[test]
    fn test_wrap_repeated_spaces_at_break() {
        // Extra spaces after the break never start the second line
        assert_eq!(
            wrap("aaaa  bbbb", 5),
            ("aaaa".to_string(), "bbbb".to_string())
        );
        assert_eq!(
            wrap("aaaa   bbbb", 6),
            ("aaaa ".to_string(), "bbbb".to_string())
        );

        // Break on the last column with another space just past it: the raw
        // remainder is 80 characters, 79 once its leading space is dropped
        let disclaimer = format!("{}  {}", "a".repeat(78), "b".repeat(79));
        let (line1, line2) = wrap(&disclaimer, MAX_DISCLAIMER_WIDTH);
        assert_eq!(line1, "a".repeat(78));
        assert_eq!(line2, "b".repeat(79));

        let mut file = file_with(Vec::new());
        file.disclaimer = disclaimer;
        assert!(file.validate().is_ok());
    }

    #[test]
    fn test_wrap_hard_break_may_overflow() {
        let long = "x".repeat(200);
        let (line1, line2) = wrap(&long, 79);
        assert_eq!(line1.len(), 79);
        assert_eq!(line2.len(), 121);
    }

    #[test]
    fn test_load_json() {
        let json = r#"{
            "title": "  ",
            "disclaimer": "  Authorized use only.  ",
            "servers": [
                {"name": "Prod", "host": " mvs.example.com ", "port": 23},
                {"name": "Secure", "host": "10.0.0.5", "port": 992, "secure": true, "ignoreCertValidation": true}
            ]
        }"#;
        let config = AppConfig::from_json(json).unwrap();
        assert_eq!(config.title, DEFAULT_TITLE);
        assert_eq!(config.disclaimer, "Authorized use only.");
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].address(), "mvs.example.com:23");
        assert!(!config.servers[0].use_tls);
        assert!(config.servers[1].use_tls);
        assert!(config.servers[1].ignore_cert_validation);
    }

    #[test]
    fn test_load_capitalised_keys() {
        let json = r#"{
            "Title": "Legacy",
            "Disclaimer": "Old style",
            "Servers": [
                {"Name": "Prod", "Host": "mvs.example.com", "Port": 992, "Secure": true, "IgnoreCertValidation": true}
            ]
        }"#;
        let config = AppConfig::from_json(json).unwrap();
        assert_eq!(config.title, "Legacy");
        assert_eq!(config.disclaimer, "Old style");
        assert_eq!(
            config.servers,
            vec![ServerTarget {
                name: "Prod".to_string(),
                host: "mvs.example.com".to_string(),
                port: 992,
                use_tls: true,
                ignore_cert_validation: true,
            }]
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"title": "Lab", "servers": [{{"name": "A", "host": "a", "port": 3270}}]}}"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.title, "Lab");
        assert_eq!(config.servers[0].port, 3270);
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::load("/nonexistent/config.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_malformed_json() {
        let err = AppConfig::from_json("{\"servers\": [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_title_bounds() {
        let mut config = file_with(vec![]);
        config.title = "T".repeat(80);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TitleTooLong { length: 80, .. })
        ));

        config.title = "Caf\u{e9}".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TitleCharacter('\u{e9}'))
        ));

        config.title = "System A: (prod) #1 - users@site".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_disclaimer_bounds() {
        let mut config = file_with(vec![]);
        config.disclaimer = "No tabs\there".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DisclaimerCharacter('\t'))
        ));

        config.disclaimer = "word ".repeat(31).trim().to_string();
        assert!(config.validate().is_ok());

        config.disclaimer = "word ".repeat(40).trim().to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DisclaimerTooLong { .. })
        ));

        // No space to break on: the hard-break overflow is rejected
        config.disclaimer = "x".repeat(160);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DisclaimerTooLong { .. })
        ));
    }

    #[test]
    fn test_server_count_bound() {
        let servers = (0..MAX_SERVERS).map(|i| server(&format!("s{i}"), "h", 23)).collect();
        assert!(file_with(servers).validate().is_ok());

        let servers = (0..=MAX_SERVERS).map(|i| server(&format!("s{i}"), "h", 23)).collect();
        assert!(matches!(
            file_with(servers).validate(),
            Err(ConfigError::TooManyServers { count: 1000, .. })
        ));
    }

    #[test]
    fn test_server_entry_bounds() {
        let blank = file_with(vec![server("ok", "h", 23), server("   ", "h", 23)]);
        assert!(matches!(blank.validate(), Err(ConfigError::BlankName(1))));

        let long = file_with(vec![server(&"n".repeat(66), "h", 23)]);
        assert!(matches!(long.validate(), Err(ConfigError::NameTooLong { .. })));
        let max = file_with(vec![server(&"n".repeat(65), "h", 23)]);
        assert!(max.validate().is_ok());

        let no_host = file_with(vec![server("a", " ", 23)]);
        assert!(matches!(no_host.validate(), Err(ConfigError::MissingHost(_))));

        for port in [0, -1, 65536] {
            let bad = file_with(vec![server("a", "h", port)]);
            assert!(matches!(
                bad.validate(),
                Err(ConfigError::InvalidPort { .. })
            ));
        }
        let edge = file_with(vec![server("a", "h", 1), server("b", "h", 65535)]);
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_duplicate_names_allowed() {
        let dup = file_with(vec![server("Same", "a", 23), server("Same", "b", 23)]);
        assert!(dup.into_app_config().is_ok());
    }
}
