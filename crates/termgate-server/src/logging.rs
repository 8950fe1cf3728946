//! Tracing subscriber setup for the gateway binary

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CRATES: [&str; 3] = ["termgate_server", "termgate_protocol", "termgate_common"];

/// Level selected by the verbosity flags; `trace` wins over `debug`
pub fn log_level(debug: bool, trace: bool) -> Level {
    if trace {
        Level::TRACE
    } else if debug {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

fn env_filter(level: Level) -> EnvFilter {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives: Vec<String> = CRATES
        .iter()
        .map(|krate| format!("{}={}", krate, level))
        .collect();
    // Later directives win, so RUST_LOG goes last
    if let Ok(env) = std::env::var(EnvFilter::DEFAULT_ENV) {
        if !env.trim().is_empty() {
            directives.push(env);
        }
    }

    EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse_lossy(directives.join(","))
}

/// Install the global subscriber
///
/// Logs go to stderr, and additionally to `log_file` (appended, no colour) when
/// one is given. `RUST_LOG` directives are applied on top of the flag level.
pub fn init_logging(debug: bool, trace: bool, log_file: Option<&Path>) -> Result<()> {
    let level = log_level(debug, trace);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::debug!("Logging initialised at {}", level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(false, false), Level::INFO);
        assert_eq!(log_level(true, false), Level::DEBUG);
        assert_eq!(log_level(false, true), Level::TRACE);
        assert_eq!(log_level(true, true), Level::TRACE);
    }

    #[test]
    fn test_env_filter_builds() {
        let filter = env_filter(Level::DEBUG).to_string().to_ascii_lowercase();
        assert!(filter.contains("termgate_server=debug"));
        assert!(filter.contains("termgate_protocol=debug"));
    }
}
