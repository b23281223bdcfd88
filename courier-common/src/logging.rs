use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{Metadata, metadata::LevelFilter};
use tracing_subscriber::{
    Layer, filter::FilterFn, fmt::time::ChronoUtc, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, $($msg),*)
    };
}

#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::incoming!(level = TRACE, $($msg),*)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

const fn default_console() -> bool {
    false
}

fn default_file() -> Option<PathBuf> {
    Some(PathBuf::from("courier.log"))
}

/// Where log output is written
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Mirror log output to stdout
    #[serde(default = "default_console")]
    pub console: bool,

    /// Append log output to this file
    #[serde(default = "default_file")]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console: default_console(),
            file: default_file(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Unable to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("A global logger has already been installed: {0}")]
    AlreadyInitialised(String),
}

/// Resolve the level filter from an optional `LOG_LEVEL` value.
///
/// Unknown values fall back to `default` after complaining on stderr, since
/// the logger itself isn't available yet.
pub fn level_filter(value: Option<&str>, default: LevelFilter) -> LevelFilter {
    value.map_or(default, |level| {
        LevelFilter::from_str(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    })
}

fn courier_targets(metadata: &Metadata<'_>) -> bool {
    metadata.target().starts_with("courier")
}

/// Open (or create) a log file in append mode
///
/// # Errors
///
/// Returns an error if the file cannot be opened for writing
pub fn open_log_file(path: &Path) -> Result<File, LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::OpenFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened, or a subscriber is
/// already installed.
pub fn init(config: &LogConfig) -> Result<(), LoggingError> {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    let level = level_filter(std::env::var("LOG_LEVEL").ok().as_deref(), default);

    let file = config
        .file
        .as_deref()
        .map(open_log_file)
        .transpose()?
        .map(Arc::new);

    let file_layer = file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_timer(ChronoUtc::rfc_3339())
            .with_filter(level)
            .with_filter(FilterFn::new(courier_targets))
    });

    let console_layer = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_ansi(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_filter(level)
            .with_filter(FilterFn::new(courier_targets))
    });

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialised(e.to_string()))?;

    internal!(level = INFO, "------------------------------");
    internal!(level = INFO, "courier log started");

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_level_filter_parses_known_levels() {
        assert_eq!(
            level_filter(Some("warn"), LevelFilter::INFO),
            LevelFilter::WARN
        );
        assert_eq!(
            level_filter(Some("TRACE"), LevelFilter::INFO),
            LevelFilter::TRACE
        );
    }

    #[test]
    fn test_level_filter_falls_back() {
        assert_eq!(level_filter(None, LevelFilter::INFO), LevelFilter::INFO);
        assert_eq!(
            level_filter(Some("chatty"), LevelFilter::ERROR),
            LevelFilter::ERROR
        );
    }

    #[test]
    fn test_open_log_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.log");

        writeln!(open_log_file(&path).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_open_log_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("courier.log");

        let err = open_log_file(&path).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_default_config_writes_to_file_only() {
        let config = LogConfig::default();
        assert!(!config.console);
        assert_eq!(config.file, Some(PathBuf::from("courier.log")));
    }
}
