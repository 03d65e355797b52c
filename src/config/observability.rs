//! `[logging]` section
//!
//! ```toml
//! [logging]
//! level = "info"
//! format = "compact"        # full, compact, json (stdout)
//! file_enabled = true       # JSON lines, in addition to stdout
//! file_dir = "./logs"
//! file_rotation = "daily"   # hourly, daily, never
//! file_prefix = "gateway"
//! ```

use serde::Deserialize;
use std::path::PathBuf;

/// How often the log file rolls over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

impl LogRotation {
    /// Unknown values fall back to daily
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Self::Hourly,
            "never" => Self::Never,
            _ => Self::Daily,
        }
    }
}

/// Shape of the stdout log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConsoleFormat {
    /// tracing-subscriber's default multi-field line
    Full,
    #[default]
    Compact,
    /// One JSON object per line, for log shippers reading stdout
    Json,
}

impl ConsoleFormat {
    /// Unknown values fall back to compact
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Self::Full,
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Compact => "compact",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Level for this crate's targets when RUST_LOG is unset
    pub level: String,
    pub console_format: ConsoleFormat,
    pub file_enabled: bool,
    pub file_dir: PathBuf,
    pub file_rotation: LogRotation,
    /// File name prefix; the appender adds the date suffix
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            console_format: ConsoleFormat::Compact,
            file_enabled: false,
            file_dir: PathBuf::from("./logs"),
            file_rotation: LogRotation::Daily,
            file_prefix: "gateway".into(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileLogging {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file_enabled: Option<bool>,
    pub file_dir: Option<String>,
    pub file_rotation: Option<String>,
    pub file_prefix: Option<String>,
}

impl LoggingConfig {
    pub fn from_file(file: Option<FileLogging>) -> Self {
        let Some(file) = file else {
            return Self::default();
        };
        let mut config = Self::default();

        if let Some(level) = file.level.filter(|l| !l.trim().is_empty()) {
            config.level = level;
        }
        if let Some(format) = file.format {
            config.console_format = ConsoleFormat::parse(&format);
        }
        if let Some(enabled) = file.file_enabled {
            config.file_enabled = enabled;
        }
        if let Some(dir) = file.file_dir {
            config.file_dir = PathBuf::from(dir);
        }
        if let Some(rotation) = file.file_rotation {
            config.file_rotation = LogRotation::parse(&rotation);
        }
        if let Some(prefix) = file.file_prefix.filter(|p| !p.is_empty()) {
            config.file_prefix = prefix;
        }
        config
    }
}
