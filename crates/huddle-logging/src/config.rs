//! Configuration types for the logging system

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub default_level: String,

    /// Console output configuration
    pub console: ConsoleConfig,

    /// File output configuration
    pub file: Option<FileConfig>,

    /// JSONL formatting, shared by console and file output
    pub jsonl: JsonlConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig::default(),
            file: None,
            jsonl: JsonlConfig::default(),
        }
    }
}

impl LogConfig {
    /// Verbose, human-readable console output
    pub fn development() -> Self {
        Self {
            default_level: "debug".to_string(),
            console: ConsoleConfig {
                enabled: true,
                pretty: true,
                ansi: true,
            },
            ..Default::default()
        }
    }

    /// JSONL to daily-rotated files only
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            console: ConsoleConfig {
                enabled: false,
                ..ConsoleConfig::default()
            },
            file: Some(FileConfig {
                directory: log_dir,
                ..FileConfig::default()
            }),
            ..Default::default()
        }
    }

    /// Warnings only
    pub fn testing() -> Self {
        Self {
            default_level: "warn".to_string(),
            ..Default::default()
        }
    }
}

/// Console output configuration.
///
/// Console logs go to stderr so stdout stays free for program output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    /// Human-readable instead of JSONL
    pub pretty: bool,
    /// ANSI colors (pretty output only)
    pub ansi: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pretty: false, // JSONL by default
            ansi: false,
        }
    }
}

/// File output configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Directory for log files
    pub directory: PathBuf,
    /// File name prefix
    pub prefix: String,
    pub rotation: RotationStrategy,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "huddle".to_string(),
            rotation: RotationStrategy::Daily,
        }
    }
}

/// File rotation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// Single file, truncated on start
    Never,
}

/// JSONL formatting configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonlConfig {
    /// Flatten event fields to root level
    pub flatten_events: bool,
    /// Include span list in events
    pub include_spans: bool,
    /// Include current span details
    pub include_current_span: bool,
    /// Include thread ids
    pub include_thread_info: bool,
    /// Include file/line information
    pub include_location: bool,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            flatten_events: true,
            include_spans: true,
            include_current_span: true,
            include_thread_info: false,
            include_location: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.default_level, "info");
        assert!(config.console.enabled);
        assert!(!config.console.pretty); // JSONL by default
        assert!(config.file.is_none());
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert_eq!(config.default_level, "debug");
        assert!(config.console.pretty);
        assert!(config.console.ansi);
    }

    #[test]
    fn test_production_config() {
        let config = LogConfig::production(PathBuf::from("/var/log/huddle"));
        assert!(!config.console.enabled);
        let file = config.file.unwrap();
        assert_eq!(file.directory, PathBuf::from("/var/log/huddle"));
        assert_eq!(file.rotation, RotationStrategy::Daily);
    }

    #[test]
    fn test_partial_toml() {
        let config: LogConfig = toml::from_str(
            r#"
            default_level = "huddle_unread=debug,warn"

            [file]
            directory = "/tmp/huddle"
            rotation = "never"
            "#,
        )
        .unwrap();
        assert_eq!(config.default_level, "huddle_unread=debug,warn");
        assert!(config.console.enabled);
        let file = config.file.unwrap();
        assert_eq!(file.prefix, "huddle");
        assert_eq!(file.rotation, RotationStrategy::Never);
    }
}
