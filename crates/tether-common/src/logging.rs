//! Logging setup for tether
//!
//! Internal diagnostics go through `tracing`; this module provides the
//! shared subscriber configuration. Target and debugger output destined
//! for the user travel through the session's output writers instead and
//! never pass through here.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Global file logger handle
static FILE_LOGGER: Mutex<Option<File>> = Mutex::new(None);

/// Logging configuration matching config file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable console logging
    #[serde(default = "default_true")]
    pub console_enabled: bool,

    /// Enable file logging
    #[serde(default)]
    pub file_enabled: bool,

    /// Log file path
    #[serde(default = "default_log_path")]
    pub file_path: String,

    /// Include module target
    #[serde(default = "default_true")]
    pub show_target: bool,

    /// Use ANSI colors
    #[serde(default = "default_true")]
    pub ansi_colors: bool,

    /// Log level as string
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}

fn default_log_path() -> String {
    "tether.log".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
            file_enabled: false,
            file_path: default_log_path(),
            show_target: true,
            ansi_colors: true,
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// Create a debug configuration with verbose output
    pub fn debug() -> Self {
        Self {
            level: "debug".to_string(),
            ..Default::default()
        }
    }

    /// Create config with file logging enabled
    pub fn with_file(mut self, path: &str) -> Self {
        self.file_enabled = true;
        self.file_path = path.to_string();
        self
    }

    /// Set log level
    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    /// Parse level string to tracing Level
    pub fn get_level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

fn file_writer() -> Box<dyn Write + Send> {
    if let Ok(guard) = FILE_LOGGER.lock() {
        if let Some(ref file) = *guard {
            if let Ok(f) = file.try_clone() {
                return Box::new(f);
            }
        }
    }
    Box::new(std::io::sink())
}

/// Initialize logging with the given configuration
///
/// Can be called multiple times but only the first call takes effect for
/// the subscriber.
pub fn init_logging(config: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.file_enabled && !config.file_path.is_empty() {
        if let Ok(file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.file_path)
        {
            if let Ok(mut guard) = FILE_LOGGER.lock() {
                *guard = Some(file);
            }
        }
    }

    let console_layer = config.console_enabled.then(|| {
        fmt::layer()
            .with_ansi(config.ansi_colors)
            .with_target(config.show_target)
            .with_writer(std::io::stderr)
    });

    let file_layer = config.file_enabled.then(|| {
        fmt::layer()
            .with_ansi(false)
            .with_target(config.show_target)
            .with_writer(file_writer)
    });

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Initialize logging from a TOML config file with a `[logging]` table
pub fn init_logging_from_file(path: &str) -> Result<(), String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read config file: {}", e))?;

    #[derive(Deserialize)]
    struct ConfigWrapper {
        #[serde(default)]
        logging: LogConfig,
    }

    let wrapper: ConfigWrapper =
        toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {}", e))?;

    init_logging(&wrapper.logging);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert!(config.console_enabled);
        assert!(!config.file_enabled);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_log_config_debug() {
        let config = LogConfig::debug();
        assert_eq!(config.level, "debug");
    }

    #[test]
    fn test_log_config_with_file() {
        let config = LogConfig::default().with_file("test.log");
        assert!(config.file_enabled);
        assert_eq!(config.file_path, "test.log");
    }

    #[test]
    fn test_get_level() {
        assert_eq!(LogConfig::default().get_level(), Level::INFO);
        assert_eq!(LogConfig::debug().get_level(), Level::DEBUG);
        assert_eq!(
            LogConfig::default().with_level("warning").get_level(),
            Level::WARN
        );
        assert_eq!(
            LogConfig::default().with_level("bogus").get_level(),
            Level::INFO
        );
    }

    #[test]
    fn test_config_serialization() {
        let config = LogConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: LogConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.console_enabled, config.console_enabled);
        assert_eq!(parsed.level, config.level);
    }
}
