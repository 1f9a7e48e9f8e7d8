//! File logging for the update server.
//!
//! Each run writes one timestamped file into `<root>/logs/`. Files older
//! than the retention period are removed at startup.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Default log retention in hours.
pub const DEFAULT_LOG_RETENTION_HOURS: u32 = 24 * 7;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory receiving the log files.
    pub directory: PathBuf,
    /// Log retention period in hours.
    pub retention_hours: u32,
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Whether logging is enabled.
    pub enabled: bool,
}

impl LogConfig {
    /// Default configuration writing into `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            retention_hours: DEFAULT_LOG_RETENTION_HOURS,
            level: DEFAULT_LOG_LEVEL.to_string(),
            enabled: true,
        }
    }

    /// Parses log level from string.
    #[must_use]
    pub fn parse_level(value: &str) -> String {
        match value.to_lowercase().as_str() {
            "trace" => "trace".to_string(),
            "debug" => "debug".to_string(),
            "info" => "info".to_string(),
            "warn" | "warning" => "warn".to_string(),
            "error" => "error".to_string(),
            "off" | "none" | "disabled" => "off".to_string(),
            _ => DEFAULT_LOG_LEVEL.to_string(),
        }
    }

    /// Parses retention hours from string.
    #[must_use]
    pub fn parse_retention(value: &str) -> u32 {
        value.parse().unwrap_or(DEFAULT_LOG_RETENTION_HOURS)
    }
}

/// Path of a new log file in `directory`.
#[must_use]
pub fn new_log_path(directory: &Path) -> PathBuf {
    let now = chrono::Local::now();
    let filename = format!("projupdate_{}.log", now.format("%Y-%m-%d_%H-%M-%S"));
    directory.join(filename)
}

/// Deletes `.log` files in `directory` older than the retention period.
pub fn cleanup_old_logs(directory: &Path, retention_hours: u32) -> io::Result<u32> {
    if !directory.exists() {
        return Ok(0);
    }

    let retention = Duration::from_secs(u64::from(retention_hours) * 3600);
    let now = SystemTime::now();
    let mut deleted = 0;

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());

        if age.is_some_and(|age| age > retention) && fs::remove_file(&path).is_ok() {
            deleted += 1;
        }
    }

    Ok(deleted)
}

/// Initializes file logging.
///
/// Returns the writer guard, which must stay alive for buffered lines to
/// be flushed. Returns `None` when logging is disabled.
pub fn init(config: &LogConfig) -> io::Result<Option<WorkerGuard>> {
    if !config.enabled || config.level == "off" {
        return Ok(None);
    }

    fs::create_dir_all(&config.directory)?;
    let deleted = cleanup_old_logs(&config.directory, config.retention_hours)?;

    let log_path = new_log_path(&config.directory);
    let log_file = File::create(&log_path)?;
    let (writer, guard) = tracing_appender::non_blocking(log_file);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    tracing::info!("projupdate logging initialized");
    tracing::info!("Log file: {}", log_path.display());
    tracing::info!("Log level: {}", config.level);
    tracing::info!("Log retention: {} hours", config.retention_hours);
    if deleted > 0 {
        tracing::info!("Cleaned up {} old log file(s)", deleted);
    }

    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_new() {
        let config = LogConfig::new("/data/logs");
        assert_eq!(config.retention_hours, DEFAULT_LOG_RETENTION_HOURS);
        assert_eq!(config.level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.directory, PathBuf::from("/data/logs"));
        assert!(config.enabled);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(LogConfig::parse_level("debug"), "debug");
        assert_eq!(LogConfig::parse_level("DEBUG"), "debug");
        assert_eq!(LogConfig::parse_level("warning"), "warn");
        assert_eq!(LogConfig::parse_level("none"), "off");
        assert_eq!(LogConfig::parse_level("invalid"), DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn test_parse_retention() {
        assert_eq!(LogConfig::parse_retention("48"), 48);
        assert_eq!(
            LogConfig::parse_retention("invalid"),
            DEFAULT_LOG_RETENTION_HOURS
        );
    }

    #[test]
    fn test_cleanup_keeps_fresh_and_foreign_files() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("a.log"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), 1).unwrap(), 0);
        assert!(dir.path().join("a.log").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_cleanup_missing_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(cleanup_old_logs(&dir.path().join("none"), 1).unwrap(), 0);
    }

    #[test]
    fn test_new_log_path() {
        let path = new_log_path(Path::new("/data/logs"));
        assert!(path.starts_with("/data/logs"));
        assert!(path.to_string_lossy().ends_with(".log"));
    }
}
