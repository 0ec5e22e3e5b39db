use crate::config::LoggingConfig;
use crate::error::{ConductorError, Result};
use std::fs;
use std::path::Path;
use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();
const MAX_LOG_FILES: usize = 7; // Keep 7 days of logs

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global tracing subscriber: console output always, plus a
/// daily-rotated JSON file when `config.directory` is set. Only the first
/// call has any effect.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let mut outcome = Ok(());

    INIT.call_once(|| {
        outcome = install(config);
    });

    outcome
}

fn install(config: &LoggingConfig) -> Result<()> {
    let file_layer = match &config.directory {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            cleanup_old_logs(dir, &config.file_prefix);

            let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .build(dir)
                .map_err(|e| ConductorError::system(format!("Failed to create file appender: {}", e)))?;

            Some(
                fmt::Layer::new()
                    .json()
                    .with_writer(file_appender)
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(true)
                    .with_target(true)
                    .with_ansi(false)
                    .with_filter(env_filter(&config.level)),
            )
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::Layer::new()
                .with_thread_ids(true)
                .with_target(true)
                .with_ansi(true)
                .with_filter(env_filter(&config.level)),
        )
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ConductorError::system(format!("Failed to set tracing subscriber: {}", e)))
}

fn cleanup_old_logs(log_dir: &Path, prefix: &str) {
    if let Ok(entries) = fs::read_dir(log_dir) {
        let mut log_files: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .map(|ext| ext == "log")
                    .unwrap_or(false)
            })
            .collect();

        // Sort by modification time (newest first)
        log_files.sort_by_key(|entry| {
            std::cmp::Reverse(
                entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            )
        });

        for old_file in log_files.iter().skip(MAX_LOG_FILES) {
            let _ = fs::remove_file(old_file.path());
        }
    }
}
