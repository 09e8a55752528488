//! Logging System
//!
//! Console logger for debugging, daily rolling file logger otherwise.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE: &str = "cfw_helper.log";

/// Log directory (next to EXE)
fn get_log_dir() -> PathBuf {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            return exe_dir.join("logs");
        }
    }
    // Fallback: current working directory
    PathBuf::from(".").join("logs")
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes the console logger
pub fn init_console_logger() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(env_filter())
        .try_init()
        .context("logger already initialized")?;

    Ok(())
}

/// Initializes the file logger, keeping the newest `keep` daily files.
///
/// The returned guard flushes pending lines on drop and must live as long as
/// the application.
pub fn init_file_logger(keep: usize) -> Result<WorkerGuard> {
    let log_dir = get_log_dir();
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("could not create {}", log_dir.display()))?;

    // Today's file is created by the appender, so make room for it
    let removed = cleanup_old_logs(&log_dir, keep.saturating_sub(1), LOG_FILE);

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_target(false).with_ansi(false))
        .with(env_filter())
        .try_init()
        .context("logger already initialized")?;

    if removed > 0 {
        info!("{} old log file(s) deleted", removed);
    }

    Ok(guard)
}

/// Deletes old log files with specific prefix, keeps only the newest N.
/// Returns the number of deleted files.
fn cleanup_old_logs(log_dir: &Path, keep_count: usize, prefix: &str) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    let mut log_files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(prefix))
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| {
        let time_a = a.metadata().and_then(|m| m.modified()).ok();
        let time_b = b.metadata().and_then(|m| m.modified()).ok();
        time_b.cmp(&time_a)
    });

    let mut removed = 0;
    for old_file in log_files.iter().skip(keep_count) {
        match fs::remove_file(old_file.path()) {
            Ok(()) => removed += 1,
            Err(e) => error!("Could not delete old log file {}: {}", old_file.path().display(), e),
        }
    }
    removed
}
