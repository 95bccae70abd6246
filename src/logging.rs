//! Console and daily-rolling file logging

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_BASENAME: &str = "screencast-recorder.log";
const LOG_DIR_ENV: &str = "SCREENCAST_RECORDER_LOG_PATH";
const LOG_RETENTION: Duration = Duration::from_secs(60 * 60 * 24 * 7);

#[cfg(target_os = "macos")]
const OSLOG_SUBSYSTEM: &str = "dev.screencast.recorder";

/// Directory holding rolled log files and crash.log
pub fn get_log_dir() -> Result<PathBuf> {
    match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => platform_log_dir(),
    }
}

/// Install the global subscriber.
/// Buffered file output is flushed when the returned guard drops.
pub fn init_logging() -> Result<WorkerGuard> {
    let log_dir = get_log_dir()?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", log_dir))?;
    let pruned = prune_old_logs(&log_dir, LOG_RETENTION);

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE_BASENAME));

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        );

    // Shows up under `log stream --predicate 'subsystem == "dev.screencast.recorder"'`
    #[cfg(target_os = "macos")]
    registry
        .with(tracing_oslog::OsLogger::new(OSLOG_SUBSYSTEM, "default"))
        .init();

    #[cfg(not(target_os = "macos"))]
    registry.init();

    tracing::debug!("Logging to {:?} ({} stale files pruned)", log_dir, pruned);
    Ok(guard)
}

fn platform_log_dir() -> Result<PathBuf> {
    if cfg!(target_os = "macos") {
        let home = std::env::var_os("HOME").context("HOME is not set")?;
        return Ok(PathBuf::from(home).join("Library/Logs/screencast-recorder"));
    }

    let dirs = ProjectDirs::from("dev", "screencast", "recorder")
        .context("Failed to determine project directories for log path")?;
    let base = if cfg!(target_os = "windows") {
        dirs.data_local_dir().join("Logs")
    } else {
        dirs.state_dir().unwrap_or_else(|| dirs.data_local_dir()).join("logs")
    };
    Ok(base)
}

/// Delete rolled log files last modified more than `retention` ago.
/// Returns how many were removed.
fn prune_old_logs(log_dir: &Path, retention: Duration) -> usize {
    let Some(cutoff) = SystemTime::now().checked_sub(retention) else {
        return 0;
    };
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return 0;
    };

    entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(LOG_FILE_BASENAME))
        })
        .filter(|entry| {
            entry
                .metadata()
                .ok()
                .filter(|meta| meta.is_file())
                .and_then(|meta| meta.modified().ok())
                .is_some_and(|modified| modified < cutoff)
        })
        .filter(|entry| std::fs::remove_file(entry.path()).is_ok())
        .count()
}
