//! Crash diagnostics
//!
//! Panics are written with a full backtrace to a dedicated crash log that
//! is flushed synchronously, so the report survives even if the process
//! dies before the non-blocking log writer drains.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::error;

/// Crash log file path, set during initialization
static CRASH_LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

const CRASH_LOG_FILENAME: &str = "crash.log";

/// Install the panic hook. Call this early in main().
///
/// Returns the path to the crash log file.
pub fn init_crash_handler(log_dir: &Path) -> std::io::Result<PathBuf> {
    let crash_log_path = log_dir.join(CRASH_LOG_FILENAME);

    // Fail early if the crash log cannot be written
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&crash_log_path)?;
    let _ = CRASH_LOG_PATH.set(crash_log_path.clone());

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Unknown panic payload".to_string());
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        handle_panic(&message, &location);
        default_hook(panic_info);
    }));

    Ok(crash_log_path)
}

fn handle_panic(message: &str, location: &str) {
    let backtrace = std::backtrace::Backtrace::force_capture();
    let report = format_panic_report(message, location, &backtrace.to_string());

    if let Some(path) = CRASH_LOG_PATH.get() {
        append_synced(path, &report);
    }

    // May not be flushed if we're crashing
    error!(
        "PANIC at {}: {} (see crash.log for full backtrace)",
        location, message
    );
}

fn format_panic_report(message: &str, location: &str, backtrace: &str) -> String {
    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
    let separator = "=".repeat(80);
    format!(
        "\n{sep}\n\
         PANIC at {ts}\n\
         {sep}\n\
         Location: {loc}\n\
         Message: {msg}\n\
         \n\
         Backtrace:\n\
         {bt}\n\
         {sep}\n",
        sep = separator,
        ts = timestamp,
        loc = location,
        msg = message,
        bt = backtrace
    )
}

fn append_synced(path: &Path, text: &str) {
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = file.write_all(text.as_bytes());
        let _ = file.flush();
        let _ = file.sync_all();
    }
}

/// Log a critical operation marker to the crash log.
/// Call this before operations that might crash to help diagnose where crashes occur.
pub fn log_critical_operation(operation: &str) {
    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
    let msg = format!("[{}] CRITICAL_OP: {}\n", timestamp, operation);

    if let Some(path) = CRASH_LOG_PATH.get() {
        append_synced(path, &msg);
    }
}
