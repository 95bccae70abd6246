//! screencast-recorder
//!
//! Records the primary display together with keyboard and mouse events,
//! packages each session into a single archive and uploads it to a
//! collector with durable retry.

mod capture;
mod clock;
mod config;
mod crash;
mod data;
mod error;
mod input;
mod logging;
mod mux;
mod session;
mod upload;

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use capture::{FfmpegGrabber, ScreenGrabber};
use clock::Clock;
use config::Config;
use session::Recorder;
use upload::{HttpDelivery, QueueOptions, RetryPolicy, UploadQueue};

const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Default, PartialEq)]
struct Args {
    help: bool,
    config: Option<PathBuf>,
    duration: Option<Duration>,
    upload: Option<PathBuf>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => parsed.help = true,
            "-c" | "--config" => {
                let path = args.next().context("--config requires a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "-d" | "--duration" => {
                let secs = args.next().context("--duration requires seconds")?;
                let secs: u64 = secs
                    .parse()
                    .with_context(|| format!("Invalid duration: {}", secs))?;
                parsed.duration = Some(Duration::from_secs(secs));
            }
            "-u" | "--upload" => {
                let path = args.next().context("--upload requires an archive path")?;
                parsed.upload = Some(PathBuf::from(path));
            }
            other => bail!("Unknown argument: {}", other),
        }
    }

    Ok(parsed)
}

fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.help {
        print_help();
        return Ok(());
    }

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = logging::init_logging()?;

    match logging::get_log_dir().and_then(|dir| Ok(crash::init_crash_handler(&dir)?)) {
        Ok(path) => info!("Crash log: {:?}", path),
        Err(e) => warn!("Crash handler not installed: {}", e),
    }

    info!("screencast-recorder {} starting...", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Ok(path) = config.config_path() {
        info!("Configuration loaded from {:?}", path);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let uploads = runtime.block_on(async { start_upload_queue(&config) })?;

    if let Some(archive) = &args.upload {
        uploads.submit(archive)?;
        runtime.block_on(drain(uploads, &config));
        return Ok(());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, stopping recording...");
        handler_stop.store(true, Ordering::SeqCst);
    })?;

    let limit = args
        .duration
        .or(config.recording.max_duration_secs.map(Duration::from_secs));

    let clock = Clock::new();
    let grabber = FfmpegGrabber::new(&config.capture);
    let source = input::create_input_source(grabber.display_size())?;
    let mut recorder =
        Recorder::new(&config, clock, Box::new(grabber), source).with_upload_queue(uploads);

    recorder.start()?;
    if let Some(id) = recorder.session_id() {
        info!("Session id: {}", id);
    }
    match limit {
        Some(limit) => info!("Recording for up to {:?}, press Ctrl+C to stop early", limit),
        None => info!("Recording, press Ctrl+C to stop"),
    }

    let started = Instant::now();
    while !stop.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            info!("Duration limit reached");
            break;
        }
        std::thread::sleep(STOP_POLL);
    }

    let stats = recorder.frame_stats();
    info!(
        "Captured {} frames ({} dropped), {} input events",
        stats.captured_frames,
        stats.dropped_frames,
        recorder.event_count()
    );

    match recorder.stop() {
        Ok(Some(archive)) => info!("Recording saved to {:?}", archive),
        Ok(None) => warn!("No recording was in progress"),
        Err(e) => error!("Recording could not be packaged: {}", e),
    }

    if let Some(uploads) = recorder.take_upload_queue() {
        runtime.block_on(drain(uploads, &config));
    }

    info!("Shutdown complete");
    Ok(())
}

fn start_upload_queue(config: &Config) -> Result<UploadQueue> {
    let delivery = HttpDelivery::new(&config.upload)?;
    info!("Uploading to {}", delivery.endpoint());

    let options = QueueOptions {
        policy: RetryPolicy::from_config(&config.upload),
        delete_after_upload: config.upload.delete_after_upload,
    };
    Ok(UploadQueue::start(config.queue_directory(), delivery, options)?)
}

async fn drain(uploads: UploadQueue, config: &Config) {
    let timeout = Duration::from_secs(config.upload.drain_timeout_secs);
    if !uploads.wait_idle(timeout).await {
        warn!(
            "{} upload(s) still pending after {:?}; they resume on next start",
            uploads.pending_count(),
            timeout
        );
    }
    uploads.shutdown().await;
}

fn print_help() {
    println!("screencast-recorder - Paired screencast and input capture");
    println!();
    println!("USAGE:");
    println!("    screencast-recorder [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help               Print this help message");
    println!("    -c, --config <PATH>      Use this config file instead of the default");
    println!("    -d, --duration <SECS>    Stop recording after SECS seconds");
    println!("    -u, --upload <ARCHIVE>   Upload an existing archive and exit");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG                       Set log level (e.g., debug, info, warn)");
    println!("    SCREENCAST_RECORDER_LOG_PATH   Override the log directory");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["--config", "/tmp/c.toml", "-d", "90"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("/tmp/c.toml")));
        assert_eq!(parsed.duration, Some(Duration::from_secs(90)));
        assert!(!parsed.help);
        assert!(parsed.upload.is_none());

        let parsed = args(&["--upload", "rec.zip"]).unwrap();
        assert_eq!(parsed.upload, Some(PathBuf::from("rec.zip")));

        assert_eq!(args(&[]).unwrap(), Args::default());
        assert!(args(&["-h"]).unwrap().help);
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(args(&["--duration", "soon"]).is_err());
        assert!(args(&["--config"]).is_err());
        assert!(args(&["--frobnicate"]).is_err());
    }
}
