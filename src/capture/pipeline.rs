//! Frame pipeline: a capture thread sampling the display at a fixed cadence
//! and an encode thread streaming frames into the encoder subprocess

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::CaptureConfig;
use crate::error::{Error, Result};

use super::encoder::{build_encoder_args, probe_backend, EncoderKillHandle, EncoderProcess, FrameSink};
use super::frame::{capture_region, fit_frame, frame_len, make_even, CapturedFrame, Region};
use super::grabber::ScreenGrabber;

/// Frames in flight between capture and encode
pub const FRAME_CHANNEL_CAPACITY: usize = 2;

const CAPTURE_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const ENCODE_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Frame counts for one recording
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub captured_frames: u64,
    /// Frames discarded because the encoder had not caught up
    pub dropped_frames: u64,
    pub encoded_frames: u64,
}

#[derive(Default)]
struct FrameCounters {
    captured: AtomicU64,
    dropped: AtomicU64,
    encoded: AtomicU64,
}

impl FrameCounters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            captured_frames: self.captured.load(Ordering::Relaxed),
            dropped_frames: self.dropped.load(Ordering::Relaxed),
            encoded_frames: self.encoded.load(Ordering::Relaxed),
        }
    }
}

pub struct FramePipeline {
    config: CaptureConfig,
    clock: Clock,
    resolution: (u32, u32),
    region: Region,
    grabber: Option<Box<dyn ScreenGrabber>>,
    running: Arc<AtomicBool>,
    counters: Arc<FrameCounters>,
    capture_thread: Option<JoinHandle<Box<dyn ScreenGrabber>>>,
    encode_thread: Option<JoinHandle<()>>,
    encoder_kill: Option<EncoderKillHandle>,
    output_path: Option<PathBuf>,
}

impl FramePipeline {
    /// Output resolution comes from the config, or the grabber's display size
    pub fn new(mut config: CaptureConfig, clock: Clock, grabber: Box<dyn ScreenGrabber>) -> Self {
        config.fps = config.fps.max(1);
        let display = grabber.display_size();
        let (width, height) = match (config.width, config.height) {
            (Some(w), Some(h)) => (w, h),
            _ => display,
        };
        let resolution = (make_even(width), make_even(height));
        let region = capture_region(display, resolution);

        info!(
            "Frame pipeline: {}x{} at {} fps from display region {}x{}+{}+{}",
            resolution.0,
            resolution.1,
            config.fps,
            region.width,
            region.height,
            region.x,
            region.y
        );

        Self {
            config,
            clock,
            resolution,
            region,
            grabber: Some(grabber),
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(FrameCounters::default()),
            capture_thread: None,
            encode_thread: None,
            encoder_kill: None,
            output_path: None,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn fps(&self) -> u32 {
        self.config.fps
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Start capturing into `output_path`.
    ///
    /// Fails with [`Error::EncoderUnavailable`] when no H.264 encoder is
    /// usable; the caller records without video in that case.
    pub fn start(&mut self, output_path: &Path) -> Result<()> {
        if self.capture_thread.is_some() || self.encode_thread.is_some() {
            debug!("Frame pipeline already started");
            return Ok(());
        }

        let mut grabber = self
            .grabber
            .take()
            .ok_or_else(|| Error::Grab("screen grabber unavailable".to_string()))?;

        let backend = match probe_backend(&self.config.encoder_program) {
            Ok(backend) => backend,
            Err(e) => {
                error!("{}; recording will have no video", e);
                self.grabber = Some(grabber);
                return Err(e);
            }
        };

        let (width, height) = self.resolution;
        let fps = self.config.fps;
        let args = build_encoder_args(backend, width, height, fps, output_path);
        let mut encoder = match EncoderProcess::spawn(&self.config.encoder_program, &args, output_path) {
            Ok(encoder) => encoder,
            Err(e) => {
                self.grabber = Some(grabber);
                return Err(e);
            }
        };

        self.counters = Arc::new(FrameCounters::default());
        self.encoder_kill = Some(encoder.kill_handle());
        self.output_path = Some(output_path.to_path_buf());
        self.running.store(true, Ordering::SeqCst);

        let (tx, rx) = crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);

        let running = self.running.clone();
        let counters = self.counters.clone();
        let clock = self.clock.clone();
        let region = self.region;
        self.capture_thread = Some(
            thread::Builder::new()
                .name("frame-capture".to_string())
                .spawn(move || {
                    capture_loop(grabber.as_mut(), region, &clock, fps, tx, &running, &counters);
                    grabber
                })?,
        );

        let running = self.running.clone();
        let counters = self.counters.clone();
        let target = self.resolution;
        self.encode_thread = Some(
            thread::Builder::new()
                .name("frame-encode".to_string())
                .spawn(move || {
                    if let Err(e) = encode_loop(&rx, &mut encoder, target, &running, &counters) {
                        error!("Encoding stopped: {}", e);
                    }
                    match encoder.finish() {
                        Ok(()) => info!("Encoder finished {:?}", encoder.output_path()),
                        Err(e) => error!("Encoder did not finish cleanly: {}", e),
                    }
                })?,
        );

        info!("Frame pipeline started, writing {:?}", output_path);
        Ok(())
    }

    /// Halt both roles and return the video path.
    /// Returns `None` if the pipeline was never started.
    pub fn stop(&mut self) -> Option<PathBuf> {
        if self.capture_thread.is_none() && self.encode_thread.is_none() {
            return None;
        }

        info!("Stopping frame pipeline");
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.capture_thread.take() {
            match join_with_timeout(handle, CAPTURE_JOIN_TIMEOUT) {
                Some(grabber) => self.grabber = Some(grabber),
                None => warn!("Capture thread did not stop within {:?}", CAPTURE_JOIN_TIMEOUT),
            }
        }

        if let Some(handle) = self.encode_thread.take() {
            if join_with_timeout(handle, ENCODE_JOIN_TIMEOUT).is_none() {
                warn!(
                    "Encode thread did not stop within {:?}, killing encoder",
                    ENCODE_JOIN_TIMEOUT
                );
                if let Some(kill) = &self.encoder_kill {
                    kill.kill();
                }
            }
        }
        self.encoder_kill = None;

        let stats = self.stats();
        info!(
            "Frame pipeline stopped: {} captured, {} dropped, {} encoded",
            stats.captured_frames, stats.dropped_frames, stats.encoded_frames
        );

        self.output_path.take()
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Join a thread, giving up after `timeout`. The thread is left detached
/// if it does not finish in time.
fn join_with_timeout<T>(handle: JoinHandle<T>, timeout: Duration) -> Option<T> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(10));
    }
    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            error!("Pipeline thread panicked");
            None
        }
    }
}

/// Sample the display every `1/fps` seconds and offer each frame to the
/// encoder without blocking. A full channel drops the frame.
fn capture_loop(
    grabber: &mut dyn ScreenGrabber,
    region: Region,
    clock: &Clock,
    fps: u32,
    tx: Sender<CapturedFrame>,
    running: &AtomicBool,
    counters: &FrameCounters,
) {
    let interval = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
    let mut last_sample: Option<Instant> = None;

    while running.load(Ordering::SeqCst) {
        if let Some(last) = last_sample {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
                continue;
            }
        }
        last_sample = Some(Instant::now());

        let pixels = match grabber.grab(&region) {
            Ok(pixels) => pixels,
            Err(e) => {
                error!("Screen capture failed: {}", e);
                running.store(false, Ordering::SeqCst);
                break;
            }
        };

        let frame = CapturedFrame::new(clock.now_ns(), region.width, region.height, pixels);
        counters.captured.fetch_add(1, Ordering::Relaxed);

        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Encoder side closed, capture stopping");
                running.store(false, Ordering::SeqCst);
                break;
            }
        }
    }

    grabber.release();
}

/// Pull frames until stopped, then drain whatever is still queued
fn encode_loop<S: FrameSink>(
    rx: &Receiver<CapturedFrame>,
    sink: &mut S,
    target: (u32, u32),
    running: &AtomicBool,
    counters: &FrameCounters,
) -> Result<()> {
    loop {
        match rx.recv_timeout(RECV_TIMEOUT) {
            Ok(frame) => {
                if let Err(e) = write_frame(sink, frame, target, counters) {
                    running.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for frame in rx.try_iter() {
        write_frame(sink, frame, target, counters)?;
    }
    Ok(())
}

fn write_frame<S: FrameSink>(
    sink: &mut S,
    frame: CapturedFrame,
    target: (u32, u32),
    counters: &FrameCounters,
) -> Result<()> {
    let source = frame.dimensions();
    if frame.pixels.len() != frame_len(source.0, source.1) {
        warn!(
            "Skipping frame with {} bytes for {}x{}",
            frame.pixels.len(),
            source.0,
            source.1
        );
        return Ok(());
    }

    let pixels = fit_frame(frame.pixels, source, target)?;
    sink.write_frame(&pixels)
        .map_err(|e| Error::Encoder(format!("failed to write frame: {}", e)))?;
    counters.encoded.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::encoder::ENCODER_EXIT_GRACE;
    use crate::capture::frame::BYTES_PER_PIXEL;

    /// Returns solid frames and clears the running flag after `limit` grabs
    struct ScriptedGrabber {
        grabs: usize,
        limit: usize,
        running: Arc<AtomicBool>,
    }

    impl ScreenGrabber for ScriptedGrabber {
        fn display_size(&self) -> (u32, u32) {
            (8, 4)
        }

        fn grab(&mut self, region: &Region) -> Result<Vec<u8>> {
            self.grabs += 1;
            if self.grabs >= self.limit {
                self.running.store(false, Ordering::SeqCst);
            }
            Ok(vec![self.grabs as u8; region.frame_len()])
        }
    }

    struct FailingGrabber;

    impl ScreenGrabber for FailingGrabber {
        fn display_size(&self) -> (u32, u32) {
            (8, 4)
        }

        fn grab(&mut self, _region: &Region) -> Result<Vec<u8>> {
            Err(Error::Grab("display went away".to_string()))
        }
    }

    fn region() -> Region {
        Region {
            x: 0,
            y: 0,
            width: 4,
            height: 2,
        }
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let running = Arc::new(AtomicBool::new(true));
        let counters = FrameCounters::default();
        let mut grabber = ScriptedGrabber {
            grabs: 0,
            limit: 5,
            running: running.clone(),
        };
        let (tx, rx) = crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);

        // Nobody consumes: the loop must still run all five samples
        capture_loop(&mut grabber, region(), &Clock::new(), 1000, tx, &running, &counters);

        let stats = counters.snapshot();
        assert_eq!(stats.captured_frames, 5);
        assert_eq!(stats.dropped_frames, 3);
        assert_eq!(rx.len(), FRAME_CHANNEL_CAPACITY);

        // The oldest frames are the ones kept
        let first = rx.recv().unwrap();
        let second = rx.recv().unwrap();
        assert_eq!(first.pixels[0], 1);
        assert_eq!(second.pixels[0], 2);
        assert!(first.timestamp_ns <= second.timestamp_ns);
    }

    #[test]
    fn test_grab_failure_halts_pipeline() {
        let running = AtomicBool::new(true);
        let counters = FrameCounters::default();
        let (tx, _rx) = crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);

        capture_loop(&mut FailingGrabber, region(), &Clock::new(), 1000, tx, &running, &counters);

        assert!(!running.load(Ordering::SeqCst));
        assert_eq!(counters.snapshot().captured_frames, 0);
    }

    #[test]
    fn test_encode_drains_queued_frames_after_stop() {
        let running = AtomicBool::new(false);
        let counters = FrameCounters::default();
        let (tx, rx) = crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);
        tx.send(CapturedFrame::new(1, 4, 2, vec![7; 4 * 2 * BYTES_PER_PIXEL]))
            .unwrap();
        tx.send(CapturedFrame::new(2, 4, 2, vec![9; 4 * 2 * BYTES_PER_PIXEL]))
            .unwrap();

        let mut sink: Vec<Vec<u8>> = Vec::new();
        encode_loop(&rx, &mut sink, (4, 2), &running, &counters).unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0][0], 7);
        assert_eq!(sink[1][0], 9);
        assert_eq!(counters.snapshot().encoded_frames, 2);
        drop(tx);
    }

    #[test]
    fn test_encode_fits_mismatched_frames() {
        let running = AtomicBool::new(true);
        let counters = FrameCounters::default();
        let (tx, rx) = crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);
        tx.send(CapturedFrame::new(1, 8, 8, vec![3; 8 * 8 * BYTES_PER_PIXEL]))
            .unwrap();
        tx.send(CapturedFrame::new(2, 8, 8, vec![0; 5])).unwrap();
        drop(tx);

        let mut sink: Vec<Vec<u8>> = Vec::new();
        encode_loop(&rx, &mut sink, (4, 2), &running, &counters).unwrap();

        // The malformed frame is skipped
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].len(), frame_len(4, 2));
    }

    #[test]
    fn test_resolution_defaults_to_display() {
        let pipeline = FramePipeline::new(
            CaptureConfig::default(),
            Clock::new(),
            Box::new(FailingGrabber),
        );
        assert_eq!(pipeline.resolution(), (8, 4));
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_configured_resolution_is_even() {
        let config = CaptureConfig {
            width: Some(1281),
            height: Some(721),
            ..CaptureConfig::default()
        };
        let pipeline = FramePipeline::new(config, Clock::new(), Box::new(FailingGrabber));
        assert_eq!(pipeline.resolution(), (1280, 720));
    }

    #[test]
    fn test_stop_without_start() {
        let mut pipeline = FramePipeline::new(
            CaptureConfig::default(),
            Clock::new(),
            Box::new(FailingGrabber),
        );
        assert_eq!(pipeline.stop(), None);
    }

    #[test]
    fn test_zero_fps_is_clamped() {
        let config = CaptureConfig {
            fps: 0,
            ..CaptureConfig::default()
        };
        let pipeline = FramePipeline::new(config, Clock::new(), Box::new(FailingGrabber));
        assert_eq!(pipeline.fps(), 1);
    }

    /// Solid 8x4 frames forever; counts how often it is released
    #[derive(Default)]
    struct SolidGrabber {
        releases: Arc<AtomicU64>,
    }

    impl ScreenGrabber for SolidGrabber {
        fn display_size(&self) -> (u32, u32) {
            (8, 4)
        }

        fn grab(&mut self, region: &Region) -> Result<Vec<u8>> {
            Ok(vec![0x40; region.frame_len()])
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Encoder stand-in: advertises libx264, then copies stdin to the
    /// output path (the last argument) and runs `after_eof`
    #[cfg(unix)]
    fn fake_encoder(dir: &Path, after_eof: &str) -> String {
        let body = format!(
            "if [ \"$2\" = \"-encoders\" ]; then\n\
             echo ' V....D libx264              libx264 H.264'\n\
             exit 0\n\
             fi\n\
             for arg in \"$@\"; do out=\"$arg\"; done\n\
             cat > \"$out\"\n\
             {}",
            after_eof
        );
        crate::capture::test_support::write_script(dir, "fake-encoder", &body)
            .display()
            .to_string()
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_flushes_every_encoded_frame() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig {
            fps: 50,
            encoder_program: fake_encoder(dir.path(), "exit 0"),
            ..CaptureConfig::default()
        };
        let releases = Arc::new(AtomicU64::new(0));
        let grabber = SolidGrabber {
            releases: releases.clone(),
        };
        let mut pipeline = FramePipeline::new(config, Clock::new(), Box::new(grabber));
        let output = dir.path().join("video.raw");

        pipeline.start(&output).unwrap();
        assert!(pipeline.is_running());
        thread::sleep(Duration::from_millis(300));

        let started = Instant::now();
        assert_eq!(pipeline.stop(), Some(output.clone()));
        assert!(started.elapsed() < ENCODE_JOIN_TIMEOUT);
        assert!(!pipeline.is_running());

        let stats = pipeline.stats();
        assert!(stats.encoded_frames > 0);
        assert_eq!(stats.captured_frames, stats.encoded_frames + stats.dropped_frames);
        let written = std::fs::metadata(&output).unwrap().len();
        assert_eq!(written, stats.encoded_frames * frame_len(8, 4) as u64);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_kills_encoder_that_will_not_exit() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig {
            fps: 50,
            encoder_program: fake_encoder(dir.path(), "exec sleep 60"),
            ..CaptureConfig::default()
        };
        let mut pipeline = FramePipeline::new(config, Clock::new(), Box::<SolidGrabber>::default());
        let output = dir.path().join("video.raw");

        pipeline.start(&output).unwrap();
        thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        assert_eq!(pipeline.stop(), Some(output.clone()));
        let elapsed = started.elapsed();
        assert!(elapsed >= ENCODER_EXIT_GRACE, "stopped after {:?}", elapsed);
        assert!(elapsed < ENCODE_JOIN_TIMEOUT, "stopped after {:?}", elapsed);

        // Frames written before the kill are still on disk
        let written = std::fs::metadata(&output).unwrap().len();
        assert_eq!(written, pipeline.stats().encoded_frames * frame_len(8, 4) as u64);
    }

    #[test]
    fn test_missing_encoder_keeps_pipeline_stopped() {
        let config = CaptureConfig {
            encoder_program: "definitely-not-an-encoder-program".to_string(),
            ..CaptureConfig::default()
        };
        let mut pipeline = FramePipeline::new(config, Clock::new(), Box::new(FailingGrabber));
        let dir = tempfile::tempdir().unwrap();

        let err = pipeline.start(&dir.path().join("video.mp4")).unwrap_err();
        assert!(matches!(err, Error::EncoderUnavailable(_)));
        assert!(!pipeline.is_running());
        assert_eq!(pipeline.stop(), None);
    }
}
