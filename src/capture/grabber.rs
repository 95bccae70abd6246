//! Screen grabbing
//!
//! The default grabber keeps an ffmpeg screen-grab process running and
//! reads raw BGRA frames of the capture region from its stdout.

use std::io::{BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::error::{Error, Result};

use super::frame::Region;

/// Used when the primary display size cannot be detected
pub const FALLBACK_DISPLAY_SIZE: (u32, u32) = (1280, 800);

/// Capability to read pixels from a rectangle of the display
pub trait ScreenGrabber: Send {
    /// Primary display size in physical pixels
    fn display_size(&self) -> (u32, u32);

    /// Grab the region as tightly packed BGRA rows
    fn grab(&mut self, region: &Region) -> Result<Vec<u8>>;

    /// Drop anything held between grabs. Called when a capture session ends
    /// so the next session never sees frames buffered before it started.
    fn release(&mut self) {}
}

/// Grabber backed by a long-running ffmpeg screen-grab process
pub struct FfmpegGrabber {
    program: String,
    display: String,
    fps: u32,
    display_size: (u32, u32),
    stream: Option<GrabStream>,
}

struct GrabStream {
    region: Region,
    child: Child,
    stdout: BufReader<ChildStdout>,
}

impl Drop for GrabStream {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl FfmpegGrabber {
    pub fn new(config: &CaptureConfig) -> Self {
        let display = config.display.clone().unwrap_or_else(default_display);
        let display_size = detect_display_size(&config.encoder_program, &display);
        Self {
            program: config.encoder_program.clone(),
            display,
            fps: config.fps.max(1),
            display_size,
            stream: None,
        }
    }

    fn spawn(&self, region: &Region) -> Result<GrabStream> {
        let args = grab_args(&self.display, self.fps, region);
        debug!("Starting screen grab: {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Grab(format!("failed to start {}: {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Grab("grab process has no stdout".to_string()))?;

        info!(
            "Screen grab started for region {}x{}+{}+{}",
            region.width, region.height, region.x, region.y
        );

        Ok(GrabStream {
            region: *region,
            child,
            stdout: BufReader::with_capacity(region.frame_len(), stdout),
        })
    }
}

impl ScreenGrabber for FfmpegGrabber {
    fn display_size(&self) -> (u32, u32) {
        self.display_size
    }

    fn grab(&mut self, region: &Region) -> Result<Vec<u8>> {
        let reuse = matches!(&self.stream, Some(stream) if stream.region == *region);
        if !reuse {
            self.stream = Some(self.spawn(region)?);
        }

        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::Grab("grab process not running".to_string()));
        };

        let mut pixels = vec![0u8; region.frame_len()];
        if let Err(e) = stream.stdout.read_exact(&mut pixels) {
            self.stream = None;
            return Err(Error::Grab(format!("grab stream ended: {}", e)));
        }
        Ok(pixels)
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            debug!("Screen grab stopped");
        }
    }
}

/// Display name handed to the platform grab device
pub fn default_display() -> String {
    #[cfg(target_os = "linux")]
    {
        std::env::var("DISPLAY")
            .ok()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| ":0.0".to_string())
    }

    #[cfg(target_os = "macos")]
    {
        "Capture screen 0".to_string()
    }

    #[cfg(target_os = "windows")]
    {
        "desktop".to_string()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        String::new()
    }
}

/// Arguments for an ffmpeg process streaming raw BGRA frames of `region`
/// to stdout
pub fn grab_args(display: &str, fps: u32, region: &Region) -> Vec<String> {
    let size = format!("{}x{}", region.width, region.height);
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
    ];

    if cfg!(target_os = "macos") {
        // avfoundation grabs the whole screen, crop afterwards
        args.extend([
            "-f".into(),
            "avfoundation".into(),
            "-capture_cursor".into(),
            "1".into(),
            "-framerate".into(),
            fps.to_string(),
            "-i".into(),
            format!("{}:none", display),
            "-vf".into(),
            format!(
                "crop={}:{}:{}:{}",
                region.width, region.height, region.x, region.y
            ),
        ]);
    } else if cfg!(target_os = "windows") {
        args.extend([
            "-f".into(),
            "gdigrab".into(),
            "-framerate".into(),
            fps.to_string(),
            "-offset_x".into(),
            region.x.to_string(),
            "-offset_y".into(),
            region.y.to_string(),
            "-video_size".into(),
            size,
            "-i".into(),
            display.to_string(),
        ]);
    } else {
        args.extend([
            "-f".into(),
            "x11grab".into(),
            "-framerate".into(),
            fps.to_string(),
            "-video_size".into(),
            size,
            "-i".into(),
            format!("{}+{},{}", display, region.x, region.y),
        ]);
    }

    args.extend([
        "-pix_fmt".into(),
        "bgra".into(),
        "-f".into(),
        "rawvideo".into(),
        "-".into(),
    ]);
    args
}

/// Detect the primary display size, falling back to 1280x800
pub fn detect_display_size(program: &str, display: &str) -> (u32, u32) {
    match platform_display_size(program, display) {
        Some((w, h)) if w > 0 && h > 0 => {
            info!("Detected display resolution: {}x{}", w, h);
            (w, h)
        }
        _ => {
            warn!(
                "Could not detect display resolution, using {}x{}",
                FALLBACK_DISPLAY_SIZE.0, FALLBACK_DISPLAY_SIZE.1
            );
            FALLBACK_DISPLAY_SIZE
        }
    }
}

#[cfg(target_os = "macos")]
fn platform_display_size(_program: &str, _display: &str) -> Option<(u32, u32)> {
    use core_graphics::display::CGDisplay;
    use std::ffi::c_void;

    #[link(name = "CoreGraphics", kind = "framework")]
    extern "C" {
        fn CGDisplayCopyDisplayMode(display: u32) -> *const c_void;
        fn CGDisplayModeGetPixelWidth(mode: *const c_void) -> usize;
        fn CGDisplayModeGetPixelHeight(mode: *const c_void) -> usize;
        fn CGDisplayModeRelease(mode: *const c_void);
    }

    let main_display_id = CGDisplay::main().id;

    // Pixel (not point) dimensions, so Retina displays report their native size
    unsafe {
        let mode = CGDisplayCopyDisplayMode(main_display_id);
        if mode.is_null() {
            return None;
        }
        let width = CGDisplayModeGetPixelWidth(mode) as u32;
        let height = CGDisplayModeGetPixelHeight(mode) as u32;
        CGDisplayModeRelease(mode);
        Some((width, height))
    }
}

#[cfg(target_os = "windows")]
fn platform_display_size(_program: &str, _display: &str) -> Option<(u32, u32)> {
    use windows::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN};

    let (width, height) = unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
    Some((u32::try_from(width).ok()?, u32::try_from(height).ok()?))
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn platform_display_size(program: &str, display: &str) -> Option<(u32, u32)> {
    // Open the grab device for a single frame and read the stream size it reports
    let output = Command::new(program)
        .args([
            "-hide_banner",
            "-f",
            "x11grab",
            "-i",
            display,
            "-frames:v",
            "1",
            "-f",
            "null",
            "-",
        ])
        .stdin(Stdio::null())
        .output()
        .ok()?;

    parse_stream_dimensions(&String::from_utf8_lossy(&output.stderr))
}

/// Find `WxH` in the first video stream line of ffmpeg's banner output
pub fn parse_stream_dimensions(stderr: &str) -> Option<(u32, u32)> {
    stderr
        .lines()
        .filter(|line| line.contains("Stream #") && line.contains("Video:"))
        .flat_map(|line| line.split([',', ' ']))
        .find_map(parse_dimensions)
}

fn parse_dimensions(token: &str) -> Option<(u32, u32)> {
    let (w, h) = token.trim().split_once('x')?;
    let w: u32 = w.parse().ok()?;
    let h: u32 = h.parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}
