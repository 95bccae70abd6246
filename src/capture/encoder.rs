//! Video encoder subprocess management

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::error::{Error, Result};

/// Grace period for the encoder to finish the container after stdin closes
pub const ENCODER_EXIT_GRACE: Duration = Duration::from_secs(5);

/// H.264 encoder backends in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderBackend {
    /// NVIDIA NVENC
    Nvenc,
    /// Intel Quick Sync
    Qsv,
    /// Software x264
    X264,
}

impl EncoderBackend {
    pub const PREFERENCE: [EncoderBackend; 3] =
        [EncoderBackend::Nvenc, EncoderBackend::Qsv, EncoderBackend::X264];

    pub fn codec_name(&self) -> &'static str {
        match self {
            EncoderBackend::Nvenc => "h264_nvenc",
            EncoderBackend::Qsv => "h264_qsv",
            EncoderBackend::X264 => "libx264",
        }
    }

    pub fn is_hardware(&self) -> bool {
        !matches!(self, EncoderBackend::X264)
    }
}

/// Pick the most preferred backend present in an `-encoders` listing
pub fn resolve_backend(listing: &str) -> Option<EncoderBackend> {
    let available: Vec<&str> = listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .collect();

    EncoderBackend::PREFERENCE
        .into_iter()
        .find(|backend| available.contains(&backend.codec_name()))
}

/// Ask the encoder program which encoders it supports and pick one
pub fn probe_backend(program: &str) -> Result<EncoderBackend> {
    let output = Command::new(program)
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::EncoderUnavailable(format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        return Err(Error::EncoderUnavailable(format!(
            "{} -encoders exited with {}",
            program, output.status
        )));
    }

    let listing = String::from_utf8_lossy(&output.stdout);
    let backend = resolve_backend(&listing).ok_or_else(|| {
        Error::EncoderUnavailable(format!("{} offers no H.264 encoder", program))
    })?;

    info!(
        "Using {} encoder ({})",
        backend.codec_name(),
        if backend.is_hardware() { "hardware" } else { "software" }
    );
    Ok(backend)
}

/// Arguments for an encoder reading raw BGRA frames from stdin
pub fn build_encoder_args(
    backend: EncoderBackend,
    width: u32,
    height: u32,
    fps: u32,
    output_path: &Path,
) -> Vec<String> {
    let video_size = format!("{}x{}", width, height);
    let fps = fps.to_string();

    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pixel_format".to_string(),
        "bgra".to_string(),
        "-video_size".to_string(),
        video_size,
        "-framerate".to_string(),
        fps.clone(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        backend.codec_name().to_string(),
    ];

    // Fastest preset at constant quality 28, spelled per encoder
    let (preset, quality_flag) = match backend {
        EncoderBackend::Nvenc => ("p1", "-cq"),
        EncoderBackend::Qsv => ("veryfast", "-global_quality"),
        EncoderBackend::X264 => ("ultrafast", "-crf"),
    };
    args.extend([
        "-preset".to_string(),
        preset.to_string(),
        quality_flag.to_string(),
        "28".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-r".to_string(),
        fps,
        "-y".to_string(),
        output_path.display().to_string(),
    ]);
    args
}

/// Destination for raw frame bytes
pub trait FrameSink {
    fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()>;
}

impl FrameSink for Vec<Vec<u8>> {
    fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.push(frame.to_vec());
        Ok(())
    }
}

/// A running encoder subprocess.
///
/// Dropping the process closes its input and waits out the grace period,
/// killing it if it has not exited by then.
pub struct EncoderProcess {
    child: Arc<Mutex<Child>>,
    stdin: Option<BufWriter<ChildStdin>>,
    output_path: PathBuf,
    finished: bool,
}

impl EncoderProcess {
    pub fn spawn(program: &str, args: &[String], output_path: &Path) -> Result<Self> {
        debug!("Starting encoder: {} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Encoder(format!("failed to start {}: {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Encoder("encoder has no stdin".to_string()))?;

        Ok(Self {
            child: Arc::new(Mutex::new(child)),
            stdin: Some(BufWriter::with_capacity(8 * 1024 * 1024, stdin)),
            output_path: output_path.to_path_buf(),
            finished: false,
        })
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Handle for force-killing the encoder from another thread
    pub fn kill_handle(&self) -> EncoderKillHandle {
        EncoderKillHandle {
            child: self.child.clone(),
        }
    }

    /// Close stdin and wait for the encoder to write out the container
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let flushed = match self.stdin.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        };

        let exited = wait_with_grace(&self.child, ENCODER_EXIT_GRACE);
        flushed?;

        match exited {
            Some(status) if status.success() => Ok(()),
            Some(status) => Err(Error::Encoder(format!("encoder exited with {}", status))),
            None => {
                warn!(
                    "Encoder did not exit within {:?}, killing it",
                    ENCODER_EXIT_GRACE
                );
                self.kill_handle().kill();
                Err(Error::Encoder("encoder timed out".to_string()))
            }
        }
    }
}

impl FrameSink for EncoderProcess {
    fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        match self.stdin.as_mut() {
            Some(writer) => writer.write_all(frame),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "encoder input closed",
            )),
        }
    }
}

impl Drop for EncoderProcess {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            debug!("Encoder shutdown on drop: {}", e);
        }
    }
}

/// Kills the encoder if it outlives its owner's bounded wait
#[derive(Clone)]
pub struct EncoderKillHandle {
    child: Arc<Mutex<Child>>,
}

impl EncoderKillHandle {
    pub fn kill(&self) {
        let mut child = self.child.lock().unwrap_or_else(|p| p.into_inner());
        if let Ok(None) = child.try_wait() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Wait for exit in short slices so the lock is never held for long
fn wait_with_grace(child: &Mutex<Child>, grace: Duration) -> Option<std::process::ExitStatus> {
    let deadline = Instant::now() + grace;
    loop {
        {
            let mut child = child.lock().unwrap_or_else(|p| p.into_inner());
            match child.wait_timeout(Duration::from_millis(100)) {
                Ok(Some(status)) => return Some(status),
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to wait for encoder: {}", e);
                    return None;
                }
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Encoders:
 V..... = Video
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10 (codec h264)
 V....D h264_qsv             H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10 (Intel Quick Sync Video acceleration) (codec h264)
 V....D libx265              libx265 H.265 / HEVC (codec hevc)
";

    #[test]
    fn test_backend_preference_order() {
        assert_eq!(resolve_backend(LISTING), Some(EncoderBackend::Qsv));

        let with_nvenc = format!("{} V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)\n", LISTING);
        assert_eq!(resolve_backend(&with_nvenc), Some(EncoderBackend::Nvenc));

        let software_only = " V....D libx264              libx264 H.264\n";
        assert_eq!(resolve_backend(software_only), Some(EncoderBackend::X264));
    }

    #[test]
    fn test_no_h264_encoder() {
        assert_eq!(resolve_backend(" V....D libx265  libx265 H.265\n"), None);
        assert_eq!(resolve_backend(""), None);
    }

    #[test]
    fn test_backend_name_must_match_exactly() {
        // Mentioned only in a description, not as the encoder name
        let listing = " V....D libx264rgb   libx264 H.264 RGB (h264_nvenc compatible)\n";
        assert_eq!(resolve_backend(listing), None);
    }

    #[test]
    fn test_encoder_args() {
        let args = build_encoder_args(
            EncoderBackend::X264,
            1280,
            800,
            10,
            Path::new("/tmp/out.mp4"),
        );

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-pixel_format") + 1], "bgra");
        assert_eq!(args[pos("-video_size") + 1], "1280x800");
        assert_eq!(args[pos("-framerate") + 1], "10");
        assert_eq!(args[pos("-i") + 1], "-");
        assert_eq!(args[pos("-c:v") + 1], "libx264");
        assert_eq!(args[pos("-preset") + 1], "ultrafast");
        assert_eq!(args[pos("-crf") + 1], "28");
        assert_eq!(args[pos("-pix_fmt") + 1], "yuv420p");
        assert_eq!(args[pos("-r") + 1], "10");
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
        assert!(pos("-y") < args.len() - 1);
    }

    #[test]
    fn test_hardware_encoders_use_their_own_quality_flags() {
        let out = Path::new("out.mp4");

        let nvenc = build_encoder_args(EncoderBackend::Nvenc, 1280, 800, 10, out);
        assert!(nvenc.contains(&"-cq".to_string()));
        assert!(!nvenc.contains(&"-crf".to_string()));

        let qsv = build_encoder_args(EncoderBackend::Qsv, 1280, 800, 10, out);
        assert!(qsv.contains(&"-global_quality".to_string()));
        assert!(qsv.contains(&"h264_qsv".to_string()));
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let err = probe_backend("definitely-not-an-encoder-program").unwrap_err();
        assert!(matches!(err, Error::EncoderUnavailable(_)));
    }

    #[test]
    fn test_missing_program_fails_spawn() {
        let result = EncoderProcess::spawn(
            "definitely-not-an-encoder-program",
            &[],
            Path::new("out.mp4"),
        );
        assert!(matches!(result, Err(Error::Encoder(_))));
    }
}
