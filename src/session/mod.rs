//! Recording controller: wires the clock, both producers, the muxer and the
//! upload queue into one start/stop lifecycle

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::capture::{FramePipeline, PipelineStats, ScreenGrabber};
use crate::clock::Clock;
use crate::config::Config;
use crate::crash::log_critical_operation;
use crate::error::{Error, Result};
use crate::input::{EventLogger, InputSource};
use crate::mux::TimelineMuxer;
use crate::upload::UploadQueue;

/// Raw producer output lives here, outside the session working directories
const RAW_DIR: &str = "raw";

pub struct Recorder {
    clock: Clock,
    pipeline: FramePipeline,
    logger: EventLogger,
    muxer: TimelineMuxer,
    raw_dir: PathBuf,
    uploads: Option<UploadQueue>,
    running: bool,
}

impl Recorder {
    pub fn new(
        config: &Config,
        clock: Clock,
        grabber: Box<dyn ScreenGrabber>,
        source: Box<dyn InputSource>,
    ) -> Self {
        let output_root = config.recording.output_directory.clone();
        let raw_dir = output_root.join(RAW_DIR);

        let pipeline = FramePipeline::new(config.capture.clone(), clock.clone(), grabber);
        let muxer = TimelineMuxer::new(&output_root, pipeline.resolution(), pipeline.fps())
            .with_cleanup(config.recording.cleanup_working_dir);
        let logger = EventLogger::new(clock.clone(), config.input.clone(), source, &raw_dir);

        Self {
            clock,
            pipeline,
            logger,
            muxer,
            raw_dir,
            uploads: None,
            running: false,
        }
    }

    /// Submit finished archives to `queue`
    pub fn with_upload_queue(mut self, queue: UploadQueue) -> Self {
        self.uploads = Some(queue);
        self
    }

    /// Hand the upload queue back, e.g. to drain it before exit
    pub fn take_upload_queue(&mut self) -> Option<UploadQueue> {
        self.uploads.take()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.pipeline.resolution()
    }

    pub fn frame_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    pub fn event_count(&self) -> usize {
        self.logger.event_count()
    }

    /// Id of the session being recorded or awaiting packaging
    pub fn session_id(&self) -> Option<&str> {
        self.muxer.session().map(|session| session.id.as_str())
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    /// Begin a session. A missing encoder is not fatal: the session records
    /// events only and will not produce an archive.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }

        self.clock.start();
        std::fs::create_dir_all(&self.raw_dir)?;
        let session_id = self.muxer.start()?.id.clone();

        log_critical_operation("start_frame_pipeline");
        let video_path = self.raw_dir.join(format!("{}.mp4", session_id));
        match self.pipeline.start(&video_path) {
            Ok(()) => {}
            Err(Error::EncoderUnavailable(reason)) => {
                warn!("Recording without video: {}", reason);
            }
            Err(e) => error!("Frame pipeline failed to start: {}", e),
        }

        log_critical_operation("start_input_logging");
        if let Err(e) = self.logger.start() {
            error!("Input logging failed to start: {}", e);
            self.pipeline.stop();
            self.muxer.stop();
            return Err(e);
        }

        self.running = true;
        info!("Recording session {} started", session_id);
        Ok(())
    }

    /// Stop both producers, package the session and queue it for upload.
    ///
    /// Returns the archive path, or `None` if no session was running.
    pub fn stop(&mut self) -> Result<Option<PathBuf>> {
        if !self.running {
            return Ok(None);
        }
        self.running = false;

        log_critical_operation("stop_producers");
        let video = self.pipeline.stop();
        let events = match self.logger.stop() {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to save input events: {}", e);
                None
            }
        };

        if let Some(video) = &video {
            self.muxer.set_video_file(video);
        }
        if let Some(events) = &events {
            self.muxer.set_events_file(events);
        }

        log_critical_operation("finalize_session");
        let archive = self.muxer.finalize()?;

        for raw in video.iter().chain(events.iter()) {
            if let Err(e) = std::fs::remove_file(raw) {
                warn!("Failed to remove raw artifact {:?}: {}", raw, e);
            }
        }

        match &self.uploads {
            Some(queue) => {
                if let Err(e) = queue.submit(&archive) {
                    error!("Failed to queue {:?} for upload: {}", archive, e);
                }
            }
            None => info!("No upload queue, archive kept at {:?}", archive),
        }

        Ok(Some(archive))
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.running {
            if let Err(e) = self.stop() {
                error!("Recording lost on shutdown: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Region;
    use crate::data::MouseButton;
    use crate::input::{RawInput, ScriptedSource};

    struct BlankGrabber;

    impl ScreenGrabber for BlankGrabber {
        fn display_size(&self) -> (u32, u32) {
            (64, 40)
        }

        fn grab(&mut self, region: &Region) -> Result<Vec<u8>> {
            Ok(vec![0; region.frame_len()])
        }
    }

    fn config(root: &Path) -> Config {
        let mut config = Config::default();
        config.recording.output_directory = root.to_path_buf();
        config.capture.encoder_program = "no-such-encoder-binary".to_string();
        config
    }

    #[test]
    fn test_recording_without_encoder_keeps_events() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::default();
        let mut recorder = Recorder::new(
            &config(dir.path()),
            Clock::new(),
            Box::new(BlankGrabber),
            Box::new(source.clone()),
        );
        assert_eq!(recorder.resolution(), (64, 40));

        recorder.start().unwrap();
        assert!(recorder.is_running());
        assert!(recorder.session_id().unwrap().starts_with("recording_"));
        source.emit(RawInput::ButtonPress {
            button: MouseButton::Left,
            x: 10.0,
            y: 10.0,
        });
        source.emit(RawInput::ButtonRelease {
            button: MouseButton::Left,
            x: 10.0,
            y: 10.0,
        });
        assert_eq!(recorder.event_count(), 2);

        let err = recorder.stop().unwrap_err();
        assert!(matches!(err, Error::MissingVideo(None)));
        assert!(!recorder.is_running());

        // No archive, but the raw events survive for inspection
        let raw: Vec<_> = std::fs::read_dir(recorder.raw_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(raw.len(), 1);
        assert!(raw[0].starts_with("events_"));
        let zips = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "zip"))
            .count();
        assert_eq!(zips, 0);
    }

    #[test]
    fn test_input_failure_aborts_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(
            &config(dir.path()),
            Clock::new(),
            Box::new(BlankGrabber),
            Box::new(ScriptedSource::failing()),
        );

        assert!(matches!(recorder.start(), Err(Error::Input(_))));
        assert!(!recorder.is_running());
        assert_eq!(recorder.stop().unwrap(), None);
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(
            &config(dir.path()),
            Clock::new(),
            Box::new(BlankGrabber),
            Box::new(ScriptedSource::default()),
        );
        assert_eq!(recorder.stop().unwrap(), None);
        assert!(recorder.take_upload_queue().is_none());
    }

    #[test]
    fn test_configured_resolution_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.capture.width = Some(33);
        config.capture.height = Some(21);
        let recorder = Recorder::new(
            &config,
            Clock::new(),
            Box::new(BlankGrabber),
            Box::new(ScriptedSource::default()),
        );
        assert_eq!(recorder.resolution(), (32, 20));
    }
}
