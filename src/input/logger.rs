//! Event logger: owns an input source for one session and writes the
//! session's events file when stopped

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info};

use crate::clock::Clock;
use crate::config::InputConfig;
use crate::data::{unix_timestamp, EventsFile};
use crate::error::Result;

use super::{InputHandler, InputSource};

pub struct EventLogger {
    handler: Arc<InputHandler>,
    source: Box<dyn InputSource>,
    output_dir: PathBuf,
    output_file: Option<PathBuf>,
}

impl EventLogger {
    pub fn new(
        clock: Clock,
        config: InputConfig,
        source: Box<dyn InputSource>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            handler: Arc::new(InputHandler::new(clock, config)),
            source,
            output_dir: output_dir.into(),
            output_file: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handler.is_recording()
    }

    /// Path of the events file for the current (or last) session
    pub fn output_file(&self) -> Option<&Path> {
        self.output_file.as_deref()
    }

    /// Number of events recorded so far in this session
    pub fn event_count(&self) -> usize {
        self.handler.event_count()
    }

    /// Begin a session. No-op if already running.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.output_dir)?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let output_file = self.output_dir.join(format!("events_{}.json", stamp));

        self.handler.begin();
        if let Err(e) = self.source.start(self.handler.clone()) {
            self.handler.finish();
            return Err(e);
        }

        info!("Starting input logging to {:?}", output_file);
        self.output_file = Some(output_file);
        Ok(())
    }

    /// Unregister listeners and write the events file.
    /// Returns `None` if the logger was not running.
    pub fn stop(&mut self) -> Result<Option<PathBuf>> {
        if !self.is_running() {
            return Ok(None);
        }

        info!("Stopping input logging");
        self.source.stop();
        let events = self.handler.finish();

        let Some(path) = self.output_file.clone() else {
            return Ok(None);
        };

        let file = EventsFile::new(unix_timestamp(), events);
        let json = serde_json::to_vec_pretty(&file)?;
        if let Err(e) = std::fs::write(&path, json) {
            error!("Failed to write events file {:?}: {}", path, e);
            return Err(e.into());
        }

        info!(
            "Input logging stopped, {} events saved to {:?}",
            file.events.len(),
            path
        );
        Ok(Some(path))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::{EventKind, MouseButton};
    use crate::error::Error;
    use crate::input::RawInput;
    use std::sync::Mutex;

    /// Input source driven by the test instead of the OS
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedSource {
        handler: Arc<Mutex<Option<Arc<InputHandler>>>>,
        fail: bool,
    }

    impl ScriptedSource {
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub(crate) fn emit(&self, input: RawInput) {
            let handler = self.handler.lock().unwrap().clone();
            if let Some(handler) = handler {
                handler.handle(input);
            }
        }
    }

    impl InputSource for ScriptedSource {
        fn start(&mut self, handler: Arc<InputHandler>) -> Result<()> {
            if self.fail {
                return Err(Error::Input("scripted failure".to_string()));
            }
            *self.handler.lock().unwrap() = Some(handler);
            Ok(())
        }

        fn stop(&mut self) {
            *self.handler.lock().unwrap() = None;
        }
    }

    #[test]
    fn test_stop_writes_events_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::default();
        let mut logger = EventLogger::new(
            Clock::new(),
            InputConfig::default(),
            Box::new(source.clone()),
            dir.path(),
        );

        logger.start().unwrap();
        source.emit(RawInput::ButtonPress {
            button: MouseButton::Left,
            x: 100.0,
            y: 200.0,
        });
        source.emit(RawInput::ButtonRelease {
            button: MouseButton::Left,
            x: 200.0,
            y: 300.0,
        });
        assert_eq!(logger.event_count(), 3);

        let path = logger.stop().unwrap().expect("events path");
        let file: EventsFile = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(file.meta.kind, "input_events");
        assert_eq!(file.events.len(), 3);
        assert!(matches!(file.events[2].kind, EventKind::DragEnd { .. }));

        // Events after stop are not recorded
        source.emit(RawInput::Move { x: 0.0, y: 0.0 });
        assert_eq!(logger.event_count(), 0);
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::default();
        let mut logger = EventLogger::new(
            Clock::new(),
            InputConfig::default(),
            Box::new(source.clone()),
            dir.path(),
        );

        assert!(logger.stop().unwrap().is_none());

        logger.start().unwrap();
        let first = logger.output_file().map(Path::to_path_buf);
        logger.start().unwrap();
        assert_eq!(logger.output_file().map(Path::to_path_buf), first);

        assert!(logger.stop().unwrap().is_some());
        assert!(logger.stop().unwrap().is_none());
    }

    #[test]
    fn test_failed_source_leaves_logger_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = EventLogger::new(
            Clock::new(),
            InputConfig::default(),
            Box::new(ScriptedSource::failing()),
            dir.path(),
        );

        assert!(logger.start().is_err());
        assert!(!logger.is_running());
        assert!(logger.stop().unwrap().is_none());
    }
}
