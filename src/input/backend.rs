//! Input capture backend trait

use std::sync::Arc;

use crate::error::Result;

use super::InputHandler;

/// An OS-level event source.
///
/// Backends own their platform dispatch threads; they only deliver
/// [`super::RawInput`] values to the handler registered with `start`.
pub trait InputSource: Send {
    /// Register the handler and begin delivering events to it
    fn start(&mut self, handler: Arc<InputHandler>) -> Result<()>;

    /// Unregister the handler. Events arriving afterwards are discarded.
    fn stop(&mut self);
}

/// Create the appropriate input source for the current platform.
///
/// `bounds` is the primary display size, used by backends that only see
/// relative pointer motion.
pub fn create_input_source(bounds: (u32, u32)) -> Result<Box<dyn InputSource>> {
    #[cfg(target_os = "linux")]
    {
        let source = super::evdev_backend::EvdevSource::new(bounds)?;
        tracing::info!("Using evdev backend for input capture");
        Ok(Box::new(source))
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = bounds;
        tracing::info!("Using rdev backend for input capture");
        Ok(Box::new(super::rdev_backend::RdevSource::new()))
    }
}
