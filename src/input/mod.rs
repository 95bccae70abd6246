//! Input capture: platform backends, drag synthesis and the event logger

mod backend;
mod handler;
mod keys;
mod logger;

#[cfg(not(target_os = "linux"))]
pub(crate) mod rdev_backend;

#[cfg(target_os = "linux")]
pub(crate) mod evdev_backend;

pub use backend::*;
pub use handler::*;
pub use keys::*;
pub use logger::EventLogger;

#[cfg(test)]
pub(crate) use logger::tests::ScriptedSource;
