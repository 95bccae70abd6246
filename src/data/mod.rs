//! Data structures and serialization for recorded sessions

mod events;
mod format;

pub use events::*;
pub use format::*;
