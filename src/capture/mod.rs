//! Screen capture and encoding
//!
//! A capture thread samples a region of the primary display at a fixed
//! cadence and hands frames over a bounded channel to an encode thread,
//! which streams them into an encoder subprocess. Frames are stamped with
//! the shared [`Clock`](crate::clock::Clock) so they line up with input
//! events.

mod encoder;
mod frame;
mod grabber;
mod pipeline;

pub use encoder::{
    build_encoder_args, probe_backend, resolve_backend, EncoderBackend, EncoderKillHandle,
    EncoderProcess, FrameSink,
};
pub use frame::{capture_region, fit_frame, CapturedFrame, Region};
pub use grabber::{default_display, detect_display_size, FfmpegGrabber, ScreenGrabber};
pub use pipeline::{FramePipeline, PipelineStats, FRAME_CHANNEL_CAPACITY};
