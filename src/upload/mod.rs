//! Archive upload with durable retry

mod client;
mod queue;
mod retry;
mod task;

pub use client::{sha256_file, Delivery, HttpDelivery};
pub use queue::{QueueOptions, UploadQueue};
pub use retry::RetryPolicy;
pub use task::{machine_id, os_descriptor, TaskStore, UploadTask};
