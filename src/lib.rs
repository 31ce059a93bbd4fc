//! Reconstruction of radio broadcasts from hour-bucketed HLS relive archives
//! into chaptered, tagged MP3 files.

pub mod assembler;
pub mod chapters;
pub mod config;
pub mod error;
pub mod hls;
pub mod http_retry;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod tagging;

pub use error::{RelivError, Result};
pub use pipeline::{BroadcastOutcome, BroadcastPipeline};
