//! Labels and thumbnails images as they land in a storage bucket, keeping
//! one record per object keyed by its `gs://` storage path.

pub mod config;
pub mod tagger;

pub use config::{Config, PipelineSettings};
pub use tagger::{EventRouter, ImageEvent, Outcome, PipelineError};
