//! Character-level training samples from scene-text ground truth.
//!
//! Word and character boxes of annotated images are filtered, jittered,
//! cropped and normalized into `(N, 3, size, size)` batches for a
//! single-character classifier. Two sources are supported: a synthetic
//! corpus described by a ground truth archive ([`synth`]) and an ICDAR 2013
//! style benchmark with per-image annotation files ([`icdar`]).

pub mod augment;
pub mod classifier;
pub mod crop;
mod error;
pub mod extract;
pub mod filter;
pub mod geometry;
pub mod icdar;
pub mod labels;
pub mod loader;
pub mod pipeline;
mod result;
pub mod source;
pub mod synth;
pub mod train;
pub mod util;

pub use error::{Error, Result};
pub use pipeline::{PipelineOptions, SamplePipeline, SamplePipelineBuilder};
pub use result::*;

pub use ort as runtime;
