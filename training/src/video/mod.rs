//! Video decoding and fixed-length frame sampling.
//!
//! Decoding is abstracted behind [`VideoDecoder`] / [`FrameSource`] so the
//! sampler can be driven by ffmpeg in production and by synthetic sources in
//! tests.

use std::path::Path;

use image::RgbImage;
use lungfusion_core::Result;

pub mod ffmpeg;
pub mod sampler;

pub use ffmpeg::FfmpegDecoder;
pub use sampler::{sample_indices, VideoClip, VideoSampler};

/// Sequential access to the decoded frames of one video.
pub trait FrameSource {
    /// Frame count declared by the container, if known.
    fn frame_count_hint(&self) -> Option<usize>;

    /// Decode the next frame. `Ok(None)` marks the end of the stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Opens videos for decoding. Shared across prefetch workers.
pub trait VideoDecoder: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>>;
}
