//! Fixed-length clip sampling and per-frame preprocessing.

use std::collections::BTreeSet;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;
use lungfusion_core::{DataConfig, LungFusionError, Result};

use super::FrameSource;

/// Channels per preprocessed frame. Grayscale frames are replicated.
pub const CLIP_CHANNELS: usize = 3;

const NORM_MEAN: f32 = 0.5;
const NORM_STD: f32 = 0.5;

/// `count` evenly spaced indices over `[0, total - 1]`, rounded to the
/// nearest integer. Duplicates are possible when `total < count`.
pub fn sample_indices(total: usize, count: usize) -> Vec<usize> {
    if total == 0 || count == 0 {
        return Vec::new();
    }
    if count == 1 {
        return vec![0];
    }
    let last = (total - 1) as f64;
    let step = last / (count - 1) as f64;
    (0..count)
        .map(|i| ((i as f64 * step).round() as usize).min(total - 1))
        .collect()
}

/// `T` preprocessed frames of one video, channel-major per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoClip {
    frames: Vec<Vec<f32>>,
    height: u32,
    width: u32,
}

impl VideoClip {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Each frame is `[3, H, W]` flattened.
    pub fn frames(&self) -> &[Vec<f32>] {
        &self.frames
    }

    /// Append all frames, in order, to `out`.
    pub fn extend_flat(&self, out: &mut Vec<f32>) {
        for frame in &self.frames {
            out.extend_from_slice(frame);
        }
    }
}

/// Turns a decoded video into a fixed-length [`VideoClip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSampler {
    frame_count: usize,
    height: u32,
    width: u32,
    grayscale: bool,
}

impl VideoSampler {
    pub fn new(frame_count: usize, height: u32, width: u32, grayscale: bool) -> Self {
        Self {
            frame_count,
            height,
            width,
            grayscale,
        }
    }

    pub fn from_config(config: &DataConfig) -> Self {
        Self::new(
            config.frame_count,
            config.frame_height,
            config.frame_width,
            config.grayscale,
        )
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Sample exactly `frame_count` frames from `source`.
    ///
    /// A frame is selected when its decode position is one of the evenly
    /// spaced indices; each position is taken at most once. If fewer frames
    /// decode than requested, the last selected frame is repeated. Decoding
    /// stops quietly at the first unreadable frame.
    ///
    /// # Errors
    ///
    /// [`LungFusionError::Decode`] when no frame at all could be decoded.
    pub fn sample(&self, source: &mut dyn FrameSource, path: &Path) -> Result<VideoClip> {
        let mut frames = Vec::with_capacity(self.frame_count);

        match source.frame_count_hint().filter(|&n| n > 0) {
            Some(total) => {
                let selected: BTreeSet<usize> =
                    sample_indices(total, self.frame_count).into_iter().collect();
                for position in 0..total {
                    match next_or_stop(source, path) {
                        Some(frame) if selected.contains(&position) => {
                            frames.push(self.preprocess(&frame));
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
            None => {
                let mut decoded = Vec::new();
                while let Some(frame) = next_or_stop(source, path) {
                    decoded.push(frame);
                }
                let selected: BTreeSet<usize> =
                    sample_indices(decoded.len(), self.frame_count).into_iter().collect();
                frames.extend(
                    decoded
                        .iter()
                        .enumerate()
                        .filter(|(position, _)| selected.contains(position))
                        .map(|(_, frame)| self.preprocess(frame)),
                );
            }
        }

        let Some(last) = frames.last().cloned() else {
            return Err(LungFusionError::Decode {
                path: path.to_path_buf(),
                reason: "no decodable frames".to_string(),
            });
        };
        frames.resize(self.frame_count, last);

        Ok(VideoClip {
            frames,
            height: self.height,
            width: self.width,
        })
    }

    fn preprocess(&self, frame: &RgbImage) -> Vec<f32> {
        let resized = imageops::resize(frame, self.width, self.height, FilterType::Triangle);
        let plane = self.height as usize * self.width as usize;
        let mut out = vec![0f32; CLIP_CHANNELS * plane];
        for (i, pixel) in resized.pixels().enumerate() {
            let [r, g, b] = pixel.0;
            if self.grayscale {
                let v = normalize(luma(r, g, b));
                out[i] = v;
                out[plane + i] = v;
                out[2 * plane + i] = v;
            } else {
                out[i] = normalize(r);
                out[plane + i] = normalize(g);
                out[2 * plane + i] = normalize(b);
            }
        }
        out
    }
}

fn next_or_stop(source: &mut dyn FrameSource, path: &Path) -> Option<RgbImage> {
    match source.next_frame() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Stopping at unreadable frame");
            None
        }
    }
}

/// ITU-R 601-2 luma in fixed point.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

fn normalize(value: u8) -> f32 {
    (value as f32 / 255.0 - NORM_MEAN) / NORM_STD
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
