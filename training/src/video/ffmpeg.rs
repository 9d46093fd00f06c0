//! ffmpeg-backed decoder.
//!
//! Stream geometry and the declared frame count come from `ffprobe`; frames
//! are then streamed from `ffmpeg` as raw `rgb24` over a pipe, one
//! `width * height * 3` chunk per frame.

use std::ffi::OsString;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use image::RgbImage;
use lungfusion_core::{DataConfig, LungFusionError, Result};
use serde::Deserialize;

use super::{FrameSource, VideoDecoder};

/// Decodes videos by spawning `ffprobe` and `ffmpeg` subprocesses.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg_bin: String,
    ffprobe_bin: String,
}

impl FfmpegDecoder {
    pub fn new(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }

    pub fn from_config(config: &DataConfig) -> Self {
        Self::new(&config.ffmpeg_bin, &config.ffprobe_bin)
    }

    fn probe(&self, path: &Path) -> Result<StreamInfo> {
        let output = Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,nb_frames",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .map_err(|e| decode_error(path, format!("failed to run {}: {e}", self.ffprobe_bin)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(decode_error(path, format!("ffprobe failed: {}", stderr.trim())));
        }
        parse_probe_output(&output.stdout).map_err(|reason| decode_error(path, reason))
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        let info = self.probe(path)?;
        let mut child = Command::new(&self.ffmpeg_bin)
            .args(decode_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| decode_error(path, format!("failed to run {}: {e}", self.ffmpeg_bin)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| decode_error(path, "ffmpeg stdout unavailable".to_string()))?;

        tracing::trace!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            frames = ?info.frame_count,
            "Opened video"
        );

        Ok(Box::new(FfmpegFrameSource {
            path: path.to_path_buf(),
            child,
            stdout: BufReader::new(stdout),
            info,
        }))
    }
}

/// `ffmpeg` arguments for streaming `path` as raw rgb24. Rotation metadata
/// is ignored so frames keep the coded geometry reported by `ffprobe`.
fn decode_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-v", "error", "-nostdin", "-noautorotate", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(path.as_os_str().to_os_string());
    args.extend(
        ["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"]
            .into_iter()
            .map(OsString::from),
    );
    args
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StreamInfo {
    width: u32,
    height: u32,
    frame_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    nb_frames: Option<String>,
}

fn parse_probe_output(stdout: &[u8]) -> std::result::Result<StreamInfo, String> {
    let probe: ProbeOutput =
        serde_json::from_slice(stdout).map_err(|e| format!("unreadable ffprobe output: {e}"))?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| "no video stream".to_string())?;
    match (stream.width, stream.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => Ok(StreamInfo {
            width,
            height,
            // Containers without an index report "N/A" or omit the field.
            frame_count: stream
                .nb_frames
                .and_then(|n| n.trim().parse::<usize>().ok())
                .filter(|&n| n > 0),
        }),
        _ => Err("video stream has no dimensions".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Frame stream
// ---------------------------------------------------------------------------

struct FfmpegFrameSource {
    path: PathBuf,
    child: Child,
    stdout: BufReader<ChildStdout>,
    info: StreamInfo,
}

impl FrameSource for FfmpegFrameSource {
    fn frame_count_hint(&self) -> Option<usize> {
        self.info.frame_count
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let frame_bytes = self.info.width as usize * self.info.height as usize * 3;
        let mut buf = vec![0u8; frame_bytes];
        match self.stdout.read_exact(&mut buf) {
            Ok(()) => RgbImage::from_raw(self.info.width, self.info.height, buf)
                .map(Some)
                .ok_or_else(|| decode_error(&self.path, "frame buffer size mismatch".to_string())),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(decode_error(&self.path, format!("pipe read failed: {e}"))),
        }
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        // The sampler may stop before the stream ends.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn decode_error(path: &Path, reason: String) -> LungFusionError {
    LungFusionError::Decode {
        path: path.to_path_buf(),
        reason,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_args_disable_autorotate_before_input() {
        let args = decode_args(Path::new("clip.mp4"));
        let position = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert!(position("-noautorotate") < position("-i"));
        assert_eq!(args[position("-i") + 1], "clip.mp4");
        assert_eq!(args.last().unwrap(), "pipe:1");
    }

    #[test]
    fn test_parse_probe_output_with_frame_count() {
        let json = br#"{"streams":[{"width":640,"height":480,"nb_frames":"120"}]}"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(
            info,
            StreamInfo {
                width: 640,
                height: 480,
                frame_count: Some(120)
            }
        );
    }

    #[test]
    fn test_parse_probe_output_without_frame_count() {
        let json = br#"{"streams":[{"width":320,"height":240,"nb_frames":"N/A"}]}"#;
        assert_eq!(parse_probe_output(json).unwrap().frame_count, None);

        let json = br#"{"streams":[{"width":320,"height":240}]}"#;
        assert_eq!(parse_probe_output(json).unwrap().frame_count, None);

        let json = br#"{"streams":[{"width":320,"height":240,"nb_frames":"0"}]}"#;
        assert_eq!(parse_probe_output(json).unwrap().frame_count, None);
    }

    #[test]
    fn test_parse_probe_output_rejects_missing_stream() {
        assert!(parse_probe_output(br#"{"streams":[]}"#).is_err());
        assert!(parse_probe_output(br#"{}"#).is_err());
        assert!(parse_probe_output(b"not json").is_err());
        assert!(parse_probe_output(br#"{"streams":[{"width":0,"height":10}]}"#).is_err());
    }

    #[test]
    fn test_missing_binary_is_decode_error() {
        let decoder = FfmpegDecoder::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let result = decoder.open(Path::new("clip.mp4"));
        assert!(matches!(result, Err(LungFusionError::Decode { .. })));
    }
}
