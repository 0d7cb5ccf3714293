//! Source probing with ffprobe.
//!
//! Produces a [`SourceDescriptor`] for the first video stream of a file. Absent or
//! unknown values are `None`; callers treat a failed probe as "nothing known".

use lut_renderer_config::parse_frame_rate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Average and nominal frame rates further apart than this mark a VFR source.
const VFR_EPSILON: f64 = 0.1;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe command failed to execute.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// IO error during probe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read-only description of a source's video stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceDescriptor {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Stream (or container) bitrate as `<kbps>k`.
    pub bitrate: Option<String>,
    /// Average frame rate, falling back to the nominal rate.
    pub fps: Option<f64>,
    pub avg_fps: Option<f64>,
    /// Nominal (`r_frame_rate`) frame rate.
    pub nominal_fps: Option<f64>,
    /// Only true when both rates are known and disagree.
    pub is_variable_frame_rate: bool,
    pub duration_secs: Option<f64>,
    pub pix_fmt: Option<String>,
    pub bit_depth: Option<u32>,
    pub color_primaries: Option<String>,
    pub color_transfer: Option<String>,
    pub color_space: Option<String>,
    /// `pc` (full) or `tv` (limited).
    pub color_range: Option<String>,
}

impl SourceDescriptor {
    /// `WxH` when both dimensions are known.
    pub fn resolution(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(format!("{}x{}", w, h)),
            _ => None,
        }
    }

    /// Full-range source: an explicit `pc` tag or a legacy `yuvj*` pixel format.
    pub fn is_full_range(&self) -> bool {
        if self
            .pix_fmt
            .as_deref()
            .is_some_and(|fmt| fmt.starts_with("yuvj"))
        {
            return true;
        }
        self.color_range
            .as_deref()
            .is_some_and(|range| range.eq_ignore_ascii_case("pc"))
    }
}

/// Anything that can describe a source file.
///
/// Implemented by [`FfprobeProbe`]; tests substitute canned descriptors.
pub trait SourceProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<SourceDescriptor, ProbeError>;
}

/// Probe backed by the external ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    binary: String,
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl SourceProbe for FfprobeProbe {
    fn probe(&self, path: &Path) -> Result<SourceDescriptor, ProbeError> {
        probe_file(&self.binary, path)
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct Stream {
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub bit_rate: Option<String>,
        pub avg_frame_rate: Option<String>,
        pub r_frame_rate: Option<String>,
        pub pix_fmt: Option<String>,
        pub bits_per_raw_sample: Option<String>,
        pub color_primaries: Option<String>,
        #[serde(alias = "color_trc")]
        pub color_transfer: Option<String>,
        #[serde(alias = "colorspace")]
        pub color_space: Option<String>,
        pub color_range: Option<String>,
        pub duration: Option<String>,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct Format {
        pub bit_rate: Option<String>,
        pub duration: Option<String>,
    }
}

/// Probes the first video stream of a file.
///
/// Runs `<ffprobe> -v error -select_streams v:0 -show_entries stream=... -show_entries
/// format=bit_rate,duration -of json <path>` and parses the JSON output.
pub fn probe_file(ffprobe: &str, path: &Path) -> Result<SourceDescriptor, ProbeError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,bit_rate,avg_frame_rate,r_frame_rate,pix_fmt,bits_per_raw_sample,color_primaries,color_transfer,color_space,color_range,duration",
            "-show_entries",
            "format=bit_rate,duration",
            "-of",
            "json",
        ])
        .arg(path)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::FfprobeFailed(format!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ffprobe_output(&stdout)
}

/// Parses ffprobe JSON output into a SourceDescriptor.
pub fn parse_ffprobe_output(json_str: &str) -> Result<SourceDescriptor, ProbeError> {
    let json_str = if json_str.trim().is_empty() {
        "{}"
    } else {
        json_str
    };
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let stream = ffprobe
        .streams
        .and_then(|streams| streams.into_iter().next())
        .unwrap_or_default();
    let format = ffprobe.format.unwrap_or_default();

    let avg_fps = stream.avg_frame_rate.as_deref().and_then(positive_rate);
    let nominal_fps = stream.r_frame_rate.as_deref().and_then(positive_rate);
    let is_variable_frame_rate = match (avg_fps, nominal_fps) {
        (Some(avg), Some(nominal)) => (avg - nominal).abs() > VFR_EPSILON,
        _ => false,
    };

    let pix_fmt = stream.pix_fmt.filter(|fmt| !fmt.trim().is_empty());
    let bit_depth = infer_bit_depth(pix_fmt.as_deref(), stream.bits_per_raw_sample.as_deref());

    let mut color_range = normalize_color_tag(stream.color_range.as_deref());
    if color_range.is_none() && pix_fmt.as_deref().is_some_and(|f| f.starts_with("yuvj")) {
        color_range = Some("pc".to_string());
    }

    let duration_secs = [stream.duration.as_deref(), format.duration.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|raw| raw.trim().parse::<f64>().ok());

    let bitrate = stream
        .bit_rate
        .as_deref()
        .or(format.bit_rate.as_deref())
        .and_then(format_kbps);

    Ok(SourceDescriptor {
        width: stream.width,
        height: stream.height,
        bitrate,
        fps: avg_fps.or(nominal_fps),
        avg_fps,
        nominal_fps,
        is_variable_frame_rate,
        duration_secs,
        pix_fmt,
        bit_depth,
        color_primaries: normalize_color_tag(stream.color_primaries.as_deref()),
        color_transfer: normalize_color_tag(stream.color_transfer.as_deref()),
        color_space: normalize_color_tag(stream.color_space.as_deref()),
        color_range,
    })
}

fn positive_rate(text: &str) -> Option<f64> {
    parse_frame_rate(text).filter(|rate| *rate > 0.0)
}

/// Trimmed tag, or `None` for empty and unknown markers.
fn normalize_color_tag(value: Option<&str>) -> Option<String> {
    let cleaned = value?.trim();
    match cleaned.to_ascii_lowercase().as_str() {
        "" | "unknown" | "unspecified" | "unknown/unknown" => None,
        _ => Some(cleaned.to_string()),
    }
}

/// `bits_per_raw_sample` when positive, else the digits after the first `p` of
/// the pixel format (`yuv420p10le` -> 10).
fn infer_bit_depth(pix_fmt: Option<&str>, bits_per_raw_sample: Option<&str>) -> Option<u32> {
    if let Some(bits) = bits_per_raw_sample
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|bits| *bits >= 1.0)
    {
        return Some(bits as u32);
    }

    for token in pix_fmt?.split(':') {
        if let Some(idx) = token.find('p') {
            let digits: String = token[idx + 1..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if !digits.is_empty() {
                return digits.parse().ok();
            }
        }
    }
    None
}

fn format_kbps(raw: &str) -> Option<String> {
    let bits = raw.trim().parse::<f64>().ok()?.trunc();
    if bits <= 0.0 {
        return None;
    }
    let kbps = (bits / 1000.0).round().max(1.0) as u64;
    Some(format!("{}k", kbps))
}
