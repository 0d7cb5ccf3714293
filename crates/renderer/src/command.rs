//! ffmpeg command synthesis.
//!
//! Composes the resolved policies into one flat argument list. The argument order
//! is fixed: global flags, input, codecs, video options, filter graph, audio options,
//! container flags, output.

use crate::policy::{self, TimingMode};
use crate::probe::SourceDescriptor;
use lut_renderer_config::{EncodingParameters, ParamsError};
use std::path::Path;
use thiserror::Error;

/// Error raised before any process is spawned.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigurationError {
    /// Stream copy cannot carry per-pixel filters.
    #[error("a LUT or pixel filter cannot be combined with video codec 'copy'")]
    FilterWithStreamCopy,

    /// Pro mode needs somewhere to write the master.
    #[error("pro mode requires an intermediate file path (set an intermediate directory)")]
    MissingIntermediatePath,

    /// Parameters failed validation.
    #[error("invalid encoding parameters: {0}")]
    InvalidParameters(#[from] ParamsError),
}

/// Everything one invocation is built from.
#[derive(Debug, Clone, Copy)]
pub struct CommandRequest<'a> {
    /// ffmpeg binary name or path.
    pub program: &'a str,
    pub source: &'a Path,
    pub output: &'a Path,
    pub params: &'a EncodingParameters,
    pub lut: Option<&'a Path>,
    pub descriptor: Option<&'a SourceDescriptor>,
}

/// A complete ffmpeg invocation plus the rationale for its decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedCommand {
    /// Program first, then arguments.
    pub argv: Vec<String>,
    pub notes: Vec<String>,
}

impl SynthesizedCommand {
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn arguments(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    /// Shell-quoted rendering for logs. Execution never goes through a shell.
    pub fn display(&self) -> String {
        self.argv
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build a tokio Command for this invocation.
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(self.program());
        cmd.args(self.arguments());
        cmd
    }
}

/// Synthesize the ffmpeg command for one stage.
///
/// # Errors
/// Returns [`ConfigurationError::FilterWithStreamCopy`] when a LUT is requested with
/// video stream copy. Nothing else fails; missing information degrades to encoder
/// defaults.
pub fn synthesize(request: &CommandRequest<'_>) -> Result<SynthesizedCommand, ConfigurationError> {
    let params = request.params;
    let source = request.descriptor;

    if request.lut.is_some() && params.video_codec.is_copy() {
        return Err(ConfigurationError::FilterWithStreamCopy);
    }

    let mut notes = Vec::new();
    let mut argv = vec![request.program.to_string(), "-hide_banner".to_string()];
    if params.overwrite {
        argv.push("-y".to_string());
    }
    push(&mut argv, "-i", path_arg(request.source));

    let mut filters = match request.lut {
        Some(lut) => lut_filters(params, lut, source, &mut notes),
        None => Vec::new(),
    };

    push(&mut argv, "-c:v", params.video_codec.as_str());
    push(&mut argv, "-c:a", params.audio_codec.as_str());

    if !params.video_codec.is_copy() {
        let timing = policy::resolve_timing(params, source);
        match &timing.mode {
            TimingMode::Cfr { rate } => {
                push(&mut argv, "-fps_mode", "cfr");
                if let Some(rate) = rate {
                    push(&mut argv, "-r", rate);
                }
            }
            TimingMode::Passthrough => push(&mut argv, "-fps_mode", "passthrough"),
        }
        notes.push(timing.note.clone());

        let pixel = policy::resolve_pixel_format(params, source);
        notes.extend(pixel.note);
        if let Some(pix_fmt) = &pixel.pix_fmt {
            if request.lut.is_some() {
                filters.push(format!("format={}", pix_fmt));
            }
            push(&mut argv, "-pix_fmt", pix_fmt);
        }

        if let Some(resolution) = &params.resolution {
            push(&mut argv, "-s", resolution);
        }

        if let Some(rate) = policy::resolve_rate_control(params) {
            push(&mut argv, "-b:v", &rate.bitrate);
            if let Some((maxrate, bufsize)) = &rate.vbv {
                push(&mut argv, "-maxrate", maxrate);
                push(&mut argv, "-bufsize", bufsize);
            }
            notes.extend(rate.note);
        }

        for (flag, value) in [
            ("-crf", &params.crf),
            ("-preset", &params.preset),
            ("-tune", &params.tune),
        ] {
            if let Some(value) = value {
                push(&mut argv, flag, value);
            }
        }

        if let Some(gop) = policy::resolve_gop(params, timing.output_fps) {
            push(&mut argv, "-g", &gop.gop.to_string());
            notes.extend(gop.note);
        }

        if let Some(profile) = &params.profile {
            push(&mut argv, "-profile:v", profile);
        }
        if let Some(level) = &params.level {
            push(&mut argv, "-level", level);
        }
        if let Some(threads) = params.threads {
            push(&mut argv, "-threads", &threads.to_string());
        }

        let tags = policy::resolve_output_tags(params, request.lut.is_some(), source);
        for (flag, value) in &tags.tags {
            push(&mut argv, flag, value);
        }
        notes.extend(tags.note);

        notes.extend(policy::hardware_caution(params, source));
    }

    if !filters.is_empty() {
        push(&mut argv, "-vf", &filters.join(","));
    }

    if !params.audio_codec.is_copy() {
        if let Some(bitrate) = &params.audio_bitrate {
            push(&mut argv, "-b:a", bitrate);
        }
        if let Some(rate) = params.sample_rate {
            push(&mut argv, "-ar", &rate.to_string());
        }
        if let Some(channels) = params.channels {
            push(&mut argv, "-ac", &channels.to_string());
        }
    }

    if params.faststart {
        push(&mut argv, "-movflags", "+faststart");
    }

    argv.push(path_arg(request.output));
    Ok(SynthesizedCommand { argv, notes })
}

/// Filters in front of (and including) `lut3d`.
fn lut_filters(
    params: &EncodingParameters,
    lut: &Path,
    source: Option<&SourceDescriptor>,
    notes: &mut Vec<String>,
) -> Vec<String> {
    let mut filters = Vec::new();
    let matrix = policy::resolve_lut_input_matrix(params.lut_input_matrix, source);
    let range = policy::resolve_range_normalization(&params.lut_output_tags, source);

    if let Some(range) = &range {
        let mut scale = vec![
            "in_range=pc".to_string(),
            format!("out_range={}", range.out_range),
        ];
        notes.push(format!(
            "range: full-range source remapped to out_range={} via format={}",
            range.out_range, range.intermediate_pix_fmt
        ));
        if let Some(matrix) = matrix {
            scale.push(format!("in_color_matrix={}", matrix));
            scale.push(format!("out_color_matrix={}", matrix));
        }
        filters.push(format!("scale={}", scale.join(":")));
        filters.push(format!("format={}", range.intermediate_pix_fmt));
    } else if let Some(matrix) = matrix {
        filters.push(format!(
            "scale=in_color_matrix={}:out_color_matrix={}",
            matrix, matrix
        ));
    }

    match matrix {
        Some(matrix) => notes.push(format!(
            "LUT input matrix: {} ({})",
            matrix, params.lut_input_matrix
        )),
        None => notes.push(format!(
            "LUT input matrix: not forced ({})",
            params.lut_input_matrix
        )),
    }

    let interp = params.lut_interp;
    filters.push(format!(
        "lut3d=file='{}':interp={}",
        escape_filter_path(lut),
        interp
    ));
    notes.push(format!("LUT: lut3d interp={}", interp));
    filters
}

/// Escape a path for a single-quoted filter-graph argument.
///
/// Backslashes are doubled first, then single quotes are escaped.
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
}

/// Single-frame cover extraction from `input` into `cover`.
pub fn cover_command(program: &str, input: &Path, cover: &Path) -> SynthesizedCommand {
    let argv = vec![
        program.to_string(),
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        path_arg(input),
        "-frames:v".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        "2".to_string(),
        path_arg(cover),
    ];
    SynthesizedCommand {
        argv,
        notes: Vec::new(),
    }
}

fn push(argv: &mut Vec<String>, flag: &str, value: impl Into<String>) {
    argv.push(flag.to_string());
    argv.push(value.into());
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\"'\"'"))
    }
}
