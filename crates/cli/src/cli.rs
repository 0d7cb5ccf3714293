use clap::{Args, Parser, Subcommand};
use lut_renderer_config::{
    BitDepthPolicy, Codec, EncodingParameters, LutInputMatrix, LutInterp, LutOutputTags,
    ProcessingMode,
};
use std::path::PathBuf;

/// LUT Renderer - batch LUT application and delivery encoding with ffmpeg
#[derive(Parser, Debug)]
#[command(name = "lut-renderer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the settings file
    #[arg(short, long, global = true, default_value = "lut-renderer.toml")]
    pub config: PathBuf,

    /// Enable debug logging, including ffmpeg output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render files or folders
    Render(RenderArgs),

    /// Manage parameter presets
    Presets {
        #[command(subcommand)]
        command: PresetCommand,
    },

    /// Manage the LUT history
    Luts {
        #[command(subcommand)]
        command: LutCommand,
    },

    /// Check that ffmpeg and ffprobe are available
    Check,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Files or folders to render
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// 3D LUT to apply (defaults to the current LUT from the history)
    #[arg(long)]
    pub lut: Option<PathBuf>,

    /// Render without a LUT even when one is current
    #[arg(long, conflicts_with = "lut")]
    pub no_lut: bool,

    /// Start from a saved preset
    #[arg(long)]
    pub preset: Option<String>,

    #[command(flatten)]
    pub params: ParamArgs,

    /// Output directory (defaults to `output/` next to the first input)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Directory for ProRes masters in pro mode
    #[arg(long)]
    pub intermediate_dir: Option<PathBuf>,

    /// Maximum concurrent jobs
    #[arg(short, long)]
    pub jobs: Option<u32>,

    /// Print each stage's command without running anything
    #[arg(long)]
    pub dry_run: bool,

    /// Emit events as JSON lines
    #[arg(long)]
    pub json: bool,
}

/// Parameter overrides; unset flags keep the preset (or default) value.
#[derive(Args, Debug, Default, Clone)]
pub struct ParamArgs {
    /// Processing mode: fast or pro
    #[arg(long)]
    pub mode: Option<ProcessingMode>,

    /// Video encoder, e.g. libx264, libx265, hevc_videotoolbox, copy
    #[arg(long)]
    pub video_codec: Option<String>,

    /// Audio encoder, e.g. aac, copy
    #[arg(long)]
    pub audio_codec: Option<String>,

    /// Video bitrate, e.g. 12M or 8000k
    #[arg(long)]
    pub bitrate: Option<String>,

    #[arg(long)]
    pub crf: Option<String>,

    /// Encoder speed preset, e.g. slow
    #[arg(long)]
    pub encoder_preset: Option<String>,

    /// Output resolution WxH
    #[arg(long)]
    pub resolution: Option<String>,

    /// Output frame rate, e.g. 25 or 30000/1001
    #[arg(long)]
    pub fps: Option<String>,

    /// Keyframe interval in seconds
    #[arg(long)]
    pub gop: Option<u32>,

    #[arg(long)]
    pub pix_fmt: Option<String>,

    /// Bit depth policy: preserve, force_8bit or auto
    #[arg(long)]
    pub bit_depth: Option<BitDepthPolicy>,

    #[arg(long)]
    pub audio_bitrate: Option<String>,

    /// LUT interpolation: nearest, trilinear, tetrahedral, pyramid, prism, cubic
    #[arg(long)]
    pub lut_interp: Option<LutInterp>,

    /// Matrix assumed for the LUT input: auto, bt709, none or a matrix name
    #[arg(long)]
    pub lut_input_matrix: Option<LutInputMatrix>,

    /// Output color tags with a LUT: bt709, inherit or none
    #[arg(long)]
    pub lut_output_tags: Option<String>,

    /// Extract a cover frame next to each output
    #[arg(long)]
    pub cover: bool,

    /// Move the MP4/MOV index to the front
    #[arg(long)]
    pub faststart: bool,

    /// Keep variable frame rate sources variable
    #[arg(long)]
    pub keep_vfr: bool,
}

impl ParamArgs {
    /// Overlay the flags that were given onto `params`.
    pub fn apply(&self, params: &mut EncodingParameters) {
        if let Some(mode) = self.mode {
            params.processing_mode = mode;
        }
        if let Some(codec) = &self.video_codec {
            params.video_codec = Codec::new(codec.as_str());
        }
        if let Some(codec) = &self.audio_codec {
            params.audio_codec = Codec::new(codec.as_str());
        }
        override_text(&mut params.bitrate, &self.bitrate);
        override_text(&mut params.crf, &self.crf);
        override_text(&mut params.preset, &self.encoder_preset);
        override_text(&mut params.resolution, &self.resolution);
        override_text(&mut params.fps, &self.fps);
        override_text(&mut params.pix_fmt, &self.pix_fmt);
        override_text(&mut params.audio_bitrate, &self.audio_bitrate);
        if let Some(gop) = self.gop {
            params.gop = Some(gop);
        }
        if let Some(policy) = self.bit_depth {
            params.bit_depth_policy = policy;
        }
        if let Some(interp) = self.lut_interp {
            params.lut_interp = interp;
        }
        if let Some(matrix) = self.lut_input_matrix {
            params.lut_input_matrix = matrix;
        }
        if let Some(tags) = &self.lut_output_tags {
            params.lut_output_tags = LutOutputTags::from(tags.as_str());
        }
        if self.cover {
            params.generate_cover = true;
        }
        if self.faststart {
            params.faststart = true;
        }
        if self.keep_vfr {
            params.force_cfr = false;
        }
    }
}

fn override_text(target: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = value {
        let value = value.trim();
        *target = (!value.is_empty()).then(|| value.to_string());
    }
}

#[derive(Subcommand, Debug)]
pub enum PresetCommand {
    /// List preset names
    List,

    /// Print a preset as JSON
    Show { name: String },

    /// Save the given parameters (over defaults) as a preset
    Save {
        name: String,

        #[command(flatten)]
        params: ParamArgs,

        /// Replace an existing preset
        #[arg(long)]
        force: bool,
    },

    Delete { name: String },

    Rename { from: String, to: String },
}

#[derive(Subcommand, Debug)]
pub enum LutCommand {
    /// Show the current LUT and history
    List,

    /// Add LUT files to the history
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Remove a LUT from the history
    Remove { path: PathBuf },

    /// Make a LUT the current one
    Use { path: PathBuf },

    /// Drop LUTs whose files no longer exist
    Prune,
}
