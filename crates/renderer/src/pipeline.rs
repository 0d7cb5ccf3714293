//! Pipeline construction.
//!
//! Fast mode renders the source straight to the delivery file. Pro mode first
//! bakes the LUT into a ProRes master, then encodes the delivery file from it.

use crate::command::{self, CommandRequest, ConfigurationError, SynthesizedCommand};
use crate::job::Job;
use crate::probe::SourceDescriptor;
use lut_renderer_config::{BitDepthPolicy, Codec, EncodingParameters};
use std::path::PathBuf;

pub const FAST_STAGE_NAME: &str = "Fast delivery";
pub const MASTER_STAGE_NAME: &str = "ProRes master";
pub const DISTRIBUTION_STAGE_NAME: &str = "Distribution encode";

/// Mastering codec and its fixed settings.
const MASTER_CODEC: &str = "prores_ks";
const MASTER_PIX_FMT: &str = "yuv422p10le";
/// prores_ks profile 3 is 422 HQ.
const MASTER_PROFILE: &str = "3";

/// One ffmpeg invocation within a job.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDescriptor {
    pub name: String,
    pub source: PathBuf,
    pub output: PathBuf,
    pub params: EncodingParameters,
    /// Only the first stage applies the LUT.
    pub lut: Option<PathBuf>,
    /// Delete `output` once the whole job has succeeded.
    pub cleanup_on_success: bool,
    pub notes: Vec<String>,
    /// Probe `source` right before synthesis instead of using the job's descriptor.
    pub probe_source: bool,
}

impl StageDescriptor {
    /// Synthesize this stage's command; stage notes come before synthesis notes.
    pub fn synthesize(
        &self,
        program: &str,
        descriptor: Option<&SourceDescriptor>,
    ) -> Result<SynthesizedCommand, ConfigurationError> {
        let mut cmd = command::synthesize(&CommandRequest {
            program,
            source: &self.source,
            output: &self.output,
            params: &self.params,
            lut: self.lut.as_deref(),
            descriptor,
        })?;
        let mut notes = self.notes.clone();
        notes.append(&mut cmd.notes);
        cmd.notes = notes;
        Ok(cmd)
    }
}

/// Parameters for the mastering stage.
///
/// Forces ProRes 422 HQ with audio passthrough and strips rate control, audio
/// transcoding and container delivery options.
pub fn master_params(params: &EncodingParameters) -> EncodingParameters {
    EncodingParameters {
        video_codec: Codec::new(MASTER_CODEC),
        audio_codec: Codec::copy(),
        pix_fmt: Some(MASTER_PIX_FMT.to_string()),
        profile: Some(MASTER_PROFILE.to_string()),
        level: None,
        crf: None,
        preset: None,
        tune: None,
        bitrate: None,
        audio_bitrate: None,
        sample_rate: None,
        channels: None,
        faststart: false,
        bit_depth_policy: BitDepthPolicy::Preserve,
        ..params.clone()
    }
}

/// Build the ordered stage list for a job.
///
/// # Errors
/// Pro mode without an intermediate path fails before any stage is built.
pub fn build_pipeline(job: &Job) -> Result<Vec<StageDescriptor>, ConfigurationError> {
    if !job.params.is_pro() {
        return Ok(vec![StageDescriptor {
            name: FAST_STAGE_NAME.to_string(),
            source: job.source_path.clone(),
            output: job.output_path.clone(),
            params: job.params.clone(),
            lut: job.lut_path.clone(),
            cleanup_on_success: false,
            notes: Vec::new(),
            probe_source: false,
        }]);
    }

    let intermediate = job
        .intermediate_path
        .clone()
        .filter(|path| !path.as_os_str().is_empty())
        .ok_or(ConfigurationError::MissingIntermediatePath)?;

    Ok(vec![
        StageDescriptor {
            name: MASTER_STAGE_NAME.to_string(),
            source: job.source_path.clone(),
            output: intermediate.clone(),
            params: master_params(&job.params),
            lut: job.lut_path.clone(),
            cleanup_on_success: true,
            notes: vec![format!(
                "master fixed to ProRes 422 HQ ({})",
                MASTER_PIX_FMT
            )],
            probe_source: false,
        },
        StageDescriptor {
            name: DISTRIBUTION_STAGE_NAME.to_string(),
            source: intermediate,
            output: job.output_path.clone(),
            params: job.params.clone(),
            lut: None,
            cleanup_on_success: false,
            notes: Vec::new(),
            probe_source: true,
        },
    ])
}

/// Reject jobs whose pipeline can never synthesize, before they are queued.
pub fn validate_pipeline(job: &Job) -> Result<(), ConfigurationError> {
    job.params.validate()?;
    for stage in build_pipeline(job)? {
        if stage.lut.is_some() && stage.params.video_codec.is_copy() {
            return Err(ConfigurationError::FilterWithStreamCopy);
        }
    }
    Ok(())
}
