//! Startup checks
//!
//! Verifies that the configured ffmpeg and ffprobe binaries can be found before any
//! job is queued, and reads ffmpeg's version for the log.

use lut_renderer_config::Settings;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{name} not found (looked for '{configured}'); install it or set [tools] {name} in the settings file")]
    ToolMissing { name: &'static str, configured: String },

    #[error("{name} -version failed: {reason}")]
    VersionFailed { name: &'static str, reason: String },
}

/// A located external tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolReport {
    pub name: &'static str,
    pub path: PathBuf,
    /// First line of `-version` output.
    pub version: Option<String>,
    /// ffmpeg major version, when it could be parsed.
    pub major: Option<u32>,
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 7.1 ..."
/// - N-prefixed: "ffmpeg version n7.1-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');
    let major_str = version_str.split(|c| c == '.' || c == '-').next()?;

    major_str.parse().ok()
}

/// Locate one tool and read its `-version` banner.
pub fn check_tool(name: &'static str, configured: &str) -> Result<ToolReport, StartupError> {
    let path = which::which(configured).map_err(|_| StartupError::ToolMissing {
        name,
        configured: configured.to_string(),
    })?;

    let output = Command::new(&path)
        .arg("-version")
        .output()
        .map_err(|e| StartupError::VersionFailed {
            name,
            reason: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(StartupError::VersionFailed {
            name,
            reason: format!("exited with {}", output.status),
        });
    }

    let banner = String::from_utf8_lossy(&output.stdout);
    let version = banner.lines().next().map(|line| line.trim().to_string());
    let major = parse_ffmpeg_version(&banner);
    tracing::debug!(tool = name, path = %path.display(), ?major, "tool located");

    Ok(ToolReport {
        name,
        path,
        version,
        major,
    })
}

/// Check both ffmpeg and ffprobe from the settings.
pub fn check_tools(settings: &Settings) -> Result<Vec<ToolReport>, StartupError> {
    let ffmpeg = check_tool("ffmpeg", &settings.tools.ffmpeg)?;
    match ffmpeg.major {
        Some(major) => tracing::info!(major, path = %ffmpeg.path.display(), "ffmpeg found"),
        None => tracing::warn!(path = %ffmpeg.path.display(), "could not parse ffmpeg version"),
    }
    let ffprobe = check_tool("ffprobe", &settings.tools.ffprobe)?;
    Ok(vec![ffmpeg, ffprobe])
}
