//! Application settings and loading logic

use crate::luts::LutHistory;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading or writing the settings file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// TOML serialization error
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to access settings file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse settings: {}", e),
            ConfigError::Serialize(e) => write!(f, "Failed to serialize settings: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Serialize(e)
    }
}

/// External tool locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    /// ffmpeg binary name or path
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    /// ffprobe binary name or path
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Maximum concurrent jobs (0 = auto-derive)
    #[serde(default)]
    pub max_concurrent_jobs: u32,
    /// Milliseconds to wait after a graceful terminate before killing ffmpeg
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_cancel_grace_ms() -> u64 {
    5000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 0,
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

/// Output, master and preset locations
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PathsConfig {
    /// Output directory (defaults to `<source dir>/output`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Directory for ProRes masters in pro mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate_dir: Option<PathBuf>,
    /// Preset directory (defaults to `presets/` next to the settings file)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presets_dir: Option<PathBuf>,
}

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub luts: LutHistory,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse settings from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }

    /// Apply environment variable overrides to the settings
    ///
    /// Overrides the following values if environment variables are set:
    /// - LUT_RENDERER_FFMPEG -> tools.ffmpeg
    /// - LUT_RENDERER_FFPROBE -> tools.ffprobe
    /// - LUT_RENDERER_MAX_JOBS -> queue.max_concurrent_jobs
    /// - LUT_RENDERER_INTERMEDIATE_DIR -> paths.intermediate_dir
    /// - LUT_RENDERER_OUTPUT_DIR -> paths.output_dir
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("LUT_RENDERER_FFMPEG") {
            if !val.trim().is_empty() {
                self.tools.ffmpeg = val.trim().to_string();
            }
        }

        if let Ok(val) = env::var("LUT_RENDERER_FFPROBE") {
            if !val.trim().is_empty() {
                self.tools.ffprobe = val.trim().to_string();
            }
        }

        if let Ok(val) = env::var("LUT_RENDERER_MAX_JOBS") {
            if let Ok(jobs) = val.trim().parse::<u32>() {
                self.queue.max_concurrent_jobs = jobs;
            }
        }

        if let Ok(val) = env::var("LUT_RENDERER_INTERMEDIATE_DIR") {
            if !val.trim().is_empty() {
                self.paths.intermediate_dir = Some(PathBuf::from(val.trim()));
            }
        }

        if let Ok(val) = env::var("LUT_RENDERER_OUTPUT_DIR") {
            if !val.trim().is_empty() {
                self.paths.output_dir = Some(PathBuf::from(val.trim()));
            }
        }
    }

    /// Load settings from file and apply environment overrides
    ///
    /// A missing file is not an error: defaults are used.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut settings = if path.exists() {
            Self::load_from_file(path)?
        } else {
            tracing::debug!(path = %path.display(), "settings file not found, using defaults");
            Self::default()
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Write settings as pretty TOML, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Resolve the preset directory relative to the settings file
    pub fn presets_dir(&self, settings_path: &Path) -> PathBuf {
        match &self.paths.presets_dir {
            Some(dir) => dir.clone(),
            None => settings_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("presets"),
        }
    }
}
