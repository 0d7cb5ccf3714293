//! Named parameter presets stored as `<name>.json` files

use crate::params::{EncodingParameters, ParamsError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for preset store operations
#[derive(Debug)]
pub enum PresetError {
    /// No preset with this name
    NotFound(String),
    /// A preset with this name already exists
    AlreadyExists(String),
    /// Name is empty or contains path separators
    InvalidName(String),
    /// IO error reading or writing a preset
    Io(std::io::Error),
    /// Preset file is not valid JSON for the parameter model
    Parse(serde_json::Error),
    /// Preset parsed but holds unusable values
    Invalid(ParamsError),
}

impl std::fmt::Display for PresetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresetError::NotFound(name) => write!(f, "Preset not found: {}", name),
            PresetError::AlreadyExists(name) => write!(f, "Preset already exists: {}", name),
            PresetError::InvalidName(name) => write!(f, "Invalid preset name: '{}'", name),
            PresetError::Io(e) => write!(f, "Preset IO error: {}", e),
            PresetError::Parse(e) => write!(f, "Failed to parse preset: {}", e),
            PresetError::Invalid(e) => write!(f, "Invalid preset: {}", e),
        }
    }
}

impl std::error::Error for PresetError {}

impl From<std::io::Error> for PresetError {
    fn from(e: std::io::Error) -> Self {
        PresetError::Io(e)
    }
}

impl From<serde_json::Error> for PresetError {
    fn from(e: serde_json::Error) -> Self {
        PresetError::Parse(e)
    }
}

impl From<ParamsError> for PresetError {
    fn from(e: ParamsError) -> Self {
        PresetError::Invalid(e)
    }
}

/// Directory-backed preset store
#[derive(Debug, Clone)]
pub struct PresetStore {
    dir: PathBuf,
}

impl PresetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sorted preset names; an absent directory has no presets
    pub fn list(&self) -> Result<Vec<String>, PresetError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn load(&self, name: &str) -> Result<EncodingParameters, PresetError> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(PresetError::NotFound(name.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        let params: EncodingParameters = serde_json::from_str(&content)?;
        params.validate()?;
        Ok(params)
    }

    /// Save a new preset; refuses to replace an existing one
    pub fn save(&self, name: &str, params: &EncodingParameters) -> Result<PathBuf, PresetError> {
        let path = self.path_for(name)?;
        if path.exists() {
            return Err(PresetError::AlreadyExists(name.to_string()));
        }
        self.write(&path, params)?;
        Ok(path)
    }

    pub fn overwrite(
        &self,
        name: &str,
        params: &EncodingParameters,
    ) -> Result<PathBuf, PresetError> {
        let path = self.path_for(name)?;
        self.write(&path, params)?;
        Ok(path)
    }

    /// Delete a preset; deleting an absent preset is a no-op
    pub fn delete(&self, name: &str) -> Result<(), PresetError> {
        let path = self.path_for(name)?;
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<PathBuf, PresetError> {
        let src = self.path_for(old_name)?;
        let dst = self.path_for(new_name)?;
        if !src.exists() {
            return Err(PresetError::NotFound(old_name.to_string()));
        }
        if dst.exists() {
            return Err(PresetError::AlreadyExists(new_name.to_string()));
        }
        fs::rename(&src, &dst)?;
        Ok(dst)
    }

    /// Load every preset, skipping ones that fail to load
    pub fn load_all(&self) -> Result<BTreeMap<String, EncodingParameters>, PresetError> {
        let mut presets = BTreeMap::new();
        for name in self.list()? {
            match self.load(&name) {
                Ok(params) => {
                    presets.insert(name, params);
                }
                Err(e) => {
                    tracing::warn!(preset = %name, error = %e, "skipping unreadable preset");
                }
            }
        }
        Ok(presets)
    }

    fn write(&self, path: &Path, params: &EncodingParameters) -> Result<(), PresetError> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(params)?;
        fs::write(path, json)?;
        Ok(())
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, PresetError> {
        let trimmed = name.trim();
        if trimmed.is_empty()
            || trimmed.contains(['/', '\\'])
            || trimmed == "."
            || trimmed == ".."
        {
            return Err(PresetError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", trimmed)))
    }
}
