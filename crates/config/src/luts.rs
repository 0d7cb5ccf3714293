//! Recently used LUT files
//!
//! History is most-recent-first and never holds the same path twice.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// LUT history persisted in the `[luts]` settings section
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LutHistory {
    /// LUT applied by default when none is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<PathBuf>,
    #[serde(default)]
    pub history: Vec<PathBuf>,
}

impl LutHistory {
    /// Add paths to the front of the history, in the given order
    pub fn add<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let incoming: Vec<PathBuf> = paths
            .into_iter()
            .map(Into::into)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        self.history.retain(|p| !incoming.contains(p));
        let mut merged = incoming;
        merged.append(&mut self.history);
        self.history = dedupe(merged);
    }

    /// Remove a path; clears `current` when it pointed at the same file
    ///
    /// Returns whether the path was in the history.
    pub fn remove(&mut self, path: &Path) -> bool {
        let before = self.history.len();
        self.history.retain(|p| p != path);
        if self.current.as_deref() == Some(path) {
            self.current = None;
        }
        self.history.len() != before
    }

    /// Make a path current and move it to the front
    pub fn set_current(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.history.retain(|p| p != &path);
        self.history.insert(0, path.clone());
        self.current = Some(path);
    }

    /// Drop paths that no longer exist on disk, returning the removed entries
    pub fn prune_missing(&mut self) -> Vec<PathBuf> {
        let (kept, removed): (Vec<PathBuf>, Vec<PathBuf>) =
            self.history.drain(..).partition(|p| p.exists());
        self.history = kept;
        if let Some(current) = &self.current {
            if !current.exists() {
                self.current = None;
            }
        }
        removed
    }
}

fn dedupe(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}
