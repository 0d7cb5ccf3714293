//! Fake ffmpeg scripts and probes shared by the supervisor and queue tests.

use crate::probe::{ProbeError, SourceDescriptor, SourceProbe};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Prints a 10 second duration header, three status updates, creates the output
/// (last argument) and exits 0.
pub const OK_SCRIPT: &str = r#"
for last; do :; done
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s" >&2
printf 'frame=1 time=00:00:02.50 bitrate=1\rframe=2 time=00:00:05.00 bitrate=1\r' >&2
echo "frame=3 time=00:00:10.00 bitrate=1" >&2
touch "$last"
"#;

/// Reports 10% and then blocks until terminated.
pub const SLOW_SCRIPT: &str = r#"
echo "  Duration: 00:00:10.00, start: 0.000000" >&2
echo "frame=1 time=00:00:01.00 bitrate=1" >&2
exec sleep 30
"#;

/// Write an executable fake ffmpeg into `dir` and return its path.
pub fn fake_ffmpeg(dir: &TempDir, body: &str) -> String {
    let path = dir.path().join("ffmpeg");
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

/// Counts calls and describes everything as an empty descriptor.
#[derive(Default)]
pub struct CountingProbe(pub AtomicUsize);

impl CountingProbe {
    pub fn calls(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl SourceProbe for CountingProbe {
    fn probe(&self, _path: &Path) -> Result<SourceDescriptor, ProbeError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(SourceDescriptor::default())
    }
}

pub struct FailingProbe;

impl SourceProbe for FailingProbe {
    fn probe(&self, _path: &Path) -> Result<SourceDescriptor, ProbeError> {
        Err(ProbeError::FfprobeFailed("no such file".to_string()))
    }
}
