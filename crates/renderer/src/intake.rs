//! Intake: turning source files into queued jobs.
//!
//! Collects video files, probes them, fills blank parameters from the source and
//! allocates output, cover and master paths that no other job in this process
//! holds and that do not exist on disk yet.

use crate::command::ConfigurationError;
use crate::job::{Job, JobRevision};
use crate::pipeline::validate_pipeline;
use crate::probe::{SourceDescriptor, SourceProbe};
use lut_renderer_config::EncodingParameters;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Video file extensions accepted at intake (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi", "mxf", "webm"];

/// ProRes 422 HQ reference rate used for master size estimates.
const MASTER_REFERENCE_MBPS: f64 = 220.0;
const MASTER_REFERENCE_PIXELS: f64 = 1920.0 * 1080.0;
const MASTER_REFERENCE_FPS: f64 = 29.97;
const MASTER_MIN_SCALE: f64 = 0.1;

/// Error type for intake
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("no video sources given")]
    NoSources,

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("LUT file not found: {0}")]
    LutMissing(PathBuf),

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Expand files and directories into a list of video files.
///
/// Files are kept when their extension is a video extension. Directories are
/// walked recursively in name order, skipping hidden subdirectories.
pub fn collect_sources(paths: &[PathBuf]) -> Vec<PathBuf> {
    use walkdir::WalkDir;

    let mut sources = Vec::new();
    for path in paths {
        if path.is_file() {
            if is_video_file(path) {
                sources.push(path.clone());
            }
            continue;
        }
        if !path.is_dir() {
            tracing::warn!(path = %path.display(), "input does not exist, skipping");
            continue;
        }

        let walker = WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                // Allow the root directory even if it starts with '.'
                !(entry.file_type().is_dir()
                    && entry.depth() > 0
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| name.starts_with('.')))
            });

        for entry in walker.filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && is_video_file(entry.path()) {
                sources.push(entry.path().to_path_buf());
            }
        }
    }
    sources
}

/// Hands out paths that neither exist on disk nor were handed out before.
#[derive(Debug, Default)]
pub struct PathAllocator {
    reserved: HashSet<PathBuf>,
}

impl PathAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<dir>/<base><ext>`, then `<dir>/<base>_1<ext>`, `_2`, ... until free.
    ///
    /// `ext` includes the leading dot, or is empty.
    pub fn allocate(&mut self, dir: &Path, base: &str, ext: &str) -> PathBuf {
        let mut candidate = dir.join(format!("{}{}", base, ext));
        let mut counter = 1u32;
        while candidate.exists() || self.reserved.contains(&candidate) {
            candidate = dir.join(format!("{}_{}{}", base, counter, ext));
            counter += 1;
        }
        self.reserved.insert(candidate.clone());
        candidate
    }

    /// Make a path available again.
    pub fn release(&mut self, path: &Path) {
        self.reserved.remove(path);
    }

    /// Mark a path as handed out.
    pub fn reserve(&mut self, path: &Path) {
        self.reserved.insert(path.to_path_buf());
    }

    /// `<stem>_out` with the source's extension.
    pub fn output_path(&mut self, source: &Path, dir: &Path) -> PathBuf {
        let ext = source
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        self.allocate(dir, &format!("{}_out", stem(source)), &ext)
    }

    pub fn cover_path(&mut self, source: &Path, dir: &Path) -> PathBuf {
        self.allocate(dir, &format!("{}_cover", stem(source)), ".jpg")
    }

    pub fn intermediate_path(&mut self, source: &Path, dir: &Path) -> PathBuf {
        self.allocate(dir, &format!("{}_master", stem(source)), ".mov")
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string())
}

/// Fill a blank resolution and bitrate from the source, unless video is copied.
///
/// Returns the `key=value` pairs that were applied.
pub fn apply_source_defaults(
    params: &mut EncodingParameters,
    source: Option<&SourceDescriptor>,
) -> Vec<String> {
    let mut applied = Vec::new();
    let Some(source) = source else {
        return applied;
    };
    if params.video_codec.is_copy() {
        return applied;
    }

    if params.resolution.is_none() {
        if let Some(resolution) = source.resolution() {
            applied.push(format!("resolution={}", resolution));
            params.resolution = Some(resolution);
        }
    }
    if params.bitrate.is_none() {
        if let Some(bitrate) = source.bitrate.clone() {
            applied.push(format!("bitrate={}", bitrate));
            params.bitrate = Some(bitrate);
        }
    }
    applied
}

/// Estimated ProRes 422 HQ master size in bytes.
///
/// 220 Mbps at 1920x1080 and 29.97 fps, scaled by pixel rate (never below a tenth
/// of that) and multiplied by the duration. `None` without dimensions, frame rate
/// or duration.
pub fn estimate_master_bytes(source: &SourceDescriptor) -> Option<u64> {
    let width = source.width.filter(|w| *w > 0)? as f64;
    let height = source.height.filter(|h| *h > 0)? as f64;
    let fps = source.fps.filter(|f| *f > 0.0)?;
    let duration = source.duration_secs.filter(|d| *d > 0.0)?;

    let scale = (width * height * fps) / (MASTER_REFERENCE_PIXELS * MASTER_REFERENCE_FPS);
    let mbps = MASTER_REFERENCE_MBPS * scale.max(MASTER_MIN_SCALE);
    let bytes_per_second = mbps * 1_000_000.0 / 8.0;
    Some((bytes_per_second * duration) as u64)
}

/// Free space on the disk holding `dir`, via the longest matching mount point.
pub fn free_space(dir: &Path) -> Option<u64> {
    use sysinfo::Disks;

    let dir = dir.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| dir.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// Human-readable byte count (`1.50 GB`).
pub fn format_bytes(value: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = value as f64;
    for unit in &UNITS[..UNITS.len() - 1] {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} {}", size, UNITS[UNITS.len() - 1])
}

/// Total master footprint of a pro-mode intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterEstimate {
    pub total_bytes: u64,
    /// Sources that could be estimated.
    pub estimated: usize,
    /// Free space where the masters go, when it could be read.
    pub free_bytes: Option<u64>,
}

impl MasterEstimate {
    pub fn fits(&self) -> bool {
        self.free_bytes.map_or(true, |free| self.total_bytes <= free)
    }
}

/// Result of admitting a batch of sources.
#[derive(Debug, Clone)]
pub struct Admission {
    pub jobs: Vec<Job>,
    /// Present in pro mode when at least one source could be estimated.
    pub master_estimate: Option<MasterEstimate>,
}

/// Builds jobs from sources and a parameter template.
pub struct JobIntake {
    probe: Arc<dyn SourceProbe>,
    output_dir: Option<PathBuf>,
    intermediate_dir: Option<PathBuf>,
    allocator: PathAllocator,
}

impl JobIntake {
    /// `output_dir` defaults to `output/` next to each batch's first source.
    pub fn new(
        probe: Arc<dyn SourceProbe>,
        output_dir: Option<PathBuf>,
        intermediate_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            probe,
            output_dir,
            intermediate_dir,
            allocator: PathAllocator::new(),
        }
    }

    /// Create Pending jobs for `sources`.
    ///
    /// # Errors
    /// Invalid parameters, pro mode without an intermediate directory, a missing
    /// LUT, or a LUT combined with video stream copy. No job is created then.
    pub fn admit(
        &mut self,
        sources: &[PathBuf],
        template: &EncodingParameters,
        lut: Option<&Path>,
    ) -> Result<Admission, IntakeError> {
        let first = sources.first().ok_or(IntakeError::NoSources)?;
        template.validate().map_err(ConfigurationError::from)?;
        let intermediate_dir = self.require_intermediate_dir(template)?;
        check_lut(lut)?;

        let output_dir = self.resolve_output_dir(first)?;
        let mut jobs = Vec::with_capacity(sources.len());
        let mut total_bytes = 0u64;
        let mut estimated = 0usize;

        for source in sources {
            let source_info = self.probe_source(source);
            let mut params = template.clone();
            let applied = apply_source_defaults(&mut params, source_info.as_ref());
            if !applied.is_empty() {
                tracing::info!(
                    source = %source.display(),
                    applied = %applied.join(", "),
                    "using source values for blank parameters"
                );
            }
            if let Some(info) = &source_info {
                log_source_info(source, info, &params);
            }

            let mut job = Job::new(
                source.clone(),
                self.allocator.output_path(source, &output_dir),
                params,
            );
            job.lut_path = lut.map(Path::to_path_buf);
            if job.params.generate_cover {
                job.cover_path = Some(self.allocator.cover_path(source, &output_dir));
            }
            if let Some(dir) = &intermediate_dir {
                job.intermediate_path = Some(self.allocator.intermediate_path(source, dir));
                if let Some(bytes) = source_info.as_ref().and_then(estimate_master_bytes) {
                    tracing::info!(
                        source = %source.display(),
                        estimate = %format_bytes(bytes),
                        "master size estimate"
                    );
                    total_bytes += bytes;
                    estimated += 1;
                }
            }
            job.source_info = source_info;

            if let Err(e) = validate_pipeline(&job) {
                for job in &jobs {
                    self.release(job);
                }
                self.release(&job);
                return Err(e.into());
            }
            jobs.push(job);
        }

        let master_estimate = match (&intermediate_dir, estimated) {
            (Some(dir), n) if n > 0 => {
                let estimate = MasterEstimate {
                    total_bytes,
                    estimated,
                    free_bytes: free_space(dir),
                };
                log_master_estimate(&estimate);
                Some(estimate)
            }
            _ => None,
        };

        tracing::info!(count = jobs.len(), "jobs admitted");
        Ok(Admission {
            jobs,
            master_estimate,
        })
    }

    /// Re-derive parameters and paths for reprocessing `job`.
    ///
    /// Source defaults come from the job's stored descriptor; the job's previous
    /// paths are released first so unused ones can be handed out again. On error
    /// the job keeps its reservations and nothing new stays reserved.
    pub fn revise(
        &mut self,
        job: &Job,
        params: &EncodingParameters,
        lut: Option<&Path>,
    ) -> Result<JobRevision, IntakeError> {
        params.validate().map_err(ConfigurationError::from)?;
        let intermediate_dir = self.require_intermediate_dir(params)?;
        check_lut(lut)?;
        let output_dir = self.resolve_output_dir(&job.source_path)?;

        self.release(job);
        let mut params = params.clone();
        apply_source_defaults(&mut params, job.source_info.as_ref());

        let source = &job.source_path;
        let revision = JobRevision {
            output_path: self.allocator.output_path(source, &output_dir),
            cover_path: params
                .generate_cover
                .then(|| self.allocator.cover_path(source, &output_dir)),
            intermediate_path: intermediate_dir
                .as_deref()
                .map(|dir| self.allocator.intermediate_path(source, dir)),
            lut_path: lut.map(Path::to_path_buf),
            params,
        };

        let mut candidate = job.clone();
        candidate.apply_revision(revision.clone());
        if let Err(e) = validate_pipeline(&candidate) {
            self.release(&candidate);
            self.reserve_paths(job);
            return Err(e.into());
        }
        tracing::info!(job = %job.id, output = %revision.output_path.display(), "job revised");
        Ok(revision)
    }

    fn release(&mut self, job: &Job) {
        self.allocator.release(&job.output_path);
        for path in [&job.cover_path, &job.intermediate_path].into_iter().flatten() {
            self.allocator.release(path);
        }
    }

    fn reserve_paths(&mut self, job: &Job) {
        self.allocator.reserve(&job.output_path);
        for path in [&job.cover_path, &job.intermediate_path].into_iter().flatten() {
            self.allocator.reserve(path);
        }
    }

    fn probe_source(&self, source: &Path) -> Option<SourceDescriptor> {
        match self.probe.probe(source) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(source = %source.display(), error = %e, "failed to read source info");
                None
            }
        }
    }

    /// Pro mode needs somewhere to put masters; the directory is created.
    fn require_intermediate_dir(
        &self,
        params: &EncodingParameters,
    ) -> Result<Option<PathBuf>, IntakeError> {
        if !params.is_pro() {
            return Ok(None);
        }
        let dir = self
            .intermediate_dir
            .clone()
            .filter(|dir| !dir.as_os_str().is_empty())
            .ok_or(ConfigurationError::MissingIntermediatePath)?;
        create_dir(&dir)?;
        Ok(Some(dir))
    }

    fn resolve_output_dir(&self, sample: &Path) -> Result<PathBuf, IntakeError> {
        let dir = match &self.output_dir {
            Some(dir) => dir.clone(),
            None => sample
                .parent()
                .map(|parent| parent.join("output"))
                .unwrap_or_else(|| PathBuf::from("output")),
        };
        create_dir(&dir)?;
        Ok(dir)
    }
}

fn create_dir(dir: &Path) -> Result<(), IntakeError> {
    std::fs::create_dir_all(dir).map_err(|source| IntakeError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

fn check_lut(lut: Option<&Path>) -> Result<(), IntakeError> {
    match lut {
        Some(path) if !path.exists() => Err(IntakeError::LutMissing(path.to_path_buf())),
        _ => Ok(()),
    }
}

fn log_source_info(source: &Path, info: &SourceDescriptor, params: &EncodingParameters) {
    tracing::info!(
        source = %source.display(),
        resolution = info.resolution().as_deref().unwrap_or("unknown"),
        fps = ?info.fps,
        pix_fmt = info.pix_fmt.as_deref().unwrap_or("unknown"),
        bit_depth = ?info.bit_depth,
        color_range = info.color_range.as_deref().unwrap_or("unknown"),
        "source info"
    );
    if info.is_variable_frame_rate {
        if params.force_cfr {
            tracing::warn!(
                source = %source.display(),
                avg_fps = ?info.avg_fps,
                nominal_fps = ?info.nominal_fps,
                "variable frame rate source will be converted to constant frame rate"
            );
        } else {
            tracing::warn!(
                source = %source.display(),
                "variable frame rate source kept as-is; editors may drift out of sync"
            );
        }
    }
}

fn log_master_estimate(estimate: &MasterEstimate) {
    let free = estimate
        .free_bytes
        .map(format_bytes)
        .unwrap_or_else(|| "unknown".to_string());
    if estimate.fits() {
        tracing::info!(
            total = %format_bytes(estimate.total_bytes),
            free = %free,
            "masters estimated at ProRes 422 HQ (220 Mbps at 1080p30, scaled)"
        );
    } else {
        tracing::warn!(
            total = %format_bytes(estimate.total_bytes),
            free = %free,
            "estimated masters exceed free space in the intermediate directory"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeError;
    use lut_renderer_config::{Codec, ProcessingMode};
    use proptest::prelude::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    struct StaticProbe(Option<SourceDescriptor>);

    impl SourceProbe for StaticProbe {
        fn probe(&self, _path: &Path) -> Result<SourceDescriptor, ProbeError> {
            self.0
                .clone()
                .ok_or_else(|| ProbeError::FfprobeFailed("unreadable".to_string()))
        }
    }

    fn hd_source() -> SourceDescriptor {
        SourceDescriptor {
            width: Some(1920),
            height: Some(1080),
            bitrate: Some("8000k".to_string()),
            fps: Some(29.97),
            duration_secs: Some(10.0),
            ..SourceDescriptor::default()
        }
    }

    fn intake(probe: Option<SourceDescriptor>, intermediate: Option<PathBuf>) -> JobIntake {
        JobIntake::new(Arc::new(StaticProbe(probe)), None, intermediate)
    }

    fn touch(path: &Path) -> PathBuf {
        File::create(path).unwrap();
        path.to_path_buf()
    }

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("/media/clip.mov")));
        assert!(is_video_file(Path::new("/media/clip.MXF")));
        assert!(is_video_file(Path::new("/media/clip.WebM")));
        assert!(!is_video_file(Path::new("/media/clip.cube")));
        assert!(!is_video_file(Path::new("/media/clip")));
    }

    #[test]
    fn test_collect_sources_walks_and_skips_hidden() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("day1")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        touch(&root.join("b.MOV"));
        touch(&root.join("a.mp4"));
        touch(&root.join("notes.txt"));
        touch(&root.join("day1/c.mkv"));
        touch(&root.join(".cache/d.mov"));
        let single = touch(&root.join("e.avi"));

        let sources = collect_sources(&[root.to_path_buf()]);
        assert_eq!(
            sources,
            vec![
                root.join("a.mp4"),
                root.join("b.MOV"),
                root.join("day1/c.mkv"),
                root.join("e.avi"),
            ]
        );

        assert_eq!(collect_sources(&[single.clone()]), vec![single]);
        assert!(collect_sources(&[root.join("notes.txt")]).is_empty());
        assert!(collect_sources(&[root.join("missing")]).is_empty());
    }

    #[test]
    fn test_allocator_suffixes_existing_and_reserved() {
        let dir = TempDir::new().unwrap();
        let source = Path::new("/in/clip.mov");
        let mut allocator = PathAllocator::new();

        touch(&dir.path().join("clip_out.mov"));
        let first = allocator.output_path(source, dir.path());
        assert_eq!(first, dir.path().join("clip_out_1.mov"));
        let second = allocator.output_path(source, dir.path());
        assert_eq!(second, dir.path().join("clip_out_2.mov"));

        allocator.release(&first);
        assert_eq!(allocator.output_path(source, dir.path()), first);

        assert_eq!(
            allocator.cover_path(source, dir.path()),
            dir.path().join("clip_cover.jpg")
        );
        assert_eq!(
            allocator.intermediate_path(source, dir.path()),
            dir.path().join("clip_master.mov")
        );
    }

    #[test]
    fn test_apply_source_defaults() {
        let source = hd_source();
        let mut params = EncodingParameters::default();
        let applied = apply_source_defaults(&mut params, Some(&source));
        assert_eq!(applied, vec!["resolution=1920x1080", "bitrate=8000k"]);
        assert_eq!(params.resolution.as_deref(), Some("1920x1080"));
        assert_eq!(params.bitrate.as_deref(), Some("8000k"));

        // Explicit values win
        let mut params = EncodingParameters {
            resolution: Some("1280x720".to_string()),
            ..EncodingParameters::default()
        };
        apply_source_defaults(&mut params, Some(&source));
        assert_eq!(params.resolution.as_deref(), Some("1280x720"));

        // Stream copy never takes source defaults
        let mut params = EncodingParameters {
            video_codec: Codec::copy(),
            ..EncodingParameters::default()
        };
        assert!(apply_source_defaults(&mut params, Some(&source)).is_empty());
        assert_eq!(params.resolution, None);

        let mut params = EncodingParameters::default();
        assert!(apply_source_defaults(&mut params, None).is_empty());
    }

    #[test]
    fn test_estimate_master_bytes() {
        // One second at the reference rate: 220 Mbps / 8
        let one_second = SourceDescriptor {
            duration_secs: Some(1.0),
            ..hd_source()
        };
        assert_eq!(estimate_master_bytes(&one_second), Some(27_500_000));

        let uhd = SourceDescriptor {
            width: Some(3840),
            height: Some(2160),
            ..one_second.clone()
        };
        assert_eq!(estimate_master_bytes(&uhd), Some(110_000_000));

        // Tiny sources are floored at a tenth of the reference rate
        let tiny = SourceDescriptor {
            width: Some(16),
            height: Some(16),
            ..one_second.clone()
        };
        assert_eq!(estimate_master_bytes(&tiny), Some(2_750_000));

        let no_duration = SourceDescriptor {
            duration_secs: None,
            ..hd_source()
        };
        assert_eq!(estimate_master_bytes(&no_duration), None);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(27_500_000), "26.23 MB");
    }

    #[test]
    fn test_admit_fast_mode() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir.path().join("a.mov"));
        let b = touch(&dir.path().join("b.mp4"));
        let template = EncodingParameters {
            generate_cover: true,
            ..EncodingParameters::default()
        };

        let mut intake = intake(Some(hd_source()), None);
        let admission = intake.admit(&[a.clone(), b.clone()], &template, None).unwrap();
        assert!(admission.master_estimate.is_none());
        assert_eq!(admission.jobs.len(), 2);

        let output_dir = dir.path().join("output");
        assert!(output_dir.is_dir());
        let job = &admission.jobs[0];
        assert_eq!(job.source_path, a);
        assert_eq!(job.output_path, output_dir.join("a_out.mov"));
        assert_eq!(job.cover_path, Some(output_dir.join("a_cover.jpg")));
        assert_eq!(job.intermediate_path, None);
        assert_eq!(job.params.resolution.as_deref(), Some("1920x1080"));
        assert_eq!(job.source_info, Some(hd_source()));
        assert_eq!(admission.jobs[1].output_path, output_dir.join("b_out.mp4"));

        // Admitting the same source again never reuses a reserved path
        let again = intake.admit(&[a], &template, None).unwrap();
        assert_eq!(again.jobs[0].output_path, output_dir.join("a_out_1.mov"));
    }

    #[test]
    fn test_admit_probe_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir.path().join("a.mov"));
        let mut intake = intake(None, None);
        let admission = intake
            .admit(&[a], &EncodingParameters::default(), None)
            .unwrap();
        assert_eq!(admission.jobs[0].source_info, None);
        assert_eq!(admission.jobs[0].params.resolution, None);
    }

    #[test]
    fn test_admit_pro_mode() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir.path().join("a.mov"));
        let masters = dir.path().join("masters");
        let template = EncodingParameters {
            processing_mode: ProcessingMode::Pro,
            ..EncodingParameters::default()
        };

        let mut no_dir = intake(Some(hd_source()), None);
        assert!(matches!(
            no_dir.admit(&[a.clone()], &template, None),
            Err(IntakeError::Configuration(
                ConfigurationError::MissingIntermediatePath
            ))
        ));

        let mut intake = intake(Some(hd_source()), Some(masters.clone()));
        let admission = intake.admit(&[a], &template, None).unwrap();
        assert!(masters.is_dir());
        assert_eq!(
            admission.jobs[0].intermediate_path,
            Some(masters.join("a_master.mov"))
        );
        let estimate = admission.master_estimate.unwrap();
        assert_eq!(estimate.estimated, 1);
        assert_eq!(estimate.total_bytes, 275_000_000);
    }

    #[test]
    fn test_admit_rejections() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir.path().join("a.mov"));
        let lut = touch(&dir.path().join("look.cube"));
        let mut intake = intake(Some(hd_source()), None);

        assert!(matches!(
            intake.admit(&[], &EncodingParameters::default(), None),
            Err(IntakeError::NoSources)
        ));
        assert!(matches!(
            intake.admit(
                &[a.clone()],
                &EncodingParameters::default(),
                Some(&dir.path().join("missing.cube"))
            ),
            Err(IntakeError::LutMissing(_))
        ));

        let copy = EncodingParameters {
            video_codec: Codec::copy(),
            ..EncodingParameters::default()
        };
        assert!(matches!(
            intake.admit(&[a.clone()], &copy, Some(&lut)),
            Err(IntakeError::Configuration(
                ConfigurationError::FilterWithStreamCopy
            ))
        ));
        // A rejected batch releases its paths
        let admission = intake
            .admit(&[a], &EncodingParameters::default(), Some(&lut))
            .unwrap();
        assert_eq!(
            admission.jobs[0].output_path,
            dir.path().join("output/a_out.mov")
        );
        assert_eq!(admission.jobs[0].lut_path, Some(lut));
    }

    #[test]
    fn test_revise_reallocates_paths() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir.path().join("a.mov"));
        let mut intake = intake(Some(hd_source()), None);
        let job = intake
            .admit(&[a], &EncodingParameters::default(), None)
            .unwrap()
            .jobs
            .remove(0);

        // The first render produced its output
        touch(&job.output_path);
        let params = EncodingParameters {
            video_codec: Codec::new("libx265"),
            generate_cover: true,
            ..EncodingParameters::default()
        };
        let revision = intake.revise(&job, &params, None).unwrap();
        let output_dir = dir.path().join("output");
        assert_eq!(revision.output_path, output_dir.join("a_out_1.mov"));
        assert_eq!(revision.cover_path, Some(output_dir.join("a_cover.jpg")));
        assert_eq!(revision.params.video_codec.as_str(), "libx265");
        assert_eq!(revision.params.bitrate.as_deref(), Some("8000k"));
    }

    #[test]
    fn test_rejected_revision_keeps_reservations() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir.path().join("a.mov"));
        let lut = touch(&dir.path().join("look.cube"));
        let mut intake = intake(Some(hd_source()), None);
        let cover = EncodingParameters {
            generate_cover: true,
            ..EncodingParameters::default()
        };
        let job = intake.admit(&[a.clone()], &cover, None).unwrap().jobs.remove(0);

        let copy = EncodingParameters {
            video_codec: Codec::copy(),
            generate_cover: true,
            ..EncodingParameters::default()
        };
        assert!(matches!(
            intake.revise(&job, &copy, Some(&lut)),
            Err(IntakeError::Configuration(
                ConfigurationError::FilterWithStreamCopy
            ))
        ));

        // The live job still owns its paths; the rejected ones were freed
        let second = intake.admit(&[a], &cover, None).unwrap().jobs.remove(0);
        let output_dir = dir.path().join("output");
        assert_ne!(second.output_path, job.output_path);
        assert_ne!(second.cover_path, job.cover_path);
        assert_eq!(second.output_path, output_dir.join("a_out_1.mov"));
        assert_eq!(second.cover_path, Some(output_dir.join("a_cover_1.jpg")));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_allocator_never_repeats(
            stems in prop::collection::vec("[a-c]{1,2}", 1..30),
        ) {
            let mut allocator = PathAllocator::new();
            let dir = Path::new("/nonexistent-lut-renderer-dir");
            let mut seen = HashSet::new();
            for stem in stems {
                let source = PathBuf::from(format!("/in/{}.mov", stem));
                let path = allocator.output_path(&source, dir);
                prop_assert!(seen.insert(path));
            }
        }
    }
}
