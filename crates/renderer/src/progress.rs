//! Progress parsing for ffmpeg's textual output.
//!
//! ffmpeg prints `Duration: HH:MM:SS.ms` once for the input and then repeating
//! `time=HH:MM:SS.ms` status lines. Stage progress is elapsed / duration, scaled
//! into the stage's share of the job.

use regex::Regex;
use std::sync::OnceLock;

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Duration: (\d+):(\d+):(\d+(?:\.\d+)?)").expect("duration pattern is valid")
    })
}

fn time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d+)?)").expect("time pattern is valid")
    })
}

/// Parse `HH:MM:SS.ms` captures into seconds.
fn captured_seconds(regex: &Regex, line: &str) -> Option<f64> {
    let caps = regex.captures(line)?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// A stage's slice of the overall 0..=100 job progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpan {
    pub base: u8,
    pub span: u8,
    pub is_final: bool,
}

impl StageSpan {
    /// One stage uses 0..=100; two stages split it 0..50 and 50..=100.
    pub fn for_stage(index: usize, count: usize) -> Self {
        let count = count.max(1);
        let span = (100 / count) as u8;
        let is_final = index + 1 >= count;
        let base = if is_final {
            100 - span
        } else {
            span * index as u8
        };
        Self {
            base,
            span,
            is_final,
        }
    }

    /// Progress reported once the stage exits cleanly.
    pub fn ceiling(&self) -> u8 {
        self.base + self.span
    }
}

/// Converts a stage's output lines into overall progress values.
///
/// Values are emitted only when they move forward. A non-final stage stops one
/// point short of its ceiling until [`ProgressTracker::finish`] is called.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    span: StageSpan,
    duration: Option<f64>,
    last: Option<u8>,
}

impl ProgressTracker {
    pub fn new(span: StageSpan) -> Self {
        Self {
            span,
            duration: None,
            last: None,
        }
    }

    /// Total duration, once it has been seen.
    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Feed one output line; returns the new overall progress when it changed.
    pub fn observe(&mut self, line: &str) -> Option<u8> {
        if self.duration.is_none() {
            if let Some(duration) = captured_seconds(duration_regex(), line) {
                self.duration = Some(duration).filter(|d| *d > 0.0);
                return None;
            }
        }

        let duration = self.duration?;
        let elapsed = captured_seconds(time_regex(), line)?;
        let span = self.span.span as f64;
        let mut stage_progress = ((elapsed / duration) * span).clamp(0.0, span) as u8;
        if !self.span.is_final {
            stage_progress = stage_progress.min(self.span.span.saturating_sub(1));
        }
        let cap = if self.span.is_final { 100 } else { 99 };
        let progress = (self.span.base + stage_progress).min(cap);
        self.advance(progress)
    }

    /// Stage exited cleanly: non-final stages jump to their ceiling.
    pub fn finish(&mut self) -> Option<u8> {
        if self.span.is_final {
            return None;
        }
        self.advance(self.span.ceiling())
    }

    fn advance(&mut self, progress: u8) -> Option<u8> {
        match self.last {
            Some(last) if progress <= last => None,
            _ => {
                self.last = Some(progress);
                Some(progress)
            }
        }
    }
}
