//! Concurrency planning for the job queue
//!
//! Derives how many jobs may run at once from the CPU core count and settings.

use lut_renderer_config::Settings;
use std::time::Duration;

/// Concurrency plan derived from settings and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Maximum number of jobs running at once
    pub max_concurrent_jobs: u32,
    /// Grace period between a graceful terminate and a kill
    pub cancel_grace: Duration,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from settings
    ///
    /// An explicit non-zero `max_concurrent_jobs` wins; otherwise 2 jobs for 16+
    /// cores and 1 below that. ffmpeg already threads each encode.
    pub fn derive(settings: &Settings) -> Self {
        Self::derive_with_cores(settings, num_cpus::get() as u32)
    }

    /// Same as [`ConcurrencyPlan::derive`] with a given core count.
    pub fn derive_with_cores(settings: &Settings, total_cores: u32) -> Self {
        let max_concurrent_jobs = if settings.queue.max_concurrent_jobs > 0 {
            settings.queue.max_concurrent_jobs
        } else {
            derive_max_jobs(total_cores)
        };

        Self {
            total_cores,
            max_concurrent_jobs,
            cancel_grace: Duration::from_millis(settings.queue.cancel_grace_ms),
        }
    }
}

/// Derive max concurrent jobs based on core count
/// - 2 jobs for 16+ cores
/// - 1 job otherwise
fn derive_max_jobs(cores: u32) -> u32 {
    if cores >= 16 {
        2
    } else {
        1
    }
}

/// Public function to derive a concurrency plan from settings
pub fn derive_plan(settings: &Settings) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lut_renderer_config::QueueConfig;
    use proptest::prelude::*;

    fn settings_with_jobs(max_concurrent_jobs: u32) -> Settings {
        Settings {
            queue: QueueConfig {
                max_concurrent_jobs,
                cancel_grace_ms: 1500,
            },
            ..Settings::default()
        }
    }

    #[test]
    fn test_derive_uses_detected_cores() {
        let plan = derive_plan(&settings_with_jobs(0));
        assert!(plan.total_cores >= 1);
        assert!(plan.max_concurrent_jobs == 1 || plan.max_concurrent_jobs == 2);
        assert_eq!(plan.cancel_grace, Duration::from_millis(1500));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_auto_derivation(cores in 1u32..256) {
            let plan = ConcurrencyPlan::derive_with_cores(&settings_with_jobs(0), cores);
            let expected = if cores >= 16 { 2 } else { 1 };
            prop_assert_eq!(plan.total_cores, cores);
            prop_assert_eq!(plan.max_concurrent_jobs, expected);
        }

        #[test]
        fn prop_explicit_setting_wins(cores in 1u32..256, explicit in 1u32..16) {
            let plan = ConcurrencyPlan::derive_with_cores(&settings_with_jobs(explicit), cores);
            prop_assert_eq!(plan.max_concurrent_jobs, explicit);
        }
    }
}
