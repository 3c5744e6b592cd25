use std::fs;

use trailguard_application::ResourceSampler;
use trailguard_core::{AppError, AppResult};

/// Memory sampler backed by `/proc/meminfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcResourceSampler;

impl ProcResourceSampler {
    /// Creates the sampler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ResourceSampler for ProcResourceSampler {
    fn memory_usage_ratio(&self) -> AppResult<f64> {
        let meminfo = fs::read_to_string("/proc/meminfo")
            .map_err(|error| AppError::Internal(format!("failed to read /proc/meminfo: {error}")))?;

        let total = parse_meminfo_line(meminfo.as_str(), "MemTotal:")?;
        let available = parse_meminfo_line(meminfo.as_str(), "MemAvailable:")?;

        if total == 0 {
            return Err(AppError::Internal(
                "MemTotal reported as zero".to_owned(),
            ));
        }

        Ok(1.0 - (available as f64 / total as f64))
    }
}

fn parse_meminfo_line(meminfo: &str, label: &str) -> AppResult<u64> {
    meminfo
        .lines()
        .find(|line| line.starts_with(label))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse::<u64>().ok())
        .ok_or_else(|| AppError::Internal(format!("missing '{label}' in /proc/meminfo")))
}
