use std::fmt;

use super::gpu::GpuStatus;

/// Limits enforced before a queued job is started.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionLimits {
    pub max_concurrency: usize,
    pub min_free_vram_mb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    ConcurrencyLimit { running: usize, max: usize },
    LowGpuMemory { free_mb: u64, required_mb: u64 },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::ConcurrencyLimit { running, max } => {
                write!(f, "max concurrency reached ({running}/{max} running)")
            }
            DenyReason::LowGpuMemory {
                free_mb,
                required_mb,
            } => write!(f, "GPU memory is low ({free_mb}MB free, {required_mb}MB required)"),
        }
    }
}

/// Decide whether one more job may start now.
///
/// A missing GPU snapshot means the host cannot report memory; that never
/// blocks admission. Both checks are advisory: an admitted job can still run
/// out of resources later.
pub fn admit(gpu: Option<&GpuStatus>, running: usize, limits: &AdmissionLimits) -> Decision {
    if running >= limits.max_concurrency {
        return Decision::Deny(DenyReason::ConcurrencyLimit {
            running,
            max: limits.max_concurrency,
        });
    }

    if let Some(gpu) = gpu {
        if gpu.free_mb < limits.min_free_vram_mb {
            return Decision::Deny(DenyReason::LowGpuMemory {
                free_mb: gpu.free_mb,
                required_mb: limits.min_free_vram_mb,
            });
        }
    }

    Decision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: AdmissionLimits = AdmissionLimits {
        max_concurrency: 2,
        min_free_vram_mb: 4096,
    };

    fn gpu(free_mb: u64) -> GpuStatus {
        GpuStatus {
            total_mb: 24576,
            used_mb: 24576 - free_mb,
            free_mb,
        }
    }

    #[test]
    fn test_allows_under_limits() {
        assert_eq!(admit(Some(&gpu(8000)), 1, &LIMITS), Decision::Allow);
    }

    #[test]
    fn test_denies_at_concurrency_limit() {
        assert_eq!(
            admit(Some(&gpu(20000)), 2, &LIMITS),
            Decision::Deny(DenyReason::ConcurrencyLimit { running: 2, max: 2 })
        );
    }

    #[test]
    fn test_denies_low_vram() {
        let decision = admit(Some(&gpu(2048)), 0, &LIMITS);
        assert_eq!(
            decision,
            Decision::Deny(DenyReason::LowGpuMemory {
                free_mb: 2048,
                required_mb: 4096
            })
        );
    }

    #[test]
    fn test_unknown_gpu_never_blocks() {
        assert!(admit(None, 0, &LIMITS).is_allowed());
        assert!(!admit(None, 2, &LIMITS).is_allowed());
    }

    #[test]
    fn test_free_equal_to_minimum_is_enough() {
        assert!(admit(Some(&gpu(4096)), 0, &LIMITS).is_allowed());
    }
}
