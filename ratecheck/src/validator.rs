//! Pass/fail decision for a measured transfer.

use std::time::Duration;

use tracing::{info, warn};

use ratecheck_core::config::ValidationConfig;
use ratecheck_core::error::CaseError;
use ratecheck_core::types::{Measurement, TestCase, TransferWindow};

/// Applies the duration rule: a case passes when the transfer took at least
/// `expected * (1 - tolerance)`. An optional ceiling of
/// `expected * max_duration_factor` also fails transfers that were throttled
/// far harder than requested.
#[derive(Debug, Clone)]
pub struct DurationValidator {
    tolerance: f64,
    max_factor: Option<f64>,
}

impl DurationValidator {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            tolerance: config.tolerance,
            max_factor: config.max_duration_factor,
        }
    }

    pub fn threshold(&self, expected: Duration) -> Duration {
        expected.mul_f64(1.0 - self.tolerance)
    }

    pub fn measure(&self, case: &TestCase, window: TransferWindow) -> Measurement {
        let elapsed = window.elapsed();
        let secs = elapsed.as_secs_f64();
        let throughput_bps = if secs > 0.0 {
            case.file_size.bytes() as f64 / secs
        } else {
            0.0
        };
        Measurement {
            elapsed,
            expected: case.expected_duration,
            threshold: self.threshold(case.expected_duration),
            throughput_bps,
        }
    }

    pub fn check(&self, m: &Measurement) -> Result<(), CaseError> {
        info!(
            elapsed_secs = m.elapsed.as_secs_f64(),
            threshold_secs = m.threshold.as_secs_f64(),
            kib_per_sec = m.throughput_bps / 1024.0,
            "transfer measured"
        );

        if m.elapsed < m.threshold {
            return Err(CaseError::RateLimitIneffective {
                elapsed: m.elapsed,
                expected: m.expected,
                threshold: m.threshold,
            });
        }

        if let Some(factor) = self.max_factor {
            // Past the Duration range there is no ceiling to exceed.
            let ceiling = Duration::try_from_secs_f64(m.expected.as_secs_f64() * factor)
                .unwrap_or(Duration::MAX);
            if m.elapsed > ceiling {
                warn!(ceiling_secs = ceiling.as_secs_f64(), "transfer slower than ceiling");
                return Err(CaseError::OverThrottled {
                    elapsed: m.elapsed,
                    ceiling,
                });
            }
        }
        Ok(())
    }
}
