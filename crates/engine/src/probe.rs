//! Duration probing with a bounded budget.
//!
//! A probe is retried at a fixed interval while the transcoder reports
//! errors, and the whole exchange runs under a timeout of
//! `attempts * interval`. Reaching that ceiling is an explicit failure.

use crate::config::ProbeConfig;
use crate::transcode::{TranscodeError, Transcoder};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Probe failures surfaced to the owning job.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// No duration was available within the budget.
    #[error("Duration of {path} not available after {waited:?}")]
    Timeout { path: PathBuf, waited: Duration },

    /// Every attempt failed.
    #[error("Failed to probe {path} after {attempts} attempts: {source}")]
    Failed {
        path: PathBuf,
        attempts: u32,
        source: TranscodeError,
    },
}

/// Attempt budget for a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeBudget {
    pub attempts: u32,
    pub interval: Duration,
}

impl ProbeBudget {
    /// Upper bound on the time a probe may take.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.attempts.max(1)
    }
}

impl Default for ProbeBudget {
    fn default() -> Self {
        Self::from(&ProbeConfig::default())
    }
}

impl From<&ProbeConfig> for ProbeBudget {
    fn from(cfg: &ProbeConfig) -> Self {
        Self {
            attempts: cfg.attempts.max(1),
            interval: Duration::from_millis(cfg.interval_ms),
        }
    }
}

/// Probes `path` for its duration in milliseconds.
pub async fn probe_duration(
    transcoder: &dyn Transcoder,
    path: &Path,
    budget: ProbeBudget,
) -> Result<f64, ProbeError> {
    let attempts = budget.attempts.max(1);

    let probe = async {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match transcoder.probe_duration(path).await {
                Ok(duration_ms) => return Ok(duration_ms),
                Err(source) if attempt >= attempts => {
                    return Err(ProbeError::Failed {
                        path: path.to_path_buf(),
                        attempts: attempt,
                        source,
                    })
                }
                Err(e) => {
                    warn!(path = %path.display(), attempt, error = %e, "duration probe failed, retrying");
                    tokio::time::sleep(budget.interval).await;
                }
            }
        }
    };

    match tokio::time::timeout(budget.ceiling(), probe).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout {
            path: path.to_path_buf(),
            waited: budget.ceiling(),
        }),
    }
}

/// Probes each input in turn and returns the summed duration.
///
/// The merged output does not exist yet, so its length is the sum of its parts.
pub async fn probe_total_duration(
    transcoder: &dyn Transcoder,
    paths: &[PathBuf],
    budget: ProbeBudget,
) -> Result<f64, ProbeError> {
    let mut total = 0.0;
    for path in paths {
        total += probe_duration(transcoder, path, budget).await?;
    }
    Ok(total)
}
