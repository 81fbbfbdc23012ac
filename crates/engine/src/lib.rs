//! media-vault
//!
//! Backs up a media library onto size-limited storage and restores it:
//! oversized videos are cut into time-bounded segments, segments are joined
//! back on restore, and an append-only ledger makes every run resumable.

pub mod copy;
pub mod engine;
pub mod job;
pub mod ledger;
pub mod partition;
pub mod planner;
pub mod preflight;
pub mod probe;
pub mod progress;
pub mod queue;
pub mod reassembly;
pub mod split;
pub mod transcode;
pub mod walker;

#[cfg(test)]
mod testing;

pub use media_vault_config as config;
pub use media_vault_config::{Config, ConfigError};
pub use copy::{copy_plain, CopyError, CopyWork};
pub use engine::{Engine, EngineError, RunSummary};
pub use job::{Job, JobError, JobId, JobKind, JobState, WorkItem};
pub use ledger::{Ledger, LedgerError};
pub use partition::PartitionChain;
pub use planner::{plan_partition, segment_count, PartitionPlan, PlanningError};
pub use preflight::{run_preflight_checks, PreflightError};
pub use probe::{ProbeBudget, ProbeError};
pub use progress::ProgressTracker;
pub use queue::Limiter;
pub use reassembly::ReassemblyJob;
pub use split::SplitGroup;
pub use transcode::{FfmpegTranscoder, TranscodeError, TranscodeEvent, Transcoder};
pub use walker::{Mode, WalkError, Walker};
