//! Job model shared by partition chains and reassembly jobs.
//!
//! A [`Job`] is born when the limiter admits a [`WorkItem`], lives in the
//! limiter's registry while active, and is discarded on retirement. Running
//! jobs never touch the registry directly; they report through a
//! [`JobMessage`] channel that the control loop applies.

use crate::ledger::{Ledger, LedgerError};
use crate::planner::PlanningError;
use crate::probe::{ProbeBudget, ProbeError};
use crate::progress::{percent_complete, timemark_to_millis};
use crate::transcode::{TranscodeError, TranscodeEvent, TranscodeEvents, Transcoder};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Opaque unique job token.
pub type JobId = String;

/// Generates a fresh job id.
pub fn new_job_id() -> JobId {
    Uuid::new_v4().to_string()
}

/// Error type for a single job.
#[derive(Debug, Error)]
pub enum JobError {
    /// The duration never became available.
    #[error("Duration probe for {path} timed out after {waited:?}")]
    ProbeTimeout { path: PathBuf, waited: Duration },

    /// The duration probe failed on every attempt.
    #[error("Duration probe for {path} failed: {message}")]
    Probe { path: PathBuf, message: String },

    /// A segment extraction or merge reported failure.
    #[error("{stage} failed for {path}: {message}")]
    SegmentFailure {
        path: PathBuf,
        stage: String,
        message: String,
    },

    /// Size or duration inputs do not allow a plan.
    #[error("Cannot plan {path}: {source}")]
    Planning {
        path: PathBuf,
        source: PlanningError,
    },

    /// Filesystem preparation failed.
    #[error("IO error for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Completion could not be persisted.
    #[error("Ledger write failed: {0}")]
    LedgerWrite(#[from] LedgerError),

    /// The job's task ended without reporting a result.
    #[error("Job for {path} ended unexpectedly")]
    Abandoned { path: PathBuf },
}

impl JobError {
    /// Whether this error must stop the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, JobError::LedgerWrite(_))
    }

    /// Short stage label for logs.
    pub fn stage(&self) -> &str {
        match self {
            JobError::ProbeTimeout { .. } | JobError::Probe { .. } => "probe",
            JobError::SegmentFailure { stage, .. } => stage,
            JobError::Planning { .. } => "planning",
            JobError::Io { .. } => "prepare",
            JobError::LedgerWrite(_) => "finalize",
            JobError::Abandoned { .. } => "run",
        }
    }
}

impl From<ProbeError> for JobError {
    fn from(e: ProbeError) -> Self {
        match e {
            ProbeError::Timeout { path, waited } => JobError::ProbeTimeout { path, waited },
            ProbeError::Failed { path, source, .. } => JobError::Probe {
                path,
                message: source.to_string(),
            },
        }
    }
}

/// Which state machine drives a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Partition,
    Reassembly,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Partition => write!(f, "partition"),
            JobKind::Reassembly => write!(f, "reassembly"),
        }
    }
}

/// Stage of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Admitted, not yet started.
    Queued,
    /// Probing durations and computing the plan.
    Planning,
    /// Extracting segment `i`.
    Segmenting(u32),
    /// Joining all inputs.
    Merging,
    /// Recording completion in the ledger.
    Finalizing,
    /// Terminal success.
    Done,
}

/// Oversized file to cut into segments.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionWork {
    pub source: PathBuf,
    pub size_bytes: u64,
    /// The `<name>.split` directory receiving the segments.
    pub split_dir: PathBuf,
}

/// Split group to join back into one file.
#[derive(Debug, Clone, PartialEq)]
pub struct ReassemblyWork {
    /// The `.split` directory on the backup medium.
    pub group_dir: PathBuf,
    /// Group path with the marker stripped; recorded in the ledger.
    pub identity: PathBuf,
    /// Restored file location.
    pub destination: PathBuf,
}

/// Discovered work waiting for admission.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    Partition(PartitionWork),
    Reassembly(ReassemblyWork),
}

impl WorkItem {
    pub fn kind(&self) -> JobKind {
        match self {
            WorkItem::Partition(_) => JobKind::Partition,
            WorkItem::Reassembly(_) => JobKind::Reassembly,
        }
    }

    /// Path the ledger knows this work by.
    pub fn source_path(&self) -> &PathBuf {
        match self {
            WorkItem::Partition(w) => &w.source,
            WorkItem::Reassembly(w) => &w.identity,
        }
    }

    pub fn destination_path(&self) -> &PathBuf {
        match self {
            WorkItem::Partition(w) => &w.split_dir,
            WorkItem::Reassembly(w) => &w.destination,
        }
    }
}

/// An admitted job as tracked by the limiter's registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub source_path: PathBuf,
    pub kind: JobKind,
    pub total_duration_ms: u64,
    pub segment_duration_ms: u64,
    pub segment_count: u32,
    pub current_index: u32,
    pub destination_path: PathBuf,
    pub progress_percent: f32,
    pub state: JobState,
    /// Admission order, used to keep the status line stable.
    pub admitted_seq: u64,
}

impl Job {
    /// Creates the registry entry for freshly admitted work.
    pub fn admit(id: JobId, work: &WorkItem, admitted_seq: u64) -> Self {
        Self {
            id,
            source_path: work.source_path().clone(),
            kind: work.kind(),
            total_duration_ms: 0,
            segment_duration_ms: 0,
            segment_count: 0,
            current_index: 0,
            destination_path: work.destination_path().clone(),
            progress_percent: 0.0,
            state: JobState::Queued,
            admitted_seq,
        }
    }

    /// Applies an update reported by the running job.
    pub fn apply(&mut self, update: &JobUpdate) {
        match *update {
            JobUpdate::Planned {
                total_duration_ms,
                segment_duration_ms,
                segment_count,
                ..
            } => {
                self.total_duration_ms = total_duration_ms;
                self.segment_duration_ms = segment_duration_ms;
                self.segment_count = segment_count;
            }
            JobUpdate::State { state, .. } => {
                if let JobState::Segmenting(index) = state {
                    self.current_index = index;
                    self.progress_percent = 0.0;
                }
                self.state = state;
            }
            JobUpdate::Progress { percent, .. } => {
                self.progress_percent = percent;
            }
        }
    }
}

/// Observation reported by a running job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Planned {
        id: JobId,
        total_duration_ms: u64,
        segment_duration_ms: u64,
        segment_count: u32,
    },
    State {
        id: JobId,
        state: JobState,
    },
    Progress {
        id: JobId,
        percent: f32,
    },
}

impl JobUpdate {
    pub fn job_id(&self) -> &JobId {
        match self {
            JobUpdate::Planned { id, .. }
            | JobUpdate::State { id, .. }
            | JobUpdate::Progress { id, .. } => id,
        }
    }
}

/// Summary of a successfully finished job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub source_path: PathBuf,
    pub kind: JobKind,
    /// Extract or merge invocations performed.
    pub operations: u32,
    /// Whether this run added the ledger entry.
    pub recorded: bool,
}

/// Message from a job task to the control loop.
#[derive(Debug)]
pub enum JobMessage {
    Update(JobUpdate),
    Finished {
        id: JobId,
        source_path: PathBuf,
        result: Result<JobReport, JobError>,
    },
}

/// Everything a running job needs from the engine.
#[derive(Clone)]
pub struct JobContext {
    pub id: JobId,
    pub transcoder: Arc<dyn Transcoder>,
    pub ledger: Arc<Ledger>,
    pub probe_budget: ProbeBudget,
    pub messages: mpsc::UnboundedSender<JobMessage>,
}

impl JobContext {
    fn send(&self, update: JobUpdate) {
        // The control loop may already be gone during shutdown
        let _ = self.messages.send(JobMessage::Update(update));
    }

    pub fn report_state(&self, state: JobState) {
        self.send(JobUpdate::State {
            id: self.id.clone(),
            state,
        });
    }

    pub fn report_plan(&self, total_duration_ms: u64, segment_duration_ms: u64, segment_count: u32) {
        self.send(JobUpdate::Planned {
            id: self.id.clone(),
            total_duration_ms,
            segment_duration_ms,
            segment_count,
        });
    }

    pub fn report_progress(&self, percent: f32) {
        self.send(JobUpdate::Progress {
            id: self.id.clone(),
            percent,
        });
    }

    /// Consumes an operation's events until it ends.
    ///
    /// Progress is reported relative to `reference_ms`, divided by
    /// `input_count` for multi-input operations.
    pub async fn drive(
        &self,
        mut events: TranscodeEvents,
        path: &PathBuf,
        stage: &str,
        reference_ms: u64,
        input_count: usize,
    ) -> Result<(), JobError> {
        while let Some(event) = events.recv().await {
            match event {
                TranscodeEvent::Start { command } => {
                    info!(job = %self.id, stage, command = %command, "operation started");
                }
                TranscodeEvent::Progress { timemark, percent } => {
                    let value = match timemark_to_millis(&timemark) {
                        Some(elapsed_ms) => {
                            percent_complete(elapsed_ms, reference_ms, input_count)
                        }
                        None => match percent {
                            Some(p) => p as f32,
                            None => continue,
                        },
                    };
                    self.report_progress(value);
                }
                TranscodeEvent::Data { bytes } => {
                    debug!(job = %self.id, stage, bytes, "output written");
                }
                TranscodeEvent::Error { message } => {
                    return Err(JobError::SegmentFailure {
                        path: path.clone(),
                        stage: stage.to_string(),
                        message,
                    });
                }
                TranscodeEvent::End => return Ok(()),
            }
        }

        Err(JobError::SegmentFailure {
            path: path.clone(),
            stage: stage.to_string(),
            message: "event stream closed before completion".to_string(),
        })
    }
}

/// Maps a failure to start an operation onto the job taxonomy.
pub fn start_failure(path: &PathBuf, stage: &str, e: TranscodeError) -> JobError {
    JobError::SegmentFailure {
        path: path.clone(),
        stage: stage.to_string(),
        message: e.to_string(),
    }
}

/// Sends `Finished` exactly once, even if the job task unwinds or is aborted.
pub struct CompletionGuard {
    id: JobId,
    source_path: PathBuf,
    messages: mpsc::UnboundedSender<JobMessage>,
    sent: bool,
}

impl CompletionGuard {
    pub fn new(ctx: &JobContext, source_path: PathBuf) -> Self {
        Self {
            id: ctx.id.clone(),
            source_path,
            messages: ctx.messages.clone(),
            sent: false,
        }
    }

    pub fn finish(mut self, result: Result<JobReport, JobError>) {
        self.sent = true;
        let _ = self.messages.send(JobMessage::Finished {
            id: self.id.clone(),
            source_path: self.source_path.clone(),
            result,
        });
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.sent {
            let _ = self.messages.send(JobMessage::Finished {
                id: self.id.clone(),
                source_path: self.source_path.clone(),
                result: Err(JobError::Abandoned {
                    path: self.source_path.clone(),
                }),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTranscoder;
    use std::path::Path;
    use tempfile::TempDir;

    fn partition_work() -> WorkItem {
        WorkItem::Partition(PartitionWork {
            source: PathBuf::from("/media/Movies/film.mkv"),
            size_bytes: 5_000_000_000,
            split_dir: PathBuf::from("/backup/Movies/film.mkv.split"),
        })
    }

    #[test]
    fn test_job_admit_copies_work_identity() {
        let job = Job::admit("job-1".to_string(), &partition_work(), 7);

        assert_eq!(job.kind, JobKind::Partition);
        assert_eq!(job.source_path, Path::new("/media/Movies/film.mkv"));
        assert_eq!(job.destination_path, Path::new("/backup/Movies/film.mkv.split"));
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.admitted_seq, 7);
    }

    #[test]
    fn test_reassembly_work_is_known_by_identity() {
        let work = WorkItem::Reassembly(ReassemblyWork {
            group_dir: PathBuf::from("/backup/Movies/film.mkv.split"),
            identity: PathBuf::from("/backup/Movies/film.mkv"),
            destination: PathBuf::from("/media/Movies/film.mkv"),
        });

        assert_eq!(work.kind(), JobKind::Reassembly);
        assert_eq!(work.source_path(), Path::new("/backup/Movies/film.mkv"));
        assert_eq!(work.destination_path(), Path::new("/media/Movies/film.mkv"));
    }

    #[test]
    fn test_job_apply_updates() {
        let mut job = Job::admit("job-1".to_string(), &partition_work(), 0);

        job.apply(&JobUpdate::Planned {
            id: "job-1".to_string(),
            total_duration_ms: 9_000_000,
            segment_duration_ms: 3_000_000,
            segment_count: 3,
        });
        job.apply(&JobUpdate::Progress {
            id: "job-1".to_string(),
            percent: 55.0,
        });
        job.apply(&JobUpdate::State {
            id: "job-1".to_string(),
            state: JobState::Segmenting(1),
        });

        assert_eq!(job.segment_count, 3);
        assert_eq!(job.total_duration_ms, 9_000_000);
        assert_eq!(job.current_index, 1);
        assert_eq!(job.state, JobState::Segmenting(1));
        // New segment starts from zero
        assert_eq!(job.progress_percent, 0.0);
    }

    #[test]
    fn test_only_ledger_failures_are_fatal() {
        let ledger_err = JobError::LedgerWrite(LedgerError::Write {
            path: PathBuf::from("/media/backup.log"),
            entry: "/media/a.mkv".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        });
        assert!(ledger_err.is_fatal());
        assert_eq!(ledger_err.stage(), "finalize");

        let segment_err = JobError::SegmentFailure {
            path: PathBuf::from("/media/a.mkv"),
            stage: "segment 1/3".to_string(),
            message: "boom".to_string(),
        };
        assert!(!segment_err.is_fatal());
        assert_eq!(segment_err.stage(), "segment 1/3");

        let timeout: JobError = ProbeError::Timeout {
            path: PathBuf::from("/media/a.mkv"),
            waited: Duration::from_secs(60),
        }
        .into();
        assert!(matches!(timeout, JobError::ProbeTimeout { .. }));
        assert!(!timeout.is_fatal());
    }

    #[tokio::test]
    async fn test_completion_guard_reports_abandoned_on_drop() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = test_context(&dir, tx);

        drop(CompletionGuard::new(&ctx, PathBuf::from("/media/a.mkv")));

        match rx.recv().await {
            Some(JobMessage::Finished { id, result, .. }) => {
                assert_eq!(id, "job-1");
                assert!(matches!(result, Err(JobError::Abandoned { .. })));
            }
            other => panic!("expected Finished, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_drive_reports_progress_and_fails_on_error() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = test_context(&dir, tx);

        let (event_tx, event_rx) = mpsc::channel(8);
        event_tx
            .send(TranscodeEvent::Start {
                command: "ffmpeg ...".to_string(),
            })
            .await
            .unwrap();
        event_tx
            .send(TranscodeEvent::Progress {
                timemark: "00:00:30.00".to_string(),
                percent: None,
            })
            .await
            .unwrap();
        event_tx
            .send(TranscodeEvent::Error {
                message: "Invalid data found".to_string(),
            })
            .await
            .unwrap();

        let path = PathBuf::from("/media/a.mkv");
        let result = ctx.drive(event_rx, &path, "segment 1/2", 60_000, 1).await;

        assert!(matches!(result, Err(JobError::SegmentFailure { .. })));
        match rx.recv().await {
            Some(JobMessage::Update(JobUpdate::Progress { percent, .. })) => {
                assert!((percent - 50.0).abs() < 0.01);
            }
            other => panic!("expected progress, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_drive_treats_closed_stream_as_failure() {
        let dir = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = test_context(&dir, tx);

        let (event_tx, event_rx) = mpsc::channel(1);
        drop(event_tx);

        let result = ctx
            .drive(event_rx, &PathBuf::from("/media/a.mkv"), "merge", 1_000, 1)
            .await;
        assert!(matches!(result, Err(JobError::SegmentFailure { .. })));
    }

    fn test_context(dir: &TempDir, tx: mpsc::UnboundedSender<JobMessage>) -> JobContext {
        JobContext {
            id: "job-1".to_string(),
            transcoder: Arc::new(MockTranscoder::new()),
            ledger: Arc::new(Ledger::open(dir.path().join("ledger.log")).unwrap()),
            probe_budget: ProbeBudget::default(),
            messages: tx,
        }
    }
}
