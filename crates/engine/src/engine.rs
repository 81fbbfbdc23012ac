//! Backup/restore run loop.
//!
//! A run has three moving parts:
//! - a discovery thread walking the source tree (plain copies happen there),
//! - the control loop owning the [`Limiter`] and the progress line,
//! - one task per admitted job driving its partition chain or reassembly.
//!
//! Discovery and jobs talk to the control loop over channels; only the
//! control loop admits and retires jobs.

use crate::config::Config;
use crate::copy::{copy_plain, CopyError};
use crate::job::{
    CompletionGuard, JobContext, JobError, JobId, JobMessage, WorkItem,
};
use crate::ledger::{Ledger, LedgerError};
use crate::partition::PartitionChain;
use crate::probe::ProbeBudget;
use crate::progress::ProgressTracker;
use crate::queue::{Admission, Limiter};
use crate::reassembly::{purge_stale_work_dirs, ReassemblyJob};
use crate::transcode::Transcoder;
use crate::walker::{Discovery, Mode, SkipReason, WalkError, Walker};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Discovered entries buffered between the walker and the control loop.
const DISCOVERY_BUFFER: usize = 256;

/// Error type for a run
#[derive(Debug, Error)]
pub enum EngineError {
    /// The ledger could not be opened
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Traversal could not start
    #[error("Walk error: {0}")]
    Walk(#[from] WalkError),

    /// A job failed in a way that stops the run
    #[error("Fatal job error: {0}")]
    Job(JobError),

    /// A plain copy could not be recorded
    #[error("Fatal copy error: {0}")]
    Copy(CopyError),

    /// Scratch space could not be prepared
    #[error("IO error for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The discovery thread panicked or was cancelled
    #[error("Discovery task failed: {0}")]
    Discovery(String),
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Entries classified by the walker, including skipped ones.
    pub discovered: usize,
    /// Files plain-copied and recorded.
    pub copied: usize,
    /// Partition or reassembly jobs that reached `Done`.
    pub completed: usize,
    /// Jobs or copies that failed without stopping the run.
    pub failed: usize,
    /// Entries already in the ledger or shadowed by a split group.
    pub skipped: usize,
}

/// What the discovery thread reports for each entry.
#[derive(Debug)]
enum DiscoveryEvent {
    Work(WorkItem),
    Copied { path: PathBuf, bytes: u64 },
    CopyFailed { path: PathBuf, error: CopyError },
    Skipped { path: PathBuf, reason: SkipReason },
}

/// Runs backups and restores for one configuration.
pub struct Engine {
    config: Config,
    transcoder: Arc<dyn Transcoder>,
    progress: ProgressTracker,
}

impl Engine {
    /// Create an engine without a progress line.
    pub fn new(config: Config, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            config,
            transcoder,
            progress: ProgressTracker::disabled(),
        }
    }

    /// Render combined job progress through `tracker`.
    pub fn with_progress(mut self, tracker: ProgressTracker) -> Self {
        self.progress = tracker;
        self
    }

    pub async fn backup(&mut self) -> Result<RunSummary, EngineError> {
        self.run(Mode::Backup).await
    }

    pub async fn restore(&mut self) -> Result<RunSummary, EngineError> {
        self.run(Mode::Restore).await
    }

    /// Ledger file used by `mode`.
    pub fn ledger_path(&self, mode: Mode) -> PathBuf {
        match mode {
            Mode::Backup => self.config.paths.backup_ledger(),
            Mode::Restore => self.config.paths.restore_ledger(),
        }
    }

    /// Walker settings for `mode`.
    pub fn walker(&self, mode: Mode) -> Walker {
        let paths = &self.config.paths;
        let (source_root, dest_root) = match mode {
            Mode::Backup => (paths.library_root.clone(), paths.backup_root.clone()),
            Mode::Restore => (paths.backup_root.clone(), paths.library_root.clone()),
        };
        Walker {
            mode,
            source_root,
            dest_root,
            directories: self.config.library.directories.clone(),
            video_extensions: self.config.library.video_extensions.clone(),
            max_segment_bytes: self.config.partition.max_segment_bytes,
            excluded: vec![
                paths.backup_ledger(),
                paths.restore_ledger(),
                paths.temp_dir(),
            ],
        }
    }

    /// Runs one backup or restore to completion.
    ///
    /// Job failures are logged and counted; only a ledger write failure
    /// aborts the run, after cancelling every in-flight job.
    pub async fn run(&mut self, mode: Mode) -> Result<RunSummary, EngineError> {
        let ledger = Arc::new(Ledger::open(self.ledger_path(mode))?);
        self.run_with_ledger(mode, ledger).await
    }

    pub(crate) async fn run_with_ledger(
        &mut self,
        mode: Mode,
        ledger: Arc<Ledger>,
    ) -> Result<RunSummary, EngineError> {
        info!(
            %mode,
            ledger = %ledger.path().display(),
            entries = ledger.len(),
            max_concurrent = self.config.queue.effective_max_concurrent_jobs(),
            transcoder = self.transcoder.name(),
            "run starting"
        );

        if mode == Mode::Restore {
            let temp_root = self.config.paths.temp_dir();
            let removed = purge_stale_work_dirs(&temp_root).map_err(|e| EngineError::Io {
                path: temp_root.clone(),
                source: e,
            })?;
            if removed > 0 {
                info!(removed, temp_root = %temp_root.display(), "removed stale merge directories");
            }
        }

        let (disc_tx, mut disc_rx) = mpsc::channel(DISCOVERY_BUFFER);
        let discovery = spawn_discovery(self.walker(mode), ledger.clone(), disc_tx);

        let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
        let mut limiter = Limiter::new(self.config.queue.effective_max_concurrent_jobs());
        let mut handles: HashMap<JobId, JoinHandle<()>> = HashMap::new();
        let mut summary = RunSummary::default();
        let mut discovery_open = true;
        let mut fatal: Option<EngineError> = None;

        while discovery_open || !limiter.is_idle() {
            tokio::select! {
                event = disc_rx.recv(), if discovery_open => {
                    let Some(event) = event else {
                        discovery_open = false;
                        continue;
                    };
                    summary.discovered += 1;
                    match event {
                        DiscoveryEvent::Work(work) => {
                            debug!(source = %work.source_path().display(), kind = %work.kind(), "queued");
                            limiter.enqueue(work);
                            for admission in limiter.admit_all() {
                                let handle = self.start_job(admission.clone(), &ledger, &msg_tx);
                                handles.insert(admission.id, handle);
                            }
                        }
                        DiscoveryEvent::Copied { path, bytes } => {
                            summary.copied += 1;
                            info!(source = %path.display(), bytes, "copied");
                        }
                        DiscoveryEvent::CopyFailed { path, error } => {
                            if error.is_fatal() {
                                error!(source = %path.display(), error = %error, "copy could not be recorded, stopping");
                                fatal = Some(EngineError::Copy(error));
                                break;
                            }
                            summary.failed += 1;
                            error!(source = %path.display(), stage = "copy", error = %error, "copy failed");
                        }
                        DiscoveryEvent::Skipped { path, reason } => {
                            summary.skipped += 1;
                            debug!(source = %path.display(), ?reason, "skipped");
                        }
                    }
                }
                Some(message) = msg_rx.recv() => match message {
                    JobMessage::Update(update) => {
                        if limiter.apply(&update) {
                            self.progress.render(&limiter.percents());
                        }
                    }
                    JobMessage::Finished { id, source_path, result } => {
                        handles.remove(&id);
                        match result {
                            Ok(report) => {
                                summary.completed += 1;
                                info!(
                                    job = %id,
                                    source = %report.source_path.display(),
                                    kind = %report.kind,
                                    operations = report.operations,
                                    "job complete"
                                );
                            }
                            Err(e) if e.is_fatal() => {
                                error!(job = %id, source = %source_path.display(), error = %e, "ledger write failed, stopping");
                                fatal = Some(EngineError::Job(e));
                                break;
                            }
                            Err(e) => {
                                summary.failed += 1;
                                error!(
                                    job = %id,
                                    source = %source_path.display(),
                                    stage = e.stage(),
                                    error = %e,
                                    "job failed"
                                );
                            }
                        }
                        let retirement = limiter.retire(&id);
                        if let Some(admission) = retirement.next {
                            let handle = self.start_job(admission.clone(), &ledger, &msg_tx);
                            handles.insert(admission.id, handle);
                        }
                        self.progress.render(&limiter.percents());
                    }
                },
            }
        }

        self.progress.finish();

        if let Some(e) = fatal {
            for (id, handle) in handles.drain() {
                warn!(job = %id, "aborting in-flight job");
                handle.abort();
            }
            limiter.drain();
            // Closing the channel stops the walker at its next entry
            drop(disc_rx);
            let _ = discovery.await;
            return Err(e);
        }

        discovery
            .await
            .map_err(|e| EngineError::Discovery(e.to_string()))??;

        info!(
            %mode,
            discovered = summary.discovered,
            copied = summary.copied,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "run finished"
        );
        Ok(summary)
    }

    fn start_job(
        &self,
        admission: Admission,
        ledger: &Arc<Ledger>,
        messages: &mpsc::UnboundedSender<JobMessage>,
    ) -> JoinHandle<()> {
        let ctx = JobContext {
            id: admission.id,
            transcoder: self.transcoder.clone(),
            ledger: ledger.clone(),
            probe_budget: ProbeBudget::from(&self.config.probe),
            messages: messages.clone(),
        };
        let guard = CompletionGuard::new(&ctx, admission.work.source_path().clone());
        info!(
            job = %ctx.id,
            kind = %admission.work.kind(),
            source = %admission.work.source_path().display(),
            "job admitted"
        );

        match admission.work {
            WorkItem::Partition(work) => {
                let chain =
                    PartitionChain::new(ctx, work, self.config.partition.max_segment_bytes);
                tokio::spawn(async move {
                    guard.finish(chain.run().await);
                })
            }
            WorkItem::Reassembly(work) => {
                let job = ReassemblyJob::new(ctx, work, self.config.paths.temp_dir());
                tokio::spawn(async move {
                    guard.finish(job.run().await);
                })
            }
        }
    }
}

/// Walks on a blocking thread, copying plain files inline.
fn spawn_discovery(
    walker: Walker,
    ledger: Arc<Ledger>,
    tx: mpsc::Sender<DiscoveryEvent>,
) -> JoinHandle<Result<(), WalkError>> {
    tokio::task::spawn_blocking(move || {
        walker.walk(&ledger, |discovery| {
            let event = match discovery {
                Discovery::Work(work) => DiscoveryEvent::Work(work),
                Discovery::Skipped { path, reason } => DiscoveryEvent::Skipped { path, reason },
                Discovery::Copy(work) => match copy_plain(&work, &ledger) {
                    Ok(bytes) => DiscoveryEvent::Copied {
                        path: work.source,
                        bytes,
                    },
                    Err(error) => DiscoveryEvent::CopyFailed {
                        path: work.source,
                        error,
                    },
                },
            };
            let stop = matches!(&event, DiscoveryEvent::CopyFailed { error, .. } if error.is_fatal());
            tx.blocking_send(event).is_ok() && !stop
        })
    })
}
