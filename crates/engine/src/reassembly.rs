//! Reassembly job: joins a split group back into its original file.
//!
//! ```text
//! Planning -> Merging -> Finalizing -> Done
//! ```

use crate::job::{start_failure, JobContext, JobError, JobKind, JobReport, JobState, ReassemblyWork};
use crate::planner::validate_duration;
use crate::probe::probe_total_duration;
use crate::split::SplitGroup;
use crate::transcode::MergeRequest;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Prefix of per-merge scratch directories under the temp root.
pub const WORK_DIR_PREFIX: &str = "merge-";

pub struct ReassemblyJob {
    ctx: JobContext,
    work: ReassemblyWork,
    temp_root: PathBuf,
    state: JobState,
    group: Option<SplitGroup>,
    total_duration_ms: u64,
    operations: u32,
    recorded: bool,
}

impl ReassemblyJob {
    pub fn new(ctx: JobContext, work: ReassemblyWork, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            ctx,
            work,
            temp_root: temp_root.into(),
            state: JobState::Planning,
            group: None,
            total_duration_ms: 0,
            operations: 0,
            recorded: false,
        }
    }

    pub async fn run(mut self) -> Result<JobReport, JobError> {
        while self.state != JobState::Done {
            self.ctx.report_state(self.state);
            self.state = self.step().await?;
        }
        Ok(JobReport {
            source_path: self.work.identity,
            kind: JobKind::Reassembly,
            operations: self.operations,
            recorded: self.recorded,
        })
    }

    async fn step(&mut self) -> Result<JobState, JobError> {
        match self.state {
            JobState::Queued | JobState::Planning => self.plan().await,
            JobState::Merging => self.merge().await,
            JobState::Finalizing => self.finalize(),
            JobState::Segmenting(_) => unreachable!("reassembly never segments"),
            JobState::Done => Ok(JobState::Done),
        }
    }

    async fn plan(&mut self) -> Result<JobState, JobError> {
        let group_dir = self.work.group_dir.clone();
        let group = SplitGroup::load(&group_dir).map_err(|e| JobError::Planning {
            path: group_dir.clone(),
            source: e,
        })?;

        let duration_ms = probe_total_duration(
            self.ctx.transcoder.as_ref(),
            &group.segments,
            self.ctx.probe_budget,
        )
        .await?;
        let total_duration_ms = validate_duration(duration_ms).map_err(|e| JobError::Planning {
            path: group_dir.clone(),
            source: e,
        })?;

        let inputs = group.segments.len() as u32;
        self.ctx
            .report_plan(total_duration_ms, total_duration_ms / u64::from(inputs), inputs);
        info!(
            job = %self.ctx.id,
            group = %group_dir.display(),
            segments = inputs,
            total_duration_ms,
            "reassembly planned"
        );

        self.total_duration_ms = total_duration_ms;
        self.group = Some(group);
        Ok(JobState::Merging)
    }

    async fn merge(&mut self) -> Result<JobState, JobError> {
        let Some(group) = self.group.as_ref() else {
            return Ok(JobState::Planning);
        };
        let identity = self.work.identity.clone();
        let stage = "merge";

        let work_dir = create_work_dir(&self.temp_root, &self.ctx.id)?;
        let request = MergeRequest {
            inputs: group.segments.clone(),
            work_dir: work_dir.path().to_path_buf(),
            destination: self.work.destination.clone(),
        };
        let input_count = request.inputs.len();
        // Mean segment length; drive divides by input_count again, so progress is
        // elapsed time over the whole merged output.
        let reference_ms = self.total_duration_ms / input_count.max(1) as u64;
        info!(
            job = %self.ctx.id,
            source = %identity.display(),
            destination = %request.destination.display(),
            inputs = input_count,
            "merging segments"
        );

        let events = self
            .ctx
            .transcoder
            .merge_inputs(request)
            .await
            .map_err(|e| start_failure(&identity, stage, e))?;
        self.operations += 1;
        let result = self
            .ctx
            .drive(events, &identity, stage, reference_ms, input_count)
            .await;

        // Scratch space goes on success and on failure
        if let Err(e) = work_dir.close() {
            warn!(job = %self.ctx.id, error = %e, "failed to remove merge work directory");
        }
        result?;

        Ok(JobState::Finalizing)
    }

    fn finalize(&mut self) -> Result<JobState, JobError> {
        self.recorded = self.ctx.ledger.record(&self.work.identity)?;
        info!(
            job = %self.ctx.id,
            source = %self.work.identity.display(),
            destination = %self.work.destination.display(),
            "reassembly complete"
        );
        Ok(JobState::Done)
    }
}

fn create_work_dir(temp_root: &Path, id: &str) -> Result<TempDir, JobError> {
    let io_err = |e| JobError::Io {
        path: temp_root.to_path_buf(),
        source: e,
    };
    std::fs::create_dir_all(temp_root).map_err(io_err)?;
    tempfile::Builder::new()
        .prefix(&format!("{}{}-", WORK_DIR_PREFIX, id))
        .tempdir_in(temp_root)
        .map_err(io_err)
}

/// Removes merge scratch directories left behind by an interrupted run.
///
/// Returns how many were removed. A missing temp root is not an error.
pub fn purge_stale_work_dirs(temp_root: &Path) -> std::io::Result<usize> {
    let entries = match std::fs::read_dir(temp_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let is_work_dir = entry
            .file_name()
            .to_str()
            .map(|n| n.starts_with(WORK_DIR_PREFIX))
            .unwrap_or(false);
        if is_work_dir && entry.file_type()?.is_dir() {
            debug!(path = %entry.path().display(), "removing stale merge directory");
            std::fs::remove_dir_all(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
