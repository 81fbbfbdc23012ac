//! Partition chain: cuts one oversized file into sequential segments.
//!
//! ```text
//! Planning -> Segmenting(0) -> ... -> Segmenting(n-1) -> Finalizing -> Done
//! ```
//!
//! Any error ends the chain; the ledger is only written from `Finalizing`.

use crate::job::{start_failure, JobContext, JobError, JobKind, JobReport, JobState, PartitionWork};
use crate::planner::{plan_partition, validate_duration, PartitionPlan};
use crate::probe::probe_duration;
use crate::split::segment_file_name;
use crate::transcode::SegmentRequest;
use std::path::PathBuf;
use tracing::{info, warn};

pub struct PartitionChain {
    ctx: JobContext,
    work: PartitionWork,
    max_segment_bytes: u64,
    state: JobState,
    plan: Option<PartitionPlan>,
    operations: u32,
    recorded: bool,
}

impl PartitionChain {
    pub fn new(ctx: JobContext, work: PartitionWork, max_segment_bytes: u64) -> Self {
        Self {
            ctx,
            work,
            max_segment_bytes,
            state: JobState::Planning,
            plan: None,
            operations: 0,
            recorded: false,
        }
    }

    /// Runs every remaining state until `Done` or the first error.
    pub async fn run(mut self) -> Result<JobReport, JobError> {
        while self.state != JobState::Done {
            self.ctx.report_state(self.state);
            self.state = self.step().await?;
        }
        Ok(JobReport {
            source_path: self.work.source,
            kind: JobKind::Partition,
            operations: self.operations,
            recorded: self.recorded,
        })
    }

    /// Executes the current state and returns the next one.
    async fn step(&mut self) -> Result<JobState, JobError> {
        match self.state {
            JobState::Queued | JobState::Planning => self.plan().await,
            JobState::Segmenting(index) => self.segment(index).await,
            JobState::Finalizing => self.finalize(),
            JobState::Merging => unreachable!("partition chains never merge"),
            JobState::Done => Ok(JobState::Done),
        }
    }

    async fn plan(&mut self) -> Result<JobState, JobError> {
        let source = &self.work.source;
        let duration_ms =
            probe_duration(self.ctx.transcoder.as_ref(), source, self.ctx.probe_budget).await?;
        let total_duration_ms = validate_duration(duration_ms).map_err(|e| JobError::Planning {
            path: source.clone(),
            source: e,
        })?;
        let plan = plan_partition(self.work.size_bytes, self.max_segment_bytes, total_duration_ms)
            .map_err(|e| JobError::Planning {
                path: source.clone(),
                source: e,
            })?;

        self.ctx.report_plan(
            plan.total_duration_ms,
            plan.segment_duration_ms,
            plan.segment_count,
        );
        info!(
            job = %self.ctx.id,
            source = %source.display(),
            segments = plan.segment_count,
            segment_duration_ms = plan.segment_duration_ms,
            "partition planned"
        );
        self.plan = Some(plan);

        if plan.segment_duration_ms == 0 {
            warn!(
                job = %self.ctx.id,
                source = %source.display(),
                "zero segment duration, nothing to extract"
            );
            return Ok(JobState::Finalizing);
        }

        tokio::fs::create_dir_all(&self.work.split_dir)
            .await
            .map_err(|e| JobError::Io {
                path: self.work.split_dir.clone(),
                source: e,
            })?;

        Ok(JobState::Segmenting(0))
    }

    async fn segment(&mut self, index: u32) -> Result<JobState, JobError> {
        let Some(plan) = self.plan else {
            return Ok(JobState::Planning);
        };
        let source = self.work.source.clone();
        let stage = format!("segment {}/{}", index + 1, plan.segment_count);

        let request = SegmentRequest {
            source: source.clone(),
            start_seconds: plan.start_of(index) as f64 / 1000.0,
            duration_seconds: plan.duration_of(index) as f64 / 1000.0,
            destination: self.segment_path(index),
        };
        info!(
            job = %self.ctx.id,
            source = %source.display(),
            stage = %stage,
            destination = %request.destination.display(),
            "extracting segment"
        );

        let events = self
            .ctx
            .transcoder
            .extract_segment(request)
            .await
            .map_err(|e| start_failure(&source, &stage, e))?;
        self.operations += 1;
        self.ctx
            .drive(events, &source, &stage, plan.segment_duration_ms, 1)
            .await?;

        if index + 1 >= plan.segment_count {
            Ok(JobState::Finalizing)
        } else {
            Ok(JobState::Segmenting(index + 1))
        }
    }

    fn finalize(&mut self) -> Result<JobState, JobError> {
        self.recorded = self.ctx.ledger.record(&self.work.source)?;
        info!(
            job = %self.ctx.id,
            source = %self.work.source.display(),
            segments = self.operations,
            "partition complete"
        );
        Ok(JobState::Done)
    }

    fn segment_path(&self, index: u32) -> PathBuf {
        let name = self
            .work
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.work.split_dir.join(segment_file_name(&name, index))
    }
}
