//! Concurrency limiter: FIFO backlog plus the registry of active jobs.
//!
//! The limiter is plain data owned by the control loop. Only [`Limiter::admit`]
//! and [`Limiter::retire`] move work between the backlog and the registry.

use crate::job::{new_job_id, Job, JobId, JobUpdate, WorkItem};
use std::collections::{HashMap, VecDeque};

/// Work that was just admitted and must be started by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub id: JobId,
    pub work: WorkItem,
}

/// Result of retiring a job.
#[derive(Debug)]
pub struct Retirement {
    /// The retired job, if the id was active.
    pub job: Option<Job>,
    /// Next backlog item admitted into the freed slot.
    pub next: Option<Admission>,
}

#[derive(Debug)]
pub struct Limiter {
    max_concurrent: usize,
    backlog: VecDeque<WorkItem>,
    active: HashMap<JobId, Job>,
    next_seq: u64,
}

impl Limiter {
    /// Creates a limiter; a bound of zero is treated as one.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            backlog: VecDeque::new(),
            active: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Appends work to the back of the backlog.
    pub fn enqueue(&mut self, work: WorkItem) {
        self.backlog.push_back(work);
    }

    /// Admits the oldest backlog item if a slot is free.
    pub fn admit(&mut self) -> Option<Admission> {
        if self.active.len() >= self.max_concurrent {
            return None;
        }
        let work = self.backlog.pop_front()?;
        let id = new_job_id();
        let job = Job::admit(id.clone(), &work, self.next_seq);
        self.next_seq += 1;
        self.active.insert(id.clone(), job);
        Some(Admission { id, work })
    }

    /// Admits as many backlog items as there are free slots.
    pub fn admit_all(&mut self) -> Vec<Admission> {
        let mut admitted = Vec::new();
        while let Some(admission) = self.admit() {
            admitted.push(admission);
        }
        admitted
    }

    /// Removes a job from the registry and admits at most one replacement.
    pub fn retire(&mut self, id: &str) -> Retirement {
        let job = self.active.remove(id);
        let next = if job.is_some() { self.admit() } else { None };
        Retirement { job, next }
    }

    /// Applies a progress or state update to an active job.
    ///
    /// Updates for jobs that already retired are ignored.
    pub fn apply(&mut self, update: &JobUpdate) -> bool {
        match self.active.get_mut(update.job_id()) {
            Some(job) => {
                job.apply(update);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.active.get(id)
    }

    /// Active jobs in admission order.
    pub fn active_jobs(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.active.values().collect();
        jobs.sort_by_key(|j| j.admitted_seq);
        jobs
    }

    /// Progress of each active job in admission order.
    pub fn percents(&self) -> Vec<f32> {
        self.active_jobs()
            .iter()
            .map(|j| j.progress_percent)
            .collect()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// No active jobs and nothing waiting.
    pub fn is_idle(&self) -> bool {
        self.active.is_empty() && self.backlog.is_empty()
    }

    /// Drops the backlog and the registry, returning the ids that were active.
    pub fn drain(&mut self) -> Vec<JobId> {
        self.backlog.clear();
        self.active.drain().map(|(id, _)| id).collect()
    }
}
