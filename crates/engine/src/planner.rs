//! Partition planning for oversized video files.
//!
//! Decides how many time-bounded segments a file is cut into and how long
//! each segment is. The last segment absorbs the rounding remainder so the
//! segment durations always add up to the measured input duration.

use thiserror::Error;

/// Reasons a partition plan cannot be produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanningError {
    /// The segment size limit is zero.
    #[error("maximum segment size must be positive")]
    ZeroSegmentLimit,

    /// The file fits the backup medium and should be copied instead.
    #[error("file of {size_bytes} bytes does not exceed the {max_segment_bytes} byte limit")]
    NotOversized {
        size_bytes: u64,
        max_segment_bytes: u64,
    },

    /// The probe reported a duration that is negative or not a number.
    #[error("invalid input duration: {0} ms")]
    InvalidDuration(f64),

    /// A split group is missing segments or has none at all.
    #[error("split group is incomplete: {0}")]
    IncompleteGroup(String),

    /// The segment count does not fit in a `u32`.
    #[error("file of {size_bytes} bytes needs too many segments of {max_segment_bytes} bytes")]
    TooManySegments {
        size_bytes: u64,
        max_segment_bytes: u64,
    },
}

/// How a single file is cut into segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    /// Measured duration of the whole input.
    pub total_duration_ms: u64,
    /// Number of segments, always at least one.
    pub segment_count: u32,
    /// Duration of every segment but the last (`total / count`).
    pub segment_duration_ms: u64,
}

impl PartitionPlan {
    /// Duration of segment `index`.
    ///
    /// The last segment is `total - (count - 1) * segment_duration`, never
    /// `total / count`, so rounding error is absorbed there.
    pub fn duration_of(&self, index: u32) -> u64 {
        if index + 1 >= self.segment_count {
            let preceding = u64::from(self.segment_count.saturating_sub(1));
            self.total_duration_ms - preceding * self.segment_duration_ms
        } else {
            self.segment_duration_ms
        }
    }

    /// Start offset of segment `index`.
    pub fn start_of(&self, index: u32) -> u64 {
        self.segment_duration_ms * u64::from(index)
    }

    /// All segment durations in order.
    pub fn durations(&self) -> Vec<u64> {
        (0..self.segment_count).map(|i| self.duration_of(i)).collect()
    }
}

/// Number of segments for a file of `size_bytes`: `floor(size / max) + 1`.
pub fn segment_count(size_bytes: u64, max_segment_bytes: u64) -> Result<u32, PlanningError> {
    if max_segment_bytes == 0 {
        return Err(PlanningError::ZeroSegmentLimit);
    }
    (size_bytes / max_segment_bytes)
        .checked_add(1)
        .and_then(|count| u32::try_from(count).ok())
        .ok_or(PlanningError::TooManySegments {
            size_bytes,
            max_segment_bytes,
        })
}

/// Whether a file is large enough to need partitioning.
pub fn needs_partition(size_bytes: u64, max_segment_bytes: u64) -> bool {
    size_bytes > max_segment_bytes
}

/// Converts a probed duration into whole milliseconds.
///
/// Zero is accepted; the partition chain treats a zero-length plan as
/// nothing-to-do.
pub fn validate_duration(duration_ms: f64) -> Result<u64, PlanningError> {
    if !duration_ms.is_finite() || duration_ms < 0.0 {
        return Err(PlanningError::InvalidDuration(duration_ms));
    }
    Ok(duration_ms.floor() as u64)
}

/// Builds the partition plan for an oversized file.
pub fn plan_partition(
    size_bytes: u64,
    max_segment_bytes: u64,
    total_duration_ms: u64,
) -> Result<PartitionPlan, PlanningError> {
    if max_segment_bytes == 0 {
        return Err(PlanningError::ZeroSegmentLimit);
    }
    if !needs_partition(size_bytes, max_segment_bytes) {
        return Err(PlanningError::NotOversized {
            size_bytes,
            max_segment_bytes,
        });
    }

    let segment_count = segment_count(size_bytes, max_segment_bytes)?;

    Ok(PartitionPlan {
        total_duration_ms,
        segment_count,
        segment_duration_ms: total_duration_ms / u64::from(segment_count),
    })
}
