//! Transcode capability used by partition and reassembly jobs.
//!
//! The engine never talks to a media tool directly. It asks a [`Transcoder`]
//! for a duration, or to start a cut/join operation, and then consumes the
//! resulting stream of [`TranscodeEvent`]s until `End` or `Error`.

pub mod ffmpeg;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

pub use ffmpeg::{build_extract_command, build_merge_command, concat_list, FfmpegTranscoder};

/// Errors raised before an operation's event stream exists.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The external program could not be started.
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The probe ran but reported failure.
    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    /// The probe output could not be understood.
    #[error("Failed to parse probe output: {0}")]
    Parse(String),

    /// IO error while preparing the operation.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Event emitted by a running cut or join operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeEvent {
    /// The operation started; carries the command line for the log.
    Start { command: String },
    /// Position reached in the output, as `HH:MM:SS.ss`.
    Progress {
        timemark: String,
        percent: Option<f64>,
    },
    /// Bytes written to the output so far.
    Data { bytes: u64 },
    /// Terminal failure.
    Error { message: String },
    /// Terminal success.
    End,
}

/// Receiving half of an operation's event stream.
pub type TranscodeEvents = mpsc::Receiver<TranscodeEvent>;

/// Cut `[start, start + duration)` out of `source` into `destination`.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRequest {
    pub source: PathBuf,
    pub start_seconds: f64,
    pub duration_seconds: f64,
    pub destination: PathBuf,
}

/// Join `inputs`, in order, into `destination` using `work_dir` for scratch files.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequest {
    pub inputs: Vec<PathBuf>,
    pub work_dir: PathBuf,
    pub destination: PathBuf,
}

/// The external transcode capability.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Returns the name of this implementation.
    fn name(&self) -> &str;

    /// Playable duration of `path` in milliseconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64, TranscodeError>;

    /// Starts extracting one segment.
    async fn extract_segment(
        &self,
        request: SegmentRequest,
    ) -> Result<TranscodeEvents, TranscodeError>;

    /// Starts merging several inputs into one output.
    async fn merge_inputs(&self, request: MergeRequest) -> Result<TranscodeEvents, TranscodeError>;
}
