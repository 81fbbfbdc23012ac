//! Scripted transcoder for tests.

use crate::transcode::{
    MergeRequest, SegmentRequest, TranscodeError, TranscodeEvent, TranscodeEvents, Transcoder,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Answers probes with a fixed duration and completes operations by writing files.
///
/// Extracted segments contain the destination name; merged outputs contain
/// the concatenated bytes of their inputs. Operations whose destination
/// file name is listed in `failing` report an error instead.
#[derive(Default)]
pub struct MockTranscoder {
    default_duration: Option<f64>,
    failing: Vec<String>,
    delay: Duration,
    extracts: Mutex<Vec<SegmentRequest>>,
    merges: Mutex<Vec<MergeRequest>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_duration(mut self, duration_ms: f64) -> Self {
        self.default_duration = Some(duration_ms);
        self
    }

    pub fn failing_on(mut self, file_name: &str) -> Self {
        self.failing.push(file_name.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn extracts(&self) -> Vec<SegmentRequest> {
        self.extracts.lock().unwrap().clone()
    }

    pub fn merges(&self) -> Vec<MergeRequest> {
        self.merges.lock().unwrap().clone()
    }

    /// Total operations started.
    pub fn operations(&self) -> usize {
        self.extracts.lock().unwrap().len() + self.merges.lock().unwrap().len()
    }

    /// Highest number of operations that were running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn fails(&self, destination: &Path) -> bool {
        destination
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| self.failing.iter().any(|f| f == n))
            .unwrap_or(false)
    }

    fn run(&self, destination: PathBuf, contents: Vec<u8>, fail: bool) -> TranscodeEvents {
        let (tx, rx) = mpsc::channel(8);
        let delay = self.delay;
        let active = self.active.clone();
        let peak = self.peak.clone();

        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);

        tokio::spawn(async move {
            let _ = tx
                .send(TranscodeEvent::Start {
                    command: format!("mock {}", destination.display()),
                })
                .await;
            let _ = tx
                .send(TranscodeEvent::Progress {
                    timemark: "00:00:00.50".to_string(),
                    percent: None,
                })
                .await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let last = if fail {
                TranscodeEvent::Error {
                    message: "mock failure".to_string(),
                }
            } else {
                match tokio::fs::write(&destination, &contents).await {
                    Ok(()) => TranscodeEvent::End,
                    Err(e) => TranscodeEvent::Error {
                        message: e.to_string(),
                    },
                }
            };
            active.fetch_sub(1, Ordering::SeqCst);
            let _ = tx.send(last).await;
        });

        rx
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64, TranscodeError> {
        self.default_duration
            .ok_or_else(|| TranscodeError::ProbeFailed(format!("no duration for {}", path.display())))
    }

    async fn extract_segment(
        &self,
        request: SegmentRequest,
    ) -> Result<TranscodeEvents, TranscodeError> {
        self.extracts.lock().unwrap().push(request.clone());
        if let Some(parent) = request.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let fail = self.fails(&request.destination);
        let contents = request
            .destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned().into_bytes())
            .unwrap_or_default();
        Ok(self.run(request.destination, contents, fail))
    }

    async fn merge_inputs(&self, request: MergeRequest) -> Result<TranscodeEvents, TranscodeError> {
        self.merges.lock().unwrap().push(request.clone());
        if let Some(parent) = request.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut contents = Vec::new();
        for input in &request.inputs {
            contents.extend(tokio::fs::read(input).await?);
        }
        let fail = self.fails(&request.destination);
        Ok(self.run(request.destination, contents, fail))
    }
}
