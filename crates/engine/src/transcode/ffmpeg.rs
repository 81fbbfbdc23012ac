//! FFmpeg-backed transcoder.
//!
//! Segments are cut with `-ss`/`-t` and joined with the concat demuxer. Both
//! run with `-progress pipe:1` so the child's stdout is a key=value progress
//! feed that is turned into [`TranscodeEvent`]s.

use super::{
    MergeRequest, SegmentRequest, TranscodeError, TranscodeEvent, TranscodeEvents, Transcoder,
};
use crate::config::TranscodeConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

/// Name of the concat demuxer list written into a merge's work directory.
pub const CONCAT_LIST_NAME: &str = "concat.txt";

const EVENT_BUFFER: usize = 64;

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use super::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
    }
}

/// Transcoder that shells out to `ffmpeg` and `ffprobe`.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    config: TranscodeConfig,
}

impl FfmpegTranscoder {
    pub fn new(config: TranscodeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TranscodeConfig {
        &self.config
    }
}

/// Formats seconds the way ffmpeg's time options accept them.
fn seconds_arg(seconds: f64) -> String {
    format!("{:.3}", seconds)
}

fn push_output_args(cmd: &mut Command, config: &TranscodeConfig, destination: &Path) {
    if config.stream_copy {
        cmd.arg("-map").arg("0");
        cmd.arg("-c").arg("copy");
    }
    cmd.arg("-progress").arg("pipe:1");
    cmd.arg("-nostats");
    cmd.arg(destination);
}

/// Build the ffmpeg command that extracts one segment.
pub fn build_extract_command(config: &TranscodeConfig, request: &SegmentRequest) -> Command {
    let mut cmd = Command::new(&config.ffmpeg_path);

    cmd.arg("-y");
    cmd.arg("-hide_banner");
    cmd.arg("-loglevel").arg("error");

    cmd.arg("-ss").arg(seconds_arg(request.start_seconds));
    cmd.arg("-i").arg(&request.source);
    cmd.arg("-t").arg(seconds_arg(request.duration_seconds));

    push_output_args(&mut cmd, config, &request.destination);
    cmd
}

/// Build the ffmpeg command that joins the inputs listed in `list_path`.
pub fn build_merge_command(
    config: &TranscodeConfig,
    list_path: &Path,
    destination: &Path,
) -> Command {
    let mut cmd = Command::new(&config.ffmpeg_path);

    cmd.arg("-y");
    cmd.arg("-hide_banner");
    cmd.arg("-loglevel").arg("error");
    cmd.arg("-f").arg("concat");
    cmd.arg("-safe").arg("0");
    cmd.arg("-i").arg(list_path);

    push_output_args(&mut cmd, config, destination);
    cmd
}

/// Contents of a concat demuxer list for `inputs`, in order.
pub fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| {
            let escaped = p.to_string_lossy().replace('\'', "'\\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}

/// Parses `ffprobe -print_format json -show_format` output into milliseconds.
pub fn parse_probe_duration(json_str: &str) -> Result<f64, TranscodeError> {
    let probe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| TranscodeError::Parse(e.to_string()))?;

    let duration = probe
        .format
        .and_then(|f| f.duration)
        .ok_or_else(|| TranscodeError::Parse("Missing format duration".to_string()))?;

    let secs = duration
        .trim()
        .parse::<f64>()
        .map_err(|_| TranscodeError::Parse(format!("Unreadable duration '{}'", duration)))?;

    Ok(secs * 1000.0)
}

/// Translates one `-progress` line into an event, if it carries one.
pub fn parse_progress_line(line: &str) -> Option<TranscodeEvent> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time" if value != "N/A" => Some(TranscodeEvent::Progress {
            timemark: value.to_string(),
            percent: None,
        }),
        "total_size" => value
            .parse::<u64>()
            .ok()
            .map(|bytes| TranscodeEvent::Data { bytes }),
        _ => None,
    }
}

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Spawns `cmd` and pumps its progress feed into a fresh event channel.
///
/// The child is killed if the receiver is dropped before it exits.
fn spawn_with_events(cmd: Command) -> Result<TranscodeEvents, TranscodeError> {
    let command_line = describe(&cmd);
    let program = cmd.get_program().to_string_lossy().into_owned();

    let mut child = tokio::process::Command::from(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| TranscodeError::Spawn { program, source })?;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    tokio::spawn(async move {
        if tx
            .send(TranscodeEvent::Start {
                command: command_line,
            })
            .await
            .is_err()
        {
            return;
        }

        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut text).await;
            }
            text
        });

        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if let Some(event) = parse_progress_line(&line) {
                                if tx.send(event).await.is_err() {
                                    // Dropping `child` kills it
                                    return;
                                }
                            }
                        }
                        _ => break,
                    },
                    _ = tx.closed() => return,
                }
            }
        }

        let status = child.wait().await;
        let stderr_text = stderr_task.await.unwrap_or_default();

        let terminal = match status {
            Ok(status) if status.success() => TranscodeEvent::End,
            Ok(status) => TranscodeEvent::Error {
                message: format!("ffmpeg exited with {}: {}", status, stderr_text.trim()),
            },
            Err(e) => TranscodeEvent::Error {
                message: format!("failed to wait for ffmpeg: {}", e),
            },
        };
        let _ = tx.send(terminal).await;
    });

    Ok(rx)
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64, TranscodeError> {
        let output = tokio::process::Command::new(&self.config.ffprobe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .output()
            .await
            .map_err(|source| TranscodeError::Spawn {
                program: self.config.ffprobe_path.to_string_lossy().into_owned(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscodeError::ProbeFailed(format!(
                "ffprobe exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_probe_duration(&String::from_utf8_lossy(&output.stdout))
    }

    async fn extract_segment(
        &self,
        request: SegmentRequest,
    ) -> Result<TranscodeEvents, TranscodeError> {
        if let Some(parent) = request.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let cmd = build_extract_command(&self.config, &request);
        debug!(command = %describe(&cmd), "starting segment extraction");
        spawn_with_events(cmd)
    }

    async fn merge_inputs(&self, request: MergeRequest) -> Result<TranscodeEvents, TranscodeError> {
        if let Some(parent) = request.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let list_path = request.work_dir.join(CONCAT_LIST_NAME);
        tokio::fs::write(&list_path, concat_list(&request.inputs)).await?;

        let cmd = build_merge_command(&self.config, &list_path, &request.destination);
        debug!(command = %describe(&cmd), "starting merge");
        spawn_with_events(cmd)
    }
}
