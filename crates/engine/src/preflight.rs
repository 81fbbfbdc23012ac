//! Preflight checks run before a backup or restore.
//!
//! Verifies that the configured ffmpeg and ffprobe binaries can be executed.

use crate::config::TranscodeConfig;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::info;

/// Error types for preflight checks
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("{program} not available: {message}")]
    ToolUnavailable { program: String, message: String },
}

/// Parse a tool's `-version` banner and extract the version token
///
/// Handles both ffmpeg and ffprobe banners, including n-prefixed builds:
/// - "ffmpeg version 6.1.1-3ubuntu5 ..." -> "6.1.1-3ubuntu5"
/// - "ffprobe version n7.0-12-g1234 ..." -> "7.0-12-g1234"
pub fn parse_tool_version(version_output: &str) -> Option<String> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains(" version "))?;

    let token = version_line
        .split(" version ")
        .nth(1)?
        .split_whitespace()
        .next()?;

    let token = token.strip_prefix('n').unwrap_or(token);
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Check that `<program> -version` runs, returning its version token
pub fn check_tool(program: &Path) -> Result<Option<String>, PreflightError> {
    let name = program.display().to_string();
    let output = Command::new(program)
        .arg("-version")
        .output()
        .map_err(|e| PreflightError::ToolUnavailable {
            program: name.clone(),
            message: format!("{} -version failed; is it installed and in PATH? Error: {}", name, e),
        })?;

    if !output.status.success() {
        return Err(PreflightError::ToolUnavailable {
            program: name.clone(),
            message: format!("{} -version exited with {}", name, output.status),
        });
    }

    Ok(parse_tool_version(&String::from_utf8_lossy(&output.stdout)))
}

/// Run all preflight checks in order: ffmpeg, then ffprobe
pub fn run_preflight_checks(cfg: &TranscodeConfig) -> Result<(), PreflightError> {
    for program in [&cfg.ffmpeg_path, &cfg.ffprobe_path] {
        let version = check_tool(program)?;
        info!(
            program = %program.display(),
            version = version.as_deref().unwrap_or("unknown"),
            "preflight check passed"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_tool_version_standard() {
        let output = "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023 the FFmpeg developers\nbuilt with gcc 13";
        assert_eq!(parse_tool_version(output), Some("6.1.1-3ubuntu5".to_string()));
    }

    #[test]
    fn test_parse_tool_version_n_prefixed() {
        let output = "ffprobe version n7.0-12-g1234 Copyright (c) 2007-2024";
        assert_eq!(parse_tool_version(output), Some("7.0-12-g1234".to_string()));
    }

    #[test]
    fn test_parse_tool_version_invalid() {
        assert_eq!(parse_tool_version(""), None);
        assert_eq!(parse_tool_version("command not found"), None);
        assert_eq!(parse_tool_version("ffmpeg version "), None);
    }

    #[test]
    fn test_missing_tool_is_unavailable() {
        let missing = PathBuf::from("/nonexistent/definitely-not-ffmpeg");
        let result = check_tool(&missing);
        assert!(matches!(result, Err(PreflightError::ToolUnavailable { .. })));
    }

    #[test]
    fn test_preflight_fails_on_missing_ffprobe() {
        let cfg = TranscodeConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            ffprobe_path: PathBuf::from("/nonexistent/ffprobe"),
            stream_copy: true,
        };
        match run_preflight_checks(&cfg) {
            Err(PreflightError::ToolUnavailable { program, .. }) => {
                assert_eq!(program, "/nonexistent/ffmpeg");
            }
            other => panic!("expected ToolUnavailable, got {:?}", other),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_version_token_extracted(
            tool in prop_oneof![Just("ffmpeg"), Just("ffprobe")],
            major in 1u32..20,
            minor in 0u32..10,
            n_prefix in any::<bool>(),
        ) {
            let prefix = if n_prefix { "n" } else { "" };
            let output = format!("{} version {}{}.{} Copyright (c) the FFmpeg developers", tool, prefix, major, minor);
            prop_assert_eq!(parse_tool_version(&output), Some(format!("{}.{}", major, minor)));
        }
    }
}
