//! Subprocess plumbing shared by the renderer, ffmpeg and tesseract wrappers.

use std::{process::Stdio, time::Duration};

use thiserror::Error;
use tokio::process::Command;

/// Longest stderr excerpt carried inside an error.
const STDERR_EXCERPT_CHARS: usize = 400;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not finish within {seconds}s")]
    Timeout { program: String, seconds: u64 },

    #[error("{program} exited with status {exit_code:?}: {stderr}")]
    Failed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },
}

impl ToolError {
    /// Short, path-free description used in client-facing error details.
    pub fn summary(&self) -> String {
        match self {
            ToolError::Spawn { program, .. } => format!("{program} could not be started"),
            ToolError::Timeout { program, seconds } => {
                format!("{program} timed out after {seconds}s")
            }
            ToolError::Failed {
                program, exit_code, ..
            } => match exit_code {
                Some(code) => format!("{program} exited with status {code}"),
                None => format!("{program} was terminated by a signal"),
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `cmd` to completion and capture both streams.
///
/// A `None` timeout waits for as long as the tool takes. With a timeout the
/// child is killed when the deadline passes.
pub async fn run_tool(
    cmd: &mut Command,
    timeout: Option<Duration>,
) -> Result<ToolOutput, ToolError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
            Ok(result) => result,
            Err(_) => {
                return Err(ToolError::Timeout {
                    program,
                    seconds: limit.as_secs(),
                });
            }
        },
        None => cmd.output().await,
    }
    .map_err(|source| ToolError::Spawn {
        program: program.clone(),
        source,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(ToolError::Failed {
            program,
            exit_code: output.status.code(),
            stderr: excerpt(&stderr),
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

fn excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    // keep the tail, tools print the actual error last
    trimmed.chars().skip(count - STDERR_EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let mut cmd = Command::new("definitely-not-a-real-tool-7f3a");
        let err = run_tool(&mut cmd, None).await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
        assert_eq!(
            err.summary(),
            "definitely-not-a-real-tool-7f3a could not be started"
        );
    }

    #[test]
    fn failed_summary_omits_stderr() {
        let err = ToolError::Failed {
            program: "manim".into(),
            exit_code: Some(1),
            stderr: "Traceback /home/user/secret.py".into(),
        };
        assert_eq!(err.summary(), "manim exited with status 1");
    }

    #[test]
    fn excerpt_keeps_the_tail() {
        let long = format!("{}END", "x".repeat(1000));
        let cut = excerpt(&long);
        assert_eq!(cut.chars().count(), STDERR_EXCERPT_CHARS);
        assert!(cut.ends_with("END"));
    }
}
