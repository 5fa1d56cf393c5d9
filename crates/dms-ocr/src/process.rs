//! Bounded execution of external tools.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::{OcrError, Result, Stage, TRACING_TARGET_PROCESS};

const STDERR_LIMIT: usize = 2048;

/// Runs `command` to completion within `timeout`.
///
/// The child is killed when the time bound is exceeded. A non-zero exit is
/// reported as [`OcrError::ProcessFailed`] carrying the tool's stderr.
pub(crate) async fn run_tool(
    mut command: Command,
    tool: &'static str,
    stage: Stage,
    timeout: Duration,
) -> Result<()> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(
        target: TRACING_TARGET_PROCESS,
        tool,
        stage = %stage,
        args = ?command.as_std().get_args().collect::<Vec<_>>(),
        "Running external tool"
    );

    let started = Instant::now();
    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            tracing::error!(
                target: TRACING_TARGET_PROCESS,
                tool,
                stage = %stage,
                error = %source,
                "Failed to launch external tool"
            );
            return Err(OcrError::Spawn {
                stage,
                tool,
                source,
            });
        }
        Err(_) => {
            tracing::error!(
                target: TRACING_TARGET_PROCESS,
                tool,
                stage = %stage,
                timeout = ?timeout,
                "External tool timed out"
            );
            return Err(OcrError::Timeout { stage, timeout });
        }
    };

    if !output.status.success() {
        let stderr = truncate(String::from_utf8_lossy(&output.stderr).trim());
        tracing::error!(
            target: TRACING_TARGET_PROCESS,
            tool,
            stage = %stage,
            status = %output.status,
            stderr = %stderr,
            "External tool failed"
        );
        return Err(OcrError::ProcessFailed {
            stage,
            tool,
            status: output.status.to_string(),
            stderr,
        });
    }

    tracing::debug!(
        target: TRACING_TARGET_PROCESS,
        tool,
        stage = %stage,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "External tool finished"
    );
    Ok(())
}

fn truncate(stderr: &str) -> String {
    if stderr.len() <= STDERR_LIMIT {
        return stderr.to_owned();
    }
    let mut end = STDERR_LIMIT;
    while !stderr.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &stderr[..end])
}
