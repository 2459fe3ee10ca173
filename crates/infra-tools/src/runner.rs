// Subprocess runner
// Spawns one external command with piped output and a hard wall-clock
// timeout. Dropping the child future on timeout reaps the process
// (kill_on_drop), so a hung converter cannot outlive its job.

use std::process::Stdio;
use terraflow_core::port::{ToolCommand, ToolError, ToolOutput};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

pub(crate) async fn run_tool(cmd: &ToolCommand) -> Result<ToolOutput, ToolError> {
    debug!(program = %cmd.program, args = ?cmd.args, timeout_ms = cmd.timeout.as_millis() as u64, "Starting tool");

    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .stdin(if cmd.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &cmd.current_dir {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|e| ToolError::Spawn {
        program: cmd.program.clone(),
        message: e.to_string(),
    })?;

    if let Some(input) = &cmd.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| ToolError::Io {
                    program: cmd.program.clone(),
                    message: e.to_string(),
                })?;
            // dropping stdin sends EOF
        }
    }

    let output = match timeout(cmd.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ToolError::Io {
                program: cmd.program.clone(),
                message: e.to_string(),
            })
        }
        Err(_) => {
            return Err(ToolError::Timeout {
                program: cmd.program.clone(),
                timeout_ms: cmd.timeout.as_millis() as u64,
            })
        }
    };

    let result = ToolOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };
    info!(program = %cmd.program, exit_code = ?result.exit_code, "Tool finished");
    Ok(result)
}

/// Map a non-zero exit into `ExitFailure`, preserving the captured
/// stderr (falling back to stdout for tools that report there).
pub(crate) fn require_success(program: &str, output: ToolOutput) -> Result<ToolOutput, ToolError> {
    if output.success() {
        return Ok(output);
    }
    let stderr = if output.stderr.trim().is_empty() {
        output.stdout.trim().to_string()
    } else {
        output.stderr.trim().to_string()
    };
    Err(ToolError::ExitFailure {
        program: program.to_string(),
        code: output.exit_code,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let cmd = ToolCommand::new("echo", Duration::from_secs(5)).arg("hello");
        let output = run_tool(&cmd).await.unwrap();
        assert!(output.success());
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let cmd = ToolCommand::new("sh", Duration::from_secs(5))
            .arg("-c")
            .arg("echo boom >&2; exit 3");
        let output = run_tool(&cmd).await.unwrap();

        let err = require_success("sh", output).unwrap_err();
        match err {
            ToolError::ExitFailure { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_the_child() {
        let cmd = ToolCommand::new("sleep", Duration::from_millis(100)).arg("10");
        let err = run_tool(&cmd).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_stdin_is_piped() {
        let mut cmd = ToolCommand::new("cat", Duration::from_secs(5));
        cmd.stdin = Some("443489.5 4632349.2 181.0\n".to_string());
        let output = run_tool(&cmd).await.unwrap();
        assert!(output.stdout.contains("4632349.2"));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let cmd = ToolCommand::new("definitely-not-a-real-binary", Duration::from_secs(1));
        let err = run_tool(&cmd).await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
