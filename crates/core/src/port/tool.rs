// External Tool Contract
// Every conversion step that shells out goes through this shape:
// exit code 0 + expected output present = success, anything else is a
// failure carrying the captured stderr.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// One external command invocation. All commands are wall-clock bounded.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    /// Piped to the child's stdin when present (e.g. coordinate input).
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            stdin: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Captured process output.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// External tool errors
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} timed out after {timeout_ms}ms")]
    Timeout { program: String, timeout_ms: u64 },

    #[error("{program} exited with {code:?}: {stderr}")]
    ExitFailure {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} produced unusable output: {message}")]
    BadOutput { program: String, message: String },

    #[error("io error running {program}: {message}")]
    Io { program: String, message: String },
}
