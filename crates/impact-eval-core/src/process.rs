//! External process execution with captured output and wall-clock timing.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{EvalError, Result};

/// Specification of one external command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Stage label used in timeout errors and logs.
    pub stage: String,

    /// Program and arguments (first element is the executable).
    pub argv: Vec<String>,

    /// Working directory, or inherit when `None`.
    pub cwd: Option<PathBuf>,

    /// Extra environment variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,

    /// Bytes piped to stdin, if any.
    pub stdin: Option<Vec<u8>>,

    /// Timeout in seconds. 0 disables the timeout and the command may block
    /// the run indefinitely.
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(stage: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            stage: stage.into(),
            argv,
            cwd: None,
            env: BTreeMap::new(),
            stdin: None,
            timeout_secs: 0,
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdin(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Some(bytes);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Captured outcome of one external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Wall-clock duration measured with a monotonic clock.
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run one command to completion, capturing stdout/stderr.
///
/// A non-zero exit is not an error at this layer; callers decide whether an
/// exit status is fatal. Spawn failures and timeouts are errors.
pub async fn run_command(spec: &CommandSpec) -> Result<CommandOutput> {
    if spec.argv.is_empty() {
        return Err(EvalError::Configuration(format!(
            "stage `{}` has an empty command",
            spec.stage
        )));
    }

    debug!(stage = %spec.stage, argv = ?spec.argv, "spawning");

    let start = Instant::now();

    let mut command = Command::new(&spec.argv[0]);
    command
        .args(&spec.argv[1..])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
    if let Some(dir) = &spec.cwd {
        command.current_dir(dir);
    }
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    let mut child = command.spawn()?;

    if let Some(bytes) = &spec.stdin {
        // stdin handle exists because Stdio::piped was selected above
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(bytes).await?;
        }
    }

    let output = if spec.timeout_secs > 0 {
        tokio::time::timeout(
            Duration::from_secs(spec.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| EvalError::Timeout {
            stage: spec.stage.clone(),
            timeout_secs: spec.timeout_secs,
        })??
    } else {
        child.wait_with_output().await?
    };

    let duration = start.elapsed();
    let exit_code = output.status.code().unwrap_or(-1);

    Ok(CommandOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration,
    })
}
