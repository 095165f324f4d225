//! External process wrapper.
//!
//! Every external invocation in the core goes through [`run`]: an argument
//! vector, an optional working directory, and a mandatory deadline. Build
//! tools are never handed a shell; catalog-supplied recipe strings go through
//! [`run_shell`], which is the one deliberate `/bin/sh -c` escape hatch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' timed out after {timeout}s")]
    Timeout { command: String, timeout: u64 },

    #[error("'{command}' exited with status {code}: {stderr}")]
    Failed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured result of a finished process.
#[derive(Debug)]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Run an argument vector with a working directory and an overall deadline.
///
/// The child is killed if the deadline elapses. A non-zero exit status is not
/// an error here; use [`run_checked`] for that.
pub async fn run(
    argv: &[String],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<ExecOutput, ExecError> {
    run_with_env(argv, cwd, timeout, &HashMap::new()).await
}

/// [`run`] with extra environment variables for the child.
pub async fn run_with_env(
    argv: &[String],
    cwd: Option<&Path>,
    timeout: Duration,
    env: &HashMap<String, String>,
) -> Result<ExecOutput, ExecError> {
    let program = argv.first().ok_or_else(|| ExecError::Spawn {
        program: String::new(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argument vector"),
    })?;

    let mut command = Command::new(program);
    command
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    for (key, value) in env {
        command.env(key, value);
    }

    let command_display = argv.join(" ");
    tracing::debug!(command = %command_display, "running");

    let child = command.spawn().map_err(|source| ExecError::Spawn {
        program: program.clone(),
        source,
    })?;

    // kill_on_drop reaps the child when the timeout drops the future.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ExecError::Timeout {
                command: command_display,
                timeout: timeout.as_secs(),
            })
        }
    };

    Ok(ExecOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Like [`run`], but a non-zero exit status becomes [`ExecError::Failed`].
pub async fn run_checked(
    argv: &[String],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<ExecOutput, ExecError> {
    let display = argv.join(" ");
    let output = run(argv, cwd, timeout).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(failed(display, output))
    }
}

/// Run a catalog-supplied recipe string through `/bin/sh -c`.
///
/// Recipes see `PREFIX`, `DESTDIR`, and `JOBS` in their environment. A
/// non-zero exit status is an error.
pub async fn run_shell(
    script: &str,
    cwd: &Path,
    timeout: Duration,
    env: &HashMap<String, String>,
) -> Result<ExecOutput, ExecError> {
    let argv = vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()];
    let output = run_with_env(&argv, Some(cwd), timeout, env).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(failed(script.to_string(), output))
    }
}

fn failed(command: String, output: ExecOutput) -> ExecError {
    let mut stderr = output.stderr.trim().to_string();
    if stderr.len() > 400 {
        let mut cut = 400;
        while !stderr.is_char_boundary(cut) {
            cut -= 1;
        }
        stderr.truncate(cut);
    }
    ExecError::Failed {
        command,
        code: output.code,
        stderr,
    }
}

/// Resolve a required external tool, surfacing a clear error when absent.
pub fn require_tool(name: &str) -> Result<PathBuf, ExecError> {
    which::which(name).map_err(|_| ExecError::MissingTool(name.to_string()))
}

/// Convenience for building an argument vector from mixed string types.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
