//! Subprocess helpers shared across the workspace.
//!
//! External tools (ffmpeg, yt-dlp) are always run through [`run_captured`],
//! which enforces a wall-clock deadline and keeps stdout/stderr for
//! diagnostics.

use std::ffi::OsStr;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Output of a finished child process.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Errors produced while running a child process.
#[derive(Debug, Error)]
pub enum RunError {
    /// The program could not be found on `PATH` (or at the given path).
    #[error("program not found: {0}")]
    NotFound(String),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The process did not exit before the deadline and was killed.
    #[error("process timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),
}

/// Run `program` with `args` to completion, capturing stdout and stderr.
///
/// The child is killed if it is still running after `timeout`. A non-zero
/// exit status is not an error here; callers inspect [`CapturedOutput::status`].
pub async fn run_captured<I, S>(
    program: &str,
    args: I,
    timeout: Duration,
) -> Result<CapturedOutput, RunError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = tokio_command(program)
        .args(args)
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => RunError::NotFound(program.to_string()),
            _ => RunError::Spawn {
                program: program.to_string(),
                source,
            },
        })?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    // Drain both pipes while waiting so a chatty child never blocks on a full pipe.
    let run = async {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let read_stdout = async {
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut stdout).await;
            }
        };
        let read_stderr = async {
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut stderr).await;
            }
        };
        let (status, _, _) = tokio::join!(child.wait(), read_stdout, read_stderr);
        status.map(|status| CapturedOutput {
            status,
            stdout,
            stderr,
        })
    };

    let outcome = tokio::time::timeout(timeout, run).await;
    match outcome {
        Ok(result) => result.map_err(RunError::Wait),
        Err(_) => {
            let _ = child.kill().await;
            Err(RunError::TimedOut(timeout))
        }
    }
}
