// crates/jobs/src/process.rs
//! Process spawning and control.
//!
//! `ProcessHandle` wraps a spawned child with piped stdout/stderr; the pump
//! task owns it for the job's lifetime. Cancellation works on the raw pid
//! (`signal_terminate`/`signal_kill`) so the manager never needs access to
//! the `Child` itself.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Argv plus optional working directory and stdin bytes for a spawn.
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
}

impl ProcessCommand {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            stdin: None,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }
}

enum Next {
    Stdout(Option<String>),
    Stderr(Option<String>),
}

/// Combined stdout+stderr line stream of a spawned process.
///
/// Lines from the two pipes are interleaved in arrival order; ordering within
/// each pipe is preserved. `next_line` is cancel-safe, so the pump can wrap
/// it in a timeout without losing buffered data.
#[derive(Debug)]
pub struct ProcessOutput {
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    stderr: Option<Lines<BufReader<ChildStderr>>>,
}

impl ProcessOutput {
    /// Next line from either pipe, or `None` once both have reached EOF.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let next = match (self.stdout.as_mut(), self.stderr.as_mut()) {
                (None, None) => return Ok(None),
                (Some(out), None) => Next::Stdout(out.next_line().await?),
                (None, Some(err)) => Next::Stderr(err.next_line().await?),
                (Some(out), Some(err)) => tokio::select! {
                    line = out.next_line() => Next::Stdout(line?),
                    line = err.next_line() => Next::Stderr(line?),
                },
            };
            match next {
                Next::Stdout(Some(line)) | Next::Stderr(Some(line)) => return Ok(Some(line)),
                Next::Stdout(None) => self.stdout = None,
                Next::Stderr(None) => self.stderr = None,
            }
        }
    }
}

/// A spawned OS process. The caller must eventually `wait` to reap it;
/// `kill_on_drop` is set as a backstop if the owning task dies first.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
}

impl ProcessHandle {
    /// Spawn the command with piped stdout/stderr. Stdin bytes, if any, are
    /// written and the pipe closed before this returns.
    pub async fn spawn(cmd: &ProcessCommand) -> io::Result<(Self, ProcessOutput)> {
        let program = cmd
            .argv
            .first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))?;

        let mut command = Command::new(program);
        command
            .args(&cmd.argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;

        if let Some(bytes) = &cmd.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(bytes).await?;
                // Dropping the handle closes the pipe.
            }
        }

        let output = ProcessOutput {
            stdout: child.stdout.take().map(|s| BufReader::new(s).lines()),
            stderr: child.stderr.take().map(|s| BufReader::new(s).lines()),
        };

        Ok((Self { child }, output))
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Non-blocking liveness probe.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait for exit and reap. Returns -1 when the process was killed by a
    /// signal and exited without a code.
    pub async fn wait(&mut self) -> io::Result<i32> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }

    /// Send SIGTERM to the process.
    pub fn terminate(&self) {
        if let Some(pid) = self.child.id() {
            signal_terminate(pid);
        }
    }

    /// Force-kill the process.
    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

/// Send SIGTERM to a pid. Returns false if the process no longer exists.
pub fn signal_terminate(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
}

/// Send SIGKILL to a pid.
pub fn signal_kill(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL).is_ok()
}

/// Signal-0 existence probe. A zombie still counts as alive until reaped.
pub fn pid_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Captured result of a short-lived command run to completion.
#[derive(Debug)]
pub struct CaptureOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CaptureOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a command to completion, capturing stdout/stderr. Used for dependency
/// probes and setup steps (tag/login/inspect/rmi), never for tracked jobs.
pub async fn run_capture(argv: &[String], stdin: Option<&[u8]>) -> io::Result<CaptureOutput> {
    let program = argv
        .first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))?;

    let mut command = Command::new(program);
    command
        .args(&argv[1..])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    let mut child = command.spawn()?;
    if let Some(bytes) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(bytes).await?;
        }
    }

    let output = child.wait_with_output().await?;
    Ok(CaptureOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> ProcessCommand {
        ProcessCommand::new(["sh", "-c", script])
    }

    #[tokio::test]
    async fn test_spawn_reads_combined_output() {
        let (mut handle, mut output) = ProcessHandle::spawn(&sh("echo out; echo err 1>&2"))
            .await
            .unwrap();

        let mut lines = Vec::new();
        while let Some(line) = output.next_line().await.unwrap() {
            lines.push(line);
        }
        lines.sort();
        assert_eq!(lines, vec!["err".to_string(), "out".to_string()]);
        assert_eq!(handle.wait().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stdout_order_preserved() {
        let (mut handle, mut output) =
            ProcessHandle::spawn(&sh("echo one; echo two; echo three"))
                .await
                .unwrap();

        let mut lines = Vec::new();
        while let Some(line) = output.next_line().await.unwrap() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["one", "two", "three"]);
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_returns_exit_code() {
        let (mut handle, _output) = ProcessHandle::spawn(&sh("exit 7")).await.unwrap();
        assert_eq!(handle.wait().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let cmd = ProcessCommand::new(["definitely-not-a-real-binary-xyz"]);
        assert!(ProcessHandle::spawn(&cmd).await.is_err());
    }

    #[tokio::test]
    async fn test_terminate_yields_signal_sentinel() {
        let (mut handle, _output) = ProcessHandle::spawn(&sh("sleep 30")).await.unwrap();
        assert!(handle.is_alive());
        handle.terminate();
        assert_eq!(handle.wait().await.unwrap(), -1);
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_pid_signal_helpers() {
        let (mut handle, _output) = ProcessHandle::spawn(&sh("sleep 30")).await.unwrap();
        let pid = handle.pid().unwrap();
        assert!(pid_alive(pid));
        assert!(signal_kill(pid));
        assert_eq!(handle.wait().await.unwrap(), -1);
        // Reaped now; the probe must fail.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pid_alive(pid));
    }

    #[tokio::test]
    async fn test_run_capture_with_stdin() {
        let argv: Vec<String> = vec!["cat".into()];
        let out = run_capture(&argv, Some(b"hello")).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello");
    }

    #[tokio::test]
    async fn test_run_capture_nonzero() {
        let argv: Vec<String> = vec!["sh".into(), "-c".into(), "echo oops 1>&2; exit 3".into()];
        let out = run_capture(&argv, None).await.unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_empty_argv_rejected() {
        let cmd = ProcessCommand {
            argv: vec![],
            cwd: None,
            stdin: None,
        };
        let err = ProcessHandle::spawn(&cmd).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
