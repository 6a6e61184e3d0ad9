//! CGI process lifecycle.
//!
//! # Responsibilities
//! - Start the script by direct exec with a cleared, CGI-only environment
//! - Own the stdin/stdout pipes and the exit status
//! - Kill and reap the child when the exchange is abandoned
//!
//! # Design Decisions
//! - No shell: the resolved path is the program, so metacharacters are inert
//! - `kill_on_drop` guarantees a dropped handle never leaks a running child
//! - Stdin can be split off so the inbound pump runs beside the outbound one

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::cgi::env::CgiEnvironment;
use crate::cgi::error::GatewayError;

/// Knobs for spawning CGI processes.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Inherit the gateway's stderr; otherwise the child's stderr is discarded.
    pub inherit_stderr: bool,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self { inherit_stderr: true }
    }
}

/// Write half of a child's stdin.
#[derive(Debug)]
pub struct StdinPipe {
    inner: Option<ChildStdin>,
}

impl StdinPipe {
    /// Write all of `bytes`. Fails with `BrokenPipe` once the child stops reading.
    pub async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self.inner.as_mut() {
            Some(stdin) => stdin.write_all(bytes).await,
            None => Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe)),
        }
    }

    /// Flush and close. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if let Some(mut stdin) = self.inner.take() {
            let _ = stdin.flush().await;
            let _ = stdin.shutdown().await;
        }
    }
}

/// One running CGI process.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    stdin: Option<StdinPipe>,
    stdout: Option<ChildStdout>,
    status: Option<ExitStatus>,
}

impl ProcessHandle {
    /// Start `script` with exactly `env` as its environment.
    pub fn spawn(
        script: &Path,
        env: CgiEnvironment,
        options: &SpawnOptions,
    ) -> Result<Self, GatewayError> {
        let mut command = Command::new(script);
        command
            .env_clear()
            .envs(env.iter())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if options.inherit_stderr {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(dir) = script.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| GatewayError::Spawn {
            path: script.to_path_buf(),
            source,
        })?;

        let pid = child.id();
        let stdin = child.stdin.take().map(|s| StdinPipe { inner: Some(s) });
        let stdout = child.stdout.take();

        tracing::debug!(pid = ?pid, script = %script.display(), "CGI process started");

        Ok(Self {
            child,
            pid,
            stdin,
            stdout,
            status: None,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Best-effort write to stdin.
    pub async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write(bytes).await,
            None => Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe)),
        }
    }

    /// Close stdin. Output the child has already queued is unaffected.
    pub async fn close_stdin(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.close().await;
        }
    }

    /// Hand stdin to a concurrent writer. Returns `None` after the first call.
    pub fn take_stdin(&mut self) -> Option<StdinPipe> {
        self.stdin.take()
    }

    /// Next chunk of at most `max` bytes; empty once stdout reaches EOF.
    ///
    /// Resolves as soon as data is available, so output buffered before the
    /// child exited is still delivered.
    pub async fn read(&mut self, max: usize) -> std::io::Result<Bytes> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(Bytes::new());
        };
        let mut buf = vec![0u8; max.max(1)];
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            self.stdout = None;
        }
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    /// Exit code if the child has exited; `-1` for termination by signal.
    pub fn exit_status(&mut self) -> Option<i32> {
        if self.status.is_none() {
            if let Ok(Some(status)) = self.child.try_wait() {
                self.status = Some(status);
            }
        }
        self.status.map(exit_code)
    }

    /// Wait for the child to exit and record its status.
    pub async fn wait(&mut self) -> std::io::Result<i32> {
        if let Some(status) = self.status {
            return Ok(exit_code(status));
        }
        let status = self.child.wait().await?;
        self.status = Some(status);
        Ok(exit_code(status))
    }

    /// Kill the child (if still running), close both pipes and reap it.
    pub async fn kill(&mut self) {
        self.stdin = None;
        self.stdout = None;
        if self.exit_status().is_some() {
            return;
        }
        if let Err(e) = self.child.kill().await {
            tracing::warn!(pid = ?self.pid, error = %e, "Failed to kill CGI process");
            return;
        }
        if let Ok(status) = self.child.wait().await {
            self.status = Some(status);
        }
        tracing::debug!(pid = ?self.pid, "CGI process killed");
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
