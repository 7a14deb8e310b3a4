//! Child process plumbing shared by every adapter
//!
//! Programs, installers, and plugins are all external tools. This module
//! spawns them, forwards their output as it arrives, and stops them when
//! the session is cancelled: SIGINT first, SIGKILL after a grace period.

pub mod buffer;
pub mod logger;
pub mod pty;
pub mod stream;

pub use buffer::RingBuffer;
pub use logger::{OutputSource, RunLogger};
pub use stream::{chunk_channel, ChunkSender, ChunkStream};

use crate::{LanghostError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const READ_CHUNK: usize = 8 * 1024;

/// Everything needed to launch one external tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            env: Vec::new(),
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell-ish rendering for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    pub fn spawn(&self) -> Result<Child> {
        self.command().spawn().map_err(|e| {
            LanghostError::Execution(format!("failed to start '{}': {}", self.program, e))
        })
    }
}

/// A piece of output from a running tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

impl OutputChunk {
    pub fn source(&self) -> OutputSource {
        match self {
            OutputChunk::Stdout(_) => OutputSource::Stdout,
            OutputChunk::Stderr(_) => OutputSource::Stderr,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            OutputChunk::Stdout(b) | OutputChunk::Stderr(b) => b,
        }
    }
}

/// Ask a child to stop, then force it.
pub async fn terminate(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        // SAFETY: the pid belongs to our own child, which has not been reaped
        // while `child` is still waitable.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
        if rc == 0 && tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
    }
    if let Err(e) = child.kill().await {
        tracing::warn!("failed to kill child process: {}", e);
    }
}

fn forward<R>(mut reader: R, tx: mpsc::UnboundedSender<OutputChunk>, wrap: fn(Vec<u8>) -> OutputChunk)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(wrap(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("output pipe closed: {}", e);
                    break;
                }
            }
        }
    });
}

/// Run a tool to completion, handing each output chunk to `on_chunk` as it
/// arrives. Returns the exit code (`-1` when killed by a signal).
///
/// Cancellation stops the tool and yields `LanghostError::Cancelled`.
pub async fn run_streaming<F>(
    spec: &ProcessSpec,
    cancel: &CancellationToken,
    grace: Duration,
    mut on_chunk: F,
) -> Result<i32>
where
    F: FnMut(OutputChunk) + Send,
{
    if cancel.is_cancelled() {
        return Err(LanghostError::Cancelled(format!(
            "'{}' not started",
            spec.program
        )));
    }

    tracing::debug!("spawning `{}` in {:?}", spec.display(), spec.cwd);
    let mut child = spec.spawn()?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        forward(stdout, tx.clone(), OutputChunk::Stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        forward(stderr, tx.clone(), OutputChunk::Stderr);
    }
    drop(tx);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                terminate(&mut child, grace).await;
                return Err(LanghostError::Cancelled(format!("'{}' stopped", spec.program)));
            }
            chunk = rx.recv() => match chunk {
                Some(chunk) => on_chunk(chunk),
                None => break,
            },
        }
    }

    let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            terminate(&mut child, grace).await;
            return Err(LanghostError::Cancelled(format!("'{}' stopped", spec.program)));
        }
        status = child.wait() => status?,
    };

    let code = status.code().unwrap_or(-1);
    tracing::debug!("`{}` exited with {}", spec.program, code);
    Ok(code)
}

/// Run a tool and capture everything it printed.
pub async fn run_captured(
    spec: &ProcessSpec,
    cancel: &CancellationToken,
    grace: Duration,
) -> Result<(i32, Vec<u8>, Vec<u8>)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = run_streaming(spec, cancel, grace, |chunk| match chunk {
        OutputChunk::Stdout(b) => stdout.extend_from_slice(&b),
        OutputChunk::Stderr(b) => stderr.extend_from_slice(&b),
    })
    .await?;
    Ok((code, stdout, stderr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec::new("sh", std::env::temp_dir()).args(["-c", script])
    }

    #[tokio::test]
    async fn captures_both_streams_and_exit_code() {
        let cancel = CancellationToken::new();
        let (code, out, err) = run_captured(
            &sh("echo out; echo err >&2; exit 3"),
            &cancel,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(code, 3);
        assert_eq!(out, b"out\n");
        assert_eq!(err, b"err\n");
    }

    #[tokio::test]
    async fn passes_environment() {
        let cancel = CancellationToken::new();
        let spec = sh("printf %s \"$GREETING\"").env("GREETING", "hello");
        let (_, out, _) = run_captured(&spec, &cancel, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn missing_binary_is_an_execution_fault() {
        let cancel = CancellationToken::new();
        let spec = ProcessSpec::new("definitely-not-a-real-tool-xyz", std::env::temp_dir());
        let err = run_captured(&spec, &cancel, Duration::from_secs(1)).await;
        assert!(matches!(err, Err(LanghostError::Execution(_))));
    }

    #[tokio::test]
    async fn cancellation_stops_the_child_promptly() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = run_captured(&sh("exec sleep 30"), &cancel, Duration::from_millis(500)).await;
        assert!(matches!(result, Err(LanghostError::Cancelled(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn already_cancelled_never_spawns() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_captured(&sh("exit 0"), &cancel, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(LanghostError::Cancelled(_))));
    }
}
