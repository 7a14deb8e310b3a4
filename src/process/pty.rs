//! Running a tool inside a pseudo-terminal
//!
//! Installers only draw progress bars and colors when they believe they are
//! talking to a terminal. When the engine says its user is on a terminal we
//! give the tool one; its combined output is delivered as stdout chunks.

use crate::{LanghostError, Result};
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use std::io::Read;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{OutputChunk, ProcessSpec};

const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 120;

fn pty_err(e: impl std::fmt::Display) -> LanghostError {
    LanghostError::Pty(e.to_string())
}

/// Run a tool in a PTY to completion, forwarding output as it arrives.
pub async fn run_in_pty<F>(
    spec: &ProcessSpec,
    cancel: &CancellationToken,
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

    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: PTY_ROWS,
            cols: PTY_COLS,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(pty_err)?;

    let mut cmd = CommandBuilder::new(&spec.program);
    cmd.args(&spec.args);
    cmd.cwd(&spec.cwd);
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    tracing::debug!("spawning `{}` in a pty", spec.display());
    let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
        LanghostError::Execution(format!("failed to start '{}': {}", spec.program, e))
    })?;
    // The child holds the only slave handle now; EOF on the master follows its exit
    drop(pair.slave);

    let mut reader = pair.master.try_clone_reader().map_err(pty_err)?;
    let mut killer = child.clone_killer();

    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                // Linux reports EIO on the master once the slave side is gone
                Err(_) => break,
            }
        }
    });

    let mut waiter = tokio::task::spawn_blocking(move || child.wait());

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = killer.kill();
                return Err(LanghostError::Cancelled(format!("'{}' stopped", spec.program)));
            }
            chunk = rx.recv() => match chunk {
                Some(bytes) => on_chunk(OutputChunk::Stdout(bytes)),
                None => break,
            },
        }
    }

    let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let _ = killer.kill();
            return Err(LanghostError::Cancelled(format!("'{}' stopped", spec.program)));
        }
        joined = &mut waiter => joined
            .map_err(|e| LanghostError::Pty(e.to_string()))?
            .map_err(LanghostError::Io)?,
    };

    drop(pair.master);
    Ok(status.exit_code() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pty_output_arrives_as_stdout() {
        let cancel = CancellationToken::new();
        let spec = ProcessSpec::new("sh", std::env::temp_dir())
            .args(["-c", "printf 'tty-check'; exit 4"]);
        let mut seen = Vec::new();
        let code = run_in_pty(&spec, &cancel, |chunk| {
            assert!(matches!(chunk, OutputChunk::Stdout(_)));
            seen.extend_from_slice(chunk.bytes());
        })
        .await
        .unwrap();
        assert_eq!(code, 4);
        assert!(String::from_utf8_lossy(&seen).contains("tty-check"));
    }
}
