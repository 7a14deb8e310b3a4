//! Dependency installation
//!
//! An install is a short list of tool invocations chosen by the program's
//! toolchain. Steps run one after another; the first failing step ends the
//! stream with `InstallFailed`.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::options::{venv_python, PythonOptions};
use super::requirements::REQUIREMENTS_FILE;
use crate::config::{AppConfig, Toolchain};
use crate::process::{self, chunk_channel, pty, ChunkSender, ChunkStream, OutputChunk, ProcessSpec};
use crate::protocol::{InstallDependenciesRequest, InstallDependenciesResponse, ProgramInfo};
use crate::{LanghostError, Result};

const PYTHON_VERSION_FILE: &str = ".python-version";

/// Tool invocations for an install, in order
pub fn install_plan(
    config: &AppConfig,
    opts: &PythonOptions,
    info: &ProgramInfo,
    req: &InstallDependenciesRequest,
) -> Vec<ProcessSpec> {
    let dir = info.program_dir();
    let mut steps = Vec::new();

    if req.use_language_version_tools && dir.join(PYTHON_VERSION_FILE).is_file() {
        steps.push(ProcessSpec::new("pyenv", dir).args(["install", "--skip-existing"]));
    }

    match opts.toolchain {
        Toolchain::Pip => {
            // A plugin keeps its environment inside its own directory
            let venv = if req.is_plugin {
                dir.join(&config.default_virtualenv)
            } else {
                opts.venv_dir(info, config)
            };
            if !venv.exists() {
                let python = opts
                    .interpreter
                    .clone()
                    .unwrap_or_else(|| config.python_command.clone());
                steps.push(
                    ProcessSpec::new(python, dir)
                        .args(["-m", "venv"])
                        .arg(venv.display().to_string()),
                );
            }
            if dir.join(REQUIREMENTS_FILE).is_file() {
                steps.push(
                    ProcessSpec::new(venv_python(&venv).display().to_string(), dir)
                        .args(["-m", "pip", "install", "-r", REQUIREMENTS_FILE]),
                );
            }
        }
        Toolchain::Poetry => {
            steps.push(ProcessSpec::new("poetry", dir).args(["install", "--no-root"]));
        }
        Toolchain::Uv => {
            steps.push(ProcessSpec::new("uv", dir).arg("sync"));
        }
    }
    steps
}

fn chunk(output: OutputChunk) -> InstallDependenciesResponse {
    match output {
        OutputChunk::Stdout(stdout) => InstallDependenciesResponse {
            stdout,
            stderr: Vec::new(),
        },
        OutputChunk::Stderr(stderr) => InstallDependenciesResponse {
            stdout: Vec::new(),
            stderr,
        },
    }
}

/// Run the steps in the background and stream their output.
pub fn execute(
    steps: Vec<ProcessSpec>,
    is_terminal: bool,
    cancel: CancellationToken,
    grace: Duration,
) -> ChunkStream<InstallDependenciesResponse> {
    let (tx, stream) = chunk_channel();
    tokio::spawn(async move {
        // Dropping the stream stops the running step
        let cancel = cancel.child_token();
        let watcher = tokio::spawn({
            let tx = tx.clone();
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!("install output dropped, stopping");
                        cancel.cancel();
                    }
                    _ = cancel.cancelled() => {}
                }
            }
        });

        let result = run_steps(&steps, is_terminal, &cancel, grace, &tx).await;
        cancel.cancel();
        let _ = watcher.await;
        match result {
            Ok(()) => tracing::info!("install finished ({} steps)", steps.len()),
            Err(e) => tx.fail(e),
        }
    });
    stream
}

async fn run_steps(
    steps: &[ProcessSpec],
    is_terminal: bool,
    cancel: &CancellationToken,
    grace: Duration,
    tx: &ChunkSender<InstallDependenciesResponse>,
) -> Result<()> {
    for step in steps {
        tracing::info!("install: {}", step.display());
        let sink = tx.clone();
        let forward = move |output: OutputChunk| {
            sink.send(chunk(output));
        };
        let code = if is_terminal {
            pty::run_in_pty(step, cancel, forward).await?
        } else {
            process::run_streaming(step, cancel, grace, forward).await?
        };
        if code != 0 {
            return Err(LanghostError::InstallFailed(format!(
                "`{}` exited with code {}",
                step.display(),
                code
            )));
        }
    }
    Ok(())
}
