//! Program and plugin execution

use std::time::Duration;

use super::options::{PythonOptions, Typechecker};
use crate::config::AppConfig;
use crate::process::{
    self, chunk_channel, ChunkStream, OutputChunk, ProcessSpec, RingBuffer, RunLogger,
};
use crate::protocol::{ProgramInfo, RunPluginRequest, RunPluginResponse, RunRequest, RunResponse};
use crate::runtime::CallContext;
use crate::{LanghostError, Result};

/// Exit code a program uses after it already reported its error to the engine
pub const BAIL_EXIT_CODE: i32 = 32;

const DEBUGPY_PORT: &str = "5678";

/// Environment handed to the program so its SDK can find its configuration
/// and the engine.
pub fn program_env(
    info: &ProgramInfo,
    req: &RunRequest,
    engine_address: &str,
) -> Result<Vec<(String, String)>> {
    let mut env = vec![
        ("LANGHOST_PROJECT".to_string(), req.project.clone()),
        ("LANGHOST_STACK".to_string(), req.stack.clone()),
        ("LANGHOST_ORGANIZATION".to_string(), req.organization.clone()),
        ("LANGHOST_CONFIG".to_string(), serde_json::to_string(&req.config)?),
        (
            "LANGHOST_CONFIG_SECRET_KEYS".to_string(),
            serde_json::to_string(&req.config_secret_keys)?,
        ),
        ("LANGHOST_DRY_RUN".to_string(), req.dry_run.to_string()),
        ("LANGHOST_PARALLEL".to_string(), req.parallel.to_string()),
        ("LANGHOST_MONITOR".to_string(), req.monitor_address.clone()),
        ("LANGHOST_ENGINE".to_string(), engine_address.to_string()),
        (
            "LANGHOST_ROOT_DIRECTORY".to_string(),
            info.root_dir().display().to_string(),
        ),
    ];
    if !req.loader_target.is_empty() {
        env.push(("LANGHOST_LOADER_TARGET".to_string(), req.loader_target.clone()));
    }
    Ok(env)
}

fn entry_point(info: &ProgramInfo) -> &str {
    if info.entry_point.is_empty() {
        "."
    } else {
        &info.entry_point
    }
}

fn debugger_args() -> [&'static str; 6] {
    [
        "-m",
        "debugpy",
        "--listen",
        DEBUGPY_PORT,
        "--wait-for-client",
        "--log-to-stderr",
    ]
}

async fn typecheck(
    checker: Typechecker,
    interpreter: &str,
    info: &ProgramInfo,
    ctx: &CallContext,
    grace: Duration,
) -> Result<()> {
    let spec = ProcessSpec::new(interpreter, info.program_dir())
        .args(["-m", checker.command(), entry_point(info)]);
    tracing::info!("typechecking with {}", checker.command());
    let (code, stdout, stderr) = process::run_captured(&spec, &ctx.cancel, grace).await?;
    if code != 0 {
        let mut output = String::from_utf8_lossy(&stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&stderr));
        return Err(LanghostError::Execution(format!(
            "{} failed with exit code {}:\n{}",
            checker.command(),
            code,
            output.trim_end()
        )));
    }
    Ok(())
}

/// Run the program to completion and translate its exit status.
pub async fn run_program(
    config: &AppConfig,
    opts: &PythonOptions,
    info: &ProgramInfo,
    req: &RunRequest,
    ctx: &CallContext,
) -> Result<RunResponse> {
    let interpreter = opts.interpreter(info, config);
    let env = program_env(info, req, &ctx.engine_address)?;

    if let Some(checker) = opts.typechecker {
        typecheck(checker, &interpreter, info, ctx, config.cancel_grace).await?;
    }

    let mut spec = ProcessSpec::new(&interpreter, info.program_dir());
    if req.attach_debugger {
        spec = spec.args(debugger_args());
    }
    spec = spec.arg(entry_point(info)).args(req.args.iter().cloned());
    for (key, value) in env {
        spec = spec.env(key, value);
    }

    let mut logger = match &config.log_dir {
        Some(dir) => Some(RunLogger::create(dir, &req.stack)?),
        None => None,
    };
    let mut tail = RingBuffer::new(config.stderr_tail_bytes);

    let code = process::run_streaming(&spec, &ctx.cancel, config.cancel_grace, |chunk| {
        if let Some(logger) = logger.as_mut() {
            if let Err(e) = logger.write(chunk.source(), chunk.bytes()) {
                tracing::warn!("run log write failed: {}", e);
            }
        }
        match chunk {
            OutputChunk::Stdout(bytes) => {
                tracing::debug!("program: {}", String::from_utf8_lossy(&bytes).trim_end());
            }
            OutputChunk::Stderr(bytes) => tail.write(&bytes),
        }
    })
    .await?;

    if let Some(logger) = logger.as_mut() {
        logger.flush()?;
        tracing::debug!("run output logged to {}", logger.path().display());
    }

    Ok(match code {
        0 => RunResponse::success(),
        BAIL_EXIT_CODE => RunResponse::bail(),
        code => {
            let stderr = tail.read_text();
            let stderr = stderr.trim();
            if stderr.is_empty() {
                RunResponse::failed(format!("program exited with code {}", code))
            } else {
                RunResponse::failed(format!(
                    "program exited with code {}:\n{}",
                    code, stderr
                ))
            }
        }
    })
}

/// Start a plugin and stream its output, then its exit code.
pub fn run_plugin(
    config: &AppConfig,
    opts: &PythonOptions,
    info: &ProgramInfo,
    req: &RunPluginRequest,
    ctx: &CallContext,
) -> ChunkStream<RunPluginResponse> {
    let interpreter = opts.interpreter(info, config);
    let cwd = if req.pwd.is_empty() {
        info.program_dir().to_path_buf()
    } else {
        std::path::PathBuf::from(&req.pwd)
    };

    let mut spec = ProcessSpec::new(&interpreter, &cwd);
    if req.attach_debugger {
        spec = spec.args(debugger_args());
    }
    spec = spec
        .arg(info.program_dir().join(entry_point(info)).display().to_string())
        .args(req.args.iter().cloned());
    for entry in &req.env {
        if let Some((key, value)) = entry.split_once('=') {
            spec = spec.env(key, value);
        }
    }

    let (tx, stream) = chunk_channel();
    let cancel = ctx.cancel.clone();
    let grace = config.cancel_grace;
    let label = format!("{} plugin {}", req.kind, req.name);
    tokio::spawn(async move {
        let out = tx.clone();
        let result = process::run_streaming(&spec, &cancel, grace, |chunk| {
            let message = match chunk {
                OutputChunk::Stdout(bytes) => RunPluginResponse::Stdout(bytes),
                OutputChunk::Stderr(bytes) => RunPluginResponse::Stderr(bytes),
            };
            out.send(message);
        })
        .await;
        match result {
            Ok(code) => {
                tracing::debug!("{} exited with {}", label, code);
                tx.send(RunPluginResponse::Exitcode(code));
            }
            Err(e) => tx.fail(e),
        }
    });
    stream
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn sh_program(dir: &Path, script: &str) -> (AppConfig, PythonOptions, ProgramInfo) {
        std::fs::write(dir.join("main.sh"), script).unwrap();
        let config = AppConfig {
            python_command: "sh".to_string(),
            cancel_grace: Duration::from_millis(500),
            ..Default::default()
        };
        let info = ProgramInfo::new(dir.display().to_string()).with_entry_point("main.sh");
        let opts = PythonOptions::from_info(&info, &config).unwrap();
        (config, opts, info)
    }

    fn ctx() -> CallContext {
        CallContext {
            engine_address: "127.0.0.1:7000".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    fn request() -> RunRequest {
        RunRequest {
            project: "proj".to_string(),
            stack: "dev".to_string(),
            config: BTreeMap::from([("proj:size".to_string(), "3".to_string())]),
            dry_run: true,
            parallel: 4,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn exit_zero_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let (config, opts, info) = sh_program(dir.path(), "echo hello\n");
        let resp = run_program(&config, &opts, &info, &request(), &ctx()).await.unwrap();
        assert_eq!(resp, RunResponse::success());
    }

    #[tokio::test]
    async fn configuration_reaches_the_program() {
        let dir = tempfile::tempdir().unwrap();
        let (config, opts, info) = sh_program(
            dir.path(),
            "[ \"$LANGHOST_DRY_RUN\" = true ] || exit 1\n\
             [ \"$LANGHOST_PARALLEL\" = 4 ] || exit 2\n\
             [ \"$LANGHOST_ENGINE\" = 127.0.0.1:7000 ] || exit 3\n\
             [ \"$LANGHOST_CONFIG\" = '{\"proj:size\":\"3\"}' ] || exit 4\n\
             [ \"$1\" = extra ] || exit 5\n",
        );
        let mut req = request();
        req.args = vec!["extra".to_string()];
        let resp = run_program(&config, &opts, &info, &req, &ctx()).await.unwrap();
        assert_eq!(resp, RunResponse::success());
    }

    #[tokio::test]
    async fn failure_carries_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        let (config, opts, info) = sh_program(
            dir.path(),
            "echo 'registering resources'\nprintf '\\033[31mValueError: bad size\\033[0m\\n' >&2\nexit 1\n",
        );
        let resp = run_program(&config, &opts, &info, &request(), &ctx()).await.unwrap();
        assert!(!resp.bail);
        assert!(resp.error.contains("ValueError: bad size"), "{}", resp.error);
        assert!(!resp.error.contains('\u{1b}'));
    }

    #[tokio::test]
    async fn bail_exit_code_is_not_a_fresh_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (config, opts, info) = sh_program(dir.path(), "echo reported >&2\nexit 32\n");
        let resp = run_program(&config, &opts, &info, &request(), &ctx()).await.unwrap();
        assert_eq!(resp, RunResponse::bail());
    }

    #[tokio::test]
    async fn cancellation_stops_the_program() {
        let dir = tempfile::tempdir().unwrap();
        let (config, opts, info) = sh_program(dir.path(), "exec sleep 30\n");
        let ctx = ctx();
        let trigger = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        let result = run_program(&config, &opts, &info, &request(), &ctx).await;
        assert!(matches!(result, Err(LanghostError::Cancelled(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn output_is_logged_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        let (mut config, opts, info) = sh_program(dir.path(), "echo out\necho err >&2\n");
        config.log_dir = Some(logs.path().to_path_buf());
        run_program(&config, &opts, &info, &request(), &ctx()).await.unwrap();

        let entry = std::fs::read_dir(logs.path()).unwrap().next().unwrap().unwrap();
        assert!(entry.file_name().to_string_lossy().starts_with("dev-"));
        let log = std::fs::read_to_string(entry.path()).unwrap();
        assert!(log.contains("out"));
        assert!(log.contains("err"));
    }

    #[tokio::test]
    async fn plugin_streams_output_then_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let (config, opts, info) = sh_program(
            dir.path(),
            "printf %s \"$PLUGIN_MODE\"\nprintf oops >&2\nexit 7\n",
        );
        let req = RunPluginRequest {
            pwd: dir.path().display().to_string(),
            env: vec!["PLUGIN_MODE=serve".to_string()],
            kind: "resource".to_string(),
            name: "demo".to_string(),
            ..Default::default()
        };
        let chunks = run_plugin(&config, &opts, &info, &req, &ctx())
            .collect()
            .await
            .unwrap();
        assert!(chunks.contains(&RunPluginResponse::Stdout(b"serve".to_vec())));
        assert!(chunks.contains(&RunPluginResponse::Stderr(b"oops".to_vec())));
        assert_eq!(chunks.last(), Some(&RunPluginResponse::Exitcode(7)));
    }

    #[tokio::test]
    async fn plugin_spawn_failure_ends_the_stream_with_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut config, _, info) = sh_program(dir.path(), "exit 0\n");
        config.python_command = "definitely-not-a-python".to_string();
        let opts = PythonOptions::from_info(&info, &config).unwrap();
        let result = run_plugin(&config, &opts, &info, &RunPluginRequest::default(), &ctx())
            .collect()
            .await;
        assert!(matches!(result, Err(LanghostError::Execution(_))));
    }
}
