//! Language session
//!
//! A `LanguageSession` is the only stateful object in the adapter. It owns
//! the handshake lifecycle and the cancellation token, folds legacy request
//! fields into a `ProgramInfo`, validates inputs, and then hands canonical
//! requests to the `LanguageRuntime` behind it.

pub mod locks;

pub use locks::ProgramLocks;

use crate::process::ChunkStream;
use crate::protocol::{
    AboutRequest, AboutResponse, GeneratePackageRequest, GeneratePackageResponse,
    GenerateProgramRequest, GenerateProgramResponse, GenerateProjectRequest,
    GenerateProjectResponse, GetProgramDependenciesRequest, GetProgramDependenciesResponse,
    GetRequiredPackagesRequest, GetRequiredPackagesResponse, GetRequiredPluginsRequest,
    GetRequiredPluginsResponse, InstallDependenciesRequest, InstallDependenciesResponse,
    LanguageHandshakeRequest, LinkRequest, PackRequest, PackResponse, PluginInfo, ProgramInfo,
    ProgramTarget, RunPluginRequest, RunPluginResponse, RunRequest, RunResponse,
    RuntimeOptionsRequest, RuntimeOptionsResponse,
};
use crate::runtime::{CallContext, LanguageRuntime};
use crate::{LanghostError, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Replacement for secret config values in anything sent back to the engine
pub const REDACTED: &str = "[secret]";

pub type SessionId = String;

pub fn generate_session_id() -> SessionId {
    format!("ses-{:08x}", rand::random::<u32>())
}

/// What the engine told us at Handshake
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInfo {
    pub engine_address: String,
    pub root_directory: Option<String>,
    pub program_directory: Option<String>,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Waiting for Handshake
    Created,
    /// Handshake done; every call is accepted
    Active(EngineInfo),
    /// Server shut down
    Terminated,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Active(_) => "active",
            SessionState::Terminated => "terminated",
        }
    }
}

pub struct LanguageSession {
    pub id: SessionId,
    runtime: Arc<dyn LanguageRuntime>,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
    locks: ProgramLocks,
}

impl LanguageSession {
    pub fn new(runtime: Arc<dyn LanguageRuntime>) -> Self {
        let id = generate_session_id();
        tracing::debug!("session {} created for {} runtime", id, runtime.name());
        Self {
            id,
            runtime,
            state: Mutex::new(SessionState::Created),
            cancel: CancellationToken::new(),
            locks: ProgramLocks::new(),
        }
    }

    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Context for a call, or a sequence error if the session can't take it.
    fn active(&self, method: &str) -> Result<CallContext> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*state {
            SessionState::Active(engine) => Ok(CallContext {
                engine_address: engine.engine_address.clone(),
                cancel: self.cancel.clone(),
            }),
            SessionState::Created => Err(LanghostError::ProtocolSequence(format!(
                "{} called before Handshake",
                method
            ))),
            SessionState::Terminated => Err(LanghostError::ProtocolSequence(format!(
                "{} called on a terminated session",
                method
            ))),
        }
    }

    pub async fn handshake(&self, req: LanguageHandshakeRequest) -> Result<()> {
        if req.engine_address.trim().is_empty() {
            return Err(LanghostError::Validation(
                "handshake requires an engine address".to_string(),
            ));
        }
        if let Some(dir) = &req.program_directory {
            if !Path::new(dir).is_dir() {
                return Err(LanghostError::Validation(format!(
                    "program directory '{}' does not exist",
                    dir
                )));
            }
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*state {
            SessionState::Created => {
                tracing::info!(
                    "session {} connected to engine at {}",
                    self.id,
                    req.engine_address
                );
                *state = SessionState::Active(EngineInfo {
                    engine_address: req.engine_address,
                    root_directory: req.root_directory,
                    program_directory: req.program_directory,
                    connected_at: Utc::now(),
                });
                Ok(())
            }
            other => Err(LanghostError::ProtocolSequence(format!(
                "Handshake received in {} session",
                other.name()
            ))),
        }
    }

    pub async fn required_plugins(
        &self,
        req: GetRequiredPluginsRequest,
    ) -> Result<GetRequiredPluginsResponse> {
        self.active("GetRequiredPlugins")?;
        let info = resolve(ProgramTarget::from_fields(
            req.info,
            &req.project,
            &req.pwd,
            &req.program,
        ))?;
        let _guard = self.locks.lock(&info).await;
        let plugins = self.runtime.required_plugins(&info).await?;
        Ok(GetRequiredPluginsResponse { plugins })
    }

    pub async fn required_packages(
        &self,
        req: GetRequiredPackagesRequest,
    ) -> Result<GetRequiredPackagesResponse> {
        self.active("GetRequiredPackages")?;
        let info = resolve(ProgramTarget::from_fields(req.info, "", "", ""))?;
        let _guard = self.locks.lock(&info).await;
        let mut packages = self.runtime.required_packages(&info).await?;
        packages.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
        packages.dedup_by(|a, b| a.name == b.name && a.version == b.version);
        Ok(GetRequiredPackagesResponse { packages })
    }

    pub async fn program_dependencies(
        &self,
        req: GetProgramDependenciesRequest,
    ) -> Result<GetProgramDependenciesResponse> {
        self.active("GetProgramDependencies")?;
        let info = resolve(ProgramTarget::from_fields(
            req.info,
            &req.project,
            &req.pwd,
            &req.program,
        ))?;
        let _guard = self.locks.lock(&info).await;
        let mut dependencies = self
            .runtime
            .program_dependencies(&info, req.transitive_dependencies)
            .await?;
        dependencies.sort();
        dependencies.dedup();
        Ok(GetProgramDependenciesResponse { dependencies })
    }

    pub async fn run(&self, req: RunRequest) -> Result<RunResponse> {
        let ctx = self.active("Run")?;
        let info = {
            let target =
                ProgramTarget::from_fields(req.info.clone(), &req.project, &req.pwd, &req.program);
            let info = resolve(target)?;
            let _guard = self.locks.lock(&info).await;
            validate_run_config(&req)?;
            info
        };

        if ctx.is_cancelled() {
            tracing::info!("run of {} skipped: session cancelled", req.project);
            return Ok(RunResponse::bail());
        }

        tracing::info!(
            "run {}/{} (dry_run={}) in {}",
            req.project,
            req.stack,
            req.dry_run,
            info.program_directory
        );
        let outcome = self.runtime.run(&info, &req, &ctx).await;

        let response = match outcome {
            Err(e @ (LanghostError::Validation(_) | LanghostError::ProtocolSequence(_))) => {
                return Err(e);
            }
            _ if ctx.is_cancelled() => RunResponse::bail(),
            Ok(response) => response,
            Err(LanghostError::Cancelled(_)) => RunResponse::bail(),
            Err(e) => RunResponse::failed(e.to_string()),
        };

        if response.is_fresh_failure() {
            tracing::warn!("run of {} failed", req.project);
        }
        Ok(redact_secrets(response, &req))
    }

    pub async fn plugin_info(&self) -> Result<PluginInfo> {
        self.active("GetPluginInfo")?;
        self.runtime.plugin_info().await
    }

    pub async fn install_dependencies(
        &self,
        req: InstallDependenciesRequest,
    ) -> Result<ChunkStream<InstallDependenciesResponse>> {
        let ctx = self.active("InstallDependencies")?;
        let info = resolve(ProgramTarget::from_fields(
            req.info.clone(),
            "",
            &req.directory,
            "",
        ))?;
        if ctx.is_cancelled() {
            return Ok(ChunkStream::failed(LanghostError::Cancelled(
                "session cancelled before install started".to_string(),
            )));
        }
        let _guard = self.locks.lock(&info).await;
        self.runtime.install_dependencies(&info, &req, &ctx).await
    }

    pub async fn runtime_options(
        &self,
        req: RuntimeOptionsRequest,
    ) -> Result<RuntimeOptionsResponse> {
        self.active("RuntimeOptionsPrompts")?;
        let info = resolve(ProgramTarget::from_fields(req.info, "", "", ""))?;
        let prompts = self.runtime.runtime_options(&info).await?;
        for prompt in &prompts {
            prompt.validate()?;
        }
        Ok(RuntimeOptionsResponse { prompts })
    }

    pub async fn about(&self, req: AboutRequest) -> Result<AboutResponse> {
        self.active("About")?;
        let info = match req.info {
            Some(info) => resolve(ProgramTarget::Info(info))?,
            None => ProgramInfo::new(std::env::current_dir()?.display().to_string()),
        };
        self.runtime.about(&info).await
    }

    pub async fn run_plugin(
        &self,
        req: RunPluginRequest,
    ) -> Result<ChunkStream<RunPluginResponse>> {
        let ctx = self.active("RunPlugin")?;
        let info = resolve(ProgramTarget::from_fields(
            req.info.clone(),
            "",
            &req.pwd,
            &req.program,
        ))?;
        for entry in &req.env {
            if !entry.contains('=') {
                return Err(LanghostError::Validation(format!(
                    "plugin environment entry '{}' is not KEY=VALUE",
                    entry
                )));
            }
        }
        if ctx.is_cancelled() {
            return Ok(ChunkStream::failed(LanghostError::Cancelled(
                "session cancelled before plugin started".to_string(),
            )));
        }
        self.runtime.run_plugin(&info, &req, &ctx).await
    }

    pub async fn generate_program(
        &self,
        req: GenerateProgramRequest,
    ) -> Result<GenerateProgramResponse> {
        self.active("GenerateProgram")?;
        self.runtime.generate_program(&req).await
    }

    pub async fn generate_project(
        &self,
        req: GenerateProjectRequest,
    ) -> Result<GenerateProjectResponse> {
        self.active("GenerateProject")?;
        require_dir("source directory", &req.source_directory)?;
        require_path("target directory", &req.target_directory)?;
        self.runtime.generate_project(&req).await
    }

    pub async fn generate_package(
        &self,
        req: GeneratePackageRequest,
    ) -> Result<GeneratePackageResponse> {
        self.active("GeneratePackage")?;
        require_path("package directory", &req.directory)?;
        self.runtime.generate_package(&req).await
    }

    pub async fn pack(&self, req: PackRequest) -> Result<PackResponse> {
        self.active("Pack")?;
        require_dir("package directory", &req.package_directory)?;
        require_path("destination directory", &req.destination_directory)?;
        self.runtime.pack(&req).await
    }

    pub async fn link(&self, req: LinkRequest) -> Result<()> {
        self.active("Link")?;
        let info = match req.info {
            Some(info) => resolve(ProgramTarget::Info(info))?,
            None => {
                return Err(LanghostError::Validation(
                    "Link requires program info".to_string(),
                ));
            }
        };
        if req.local_dependencies.is_empty() {
            return Ok(());
        }
        let _guard = self.locks.lock(&info).await;
        self.runtime.link(&info, &req.local_dependencies).await
    }

    /// Signal cancellation to everything in flight. Repeat calls are no-ops.
    pub async fn cancel(&self) -> Result<()> {
        match self.active("Cancel") {
            Ok(_) => {}
            Err(_) if self.state() == SessionState::Terminated => return Ok(()),
            Err(e) => return Err(e),
        }
        if !self.cancel.is_cancelled() {
            tracing::info!("session {} cancelled", self.id);
            self.cancel.cancel();
        }
        Ok(())
    }

    /// Shut the session down. In-flight work is cancelled.
    pub fn terminate(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != SessionState::Terminated {
            tracing::info!("session {} terminated", self.id);
            *state = SessionState::Terminated;
        }
        drop(state);
        self.cancel.cancel();
    }
}

/// Resolve a target and check the program directory is usable.
fn resolve(target: ProgramTarget) -> Result<ProgramInfo> {
    if target.is_legacy() {
        tracing::debug!("request uses deprecated project/pwd/program fields");
    }
    let info = target.resolve()?;
    let dir = info.program_dir();
    if !dir.is_dir() {
        return Err(LanghostError::Validation(format!(
            "program directory '{}' does not exist",
            info.program_directory
        )));
    }
    std::fs::read_dir(dir).map_err(|e| {
        LanghostError::Validation(format!(
            "program directory '{}' is not readable: {}",
            info.program_directory, e
        ))
    })?;
    Ok(info)
}

fn require_path(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LanghostError::Validation(format!("{} is required", what)));
    }
    Ok(())
}

fn require_dir(what: &str, value: &str) -> Result<()> {
    require_path(what, value)?;
    if !Path::new(value).is_dir() {
        return Err(LanghostError::Validation(format!(
            "{} '{}' does not exist",
            what, value
        )));
    }
    Ok(())
}

fn validate_run_config(req: &RunRequest) -> Result<()> {
    if let Some(key) = req.config.keys().find(|k| k.trim().is_empty()) {
        return Err(LanghostError::Validation(format!(
            "config key '{}' is empty",
            key
        )));
    }
    for key in &req.config_secret_keys {
        if !req.config.contains_key(key) {
            return Err(LanghostError::Validation(format!(
                "secret key '{}' is not a config key",
                key
            )));
        }
    }
    Ok(())
}

fn redact_secrets(mut response: RunResponse, req: &RunRequest) -> RunResponse {
    let mut secrets: Vec<&str> = req
        .config_secret_keys
        .iter()
        .filter_map(|key| req.config.get(key))
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .collect();
    // Longest first so a secret containing another is replaced whole
    secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
    for secret in secrets {
        if response.error.contains(secret) {
            response.error = response.error.replace(secret, REDACTED);
        }
    }
    response
}
