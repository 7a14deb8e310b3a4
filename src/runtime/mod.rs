//! Language runtime abstraction
//!
//! Every ecosystem the engine can drive is one `LanguageRuntime`. The session
//! in front of it handles sequencing, legacy request shapes, validation and
//! cancellation, so implementations only deal with canonical inputs.

pub mod python;

pub use python::PythonRuntime;

use crate::process::ChunkStream;
use crate::protocol::{
    AboutResponse, DependencyInfo, GeneratePackageRequest, GeneratePackageResponse,
    GenerateProgramRequest, GenerateProgramResponse, GenerateProjectRequest,
    GenerateProjectResponse, InstallDependenciesRequest, InstallDependenciesResponse,
    PackRequest, PackResponse, PackageDependency, PluginDependency, PluginInfo, ProgramInfo,
    RunPluginRequest, RunPluginResponse, RunRequest, RunResponse, RuntimeOptionPrompt,
};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Per-call facts the session hands to a runtime.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Engine callback address learned at Handshake
    pub engine_address: String,
    /// Session-wide cancellation signal
    pub cancel: CancellationToken,
}

impl CallContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
pub trait LanguageRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    async fn plugin_info(&self) -> Result<PluginInfo> {
        Ok(PluginInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    async fn about(&self, info: &ProgramInfo) -> Result<AboutResponse>;

    async fn required_packages(&self, info: &ProgramInfo) -> Result<Vec<PackageDependency>>;

    /// Plugins are whatever the required packages need to run.
    async fn required_plugins(&self, info: &ProgramInfo) -> Result<Vec<PluginDependency>> {
        let mut plugins: Vec<PluginDependency> = Vec::new();
        for package in self.required_packages(info).await? {
            let plugin = package.to_plugin();
            if !plugins
                .iter()
                .any(|p| p.name == plugin.name && p.version == plugin.version)
            {
                plugins.push(plugin);
            }
        }
        plugins.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
        Ok(plugins)
    }

    async fn program_dependencies(
        &self,
        info: &ProgramInfo,
        transitive: bool,
    ) -> Result<Vec<DependencyInfo>>;

    async fn runtime_options(&self, info: &ProgramInfo) -> Result<Vec<RuntimeOptionPrompt>>;

    async fn run(
        &self,
        info: &ProgramInfo,
        req: &RunRequest,
        ctx: &CallContext,
    ) -> Result<RunResponse>;

    async fn install_dependencies(
        &self,
        info: &ProgramInfo,
        req: &InstallDependenciesRequest,
        ctx: &CallContext,
    ) -> Result<ChunkStream<InstallDependenciesResponse>>;

    async fn run_plugin(
        &self,
        info: &ProgramInfo,
        req: &RunPluginRequest,
        ctx: &CallContext,
    ) -> Result<ChunkStream<RunPluginResponse>>;

    async fn generate_program(&self, req: &GenerateProgramRequest)
        -> Result<GenerateProgramResponse>;

    async fn generate_project(&self, req: &GenerateProjectRequest)
        -> Result<GenerateProjectResponse>;

    async fn generate_package(&self, req: &GeneratePackageRequest)
        -> Result<GeneratePackageResponse>;

    async fn pack(&self, req: &PackRequest) -> Result<PackResponse>;

    async fn link(
        &self,
        info: &ProgramInfo,
        local_dependencies: &BTreeMap<String, String>,
    ) -> Result<()>;
}
