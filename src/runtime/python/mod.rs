//! Python runtime adapter
//!
//! Programs are Python modules run by an interpreter, usually from a
//! virtualenv next to the program. Dependencies come from pip-style
//! manifests and the virtualenv's installed distributions.

pub mod codegen;
pub mod deps;
pub mod install;
pub mod link;
pub mod options;
pub mod pack;
pub mod requirements;
pub mod run;
pub mod site_packages;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{CallContext, LanguageRuntime};
use crate::config::{AppConfig, Toolchain};
use crate::process::{self, ChunkStream, ProcessSpec};
use crate::protocol::{
    AboutResponse, DependencyInfo, GeneratePackageRequest, GeneratePackageResponse,
    GenerateProgramRequest, GenerateProgramResponse, GenerateProjectRequest,
    GenerateProjectResponse, InstallDependenciesRequest, InstallDependenciesResponse,
    PackRequest, PackResponse, PackageDependency, ProgramInfo, RunPluginRequest,
    RunPluginResponse, RunRequest, RunResponse, RuntimeOptionPrompt, RuntimeOptionType,
    RuntimeOptionValue,
};
use crate::{LanghostError, Result};
use deps::DependencyView;
use options::PythonOptions;

pub struct PythonRuntime {
    config: AppConfig,
}

impl PythonRuntime {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    fn options(&self, info: &ProgramInfo) -> Result<PythonOptions> {
        PythonOptions::from_info(info, &self.config)
    }

    fn dependency_view(&self, info: &ProgramInfo) -> Result<DependencyView> {
        let opts = self.options(info)?;
        DependencyView::load(info.program_dir(), &opts.venv_dir(info, &self.config))
    }
}

/// `Python 3.12.1` -> `3.12.1`
fn parse_version(output: &str) -> String {
    let line = output.lines().next().unwrap_or_default().trim();
    line.strip_prefix("Python ").unwrap_or(line).to_string()
}

#[async_trait]
impl LanguageRuntime for PythonRuntime {
    fn name(&self) -> &'static str {
        "python"
    }

    async fn about(&self, info: &ProgramInfo) -> Result<AboutResponse> {
        let opts = self.options(info)?;
        let interpreter = opts.interpreter(info, &self.config);
        let spec = ProcessSpec::new(&interpreter, info.program_dir()).args(["--version"]);
        let (code, stdout, stderr) =
            process::run_captured(&spec, &CancellationToken::new(), self.config.cancel_grace)
                .await
                .map_err(|e| {
                    LanghostError::Execution(format!("cannot run {}: {}", interpreter, e))
                })?;
        if code != 0 {
            return Err(LanghostError::Execution(format!(
                "{} --version exited with code {}",
                interpreter, code
            )));
        }
        // Python 2 and some builds print the version on stderr
        let text = if stdout.is_empty() { stderr } else { stdout };

        let mut metadata = BTreeMap::new();
        metadata.insert("toolchain".to_string(), opts.toolchain.to_string());
        metadata.insert(
            "virtualenv".to_string(),
            opts.venv_dir(info, &self.config).display().to_string(),
        );
        Ok(AboutResponse {
            executable: interpreter,
            version: parse_version(&String::from_utf8_lossy(&text)),
            metadata,
        })
    }

    async fn required_packages(&self, info: &ProgramInfo) -> Result<Vec<PackageDependency>> {
        self.dependency_view(info)?.packages()
    }

    async fn program_dependencies(
        &self,
        info: &ProgramInfo,
        transitive: bool,
    ) -> Result<Vec<DependencyInfo>> {
        Ok(self.dependency_view(info)?.dependencies(transitive))
    }

    async fn runtime_options(&self, info: &ProgramInfo) -> Result<Vec<RuntimeOptionPrompt>> {
        let opts = self.options(info)?;
        let mut prompts = Vec::new();
        if info.option_str("toolchain").is_none_or(str::is_empty) {
            prompts.push(
                RuntimeOptionPrompt::new(
                    "toolchain",
                    "The toolchain to use for installing dependencies and running the program",
                    RuntimeOptionType::String,
                )
                .with_choices(
                    Toolchain::ALL
                        .iter()
                        .map(|t| RuntimeOptionValue::string(t.as_str()))
                        .collect(),
                )
                .with_default(RuntimeOptionValue::string(Toolchain::Pip.as_str())),
            );
        }
        if opts.toolchain == Toolchain::Pip && opts.virtualenv.is_none() {
            prompts.push(
                RuntimeOptionPrompt::new(
                    "virtualenv",
                    "The path to a virtual environment to use",
                    RuntimeOptionType::String,
                )
                .with_default(RuntimeOptionValue::string(&self.config.default_virtualenv)),
            );
        }
        Ok(prompts)
    }

    async fn run(
        &self,
        info: &ProgramInfo,
        req: &RunRequest,
        ctx: &CallContext,
    ) -> Result<RunResponse> {
        let opts = self.options(info)?;
        run::run_program(&self.config, &opts, info, req, ctx).await
    }

    async fn install_dependencies(
        &self,
        info: &ProgramInfo,
        req: &InstallDependenciesRequest,
        ctx: &CallContext,
    ) -> Result<ChunkStream<InstallDependenciesResponse>> {
        let opts = self.options(info)?;
        let steps = install::install_plan(&self.config, &opts, info, req);
        tracing::info!(
            "installing dependencies for {} with {} ({} steps)",
            info.program_dir().display(),
            opts.toolchain,
            steps.len()
        );
        Ok(install::execute(
            steps,
            req.is_terminal,
            ctx.cancel.clone(),
            self.config.cancel_grace,
        ))
    }

    async fn run_plugin(
        &self,
        info: &ProgramInfo,
        req: &RunPluginRequest,
        ctx: &CallContext,
    ) -> Result<ChunkStream<RunPluginResponse>> {
        let opts = self.options(info)?;
        Ok(run::run_plugin(&self.config, &opts, info, req, ctx))
    }

    async fn generate_program(
        &self,
        req: &GenerateProgramRequest,
    ) -> Result<GenerateProgramResponse> {
        Ok(codegen::generate_program(req))
    }

    async fn generate_project(
        &self,
        req: &GenerateProjectRequest,
    ) -> Result<GenerateProjectResponse> {
        let diags = codegen::generate_project(&self.config, req)?;
        Ok(GenerateProjectResponse {
            diagnostics: diags.into_vec(),
        })
    }

    async fn generate_package(
        &self,
        req: &GeneratePackageRequest,
    ) -> Result<GeneratePackageResponse> {
        let diags = codegen::generate_package(req)?;
        Ok(GeneratePackageResponse {
            diagnostics: diags.into_vec(),
        })
    }

    async fn pack(&self, req: &PackRequest) -> Result<PackResponse> {
        let package_dir = Path::new(&req.package_directory).to_path_buf();
        let destination = Path::new(&req.destination_directory).to_path_buf();
        let artifact = tokio::task::spawn_blocking(move || pack::pack(&package_dir, &destination))
            .await
            .map_err(|e| LanghostError::Execution(format!("pack task failed: {}", e)))??;
        Ok(PackResponse {
            artifact_path: artifact.display().to_string(),
        })
    }

    async fn link(
        &self,
        info: &ProgramInfo,
        local_dependencies: &BTreeMap<String, String>,
    ) -> Result<()> {
        let opts = self.options(info)?;
        link::link(
            info.program_dir(),
            &opts.venv_dir(info, &self.config),
            local_dependencies,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::site_packages::fixtures::{install, mark_plugin};
    use super::*;

    fn program(dir: &tempfile::TempDir) -> ProgramInfo {
        ProgramInfo::new(dir.path().display().to_string())
    }

    fn runtime() -> PythonRuntime {
        PythonRuntime::new(AppConfig::default())
    }

    #[test]
    fn version_output_is_trimmed() {
        assert_eq!(parse_version("Python 3.12.1\n"), "3.12.1");
        assert_eq!(parse_version("3.11.0"), "3.11.0");
    }

    #[tokio::test]
    async fn prompts_ask_only_for_missing_options() {
        let tmp = tempfile::tempdir().unwrap();
        let info = program(&tmp);
        let prompts = runtime().runtime_options(&info).await.unwrap();
        let keys: Vec<_> = prompts.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, ["toolchain", "virtualenv"]);
        for prompt in &prompts {
            prompt.validate().unwrap();
        }
        assert_eq!(prompts[0].choices.len(), 3);

        let info = program(&tmp).with_option("toolchain", "uv");
        assert!(runtime().runtime_options(&info).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_toolchain_is_a_validation_error() {
        let tmp = tempfile::tempdir().unwrap();
        let info = program(&tmp).with_option("toolchain", "conda");
        let err = runtime().program_dependencies(&info, false).await.unwrap_err();
        assert!(matches!(err, LanghostError::Validation(_)));
    }

    #[tokio::test]
    async fn about_reports_interpreter_version() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = program(&tmp).with_option("interpreter", "/nonexistent/python");
        let err = runtime().about(&missing).await.unwrap_err();
        assert!(matches!(err, LanghostError::Execution(_)));

        let script = tmp.path().join("fake-python");
        std::fs::write(&script, "#!/bin/sh\necho 'Python 3.12.4'\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let info = program(&tmp).with_option("interpreter", script.display().to_string());
        let about = runtime().about(&info).await.unwrap();
        assert_eq!(about.version, "3.12.4");
        assert_eq!(about.metadata["toolchain"], "pip");
        assert_eq!(about.executable, script.display().to_string());
    }

    #[tokio::test]
    async fn packages_and_plugins_come_from_the_virtualenv() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("requirements.txt"), "langhost-aws\n").unwrap();
        let venv = tmp.path().join("venv");
        install(&venv, "langhost-aws", "6.0.0", &["langhost"]);
        install(&venv, "langhost", "3.1.0", &[]);
        mark_plugin(&venv, "langhost_aws", r#"{"resource": true, "name": "aws"}"#);

        let info = program(&tmp);
        let packages = runtime().required_packages(&info).await.unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "aws");
        assert_eq!(packages[0].version, "6.0.0");

        let plugins = runtime().required_plugins(&info).await.unwrap();
        assert_eq!(plugins[0].name, "aws");

        let deps = runtime().program_dependencies(&info, true).await.unwrap();
        let names: Vec<_> = deps.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["langhost", "langhost-aws"]);
    }
}
