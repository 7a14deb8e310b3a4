//! Request and response records for every language runtime call.
//!
//! Field names follow the engine's schema, which mixes snake_case and a few
//! camelCase names (`dryRun`, `configSecretKeys`, `transitiveDependencies`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::diagnostic::Diagnostic;
use super::prompt::RuntimeOptionPrompt;

/// Free-form program options declared in the project file.
pub type ProgramOptions = serde_json::Map<String, serde_json::Value>;

/// Identifies a program instance: where it lives and how it starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramInfo {
    #[serde(default)]
    pub root_directory: String,
    #[serde(default)]
    pub program_directory: String,
    #[serde(default)]
    pub entry_point: String,
    #[serde(default)]
    pub options: ProgramOptions,
}

impl ProgramInfo {
    pub fn new(program_directory: impl Into<String>) -> Self {
        let program_directory = program_directory.into();
        Self {
            root_directory: program_directory.clone(),
            program_directory,
            entry_point: ".".to_string(),
            options: ProgramOptions::new(),
        }
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    pub fn with_option(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    pub fn program_dir(&self) -> &Path {
        Path::new(&self.program_directory)
    }

    /// Root directory, falling back to the program directory when unset
    pub fn root_dir(&self) -> PathBuf {
        if self.root_directory.is_empty() {
            PathBuf::from(&self.program_directory)
        } else {
            PathBuf::from(&self.root_directory)
        }
    }

    /// String option lookup; non-string values are ignored
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageHandshakeRequest {
    pub engine_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_directory: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDependency {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageParameterization {
    pub name: String,
    pub version: String,
    /// Provider-defined payload, base64 encoded
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDependency {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameterization: Option<PackageParameterization>,
}

impl PackageDependency {
    /// The plugin that has to be installed for this package to work.
    ///
    /// A parameterized package runs on its base provider, so the plugin
    /// carries the base name/version rather than the parameterized one.
    pub fn to_plugin(&self) -> PluginDependency {
        PluginDependency {
            name: self.name.clone(),
            kind: self.kind.clone(),
            version: self.version.clone(),
            server: self.server.clone(),
            checksums: self.checksums.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetRequiredPluginsRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub pwd: String,
    #[serde(default)]
    pub program: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ProgramInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetRequiredPluginsResponse {
    pub plugins: Vec<PluginDependency>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetRequiredPackagesRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ProgramInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetRequiredPackagesResponse {
    pub packages: Vec<PackageDependency>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetProgramDependenciesRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub pwd: String,
    #[serde(default)]
    pub program: String,
    #[serde(default, rename = "transitiveDependencies")]
    pub transitive_dependencies: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ProgramInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetProgramDependenciesResponse {
    pub dependencies: Vec<DependencyInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub stack: String,
    #[serde(default)]
    pub pwd: String,
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default, rename = "dryRun")]
    pub dry_run: bool,
    #[serde(default)]
    pub parallel: i32,
    #[serde(default)]
    pub monitor_address: String,
    #[serde(default, rename = "configSecretKeys")]
    pub config_secret_keys: Vec<String>,
    #[serde(default)]
    pub organization: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ProgramInfo>,
    #[serde(default)]
    pub loader_target: String,
    #[serde(default)]
    pub attach_debugger: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponse {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub bail: bool,
}

impl RunResponse {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            bail: false,
        }
    }

    pub fn bail() -> Self {
        Self {
            error: String::new(),
            bail: true,
        }
    }

    /// A failure the engine has not seen yet and must surface
    pub fn is_fresh_failure(&self) -> bool {
        !self.error.is_empty() && !self.bail
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginInfo {
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallDependenciesRequest {
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub is_terminal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ProgramInfo>,
    #[serde(default)]
    pub use_language_version_tools: bool,
    #[serde(default)]
    pub is_plugin: bool,
}

/// One chunk of installer output. Either side may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallDependenciesResponse {
    #[serde(default)]
    pub stdout: Vec<u8>,
    #[serde(default)]
    pub stderr: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeOptionsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ProgramInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeOptionsResponse {
    pub prompts: Vec<RuntimeOptionPrompt>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AboutRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ProgramInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AboutResponse {
    pub executable: String,
    pub version: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunPluginRequest {
    #[serde(default)]
    pub pwd: String,
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// `KEY=VALUE` entries added to the plugin's environment
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ProgramInfo>,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub attach_debugger: bool,
}

/// One message on the plugin output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPluginResponse {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Exitcode(i32),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateProgramRequest {
    /// Virtual path -> neutral program source
    #[serde(default)]
    pub source: BTreeMap<String, String>,
    #[serde(default)]
    pub loader_target: String,
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateProgramResponse {
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    /// Virtual path -> generated source
    #[serde(default)]
    pub source: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateProjectRequest {
    pub source_directory: String,
    pub target_directory: String,
    /// JSON encoded project definition
    pub project: String,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub loader_target: String,
    #[serde(default)]
    pub local_dependencies: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateProjectResponse {
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratePackageRequest {
    pub directory: String,
    /// JSON encoded package schema
    pub schema: String,
    #[serde(default)]
    pub extra_files: BTreeMap<String, Vec<u8>>,
    #[serde(default)]
    pub loader_target: String,
    #[serde(default)]
    pub local_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub local: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratePackageResponse {
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackRequest {
    pub package_directory: String,
    pub destination_directory: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackResponse {
    pub artifact_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ProgramInfo>,
    #[serde(default)]
    pub local_dependencies: BTreeMap<String, String>,
}
