//! Wire envelope for engine <-> adapter calls
//!
//! The adapter listens on a Unix socket. The engine writes one
//! [`LanguageCommand`] per line as JSON; the adapter answers with one
//! [`LanguageResponse`] line, or, for streaming calls, a run of chunk lines
//! closed by `end_of_stream` or a `fault`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::messages::*;
use crate::LanghostError;

/// Calls the engine can make
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LanguageCommand {
    Handshake(LanguageHandshakeRequest),
    GetRequiredPlugins(GetRequiredPluginsRequest),
    GetRequiredPackages(GetRequiredPackagesRequest),
    Run(RunRequest),
    GetPluginInfo,
    /// Streams `install_output` chunks
    InstallDependencies(InstallDependenciesRequest),
    RuntimeOptionsPrompts(RuntimeOptionsRequest),
    About(AboutRequest),
    GetProgramDependencies(GetProgramDependenciesRequest),
    /// Streams `plugin_output` chunks
    RunPlugin(RunPluginRequest),
    GenerateProgram(GenerateProgramRequest),
    GenerateProject(GenerateProjectRequest),
    GeneratePackage(GeneratePackageRequest),
    Pack(PackRequest),
    Link(LinkRequest),
    Cancel,
}

impl LanguageCommand {
    /// Method name, for logs
    pub fn method(&self) -> &'static str {
        match self {
            LanguageCommand::Handshake(_) => "Handshake",
            LanguageCommand::GetRequiredPlugins(_) => "GetRequiredPlugins",
            LanguageCommand::GetRequiredPackages(_) => "GetRequiredPackages",
            LanguageCommand::Run(_) => "Run",
            LanguageCommand::GetPluginInfo => "GetPluginInfo",
            LanguageCommand::InstallDependencies(_) => "InstallDependencies",
            LanguageCommand::RuntimeOptionsPrompts(_) => "RuntimeOptionsPrompts",
            LanguageCommand::About(_) => "About",
            LanguageCommand::GetProgramDependencies(_) => "GetProgramDependencies",
            LanguageCommand::RunPlugin(_) => "RunPlugin",
            LanguageCommand::GenerateProgram(_) => "GenerateProgram",
            LanguageCommand::GenerateProject(_) => "GenerateProject",
            LanguageCommand::GeneratePackage(_) => "GeneratePackage",
            LanguageCommand::Pack(_) => "Pack",
            LanguageCommand::Link(_) => "Link",
            LanguageCommand::Cancel => "Cancel",
        }
    }
}

/// Replies from the adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LanguageResponse {
    /// Calls with an empty result (Handshake, Link, Cancel)
    Empty,
    RequiredPlugins(GetRequiredPluginsResponse),
    RequiredPackages(GetRequiredPackagesResponse),
    Run(RunResponse),
    PluginInfo(PluginInfo),
    RuntimeOptions(RuntimeOptionsResponse),
    About(AboutResponse),
    ProgramDependencies(GetProgramDependenciesResponse),
    GenerateProgram(GenerateProgramResponse),
    GenerateProject(GenerateProjectResponse),
    GeneratePackage(GeneratePackageResponse),
    Pack(PackResponse),

    /// One chunk of installer output
    InstallOutput(InstallDependenciesResponse),
    /// One message of plugin output
    PluginOutput { output: RunPluginResponse },
    /// Clean end of a stream
    EndOfStream,

    /// The call (or stream) failed
    Fault(Fault),
}

/// Error categories that survive the trip over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    ProtocolSequence,
    Validation,
    UnknownDependency,
    Execution,
    Cancelled,
    Manifest,
    InstallFailed,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl From<&LanghostError> for Fault {
    fn from(err: &LanghostError) -> Self {
        let (kind, message) = match err {
            LanghostError::ProtocolSequence(m) => (FaultKind::ProtocolSequence, m.clone()),
            LanghostError::Validation(m) => (FaultKind::Validation, m.clone()),
            LanghostError::UnknownDependency(m) => (FaultKind::UnknownDependency, m.clone()),
            LanghostError::Execution(m) => (FaultKind::Execution, m.clone()),
            LanghostError::Cancelled(m) => (FaultKind::Cancelled, m.clone()),
            LanghostError::Manifest(m) => (FaultKind::Manifest, m.clone()),
            LanghostError::InstallFailed(m) => (FaultKind::InstallFailed, m.clone()),
            other => (FaultKind::Internal, other.to_string()),
        };
        Fault { kind, message }
    }
}

impl From<Fault> for LanghostError {
    fn from(fault: Fault) -> Self {
        let m = fault.message;
        match fault.kind {
            FaultKind::ProtocolSequence => LanghostError::ProtocolSequence(m),
            FaultKind::Validation => LanghostError::Validation(m),
            FaultKind::UnknownDependency => LanghostError::UnknownDependency(m),
            FaultKind::Execution => LanghostError::Execution(m),
            FaultKind::Cancelled => LanghostError::Cancelled(m),
            FaultKind::Manifest => LanghostError::Manifest(m),
            FaultKind::InstallFailed => LanghostError::InstallFailed(m),
            FaultKind::Internal => LanghostError::Remote(m),
        }
    }
}

/// Get the default socket path for the adapter
pub fn default_socket_path() -> PathBuf {
    let name = format!("langhost-{}.sock", std::process::id());
    // Use XDG_RUNTIME_DIR if available, otherwise /tmp
    match dirs::runtime_dir() {
        Some(dir) => dir.join(name),
        None => PathBuf::from("/tmp").join(name),
    }
}
