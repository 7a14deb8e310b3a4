//! Langhost: language runtime host for an orchestration engine
//!
//! The engine drives one adapter process per language ecosystem. Each adapter
//! answers the same set of calls - handshake, dependency discovery, program
//! execution, code generation, packaging - so the engine never needs to know
//! which language it is talking to.

pub mod cli;
pub mod client;
pub mod codegen;
pub mod config;
pub mod process;
pub mod protocol;
pub mod runtime;
pub mod server;
pub mod session;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LanghostError {
    #[error("Protocol sequence error: {0}")]
    ProtocolSequence(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown dependency: {0}")]
    UnknownDependency(String),

    #[error("Execution fault: {0}")]
    Execution(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("Remote error: {0}")]
    Remote(String),
}

pub type Result<T> = std::result::Result<T, LanghostError>;
