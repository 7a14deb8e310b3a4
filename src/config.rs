//! Langhost configuration for the adapter process.

use std::path::PathBuf;
use std::time::Duration;

/// Python package manager used to install program dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toolchain {
    Pip,
    Poetry,
    Uv,
}

impl Toolchain {
    pub const ALL: [Toolchain; 3] = [Toolchain::Pip, Toolchain::Poetry, Toolchain::Uv];

    pub fn as_str(self) -> &'static str {
        match self {
            Toolchain::Pip => "pip",
            Toolchain::Poetry => "poetry",
            Toolchain::Uv => "uv",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pip" => Some(Toolchain::Pip),
            "poetry" => Some(Toolchain::Poetry),
            "uv" => Some(Toolchain::Uv),
            _ => None,
        }
    }
}

impl std::fmt::Display for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime config for the adapter.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub socket_path: PathBuf,
    /// Interpreter used when a program names neither an interpreter nor a virtualenv
    pub python_command: String,
    pub default_toolchain: Toolchain,
    pub default_virtualenv: String,
    /// Bytes of program stderr kept for RunResponse error messages
    pub stderr_tail_bytes: usize,
    /// Time a cancelled child gets between SIGINT and SIGKILL
    pub cancel_grace: Duration,
    /// Where per-run output logs go; no logs are written when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            socket_path: crate::protocol::ipc::default_socket_path(),
            python_command: "python3".to_string(),
            default_toolchain: Toolchain::Pip,
            default_virtualenv: "venv".to_string(),
            stderr_tail_bytes: 8 * 1024,
            cancel_grace: Duration::from_secs(3),
            log_dir: None,
        }
    }
}
