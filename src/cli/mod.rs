//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "langhost")]
#[command(about = "Language runtime host for Python programs", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Interpreter used when a program has no virtualenv
    #[arg(long, global = true, env = "LANGHOST_PYTHON")]
    pub python: Option<String>,

    /// Directory for per-run output logs
    #[arg(long, global = true, env = "LANGHOST_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the adapter and print its socket path
    Serve {
        /// Socket to listen on
        #[arg(short, long, env = "LANGHOST_SOCKET")]
        socket: Option<PathBuf>,
    },

    /// List a program's dependencies
    Deps {
        /// Program directory
        dir: PathBuf,

        /// Include indirect dependencies
        #[arg(short, long)]
        transitive: bool,
    },

    /// List the plugins a program needs
    Plugins {
        /// Program directory
        dir: PathBuf,
    },

    /// Show the options a new project would be asked for
    Prompts {
        /// Program directory
        dir: PathBuf,
    },

    /// Show the interpreter a program runs with
    About {
        /// Program directory
        dir: PathBuf,
    },

    /// Generate a Python project from a directory of .pp files
    GenerateProject {
        /// Directory holding the .pp sources
        source: PathBuf,

        /// Directory to write the project into
        target: PathBuf,

        /// Project definition as JSON, e.g. '{"name": "app"}'
        #[arg(long)]
        project: String,

        /// Treat undeclared references as errors
        #[arg(long)]
        strict: bool,
    },

    /// Generate a Python SDK from a package schema
    GeneratePackage {
        /// Directory to write the package into
        dir: PathBuf,

        /// JSON package schema
        #[arg(long)]
        schema: PathBuf,

        /// Depend on a local core SDK (`--local-dependency langhost=PATH`)
        #[arg(long)]
        local: bool,

        /// NAME=PATH overrides for dependencies
        #[arg(long = "local-dependency", value_name = "NAME=PATH")]
        local_dependencies: Vec<String>,
    },

    /// Build a source distribution of a package directory
    Pack {
        /// Package directory
        package: PathBuf,

        /// Where the artifact is written
        destination: PathBuf,
    },

    /// Point a program's requirements at local checkouts
    Link {
        /// Program directory
        dir: PathBuf,

        /// NAME=PATH pairs
        #[arg(required = true, value_name = "NAME=PATH")]
        links: Vec<String>,
    },
}

impl Cli {
    /// Adapter config with command line overrides applied
    pub fn config(&self) -> AppConfig {
        let mut config = AppConfig::default();
        if let Some(python) = &self.python {
            config.python_command = python.clone();
        }
        config.log_dir = self.log_dir.clone();
        if let Commands::Serve {
            socket: Some(socket),
        } = &self.command
        {
            config.socket_path = socket.clone();
        }
        config
    }
}

/// Split `NAME=PATH` arguments.
pub fn parse_pairs(pairs: &[String]) -> std::result::Result<Vec<(String, String)>, String> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((name, path)) if !name.is_empty() && !path.is_empty() => {
                Ok((name.to_string(), path.to_string()))
            }
            _ => Err(format!("expected NAME=PATH, got '{}'", pair)),
        })
        .collect()
}
