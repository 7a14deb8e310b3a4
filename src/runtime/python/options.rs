//! Python program options
//!
//! Parsed from the free-form `options` of a `ProgramInfo`:
//! `toolchain`, `virtualenv`, `interpreter` and `typechecker`.

use std::path::{Path, PathBuf};

use crate::config::{AppConfig, Toolchain};
use crate::protocol::ProgramInfo;
use crate::{LanghostError, Result};

/// Static checker run before the program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Typechecker {
    Mypy,
    Pyright,
}

impl Typechecker {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mypy" => Some(Typechecker::Mypy),
            "pyright" => Some(Typechecker::Pyright),
            _ => None,
        }
    }

    pub fn command(self) -> &'static str {
        match self {
            Typechecker::Mypy => "mypy",
            Typechecker::Pyright => "pyright",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonOptions {
    pub toolchain: Toolchain,
    /// Set only when the project declared it
    pub virtualenv: Option<String>,
    pub interpreter: Option<String>,
    pub typechecker: Option<Typechecker>,
}

impl PythonOptions {
    pub fn from_info(info: &ProgramInfo, config: &AppConfig) -> Result<Self> {
        let toolchain = match info.option_str("toolchain") {
            None | Some("") => config.default_toolchain,
            Some(name) => Toolchain::parse(name).ok_or_else(|| {
                LanghostError::Validation(format!(
                    "unknown toolchain '{}': expected one of pip, poetry, uv",
                    name
                ))
            })?,
        };

        let typechecker = match info.option_str("typechecker") {
            None | Some("") => None,
            Some(name) => Some(Typechecker::parse(name).ok_or_else(|| {
                LanghostError::Validation(format!(
                    "unknown typechecker '{}': expected mypy or pyright",
                    name
                ))
            })?),
        };

        let non_empty = |key: &str| {
            info.option_str(key)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Ok(Self {
            toolchain,
            virtualenv: non_empty("virtualenv"),
            interpreter: non_empty("interpreter"),
            typechecker,
        })
    }

    /// Virtualenv directory this toolchain installs into
    pub fn venv_dir(&self, info: &ProgramInfo, config: &AppConfig) -> PathBuf {
        let name = match (&self.virtualenv, self.toolchain) {
            (Some(venv), _) => venv.as_str(),
            (None, Toolchain::Pip) => config.default_virtualenv.as_str(),
            (None, Toolchain::Poetry | Toolchain::Uv) => ".venv",
        };
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            info.program_dir().join(path)
        }
    }

    /// Interpreter that runs the program.
    ///
    /// An explicit interpreter wins; otherwise the virtualenv's python when
    /// the virtualenv exists; otherwise the configured system python.
    pub fn interpreter(&self, info: &ProgramInfo, config: &AppConfig) -> String {
        if let Some(interpreter) = &self.interpreter {
            return interpreter.clone();
        }
        let venv_python = venv_python(&self.venv_dir(info, config));
        if venv_python.exists() {
            return venv_python.display().to_string();
        }
        config.python_command.clone()
    }
}

pub fn venv_python(venv: &Path) -> PathBuf {
    venv.join("bin").join("python")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_come_from_config() {
        let config = AppConfig::default();
        let info = ProgramInfo::new("/work/prog");
        let opts = PythonOptions::from_info(&info, &config).unwrap();
        assert_eq!(opts.toolchain, Toolchain::Pip);
        assert_eq!(opts.virtualenv, None);
        assert_eq!(opts.venv_dir(&info, &config), PathBuf::from("/work/prog/venv"));
        assert_eq!(opts.interpreter(&info, &config), "python3");
    }

    #[test]
    fn parses_declared_options() {
        let config = AppConfig::default();
        let info = ProgramInfo::new("/work/prog")
            .with_option("toolchain", "uv")
            .with_option("typechecker", "mypy")
            .with_option("interpreter", "/usr/bin/python3.12");
        let opts = PythonOptions::from_info(&info, &config).unwrap();
        assert_eq!(opts.toolchain, Toolchain::Uv);
        assert_eq!(opts.typechecker, Some(Typechecker::Mypy));
        assert_eq!(opts.venv_dir(&info, &config), PathBuf::from("/work/prog/.venv"));
        assert_eq!(opts.interpreter(&info, &config), "/usr/bin/python3.12");
    }

    #[test]
    fn unknown_toolchain_is_rejected() {
        let info = ProgramInfo::new("/work/prog").with_option("toolchain", "conda");
        let err = PythonOptions::from_info(&info, &AppConfig::default());
        assert!(matches!(err, Err(LanghostError::Validation(_))));
    }

    #[test]
    fn existing_virtualenv_supplies_the_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("env").join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("python"), "").unwrap();

        let config = AppConfig::default();
        let info =
            ProgramInfo::new(dir.path().display().to_string()).with_option("virtualenv", "env");
        let opts = PythonOptions::from_info(&info, &config).unwrap();
        assert_eq!(
            opts.interpreter(&info, &config),
            bin.join("python").display().to_string()
        );
    }
}
