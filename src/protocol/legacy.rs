//! Deprecated program addressing
//!
//! Older engines identify a program with loose `project`/`pwd`/`program`
//! strings instead of a [`ProgramInfo`]. Requests are folded into a single
//! `ProgramInfo` at the boundary; nothing past the session looks at the old
//! fields.

use std::path::Path;

use super::messages::ProgramInfo;
use crate::{LanghostError, Result};

/// How a request addressed its program.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramTarget {
    Info(ProgramInfo),
    Legacy {
        project: String,
        pwd: String,
        program: String,
    },
}

impl ProgramTarget {
    /// Pick the addressing form of a request. `info` wins when both are set.
    pub fn from_fields(
        info: Option<ProgramInfo>,
        project: &str,
        pwd: &str,
        program: &str,
    ) -> Self {
        match info {
            Some(info) => {
                if !pwd.is_empty() || !program.is_empty() {
                    tracing::debug!(
                        "request carries both program info and legacy fields; using program info"
                    );
                }
                ProgramTarget::Info(info)
            }
            None => ProgramTarget::Legacy {
                project: project.to_string(),
                pwd: pwd.to_string(),
                program: program.to_string(),
            },
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, ProgramTarget::Legacy { .. })
    }

    /// Produce the canonical `ProgramInfo`.
    pub fn resolve(self) -> Result<ProgramInfo> {
        match self {
            ProgramTarget::Info(info) => {
                if info.program_directory.is_empty() {
                    return Err(LanghostError::Validation(
                        "program info is missing program_directory".to_string(),
                    ));
                }
                Ok(info)
            }
            ProgramTarget::Legacy {
                project,
                pwd,
                program,
            } => {
                if pwd.is_empty() && program.is_empty() {
                    return Err(LanghostError::Validation(format!(
                        "request for project '{}' names no program: set info or pwd/program",
                        project
                    )));
                }

                let program_directory = if program.is_empty() {
                    pwd.clone()
                } else if Path::new(&program).is_absolute() || pwd.is_empty() {
                    program.clone()
                } else {
                    Path::new(&pwd).join(&program).display().to_string()
                };
                let root_directory = if pwd.is_empty() {
                    program_directory.clone()
                } else {
                    pwd
                };

                Ok(ProgramInfo {
                    root_directory,
                    program_directory,
                    entry_point: ".".to_string(),
                    options: Default::default(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_takes_precedence_over_legacy_fields() {
        let info = ProgramInfo::new("/work/prog");
        let target = ProgramTarget::from_fields(Some(info.clone()), "proj", "/elsewhere", "other");
        assert!(!target.is_legacy());
        assert_eq!(target.resolve().unwrap(), info);
    }

    #[test]
    fn legacy_relative_program_joins_pwd() {
        let target = ProgramTarget::from_fields(None, "proj", "/work", "prog");
        let info = target.resolve().unwrap();
        assert_eq!(info.program_directory, "/work/prog");
        assert_eq!(info.root_directory, "/work");
        assert_eq!(info.entry_point, ".");
    }

    #[test]
    fn legacy_absolute_program_is_used_as_is() {
        let info = ProgramTarget::from_fields(None, "proj", "/work", "/abs/prog")
            .resolve()
            .unwrap();
        assert_eq!(info.program_directory, "/abs/prog");
    }

    #[test]
    fn legacy_pwd_only() {
        let info = ProgramTarget::from_fields(None, "", "/work", "").resolve().unwrap();
        assert_eq!(info.program_directory, "/work");
    }

    #[test]
    fn nothing_to_resolve_is_a_validation_error() {
        let err = ProgramTarget::from_fields(None, "proj", "", "").resolve();
        assert!(matches!(err, Err(LanghostError::Validation(_))));

        let err = ProgramTarget::from_fields(Some(ProgramInfo::default()), "", "", "").resolve();
        assert!(matches!(err, Err(LanghostError::Validation(_))));
    }
}
