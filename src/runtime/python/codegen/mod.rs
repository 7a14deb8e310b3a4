//! Python code generation: programs, projects and package SDKs

pub mod names;
pub mod package;
pub mod program;
pub mod project;

use std::path::Path;

use crate::codegen::Program;
use crate::protocol::{Diagnostics, GenerateProgramRequest, GenerateProgramResponse};
use crate::Result;

pub use package::generate_package;
pub use project::generate_project;

/// Write `content` to `path`, creating parent directories.
pub(crate) fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

pub fn generate_program(req: &GenerateProgramRequest) -> GenerateProgramResponse {
    let mut diags = Diagnostics::new();
    let program = Program::parse(&req.source, &mut diags);
    program.check(req.strict, &mut diags);
    let source = program::emit_program(&program, &mut diags);
    GenerateProgramResponse {
        diagnostics: diags.into_vec(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn empty_input_generates_nothing() {
        let resp = generate_program(&GenerateProgramRequest::default());
        assert!(resp.source.is_empty());
        assert!(resp.diagnostics.is_empty());
    }

    #[test]
    fn unsupported_constructs_keep_best_effort_output() {
        let mut source = BTreeMap::new();
        source.insert(
            "main.pp".to_string(),
            "digest = md5(\"x\")\ncomponent c \"./c\" {}\noutput d {\n  value = digest\n}\n"
                .to_string(),
        );
        let resp = generate_program(&GenerateProgramRequest {
            source,
            ..Default::default()
        });
        let summaries: Vec<_> = resp.diagnostics.iter().map(|d| d.summary.as_str()).collect();
        assert!(summaries.contains(&"unsupported function 'md5'"));
        assert!(summaries.contains(&"unsupported block type 'component'"));
        let main = &resp.source["__main__.py"];
        assert!(main.contains("digest = None\n"));
        assert!(main.contains("langhost.export(\"d\", digest)\n"));
    }
}
