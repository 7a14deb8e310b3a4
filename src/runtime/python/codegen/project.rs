//! GenerateProject: a runnable Python project from a directory of `.pp` files

use std::collections::BTreeMap;
use std::path::Path;

use super::names::distribution_name;
use super::program::emit_program;
use super::write_file;
use crate::codegen::{Program, SOURCE_EXTENSION};
use crate::config::AppConfig;
use crate::protocol::{Diagnostics, GenerateProjectRequest};
use crate::runtime::python::link::local_reference;
use crate::runtime::python::requirements::REQUIREMENTS_FILE;
use crate::{LanghostError, Result};

/// Version range of the core SDK generated code is written against
pub const CORE_REQUIREMENT: &str = "langhost>=3.0.0,<4.0.0";
pub const CORE_PACKAGE: &str = "langhost";
pub const PROJECT_FILE: &str = "langhost.json";

const GITIGNORE: &str = "*.pyc\n__pycache__/\nvenv/\n.venv/\n";

/// Every `.pp` file under `dir`, keyed by its `/`-separated relative path
pub fn read_sources(dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut sources = BTreeMap::new();
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| LanghostError::Io(e.into()))?;
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().is_none_or(|ext| ext != SOURCE_EXTENSION)
        {
            continue;
        }
        let Ok(relative) = path.strip_prefix(dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        sources.insert(name, std::fs::read_to_string(path)?);
    }
    Ok(sources)
}

/// Requirement line for `package`, or `dist @ file://path` for a local override.
/// Relative override paths resolve against `target_dir`.
fn requirement_line(
    package: &str,
    dist: &str,
    local: &BTreeMap<String, String>,
    target_dir: &Path,
) -> Result<Option<String>> {
    let Some(path) = local.get(package).or_else(|| local.get(dist)) else {
        return Ok(None);
    };
    let path = std::path::absolute(target_dir.join(path))?;
    Ok(Some(local_reference(dist, &[], &path)))
}

fn requirements(
    program: &Program,
    local: &BTreeMap<String, String>,
    target_dir: &Path,
) -> Result<String> {
    let mut out = requirement_line(CORE_PACKAGE, CORE_PACKAGE, local, target_dir)?
        .unwrap_or_else(|| CORE_REQUIREMENT.to_string());
    out.push('\n');
    for package in program.packages() {
        let dist = distribution_name(&package);
        match requirement_line(&package, &dist, local, target_dir)? {
            Some(line) => out.push_str(&line),
            None => out.push_str(&dist),
        }
        out.push('\n');
    }
    Ok(out)
}

fn project_definition(project: &str, config: &AppConfig) -> Result<serde_json::Value> {
    let mut value: serde_json::Value = serde_json::from_str(project)
        .map_err(|e| LanghostError::Validation(format!("project is not valid JSON: {}", e)))?;
    let Some(object) = value.as_object_mut() else {
        return Err(LanghostError::Validation(
            "project must be a JSON object".to_string(),
        ));
    };
    if !object
        .get("name")
        .and_then(|n| n.as_str())
        .is_some_and(|n| !n.is_empty())
    {
        return Err(LanghostError::Validation("project has no name".to_string()));
    }
    object.insert(
        "runtime".to_string(),
        serde_json::json!({
            "name": "python",
            "options": {
                "toolchain": config.default_toolchain.as_str(),
                "virtualenv": config.default_virtualenv,
            }
        }),
    );
    Ok(value)
}

pub fn generate_project(config: &AppConfig, req: &GenerateProjectRequest) -> Result<Diagnostics> {
    let definition = project_definition(&req.project, config)?;
    let source_dir = Path::new(&req.source_directory);
    let target_dir = Path::new(&req.target_directory);

    let sources = read_sources(source_dir)?;
    let mut diags = Diagnostics::new();
    let program = Program::parse(&sources, &mut diags);
    program.check(req.strict, &mut diags);
    let files = emit_program(&program, &mut diags);

    std::fs::create_dir_all(target_dir)?;
    for (name, text) in &files {
        write_file(&target_dir.join(name), text.as_bytes())?;
    }
    write_file(
        &target_dir.join(REQUIREMENTS_FILE),
        requirements(&program, &req.local_dependencies, target_dir)?.as_bytes(),
    )?;
    let mut project = serde_json::to_string_pretty(&definition)?;
    project.push('\n');
    write_file(&target_dir.join(PROJECT_FILE), project.as_bytes())?;
    write_file(&target_dir.join(".gitignore"), GITIGNORE.as_bytes())?;

    tracing::info!(
        "generated project in {} ({} files, {} diagnostics)",
        target_dir.display(),
        files.len(),
        diags.len()
    );
    Ok(diags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::python::requirements::direct_requirements;

    fn request(src: &Path, dst: &Path, project: &str) -> GenerateProjectRequest {
        GenerateProjectRequest {
            source_directory: src.display().to_string(),
            target_directory: dst.display().to_string(),
            project: project.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn writes_program_manifest_and_project_file() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("out");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(
            src.join("main.pp"),
            "resource pet \"random:index:RandomPet\" {}\noutput name {\n  value = pet.id\n}\n",
        )
        .unwrap();
        std::fs::write(src.join("notes.txt"), "ignored").unwrap();

        let mut req = request(&src, &dst, r#"{"name": "pets", "description": "demo"}"#);
        req.local_dependencies
            .insert("random".to_string(), "/wheels/langhost_random.whl".to_string());
        let diags = generate_project(&AppConfig::default(), &req).unwrap();
        assert!(diags.is_empty());

        let main = std::fs::read_to_string(dst.join("__main__.py")).unwrap();
        assert!(main.contains("pet = random.RandomPet(\"pet\")"));
        assert_eq!(
            std::fs::read_to_string(dst.join("requirements.txt")).unwrap(),
            "langhost>=3.0.0,<4.0.0\nlanghost-random @ file:///wheels/langhost_random.whl\n"
        );

        let project: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dst.join("langhost.json")).unwrap())
                .unwrap();
        assert_eq!(project["name"], "pets");
        assert_eq!(project["description"], "demo");
        assert_eq!(project["runtime"]["name"], "python");
        assert_eq!(project["runtime"]["options"]["virtualenv"], "venv");
        assert!(dst.join(".gitignore").exists());
        assert!(!dst.join("notes.txt").exists());
    }

    #[test]
    fn project_needs_an_object_with_a_name() {
        let tmp = tempfile::tempdir().unwrap();
        for project in ["[]", "{}", "not json", r#"{"name": ""}"#] {
            let req = request(tmp.path(), &tmp.path().join("out"), project);
            let err = generate_project(&AppConfig::default(), &req).unwrap_err();
            assert!(matches!(err, LanghostError::Validation(_)), "{project}");
        }
        assert!(!tmp.path().join("out").exists());
    }

    #[test]
    fn strict_mode_reports_undeclared_names() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("main.pp"), "output o {\n  value = ghost.id\n}\n").unwrap();
        let mut req = request(tmp.path(), &tmp.path().join("out"), r#"{"name": "p"}"#);
        req.strict = true;
        let diags = generate_project(&AppConfig::default(), &req).unwrap();
        assert!(diags.has_errors());
        assert!(tmp.path().join("out").join("__main__.py").exists());
    }

    #[test]
    fn local_overrides_are_named_requirements() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("out");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(
            src.join("main.pp"),
            "resource bucket \"aws:s3:Bucket\" {}\nresource pet \"random:index:RandomPet\" {}\n",
        )
        .unwrap();

        let mut req = request(&src, &dst, r#"{"name": "p"}"#);
        req.local_dependencies
            .insert("aws".to_string(), "/src/aws".to_string());
        req.local_dependencies
            .insert("langhost".to_string(), "../sdk".to_string());
        generate_project(&AppConfig::default(), &req).unwrap();

        let reqs = direct_requirements(&dst).unwrap();
        let names: Vec<_> = reqs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["langhost", "langhost-aws", "langhost-random"]);
        let sdk = std::path::absolute(dst.join("../sdk")).unwrap();
        assert_eq!(reqs[0].url, Some(format!("file://{}", sdk.display())));
        assert_eq!(reqs[1].url.as_deref(), Some("file:///src/aws"));
        assert_eq!(reqs[2].url, None);
    }
}
