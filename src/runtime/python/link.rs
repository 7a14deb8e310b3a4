//! Link: point a program's requirements at local package checkouts

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::deps::DependencyView;
use super::requirements::{
    normalize_name, parse_requirement, strip_comment, PYPROJECT_FILE, REQUIREMENTS_FILE,
};
use crate::{LanghostError, Result};

/// `name[extras] @ file://path`
pub(crate) fn local_reference(name: &str, extras: &[String], path: &Path) -> String {
    if extras.is_empty() {
        format!("{} @ file://{}", name, path.display())
    } else {
        format!("{}[{}] @ file://{}", name, extras.join(","), path.display())
    }
}

/// File named by a `-r`/`--requirement` line
fn include_target(content: &str) -> Option<&str> {
    let option = content.strip_prefix('-')?;
    let (flag, value) = option.split_once(|c: char| c == '=' || c.is_whitespace())?;
    let value = value.trim();
    (matches!(flag, "r" | "-requirement") && !value.is_empty()).then_some(value)
}

/// Rewrite requirement lines naming a linked package; everything else is kept.
fn rewrite(text: &str, links: &BTreeMap<String, PathBuf>) -> (String, BTreeSet<String>) {
    let mut out = String::with_capacity(text.len());
    let mut replaced = BTreeSet::new();
    for line in text.lines() {
        let content = strip_comment(line).trim();
        let requirement = content.split(" --").next().unwrap_or_default();
        let linked = if content.is_empty() || content.starts_with('-') || content.ends_with('\\') {
            None
        } else {
            parse_requirement(requirement)
                .ok()
                .and_then(|r| links.get(&r.name).map(|path| (r, path)))
        };
        match linked {
            Some((req, path)) => {
                out.push_str(&local_reference(&req.raw_name, &req.extras, path));
                replaced.insert(req.name);
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }
    (out, replaced)
}

struct Rewritten {
    path: PathBuf,
    original: String,
    updated: String,
}

/// Rewrite `path` and every file it includes, in include order.
fn rewrite_tree(
    path: &Path,
    links: &BTreeMap<String, PathBuf>,
    seen: &mut HashSet<PathBuf>,
    replaced: &mut BTreeSet<String>,
    out: &mut Vec<Rewritten>,
) -> Result<()> {
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if !seen.insert(canonical) {
        return Ok(());
    }
    let original = std::fs::read_to_string(path).map_err(|e| {
        LanghostError::Manifest(format!("cannot read {}: {}", path.display(), e))
    })?;
    let (updated, names) = rewrite(&original, links);
    replaced.extend(names);

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let includes: Vec<PathBuf> = original
        .lines()
        .filter_map(|line| include_target(strip_comment(line).trim()))
        .map(|target| base.join(target))
        .collect();
    out.push(Rewritten {
        path: path.to_path_buf(),
        original,
        updated,
    });
    for include in includes {
        rewrite_tree(&include, links, seen, replaced, out)?;
    }
    Ok(())
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| REQUIREMENTS_FILE.to_string());
    let staging = dir.join(format!(".{}.tmp", name));
    let result = (|| -> Result<()> {
        let mut file = std::fs::File::create(&staging)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&staging, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&staging);
    }
    result
}

/// Link into `requirements.txt` and the files it includes. Names declared
/// nowhere are appended to the top-level file.
fn link_requirements(manifest: &Path, links: &BTreeMap<String, PathBuf>) -> Result<()> {
    let mut files = Vec::new();
    let mut replaced = BTreeSet::new();
    if manifest.is_file() {
        rewrite_tree(manifest, links, &mut HashSet::new(), &mut replaced, &mut files)?;
    } else {
        files.push(Rewritten {
            path: manifest.to_path_buf(),
            original: String::new(),
            updated: String::new(),
        });
    }

    if let Some(top) = files.first_mut() {
        for (name, path) in links {
            if !replaced.contains(name) {
                top.updated.push_str(&local_reference(name, &[], path));
                top.updated.push('\n');
            }
        }
    }
    for file in files.iter().filter(|f| f.updated != f.original) {
        write_atomic(&file.path, &file.updated)?;
        tracing::debug!("rewrote {}", file.path.display());
    }
    Ok(())
}

/// Link into `pyproject.toml`: PEP 621 `project.dependencies` when present,
/// otherwise `tool.poetry.dependencies`.
fn link_pyproject(manifest: &Path, links: &BTreeMap<String, PathBuf>) -> Result<()> {
    let manifest_err = |e: String| LanghostError::Manifest(format!("{}: {}", manifest.display(), e));
    let text = std::fs::read_to_string(manifest)?;
    let mut doc: toml::Table = toml::from_str(&text).map_err(|e| manifest_err(e.to_string()))?;
    let mut replaced = BTreeSet::new();

    if let Some(deps) = doc
        .get_mut("project")
        .and_then(|p| p.get_mut("dependencies"))
        .and_then(|d| d.as_array_mut())
    {
        for dep in deps.iter_mut() {
            let Some(req) = dep.as_str().and_then(|s| parse_requirement(s).ok()) else {
                continue;
            };
            if let Some(path) = links.get(&req.name) {
                *dep = toml::Value::String(local_reference(&req.raw_name, &req.extras, path));
                replaced.insert(req.name);
            }
        }
        for (name, path) in links {
            if !replaced.contains(name) {
                deps.push(toml::Value::String(local_reference(name, &[], path)));
            }
        }
    } else if let Some(deps) = doc
        .get_mut("tool")
        .and_then(|t| t.get_mut("poetry"))
        .and_then(|p| p.get_mut("dependencies"))
        .and_then(|d| d.as_table_mut())
    {
        for (name, value) in deps.iter_mut() {
            let Some(path) = links.get(&normalize_name(name)) else {
                continue;
            };
            let mut local = toml::Table::new();
            if let Some(extras) = value.get("extras").cloned() {
                local.insert("extras".to_string(), extras);
            }
            local.insert("path".to_string(), toml::Value::String(path.display().to_string()));
            *value = toml::Value::Table(local);
            replaced.insert(normalize_name(name));
        }
        for (name, path) in links {
            if !replaced.contains(name) {
                let mut local = toml::Table::new();
                local.insert("path".to_string(), toml::Value::String(path.display().to_string()));
                deps.insert(name.clone(), toml::Value::Table(local));
            }
        }
    } else {
        return Err(manifest_err("no dependency list to link into".to_string()));
    }

    let updated = toml::to_string(&doc).map_err(|e| manifest_err(e.to_string()))?;
    write_atomic(manifest, &updated)
}

/// Link `local_dependencies` (name -> path) into the program's manifest:
/// `requirements.txt` when present, else `pyproject.toml`.
///
/// Every name must be in the program's transitive dependency set; otherwise
/// nothing is written.
pub fn link(
    program_dir: &Path,
    venv: &Path,
    local_dependencies: &BTreeMap<String, String>,
) -> Result<()> {
    if local_dependencies.is_empty() {
        return Ok(());
    }
    let known = DependencyView::load(program_dir, venv)?.transitive_names();

    let mut links = BTreeMap::new();
    for (name, path) in local_dependencies {
        let normalized = normalize_name(name);
        if !known.contains(&normalized) {
            return Err(LanghostError::UnknownDependency(format!(
                "{} is not a dependency of {}",
                name,
                program_dir.display()
            )));
        }
        let path = std::path::absolute(program_dir.join(path))?;
        links.insert(normalized, path);
    }

    let requirements = program_dir.join(REQUIREMENTS_FILE);
    let pyproject = program_dir.join(PYPROJECT_FILE);
    let manifest = if !requirements.is_file() && pyproject.is_file() {
        link_pyproject(&pyproject, &links)?;
        pyproject
    } else {
        link_requirements(&requirements, &links)?;
        requirements
    };

    tracing::info!(
        "linked {} local dependencies into {}",
        links.len(),
        manifest.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::requirements::{direct_requirements, read_requirements_file};
    use super::super::site_packages::fixtures::install;
    use super::*;

    fn program() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("requirements.txt"),
            "# infra\nlanghost>=3.0.0\nLanghost_AWS[extra]==6.0.0  # pinned\n--index-url https://pypi.org/simple\n",
        )
        .unwrap();
        let venv = dir.path().join("venv");
        install(&venv, "langhost", "3.1.0", &["grpcio>=1.0"]);
        install(&venv, "grpcio", "1.60.0", &[]);
        install(&venv, "langhost-aws", "6.0.0", &["langhost"]);
        dir
    }

    fn links(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn rewrites_direct_and_appends_transitive() {
        let dir = program();
        link(
            dir.path(),
            &dir.path().join("venv"),
            &links(&[("langhost-aws", "/src/aws"), ("grpcio", "/src/grpcio")]),
        )
        .unwrap();

        let text = std::fs::read_to_string(dir.path().join("requirements.txt")).unwrap();
        assert_eq!(
            text,
            "# infra\n\
             langhost>=3.0.0\n\
             Langhost_AWS[extra] @ file:///src/aws\n\
             --index-url https://pypi.org/simple\n\
             grpcio @ file:///src/grpcio\n"
        );
    }

    #[test]
    fn unknown_dependency_leaves_manifest_untouched() {
        let dir = program();
        let before = std::fs::read(dir.path().join("requirements.txt")).unwrap();
        let err = link(
            dir.path(),
            &dir.path().join("venv"),
            &links(&[("langhost-aws", "/src/aws"), ("numpy", "/src/numpy")]),
        )
        .unwrap_err();
        assert!(matches!(err, LanghostError::UnknownDependency(_)));
        assert_eq!(std::fs::read(dir.path().join("requirements.txt")).unwrap(), before);
    }

    #[test]
    fn relative_paths_resolve_against_the_program() {
        let dir = program();
        link(
            dir.path(),
            &dir.path().join("venv"),
            &links(&[("langhost", "../sdk")]),
        )
        .unwrap();
        let text = std::fs::read_to_string(dir.path().join("requirements.txt")).unwrap();
        let expected = format!("langhost @ file://{}\n", dir.path().join("../sdk").display());
        assert!(text.contains(&expected), "{text}");
    }

    fn bare_program(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, text) in files {
            std::fs::write(dir.path().join(name), text).unwrap();
        }
        let venv = dir.path().join("venv");
        install(&venv, "langhost", "3.1.0", &["attrs"]);
        install(&venv, "attrs", "23.1.0", &[]);
        install(&venv, "pyyaml", "6.0.1", &[]);
        dir
    }

    #[test]
    fn included_requirements_are_rewritten_in_place() {
        let dir = bare_program(&[
            ("requirements.txt", "-r base.txt\nlanghost>=3.0\n"),
            ("base.txt", "attrs==23.1.0\n"),
        ]);
        link(dir.path(), &dir.path().join("venv"), &links(&[("attrs", "/src/attrs")])).unwrap();

        let top = std::fs::read_to_string(dir.path().join("requirements.txt")).unwrap();
        assert_eq!(top, "-r base.txt\nlanghost>=3.0\n");
        let base = std::fs::read_to_string(dir.path().join("base.txt")).unwrap();
        assert_eq!(base, "attrs @ file:///src/attrs\n");

        let reqs = read_requirements_file(&dir.path().join("requirements.txt")).unwrap();
        let attrs: Vec<_> = reqs.iter().filter(|r| r.name == "attrs").collect();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].url.as_deref(), Some("file:///src/attrs"));
    }

    #[test]
    fn pyproject_dependencies_are_linked_without_a_requirements_file() {
        let dir = bare_program(&[(
            "pyproject.toml",
            "[project]\nname = \"app\"\ndependencies = [\"langhost>=3.0\", \"PyYAML==6.0.1\"]\n",
        )]);
        link(
            dir.path(),
            &dir.path().join("venv"),
            &links(&[("langhost", "/src/sdk"), ("attrs", "/src/attrs")]),
        )
        .unwrap();

        assert!(!dir.path().join("requirements.txt").exists());
        let reqs = direct_requirements(dir.path()).unwrap();
        let names: Vec<_> = reqs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["langhost", "pyyaml", "attrs"]);
        assert_eq!(reqs[0].url.as_deref(), Some("file:///src/sdk"));
        assert_eq!(reqs[1].specifier, "==6.0.1");
        assert_eq!(reqs[2].url.as_deref(), Some("file:///src/attrs"));
    }

    #[test]
    fn poetry_dependencies_become_path_tables() {
        let dir = bare_program(&[(
            "pyproject.toml",
            "[tool.poetry.dependencies]\npython = \"^3.9\"\nlanghost = { version = \">=3.0\", extras = [\"grpc\"] }\npyyaml = \"6.0.1\"\n",
        )]);
        link(dir.path(), &dir.path().join("venv"), &links(&[("langhost", "/src/sdk")])).unwrap();

        let text = std::fs::read_to_string(dir.path().join("pyproject.toml")).unwrap();
        let doc: toml::Table = toml::from_str(&text).unwrap();
        let deps = doc["tool"]["poetry"]["dependencies"].as_table().unwrap();
        assert_eq!(deps["langhost"]["path"].as_str(), Some("/src/sdk"));
        assert_eq!(deps["langhost"]["extras"][0].as_str(), Some("grpc"));
        assert_eq!(deps["pyyaml"].as_str(), Some("6.0.1"));

        let names: Vec<_> = direct_requirements(dir.path())
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, ["langhost", "pyyaml"]);
    }
}
