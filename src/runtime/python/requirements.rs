//! Python dependency manifests
//!
//! Reads `requirements.txt` (pip's line format) and falls back to the
//! `[project]` table of `pyproject.toml`. A line that can't be understood
//! fails the whole read; callers never see a partial list.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::{LanghostError, Result};

pub const REQUIREMENTS_FILE: &str = "requirements.txt";
pub const PYPROJECT_FILE: &str = "pyproject.toml";

const SPECIFIER_OPS: [&str; 8] = ["===", "==", "!=", "<=", ">=", "~=", "<", ">"];

/// PEP 503 name normalization: lowercase, runs of `-_.` become one `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.push(c.to_ascii_lowercase());
            in_separator = false;
        }
    }
    out
}

/// One named requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Normalized name
    pub name: String,
    /// Name as written
    pub raw_name: String,
    pub extras: Vec<String>,
    /// Version specifier, e.g. `>=1.0,<2`
    pub specifier: String,
    pub url: Option<String>,
    pub marker: Option<String>,
}

impl Requirement {
    /// Exact version when the specifier is a single `==` pin
    pub fn pinned_version(&self) -> Option<&str> {
        let spec = self.specifier.trim();
        let version = spec.strip_prefix("==")?;
        if version.starts_with('=') || version.contains(',') || version.contains('*') {
            return None;
        }
        Some(version.trim())
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn is_version_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '*' | '+' | '!' | '-' | '_')
}

fn validate_specifier(spec: &str) -> std::result::Result<(), String> {
    for clause in spec.split(',') {
        let clause = clause.trim();
        let op = SPECIFIER_OPS
            .iter()
            .find(|op| clause.starts_with(**op))
            .ok_or_else(|| format!("invalid version specifier '{}'", clause))?;
        let version = clause[op.len()..].trim();
        if version.is_empty() || !version.chars().all(is_version_char) {
            return Err(format!("invalid version in '{}'", clause));
        }
    }
    Ok(())
}

/// Parse one requirement string (PEP 508 subset).
pub fn parse_requirement(text: &str) -> std::result::Result<Requirement, String> {
    let text = text.trim();
    let name_len = text.find(|c: char| !is_name_char(c)).unwrap_or(text.len());
    let raw_name = &text[..name_len];
    if raw_name.is_empty() || !raw_name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(format!("expected a package name in '{}'", text));
    }
    let mut rest = text[name_len..].trim_start();

    let mut extras = Vec::new();
    if let Some(after) = rest.strip_prefix('[') {
        let close = after
            .find(']')
            .ok_or_else(|| format!("unclosed extras in '{}'", text))?;
        for extra in after[..close].split(',') {
            let extra = extra.trim();
            if extra.is_empty() {
                continue;
            }
            if !extra.chars().all(is_name_char) {
                return Err(format!("invalid extra '{}'", extra));
            }
            extras.push(normalize_name(extra));
        }
        rest = after[close + 1..].trim_start();
    }

    let (body, marker) = match rest.split_once(';') {
        Some((body, marker)) => (body.trim(), Some(marker.trim().to_string())),
        None => (rest.trim(), None),
    };
    if marker.as_deref() == Some("") {
        return Err(format!("empty environment marker in '{}'", text));
    }

    let mut url = None;
    let mut specifier = String::new();
    if let Some(location) = body.strip_prefix('@') {
        let location = location.trim();
        if location.is_empty() {
            return Err(format!("missing URL after '@' in '{}'", text));
        }
        url = Some(location.to_string());
    } else if !body.is_empty() {
        let spec = body
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(body)
            .trim();
        validate_specifier(spec)?;
        specifier = spec.split_whitespace().collect::<Vec<_>>().join("");
    }

    Ok(Requirement {
        name: normalize_name(raw_name),
        raw_name: raw_name.to_string(),
        extras,
        specifier,
        url,
        marker,
    })
}

/// Strip a pip comment: `#` at line start or after whitespace.
pub fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && i > 0 && bytes[i - 1].is_ascii_whitespace() {
            return &line[..i];
        }
    }
    line
}

/// Logical lines with continuations joined, tagged with their first line number.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (idx, raw) in text.lines().enumerate() {
        let line = strip_comment(raw);
        let (start, mut acc) = pending.take().unwrap_or((idx + 1, String::new()));
        match line.trim_end().strip_suffix('\\') {
            Some(head) => {
                acc.push_str(head);
                acc.push(' ');
                pending = Some((start, acc));
            }
            None => {
                acc.push_str(line);
                out.push((start, acc));
            }
        }
    }
    if let Some(last) = pending {
        out.push(last);
    }
    out
}

/// Read a requirements file, following `-r` includes.
pub fn read_requirements_file(path: &Path) -> Result<Vec<Requirement>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    read_into(path, &mut seen, &mut out)?;
    Ok(out)
}

fn manifest_err(path: &Path, line: usize, msg: impl std::fmt::Display) -> LanghostError {
    LanghostError::Manifest(format!("{}:{}: {}", path.display(), line, msg))
}

fn read_into(path: &Path, seen: &mut HashSet<PathBuf>, out: &mut Vec<Requirement>) -> Result<()> {
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if !seen.insert(canonical) {
        tracing::debug!("{} already included, skipping", path.display());
        return Ok(());
    }
    let text = std::fs::read_to_string(path).map_err(|e| {
        LanghostError::Manifest(format!("cannot read {}: {}", path.display(), e))
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    for (line_no, line) in logical_lines(&text) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(option) = line.strip_prefix('-') {
            let (flag, value) = match option.split_once(|c: char| c == '=' || c.is_whitespace()) {
                Some((flag, value)) => (flag, value.trim()),
                None => (option, ""),
            };
            match flag {
                "r" | "-requirement" => {
                    if value.is_empty() {
                        return Err(manifest_err(path, line_no, "-r needs a file name"));
                    }
                    read_into(&base.join(value), seen, out)
                        .map_err(|e| manifest_err(path, line_no, e))?;
                }
                "c" | "-constraint" | "i" | "-index-url" | "-extra-index-url" | "f"
                | "-find-links" | "-trusted-host" | "-no-binary" | "-only-binary"
                | "-pre" | "-prefer-binary" | "-no-index" | "-require-hashes" => {}
                "e" | "-editable" => {
                    tracing::debug!("{}:{}: editable install not tracked", path.display(), line_no);
                }
                _ => {
                    return Err(manifest_err(path, line_no, format!("unknown option '-{}'", flag)));
                }
            }
            continue;
        }

        // Bare paths and URLs install something we can't name without building it
        if line.starts_with('.') || line.starts_with('/') || (line.contains("://") && !line.contains('@')) {
            tracing::debug!("{}:{}: unnamed requirement '{}' skipped", path.display(), line_no, line);
            continue;
        }

        // Per-requirement options such as --hash trail the requirement itself
        let requirement = match line.find(" --") {
            Some(idx) => &line[..idx],
            None => line,
        };
        let parsed = parse_requirement(requirement).map_err(|e| manifest_err(path, line_no, e))?;
        out.push(parsed);
    }
    Ok(())
}

/// Dependencies declared in `pyproject.toml`, PEP 621 first, then Poetry.
pub fn read_pyproject(path: &Path) -> Result<Vec<Requirement>> {
    let text = std::fs::read_to_string(path)?;
    let doc: toml::Table = toml::from_str(&text)
        .map_err(|e| LanghostError::Manifest(format!("{}: {}", path.display(), e)))?;

    if let Some(deps) = doc
        .get("project")
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_array())
    {
        let mut out = Vec::with_capacity(deps.len());
        for (idx, dep) in deps.iter().enumerate() {
            let text = dep.as_str().ok_or_else(|| {
                LanghostError::Manifest(format!(
                    "{}: project.dependencies[{}] is not a string",
                    path.display(),
                    idx
                ))
            })?;
            out.push(parse_requirement(text).map_err(|e| {
                LanghostError::Manifest(format!(
                    "{}: project.dependencies[{}]: {}",
                    path.display(),
                    idx,
                    e
                ))
            })?);
        }
        return Ok(out);
    }

    let poetry = doc
        .get("tool")
        .and_then(|t| t.get("poetry"))
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_table());
    let Some(poetry) = poetry else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for (name, value) in poetry {
        if name == "python" {
            continue;
        }
        let version = match value {
            toml::Value::String(v) => v.clone(),
            toml::Value::Table(t) => t
                .get("version")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };
        // Poetry's bare versions are exact pins
        let specifier = if version.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            format!("=={}", version)
        } else if version == "*" {
            String::new()
        } else {
            version
        };
        out.push(Requirement {
            name: normalize_name(name),
            raw_name: name.clone(),
            extras: Vec::new(),
            specifier,
            url: None,
            marker: None,
        });
    }
    Ok(out)
}

/// Direct dependencies of the program in `dir`.
pub fn direct_requirements(dir: &Path) -> Result<Vec<Requirement>> {
    let requirements = dir.join(REQUIREMENTS_FILE);
    if requirements.is_file() {
        return read_requirements_file(&requirements);
    }
    let pyproject = dir.join(PYPROJECT_FILE);
    if pyproject.is_file() {
        return read_pyproject(&pyproject);
    }
    Ok(Vec::new())
}
