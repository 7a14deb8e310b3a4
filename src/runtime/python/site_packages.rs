//! Installed distributions
//!
//! Scans a virtualenv's `site-packages` for `*.dist-info` directories and
//! reads their `METADATA`. Packages that carry a `langhost-plugin.json`
//! next to their code are the program's required packages.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use super::requirements::{normalize_name, parse_requirement};
use crate::protocol::{PackageDependency, PackageParameterization};
use crate::Result;

pub const PLUGIN_MARKER: &str = "langhost-plugin.json";
const SDK_PREFIX: &str = "langhost-";

/// One installed distribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    /// Normalized name
    pub name: String,
    pub version: String,
    /// Normalized names of unconditional requirements
    pub requires: Vec<String>,
    /// Directory holding the package's importable code
    pub site_packages: PathBuf,
    pub top_level: Vec<String>,
}

impl Distribution {
    /// Plugin marker shipped inside the package, if any
    pub fn plugin_marker(&self) -> Option<PathBuf> {
        self.top_level
            .iter()
            .map(|module| self.site_packages.join(module).join(PLUGIN_MARKER))
            .find(|path| path.is_file())
    }
}

/// `site-packages` directories of a virtualenv
pub fn site_packages_dirs(venv: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for lib in ["lib", "lib64"] {
        let Ok(entries) = std::fs::read_dir(venv.join(lib)) else {
            continue;
        };
        let mut found: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("python"))
            .map(|e| e.path().join("site-packages"))
            .filter(|p| p.is_dir())
            .collect();
        found.sort();
        dirs.extend(found);
    }
    dirs
}

/// Requirement names from `Requires-Dist` headers, excluding extra-only ones
fn unconditional_requirement(value: &str) -> Option<String> {
    let req = parse_requirement(value).ok()?;
    if req.marker.as_deref().is_some_and(|m| m.contains("extra")) {
        return None;
    }
    Some(req.name)
}

/// Parse the header block of a `METADATA` file.
pub fn parse_metadata(text: &str) -> Option<(String, String, Vec<String>)> {
    let mut name = None;
    let mut version = None;
    let mut requires = Vec::new();
    for line in text.lines() {
        // Headers end at the first blank line; the description follows
        if line.is_empty() {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Name" => name = Some(value.to_string()),
            "Version" => version = Some(value.to_string()),
            "Requires-Dist" => {
                if let Some(req) = unconditional_requirement(value) {
                    requires.push(req);
                }
            }
            _ => {}
        }
    }
    Some((name?, version?, requires))
}

fn read_distribution(site_packages: &Path, dist_info: &Path) -> Option<Distribution> {
    let text = std::fs::read_to_string(dist_info.join("METADATA")).ok()?;
    let (raw_name, version, mut requires) = parse_metadata(&text)?;
    requires.sort();
    requires.dedup();

    let top_level = match std::fs::read_to_string(dist_info.join("top_level.txt")) {
        Ok(text) => text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => vec![raw_name.replace(['-', '.'], "_").to_lowercase()],
    };

    Some(Distribution {
        name: normalize_name(&raw_name),
        version,
        requires,
        site_packages: site_packages.to_path_buf(),
        top_level,
    })
}

/// Every distribution installed in `venv`, keyed by normalized name.
pub fn installed(venv: &Path) -> BTreeMap<String, Distribution> {
    let mut out = BTreeMap::new();
    for dir in site_packages_dirs(venv) {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() || path.extension().is_none_or(|ext| ext != "dist-info") {
                continue;
            }
            match read_distribution(&dir, &path) {
                Some(dist) => {
                    out.insert(dist.name.clone(), dist);
                }
                None => tracing::debug!("unreadable metadata in {}", path.display()),
            }
        }
    }
    out
}

/// Names reachable from `roots` through installed requirements, roots included.
pub fn closure(roots: &[String], installed: &BTreeMap<String, Distribution>) -> BTreeSet<String> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = roots.iter().cloned().collect();
    while let Some(name) = queue.pop_front() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(dist) = installed.get(&name) {
            queue.extend(dist.requires.iter().filter(|r| !seen.contains(*r)).cloned());
        }
    }
    seen
}

#[derive(Debug, Deserialize)]
struct PluginMarker {
    #[serde(default)]
    resource: bool,
    name: Option<String>,
    version: Option<String>,
    server: Option<String>,
    parameterization: Option<MarkerParameterization>,
}

#[derive(Debug, Deserialize)]
struct MarkerParameterization {
    name: String,
    version: String,
    #[serde(default)]
    value: String,
}

/// Package dependency declared by a distribution's plugin marker.
///
/// `Ok(None)` when the distribution has no marker or isn't a resource package.
pub fn package_dependency(dist: &Distribution) -> Result<Option<PackageDependency>> {
    let Some(marker_path) = dist.plugin_marker() else {
        return Ok(None);
    };
    let marker: PluginMarker = serde_json::from_str(&std::fs::read_to_string(&marker_path)?)
        .map_err(|e| {
            crate::LanghostError::Manifest(format!("{}: {}", marker_path.display(), e))
        })?;
    if !marker.resource {
        return Ok(None);
    }

    let name = marker.name.unwrap_or_else(|| {
        dist.name
            .strip_prefix(SDK_PREFIX)
            .unwrap_or(&dist.name)
            .to_string()
    });
    Ok(Some(PackageDependency {
        name,
        kind: "resource".to_string(),
        version: marker.version.unwrap_or_else(|| dist.version.clone()),
        server: marker.server.unwrap_or_default(),
        checksums: BTreeMap::new(),
        parameterization: marker.parameterization.map(|p| PackageParameterization {
            name: p.name,
            version: p.version,
            value: p.value,
        }),
    }))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::{Path, PathBuf};

    /// Fake virtualenv layout: `<venv>/lib/python3.12/site-packages`
    pub fn site_packages(venv: &Path) -> PathBuf {
        let dir = venv.join("lib").join("python3.12").join("site-packages");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn install(venv: &Path, name: &str, version: &str, requires: &[&str]) {
        let site = site_packages(venv);
        let dist_info = site.join(format!("{}-{}.dist-info", name.replace('-', "_"), version));
        std::fs::create_dir_all(&dist_info).unwrap();
        let mut metadata = format!("Metadata-Version: 2.1\nName: {}\nVersion: {}\n", name, version);
        for req in requires {
            metadata.push_str(&format!("Requires-Dist: {}\n", req));
        }
        metadata.push_str("\nLong description: ignored\nName: not-a-header\n");
        std::fs::write(dist_info.join("METADATA"), metadata).unwrap();
    }

    pub fn mark_plugin(venv: &Path, module: &str, marker: &str) {
        let dir = site_packages(venv).join(module);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(super::PLUGIN_MARKER), marker).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn metadata_headers_stop_at_body() {
        let (name, version, requires) = parse_metadata(
            "Name: Requests\nVersion: 2.31.0\nRequires-Dist: idna (<4,>=2.5)\n\
             Requires-Dist: PySocks (!=1.5.7,>=1.5.6) ; extra == 'socks'\n\nName: body\n",
        )
        .unwrap();
        assert_eq!(name, "Requests");
        assert_eq!(version, "2.31.0");
        assert_eq!(requires, ["idna"]);
    }

    #[test]
    fn scans_installed_distributions() {
        let venv = tempfile::tempdir().unwrap();
        install(venv.path(), "requests", "2.31.0", &["idna>=2.5", "urllib3<3"]);
        install(venv.path(), "idna", "3.4", &[]);

        let dists = installed(venv.path());
        assert_eq!(dists.len(), 2);
        assert_eq!(dists["requests"].requires, ["idna", "urllib3"]);
        assert_eq!(dists["idna"].version, "3.4");
    }

    #[test]
    fn closure_follows_requirements_and_keeps_roots() {
        let venv = tempfile::tempdir().unwrap();
        install(venv.path(), "requests", "2.31.0", &["idna", "certifi"]);
        install(venv.path(), "idna", "3.4", &[]);
        install(venv.path(), "certifi", "2024.2.2", &[]);
        install(venv.path(), "unrelated", "1.0", &[]);

        let dists = installed(venv.path());
        let names = closure(&["requests".to_string(), "missing".to_string()], &dists);
        let names: Vec<_> = names.into_iter().collect();
        assert_eq!(names, ["certifi", "idna", "missing", "requests"]);
    }

    #[test]
    fn plugin_marker_yields_package() {
        let venv = tempfile::tempdir().unwrap();
        install(venv.path(), "langhost-aws", "6.1.0", &[]);
        mark_plugin(venv.path(), "langhost_aws", r#"{"resource": true}"#);
        install(venv.path(), "langhost-tools", "1.0.0", &[]);
        mark_plugin(venv.path(), "langhost_tools", r#"{"resource": false}"#);

        let dists = installed(venv.path());
        let aws = package_dependency(&dists["langhost-aws"]).unwrap().unwrap();
        assert_eq!(aws.name, "aws");
        assert_eq!(aws.version, "6.1.0");
        assert_eq!(aws.kind, "resource");
        assert!(package_dependency(&dists["langhost-tools"]).unwrap().is_none());
    }

    #[test]
    fn malformed_marker_is_a_manifest_error() {
        let venv = tempfile::tempdir().unwrap();
        install(venv.path(), "langhost-bad", "1.0.0", &[]);
        mark_plugin(venv.path(), "langhost_bad", "{not json");
        let dists = installed(venv.path());
        assert!(matches!(
            package_dependency(&dists["langhost-bad"]),
            Err(crate::LanghostError::Manifest(_))
        ));
    }
}
