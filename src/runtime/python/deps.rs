//! Dependency view of one program: what it asks for, and what is installed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::requirements::{direct_requirements, Requirement};
use super::site_packages::{self, closure, Distribution};
use crate::protocol::{DependencyInfo, PackageDependency};
use crate::Result;

pub struct DependencyView {
    pub direct: Vec<Requirement>,
    pub installed: BTreeMap<String, Distribution>,
}

impl DependencyView {
    pub fn load(program_dir: &Path, venv: &Path) -> Result<Self> {
        let direct = direct_requirements(program_dir)?;
        let installed = site_packages::installed(venv);
        tracing::debug!(
            "{}: {} direct requirements, {} installed distributions",
            program_dir.display(),
            direct.len(),
            installed.len()
        );
        Ok(Self { direct, installed })
    }

    fn version_of(&self, name: &str) -> String {
        if let Some(dist) = self.installed.get(name) {
            return dist.version.clone();
        }
        self.direct
            .iter()
            .find(|r| r.name == name)
            .and_then(|r| r.pinned_version())
            .unwrap_or_default()
            .to_string()
    }

    fn direct_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.direct.iter().map(|r| r.name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn transitive_names(&self) -> BTreeSet<String> {
        closure(&self.direct_names(), &self.installed)
    }

    pub fn dependencies(&self, transitive: bool) -> Vec<DependencyInfo> {
        let names: Vec<String> = if transitive {
            self.transitive_names().into_iter().collect()
        } else {
            self.direct_names()
        };
        names
            .into_iter()
            .map(|name| DependencyInfo {
                version: self.version_of(&name),
                name,
            })
            .collect()
    }

    /// Resource packages among the installed transitive closure
    pub fn packages(&self) -> Result<Vec<PackageDependency>> {
        let mut packages = Vec::new();
        for name in self.transitive_names() {
            let Some(dist) = self.installed.get(&name) else {
                continue;
            };
            if let Some(package) = site_packages::package_dependency(dist)? {
                packages.push(package);
            }
        }
        Ok(packages)
    }
}

#[cfg(test)]
mod tests {
    use super::super::site_packages::fixtures::{install, mark_plugin};
    use super::*;

    fn program() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("requirements.txt"),
            "requests>=2\nlanghost-aws\nrequests\nleftpad==1.0.2\n",
        )
        .unwrap();
        let venv = dir.path().join("venv");
        install(&venv, "requests", "2.31.0", &["idna"]);
        install(&venv, "idna", "3.4", &[]);
        install(&venv, "langhost-aws", "6.1.0", &["langhost"]);
        install(&venv, "langhost", "3.2.0", &[]);
        mark_plugin(&venv, "langhost_aws", r#"{"resource": true, "server": "https://get.example"}"#);
        (dir, venv)
    }

    #[test]
    fn direct_is_a_subset_of_transitive() {
        let (dir, venv) = program();
        let view = DependencyView::load(dir.path(), &venv).unwrap();

        let direct = view.dependencies(false);
        let names: Vec<_> = direct.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["langhost-aws", "leftpad", "requests"]);
        // Not installed, so the pin is the best answer
        assert_eq!(direct[1].version, "1.0.2");

        let transitive = view.dependencies(true);
        for dep in &direct {
            assert!(transitive.contains(dep), "{} missing", dep.name);
        }
        assert!(transitive.iter().any(|d| d.name == "idna" && d.version == "3.4"));
        assert!(transitive.iter().any(|d| d.name == "langhost"));
    }

    #[test]
    fn packages_come_from_plugin_markers() {
        let (dir, venv) = program();
        let view = DependencyView::load(dir.path(), &venv).unwrap();
        let packages = view.packages().unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "aws");
        assert_eq!(packages[0].server, "https://get.example");
    }
}
