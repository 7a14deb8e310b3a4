//! Pack: reproducible source distributions of a Python package directory

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use walkdir::{DirEntry, WalkDir};

use super::requirements::{normalize_name, PYPROJECT_FILE};
use crate::{LanghostError, Result};

const SKIPPED_DIRS: [&str; 5] = ["__pycache__", ".git", "venv", ".venv", ".mypy_cache"];

/// `[project]` name and version of `pyproject.toml`
fn project_identity(package_dir: &Path) -> Result<(String, String)> {
    let path = package_dir.join(PYPROJECT_FILE);
    let text = std::fs::read_to_string(&path)
        .map_err(|e| LanghostError::Manifest(format!("{}: {}", path.display(), e)))?;
    let doc: toml::Table = toml::from_str(&text)?;
    let project = doc.get("project").and_then(|p| p.as_table());
    let field = |key: &str| {
        project
            .and_then(|p| p.get(key))
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                LanghostError::Manifest(format!("{}: missing project.{}", path.display(), key))
            })
    };
    Ok((field("name")?, field("version")?))
}

fn is_noise(entry: &DirEntry, destination: Option<&Path>) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        if SKIPPED_DIRS.contains(&name.as_ref()) {
            return true;
        }
        if let Some(dest) = destination {
            if entry.path().canonicalize().is_ok_and(|p| p == dest) {
                return true;
            }
        }
        return false;
    }
    name.ends_with(".pyc")
}

/// Write a deterministic tarball of `package_dir` to `out`.
fn write_archive(
    package_dir: &Path,
    prefix: &str,
    destination: Option<&Path>,
    out: &mut GzEncoder<File>,
) -> Result<usize> {
    let mut builder = tar::Builder::new(out);
    builder.mode(tar::HeaderMode::Deterministic);
    let mut entries = 0;

    let walker = WalkDir::new(package_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_noise(e, destination));
    for entry in walker {
        let entry = entry.map_err(|e| LanghostError::Io(e.into()))?;
        let Ok(relative) = entry.path().strip_prefix(package_dir) else {
            continue;
        };
        let archive_path = Path::new(prefix).join(relative);

        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        if entry.file_type().is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, &archive_path, std::io::empty())?;
        } else if entry.file_type().is_file() {
            let metadata = entry.metadata().map_err(|e| LanghostError::Io(e.into()))?;
            let executable = {
                use std::os::unix::fs::PermissionsExt;
                metadata.permissions().mode() & 0o111 != 0
            };
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(if executable { 0o755 } else { 0o644 });
            header.set_size(metadata.len());
            builder.append_data(&mut header, &archive_path, File::open(entry.path())?)?;
        } else {
            tracing::debug!("pack: skipping {}", entry.path().display());
            continue;
        }
        entries += 1;
    }
    builder.finish()?;
    Ok(entries)
}

/// Pack `package_dir` into `<destination>/<name>-<version>.tar.gz`.
pub fn pack(package_dir: &Path, destination: &Path) -> Result<PathBuf> {
    let (name, version) = project_identity(package_dir)?;
    let stem = format!("{}-{}", normalize_name(&name).replace('-', "_"), version);

    std::fs::create_dir_all(destination)?;
    let artifact = destination.join(format!("{}.tar.gz", stem));
    let staging = destination.join(format!(".{}.tar.gz.tmp", stem));
    let destination_canonical = destination.canonicalize().ok();

    let file = File::create(&staging)?;
    let mut gz = GzBuilder::new().mtime(0).write(file, Compression::default());
    let written = write_archive(package_dir, &stem, destination_canonical.as_deref(), &mut gz)
        .and_then(|entries| {
            let mut file = gz.finish()?;
            file.flush()?;
            file.sync_all()?;
            Ok(entries)
        });
    let entries = match written {
        Ok(entries) => entries,
        Err(e) => {
            let _ = std::fs::remove_file(&staging);
            return Err(e);
        }
    };
    std::fs::rename(&staging, &artifact)?;

    tracing::info!("packed {} entries into {}", entries, artifact.display());
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    fn package(dir: &Path) {
        std::fs::write(
            dir.join("pyproject.toml"),
            "[project]\nname = \"langhost-random\"\nversion = \"4.2.0\"\n",
        )
        .unwrap();
        std::fs::create_dir_all(dir.join("langhost_random/__pycache__")).unwrap();
        std::fs::write(dir.join("langhost_random/__init__.py"), "X = 1\n").unwrap();
        std::fs::write(dir.join("langhost_random/__pycache__/x.pyc"), "junk").unwrap();
        std::fs::write(dir.join("langhost_random/stale.pyc"), "junk").unwrap();
        std::fs::create_dir_all(dir.join("venv/bin")).unwrap();
        std::fs::write(dir.join("venv/bin/python"), "").unwrap();
    }

    fn digest(path: &Path) -> Vec<u8> {
        Sha256::digest(std::fs::read(path).unwrap()).to_vec()
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let file = File::open(path).unwrap();
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect()
    }

    #[test]
    fn artifact_is_named_from_pyproject_and_skips_noise() {
        let tmp = tempfile::tempdir().unwrap();
        let pkg = tmp.path().join("pkg");
        std::fs::create_dir_all(&pkg).unwrap();
        package(&pkg);
        let dest = pkg.join("dist");

        let artifact = pack(&pkg, &dest).unwrap();
        assert_eq!(artifact, dest.join("langhost_random-4.2.0.tar.gz"));
        assert_eq!(
            entry_names(&artifact),
            [
                "langhost_random-4.2.0/langhost_random",
                "langhost_random-4.2.0/langhost_random/__init__.py",
                "langhost_random-4.2.0/pyproject.toml",
            ]
        );
        assert!(!pkg.join("dist").join(".langhost_random-4.2.0.tar.gz.tmp").exists());
    }

    #[test]
    fn repeated_packs_are_byte_identical() {
        let tmp = tempfile::tempdir().unwrap();
        let pkg = tmp.path().join("pkg");
        std::fs::create_dir_all(&pkg).unwrap();
        package(&pkg);

        let first = pack(&pkg, &tmp.path().join("a")).unwrap();
        // Touch a file without changing it
        std::fs::write(pkg.join("langhost_random/__init__.py"), "X = 1\n").unwrap();
        let second = pack(&pkg, &tmp.path().join("b")).unwrap();
        assert_eq!(digest(&first), digest(&second));

        std::fs::write(pkg.join("langhost_random/__init__.py"), "X = 2\n").unwrap();
        let third = pack(&pkg, &tmp.path().join("c")).unwrap();
        assert_ne!(digest(&first), digest(&third));
    }

    #[test]
    fn missing_version_is_a_manifest_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("pyproject.toml"), "[project]\nname = \"x\"\n").unwrap();
        let err = pack(tmp.path(), &tmp.path().join("out")).unwrap_err();
        assert!(matches!(err, LanghostError::Manifest(_)));
        assert!(!tmp.path().join("out").exists());
    }
}
