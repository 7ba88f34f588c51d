use std::path::{Path, PathBuf};

use elpa_package::PackageKind;

use crate::error::{ArchiveError, Result};

/// File extensions that mark package artifacts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactExtensions {
    pub single_file: String,
    pub bundle: String,
}

impl Default for ArtifactExtensions {
    fn default() -> Self {
        Self {
            single_file: "el".to_owned(),
            bundle: "tar".to_owned(),
        }
    }
}

impl ArtifactExtensions {
    pub fn kind_for(&self, ext: &str) -> Option<PackageKind> {
        if ext == self.single_file {
            Some(PackageKind::SingleFile)
        } else if ext == self.bundle {
            Some(PackageKind::Bundle)
        } else {
            None
        }
    }

    pub fn extension_for(&self, kind: PackageKind) -> &str {
        match kind {
            PackageKind::SingleFile => &self.single_file,
            PackageKind::Bundle => &self.bundle,
        }
    }
}

/// A file laid out as `<name>/<version>/<name>.<ext>` under the root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub version_dir: String,
    pub path: PathBuf,
    pub kind: PackageKind,
}

/// Lists candidate artifacts under `root`.
///
/// Failing to list the root itself, or a root that is not a directory, is a
/// [`ArchiveError::Scan`]; unreadable entries further down are logged and
/// skipped. Candidates are ordered by path.
pub fn discover(root: &Path, extensions: &ArtifactExtensions) -> Result<Vec<Candidate>> {
    let mut out = Vec::new();
    let walker = walkdir::WalkDir::new(root)
        .follow_links(false)
        .max_depth(3)
        .into_iter();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(ArchiveError::Scan {
                    root: root.to_path_buf(),
                    source: err.into(),
                });
            }
            Err(err) => {
                tracing::warn!(
                    target: "elpa.archive",
                    path = %err.path().map(|p| p.display().to_string()).unwrap_or_default(),
                    error = %err,
                    "skipping unreadable entry under repository root"
                );
                continue;
            }
        };

        if entry.depth() == 0 && !entry.file_type().is_dir() {
            return Err(ArchiveError::Scan {
                root: root.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "repository root is not a directory",
                ),
            });
        }
        if entry.depth() != 3 || !entry.file_type().is_file() {
            continue;
        }
        if let Some(candidate) = classify(entry.path(), extensions) {
            out.push(candidate);
        }
    }

    // Equal versions keep the first merged, so rebuilds must agree on order.
    out.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(
        target: "elpa.archive",
        root = %root.display(),
        candidates = out.len(),
        "discovered package artifacts"
    );
    Ok(out)
}

fn classify(path: &Path, extensions: &ArtifactExtensions) -> Option<Candidate> {
    let stem = path.file_stem()?.to_str()?;
    let kind = extensions.kind_for(path.extension()?.to_str()?)?;
    let version_dir = path.parent()?;
    let name_dir = version_dir.parent()?;

    if name_dir.file_name()?.to_str()? != stem {
        return None;
    }

    Some(Candidate {
        name: stem.to_owned(),
        version_dir: version_dir.file_name()?.to_str()?.to_owned(),
        path: path.to_path_buf(),
        kind,
    })
}
