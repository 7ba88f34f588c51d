use serde::{Deserialize, Serialize};

use crate::error::{PackageError, Result};
use crate::sexp::Sexp;
use crate::version::Version;

/// How a package is distributed on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageKind {
    /// A single `.el` file carrying a library header.
    SingleFile,
    /// A tarball with a `<name>-pkg.el` descriptor.
    Bundle,
}

impl PackageKind {
    /// The symbol package clients expect in `archive-contents`.
    pub fn archive_symbol(self) -> &'static str {
        match self {
            PackageKind::SingleFile => "single",
            PackageKind::Bundle => "tar",
        }
    }
}

/// A dependency on another package at a minimum version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    pub version: Version,
}

/// Metadata extracted from one package artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub name: String,
    pub version: Version,
    pub requirements: Vec<Requirement>,
    pub summary: String,
    pub kind: PackageKind,
    /// Free-text description (the `Commentary` section, or a bundle README).
    pub commentary: Option<String>,
}

/// Converts a requirement list such as `((emacs "24.4") (dash "2.0"))`.
///
/// A requirement without a version means "any version" and is recorded as `0`.
pub fn parse_requirements(datum: &Sexp) -> Result<Vec<Requirement>> {
    let items = datum
        .unquote()
        .as_list()
        .ok_or_else(|| PackageError::InvalidRequirements(datum.to_string()))?;

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let (name, version) = match item {
            Sexp::Symbol(name) => (name.as_str(), None),
            Sexp::List(parts) => match parts.as_slice() {
                [Sexp::Symbol(name)] => (name.as_str(), None),
                [Sexp::Symbol(name), version, ..] => (name.as_str(), Some(version)),
                _ => return Err(PackageError::InvalidRequirements(item.to_string())),
            },
            _ => return Err(PackageError::InvalidRequirements(item.to_string())),
        };

        let version = match version {
            None => Version::new(vec![0])?,
            Some(Sexp::Str(text)) => Version::parse(text)?,
            Some(other) => version_from_list(other)
                .ok_or_else(|| PackageError::InvalidRequirements(item.to_string()))?,
        };
        out.push(Requirement {
            name: name.to_owned(),
            version,
        });
    }
    Ok(out)
}

// Already-normalized descriptors carry versions as integer lists: `(dash (2 0))`.
fn version_from_list(datum: &Sexp) -> Option<Version> {
    let items = datum.as_list()?;
    let components = items
        .iter()
        .map(|item| item.as_int().and_then(|v| u64::try_from(v).ok()))
        .collect::<Option<Vec<_>>>()?;
    Version::new(components).ok()
}
