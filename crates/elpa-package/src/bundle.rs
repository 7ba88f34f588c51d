//! Parsing of bundle packages: a tarball laid out as
//! `<name>-<version>/<name>-pkg.el` plus the package's files.

use std::io::Read;
use std::path::{Component, Path};

use crate::descriptor::{parse_requirements, PackageDescriptor, PackageKind};
use crate::error::{PackageError, Result};
use crate::sexp::{self, Sexp};
use crate::version::Version;

const README_NAMES: [&str; 3] = ["README", "README.txt", "README.md"];

/// Reads the `define-package` form from a bundle tarball.
pub fn parse_bundle(reader: impl Read) -> Result<PackageDescriptor> {
    let mut archive = tar::Archive::new(reader);
    let mut descriptor_text: Option<String> = None;
    let mut readme: Option<String> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.into_owned();
        let Some(file_name) = top_level_file(&path) else {
            continue;
        };

        if descriptor_text.is_none() && file_name.ends_with("-pkg.el") {
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            descriptor_text = Some(text);
        } else if readme.is_none() && README_NAMES.contains(&file_name.as_str()) {
            let mut text = String::new();
            if entry.read_to_string(&mut text).is_ok() {
                readme = Some(text.trim().to_owned()).filter(|text| !text.is_empty());
            }
        }
    }

    let text = descriptor_text.ok_or(PackageError::MissingDescriptor)?;
    let mut descriptor = parse_define_package(&text)?;
    descriptor.commentary = readme;
    Ok(descriptor)
}

/// Parses `(define-package NAME VERSION SUMMARY REQUIREMENTS &rest PROPS)`.
pub fn parse_define_package(text: &str) -> Result<PackageDescriptor> {
    let forms = sexp::read_all(text)?;
    let form = forms
        .iter()
        .filter_map(Sexp::as_list)
        .find(|items| items.first().and_then(Sexp::as_symbol) == Some("define-package"))
        .ok_or(PackageError::MissingDescriptor)?;

    let name = form
        .get(1)
        .and_then(Sexp::as_str)
        .ok_or(PackageError::InvalidDescriptor("name must be a string"))?;
    let version = form
        .get(2)
        .and_then(Sexp::as_str)
        .ok_or(PackageError::InvalidDescriptor("version must be a string"))?;
    let summary = match form.get(3) {
        Some(Sexp::Str(summary)) => summary.clone(),
        Some(other) if other.is_nil() => String::new(),
        None => String::new(),
        Some(_) => return Err(PackageError::InvalidDescriptor("summary must be a string")),
    };
    let requirements = match form.get(4) {
        Some(datum) => parse_requirements(datum)?,
        None => Vec::new(),
    };

    Ok(PackageDescriptor {
        name: name.to_owned(),
        version: Version::parse(version)?,
        requirements,
        summary,
        kind: PackageKind::Bundle,
        commentary: None,
    })
}

// Only files directly inside the bundle's top-level directory are considered.
fn top_level_file(path: &Path) -> Option<String> {
    let parts: Vec<_> = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    match parts.as_slice() {
        [Component::Normal(_dir), Component::Normal(file)] => {
            Some(file.to_string_lossy().into_owned())
        }
        _ => None,
    }
}
