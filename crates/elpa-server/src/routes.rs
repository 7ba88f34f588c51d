use elpa_archive::ArtifactExtensions;
use elpa_package::PackageKind;

/// What a request path under the archive prefix refers to.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ArchiveRoute<'a> {
    Contents,
    Readme {
        name: &'a str,
    },
    Artifact {
        name: &'a str,
        version: &'a str,
        kind: PackageKind,
    },
}

const README_SUFFIX: &str = "-readme.txt";

/// Parses the file name that follows the prefix (`archive-contents`,
/// `foo-readme.txt`, `foo-1.2.el`).
pub(crate) fn parse_archive_path<'a>(
    file: &'a str,
    extensions: &ArtifactExtensions,
) -> Option<ArchiveRoute<'a>> {
    if file.is_empty() || file.contains('/') {
        return None;
    }
    if file == elpa_archive::ARCHIVE_CONTENTS_FILENAME {
        return Some(ArchiveRoute::Contents);
    }
    if let Some(name) = file.strip_suffix(README_SUFFIX) {
        return (!name.is_empty()).then_some(ArchiveRoute::Readme { name });
    }

    let (stem, ext) = file.rsplit_once('.')?;
    let kind = extensions.kind_for(ext)?;
    // Versions never contain `-`, names may.
    let (name, version) = stem.rsplit_once('-')?;
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some(ArchiveRoute::Artifact {
        name,
        version,
        kind,
    })
}
