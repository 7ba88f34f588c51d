use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use elpa_package::{PackageDescriptor, PackageError, PackageKind};

use crate::discovery::Candidate;
use crate::error::ExtractionError;

/// Commentary used when a repaired single-file package has none.
pub const NO_COMMENTARY: &str = "No commentary.";

/// The package-format library used to read artifact metadata.
pub trait MetadataParser: Send + Sync + fmt::Debug {
    fn parse_single_file(&self, source: &str) -> elpa_package::Result<PackageDescriptor>;

    fn parse_bundle(&self, bundle: &mut dyn Read) -> elpa_package::Result<PackageDescriptor>;
}

/// [`MetadataParser`] backed by `elpa-package`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ElispMetadataParser;

impl MetadataParser for ElispMetadataParser {
    fn parse_single_file(&self, source: &str) -> elpa_package::Result<PackageDescriptor> {
        elpa_package::parse_single_file(source)
    }

    fn parse_bundle(&self, bundle: &mut dyn Read) -> elpa_package::Result<PackageDescriptor> {
        elpa_package::parse_bundle(bundle)
    }
}

/// Reads the descriptor of one candidate artifact.
///
/// The artifact is opened for the duration of this call only. A single-file
/// package missing its `ends here` line is re-read with the line appended and
/// gets a best-effort commentary.
///
/// The declared name and version must spell the candidate's directories
/// exactly, since downloads are located from the indexed descriptor.
pub fn extract(
    parser: &dyn MetadataParser,
    candidate: &Candidate,
) -> Result<PackageDescriptor, ExtractionError> {
    let path = &candidate.path;
    let io_err = |source| ExtractionError::Io {
        path: path.clone(),
        source,
    };
    let parse_err = |source| ExtractionError::Parse {
        path: path.clone(),
        source,
    };

    let descriptor = match candidate.kind {
        PackageKind::SingleFile => {
            let source = std::fs::read_to_string(path).map_err(io_err)?;
            match parser.parse_single_file(&source) {
                Err(PackageError::MissingTerminator { name }) => {
                    tracing::debug!(
                        target: "elpa.archive",
                        path = %path.display(),
                        "package lacks a terminating comment; repairing"
                    );
                    repair_single_file(parser, &source, &name).map_err(parse_err)?
                }
                other => other.map_err(parse_err)?,
            }
        }
        PackageKind::Bundle => {
            let file = File::open(path).map_err(io_err)?;
            let mut reader = BufReader::new(file);
            parser.parse_bundle(&mut reader).map_err(parse_err)?
        }
    };

    if descriptor.name != candidate.name {
        return Err(ExtractionError::NameMismatch {
            path: path.clone(),
            expected: candidate.name.clone(),
            found: descriptor.name,
        });
    }
    let version = descriptor.version.to_string();
    if version != candidate.version_dir {
        return Err(ExtractionError::VersionMismatch {
            path: path.clone(),
            directory: candidate.version_dir.clone(),
            found: version,
        });
    }
    Ok(descriptor)
}

fn repair_single_file(
    parser: &dyn MetadataParser,
    source: &str,
    name: &str,
) -> elpa_package::Result<PackageDescriptor> {
    let mut repaired = String::with_capacity(source.len() + name.len() + 20);
    repaired.push_str(source);
    if !repaired.ends_with('\n') {
        repaired.push('\n');
    }
    repaired.push_str(&elpa_package::terminator_line(name));
    repaired.push('\n');

    let mut descriptor = parser.parse_single_file(&repaired)?;
    descriptor.commentary = Some(best_effort_commentary(source));
    Ok(descriptor)
}

/// The `;;; Commentary:` block of `source`, or [`NO_COMMENTARY`].
pub fn best_effort_commentary(source: &str) -> String {
    elpa_package::commentary(source).unwrap_or_else(|| NO_COMMENTARY.to_owned())
}

/// Runs [`extract`] on a helper thread and gives up after `timeout`.
///
/// A hung extraction leaves its thread behind; the caller moves on.
pub fn extract_with_timeout(
    parser: Arc<dyn MetadataParser>,
    candidate: &Candidate,
    timeout: Duration,
) -> Result<PackageDescriptor, ExtractionError> {
    let (tx, rx) = mpsc::sync_channel(1);
    let job = candidate.clone();
    std::thread::Builder::new()
        .name("elpa-extract".to_owned())
        .spawn(move || {
            let _ = tx.send(extract(parser.as_ref(), &job));
        })
        .map_err(|source| ExtractionError::Io {
            path: candidate.path.clone(),
            source,
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(ExtractionError::TimedOut {
            path: candidate.path.clone(),
            timeout,
        }),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(ExtractionError::Panicked {
            path: candidate.path.clone(),
        }),
    }
}
