//! Metadata parsing for Emacs Lisp packages.
//!
//! Two distribution formats are understood:
//! - single-file packages (`<name>.el`) described by their library header
//! - bundles (`<name>.tar`) described by a `<name>-pkg.el` `define-package` form
//!
//! The [`sexp`] module also prints the Lisp data used by `archive-contents`.

#![forbid(unsafe_code)]

mod bundle;
mod descriptor;
mod error;
mod header;
pub mod sexp;
mod version;

pub use crate::bundle::{parse_bundle, parse_define_package};
pub use crate::descriptor::{parse_requirements, PackageDescriptor, PackageKind, Requirement};
pub use crate::error::{PackageError, Result};
pub use crate::header::{commentary, header_line, parse_single_file, terminator_line};
pub use crate::version::Version;
