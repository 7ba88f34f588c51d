pub type Result<T> = std::result::Result<T, PackageError>;

/// Errors produced while reading package metadata.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid version string {0:?}")]
    InvalidVersion(String),

    #[error("package lacks a `;;; <name>.el --- <summary>` header line")]
    MissingHeader,

    #[error("package {name} lacks a terminating `;;; {name}.el ends here` line")]
    MissingTerminator { name: String },

    #[error("package {name} has no Version or Package-Version header")]
    MissingVersion { name: String },

    #[error("malformed requirements: {0}")]
    InvalidRequirements(String),

    #[error("lisp read error at byte {offset}: {message}")]
    Read { offset: usize, message: &'static str },

    #[error("bundle does not contain a <name>-pkg.el descriptor")]
    MissingDescriptor,

    #[error("malformed define-package form: {0}")]
    InvalidDescriptor(&'static str),
}
