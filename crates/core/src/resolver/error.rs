use std::path::PathBuf;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error)]
pub enum PathError {
    /// Resolved path lies outside the allowed root.
    #[error("Resolved path '{resolved}' is outside allowed root '{root}'")]
    Escape { resolved: PathBuf, root: PathBuf },

    /// The allowed root could not be canonicalised.
    #[error("Invalid allowed root {path}")]
    InvalidRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A directory-style hint was not a plain file name.
    #[error("Invalid file name hint: {0:?}")]
    InvalidFileName(String),

    /// The target names an existing directory.
    #[error("Target is a directory: {0}")]
    IsDirectory(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
