//! Error types for the placer module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while writing artifacts to disk.
#[derive(Debug, Error)]
pub enum PlacerError {
    /// Source file not found.
    #[error("Source file not found: {path}")]
    SourceNotFound { path: PathBuf },

    /// Destination already exists; placement never overwrites.
    #[error("Destination already exists: {path}")]
    DestinationExists { path: PathBuf },

    /// Destination directory is missing and parent creation is disabled.
    #[error("Directory does not exist: {path}")]
    DirectoryMissing { path: PathBuf },

    /// Failed to create destination directory.
    #[error("Failed to create directory: {path}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or write the temporary staging file.
    #[error("Failed to write staged file {path}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to rename the staged file into place.
    #[error("Failed to move {from} to {to}")]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to read a copy source.
    #[error("Failed to read {path}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlacerError {
    pub fn write_failed(path: PathBuf, source: std::io::Error) -> Self {
        Self::WriteFailed { path, source }
    }

    pub fn move_failed(from: PathBuf, to: PathBuf, source: std::io::Error) -> Self {
        Self::MoveFailed { from, to, source }
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::WriteFailed { .. }
                | Self::MoveFailed { .. }
                | Self::ReadFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let io = || std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(PlacerError::write_failed(PathBuf::from("/a"), io()).is_retryable());
        assert!(
            PlacerError::move_failed(PathBuf::from("/a"), PathBuf::from("/b"), io()).is_retryable()
        );
        assert!(!PlacerError::DestinationExists { path: PathBuf::from("/a") }.is_retryable());
        assert!(!PlacerError::DirectoryMissing { path: PathBuf::from("/a") }.is_retryable());
    }
}
