//! Types for the placer module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Information about a file written into its final location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedFile {
    /// Final destination path.
    pub path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the content.
    pub sha256: String,
}
