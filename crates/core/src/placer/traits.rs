//! Trait definitions for the placer module.

use async_trait::async_trait;
use std::path::Path;

use super::error::PlacerError;
use super::staged::StagedFile;
use super::types::PlacedFile;

/// Filesystem seam used by the orchestrator.
///
/// Artifacts are written into a hidden staging file next to their
/// destination and renamed into place, so no final-named file is ever
/// visible with partial content.
#[async_trait]
pub trait Placer: Send + Sync {
    /// Returns the name of this placer implementation.
    fn name(&self) -> &str;

    /// Opens a staging file inside `dir`.
    async fn stage(&self, dir: &Path) -> Result<StagedFile, PlacerError>;

    /// Moves a staged file to `destination`.
    ///
    /// Fails with [`PlacerError::DestinationExists`] rather than overwrite.
    /// On failure the staged content is kept so the caller can retry with
    /// another name; dropping the [`StagedFile`] discards it.
    async fn commit(
        &self,
        staged: &mut StagedFile,
        destination: &Path,
    ) -> Result<PlacedFile, PlacerError>;

    /// Copies an already placed file to a second destination.
    async fn copy(&self, from: &Path, to: &Path) -> Result<PlacedFile, PlacerError>;
}
