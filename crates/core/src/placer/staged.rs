//! Temporary staging file.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use super::error::PlacerError;

/// A hidden `.part` file receiving artifact bytes.
///
/// The file is removed on drop unless it was committed, which covers
/// cancellation mid-download as well as explicit failures.
pub struct StagedFile {
    temp_path: PathBuf,
    writer: Option<BufWriter<File>>,
    hasher: Sha256,
    bytes_written: u64,
    committed: bool,
}

impl StagedFile {
    pub(crate) async fn create(dir: &Path, buffer_size: usize) -> Result<Self, PlacerError> {
        let temp_path = dir.join(format!(".genvoy-{}.part", uuid::Uuid::new_v4()));
        let file = File::options()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await
            .map_err(|e| PlacerError::write_failed(temp_path.clone(), e))?;

        Ok(Self {
            temp_path,
            writer: Some(BufWriter::with_capacity(buffer_size, file)),
            hasher: Sha256::new(),
            bytes_written: 0,
            committed: false,
        })
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Appends a chunk.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), PlacerError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| closed_error(&self.temp_path))?;
        writer
            .write_all(chunk)
            .await
            .map_err(|e| PlacerError::write_failed(self.temp_path.clone(), e))?;
        self.hasher.update(chunk);
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    /// Flushes buffered bytes and syncs the file; idempotent.
    pub(crate) async fn finish_writes(&mut self) -> Result<(), PlacerError> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .await
                .map_err(|e| PlacerError::write_failed(self.temp_path.clone(), e))?;
            writer
                .get_mut()
                .sync_all()
                .await
                .map_err(|e| PlacerError::write_failed(self.temp_path.clone(), e))?;
        }
        Ok(())
    }

    /// Marks the file as renamed away and returns its size and digest.
    pub(crate) fn mark_committed(&mut self) -> (u64, String) {
        self.committed = true;
        let digest = std::mem::take(&mut self.hasher).finalize();
        (self.bytes_written, format!("{:x}", digest))
    }
}

fn closed_error(path: &Path) -> PlacerError {
    PlacerError::write_failed(
        path.to_path_buf(),
        std::io::Error::new(std::io::ErrorKind::Other, "staged file already closed"),
    )
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.writer.take());
        if let Err(e) = std::fs::remove_file(&self.temp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    "Failed to remove staged file {}: {}",
                    self.temp_path.display(),
                    e
                );
            }
        }
    }
}

impl std::fmt::Debug for StagedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedFile")
            .field("temp_path", &self.temp_path)
            .field("bytes_written", &self.bytes_written)
            .field("committed", &self.committed)
            .finish()
    }
}
