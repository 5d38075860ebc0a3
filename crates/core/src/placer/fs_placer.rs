//! File system placer implementation.

use async_trait::async_trait;
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, BufReader};

use super::config::PlacerConfig;
use super::error::PlacerError;
use super::staged::StagedFile;
use super::traits::Placer;
use super::types::PlacedFile;

/// File system based placer implementation.
pub struct FsPlacer {
    config: PlacerConfig,
}

impl FsPlacer {
    /// Creates a new file system placer with the given configuration.
    pub fn new(config: PlacerConfig) -> Self {
        Self { config }
    }

    /// Creates a placer with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(PlacerConfig::default())
    }

    /// Makes sure `dir` exists, creating it when allowed.
    async fn ensure_dir(&self, dir: &Path) -> Result<(), PlacerError> {
        if fs::try_exists(dir).await.unwrap_or(false) {
            return Ok(());
        }
        if !self.config.create_parents {
            return Err(PlacerError::DirectoryMissing {
                path: dir.to_path_buf(),
            });
        }
        fs::create_dir_all(dir)
            .await
            .map_err(|e| PlacerError::DirectoryCreationFailed {
                path: dir.to_path_buf(),
                source: e,
            })
    }
}

#[async_trait]
impl Placer for FsPlacer {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn stage(&self, dir: &Path) -> Result<StagedFile, PlacerError> {
        self.ensure_dir(dir).await?;
        let staged = StagedFile::create(dir, self.config.buffer_size).await?;
        tracing::debug!("Staging artifact at {}", staged.temp_path().display());
        Ok(staged)
    }

    async fn commit(
        &self,
        staged: &mut StagedFile,
        destination: &Path,
    ) -> Result<PlacedFile, PlacerError> {
        staged.finish_writes().await?;

        if let Some(parent) = destination.parent() {
            self.ensure_dir(parent).await?;
        }

        // Linking fails atomically when the name is taken.
        match fs::hard_link(staged.temp_path(), destination).await {
            Ok(()) => {
                if let Err(e) = fs::remove_file(staged.temp_path()).await {
                    tracing::warn!(
                        "Failed to remove staged file {}: {}",
                        staged.temp_path().display(),
                        e
                    );
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(PlacerError::DestinationExists {
                    path: destination.to_path_buf(),
                });
            }
            Err(e) => {
                tracing::debug!("Hard link unavailable ({}), renaming instead", e);
                if fs::try_exists(destination).await.unwrap_or(false) {
                    return Err(PlacerError::DestinationExists {
                        path: destination.to_path_buf(),
                    });
                }
                fs::rename(staged.temp_path(), destination)
                    .await
                    .map_err(|e| {
                        PlacerError::move_failed(
                            staged.temp_path().to_path_buf(),
                            destination.to_path_buf(),
                            e,
                        )
                    })?;
            }
        }

        let (size_bytes, sha256) = staged.mark_committed();
        tracing::debug!(
            "Placed {} ({} bytes)",
            destination.display(),
            size_bytes
        );

        Ok(PlacedFile {
            path: destination.to_path_buf(),
            size_bytes,
            sha256,
        })
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<PlacedFile, PlacerError> {
        let source_file = File::open(from).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PlacerError::SourceNotFound {
                    path: from.to_path_buf(),
                }
            } else {
                PlacerError::ReadFailed {
                    path: from.to_path_buf(),
                    source: e,
                }
            }
        })?;

        let dir = to.parent().unwrap_or_else(|| Path::new("."));
        let mut staged = self.stage(dir).await?;

        let mut reader = BufReader::with_capacity(self.config.buffer_size, source_file);
        let mut buffer = vec![0u8; self.config.buffer_size];
        loop {
            let bytes_read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| PlacerError::ReadFailed {
                    path: from.to_path_buf(),
                    source: e,
                })?;
            if bytes_read == 0 {
                break;
            }
            staged.write(&buffer[..bytes_read]).await?;
        }

        self.commit(&mut staged, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_stage_and_commit() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("out/image.png");
        let placer = FsPlacer::with_defaults();

        let mut staged = placer.stage(&temp.path().join("out")).await.unwrap();
        staged.write(b"hello ").await.unwrap();
        staged.write(b"world").await.unwrap();
        let temp_path = staged.temp_path().to_path_buf();

        // Nothing visible under the final name until commit.
        assert!(!dest.exists());

        let placed = placer.commit(&mut staged, &dest).await.unwrap();
        drop(staged);

        assert_eq!(placed.path, dest);
        assert_eq!(placed.size_bytes, 11);
        // sha256("hello world")
        assert_eq!(
            placed.sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(fs::read(&dest).await.unwrap(), b"hello world");
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn test_dropped_stage_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let placer = FsPlacer::with_defaults();

        let mut staged = placer.stage(temp.path()).await.unwrap();
        staged.write(b"partial").await.unwrap();
        drop(staged);

        let mut entries = fs::read_dir(temp.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_refuses_to_overwrite() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("taken.png");
        fs::write(&dest, "original").await.unwrap();
        let placer = FsPlacer::with_defaults();

        let mut staged = placer.stage(temp.path()).await.unwrap();
        staged.write(b"new").await.unwrap();

        let err = placer.commit(&mut staged, &dest).await.unwrap_err();
        assert!(matches!(err, PlacerError::DestinationExists { .. }));
        assert_eq!(fs::read(&dest).await.unwrap(), b"original");

        // Staged content survives for a retry under another name.
        let other = temp.path().join("taken_1.png");
        let placed = placer.commit(&mut staged, &other).await.unwrap();
        assert_eq!(placed.size_bytes, 3);
        assert_eq!(fs::read(&other).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_stage_without_parent_creation() {
        let temp = TempDir::new().unwrap();
        let placer = FsPlacer::new(PlacerConfig::default().with_create_parents(false));

        let err = placer.stage(&temp.path().join("missing")).await.unwrap_err();
        assert!(matches!(err, PlacerError::DirectoryMissing { .. }));
    }

    #[tokio::test]
    async fn test_copy_file() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.mp4");
        let dest = temp.path().join("repo/nested/a.mp4");
        fs::write(&source, vec![7u8; 200_000]).await.unwrap();

        let placer = FsPlacer::new(PlacerConfig::default().with_buffer_size(4096));
        let placed = placer.copy(&source, &dest).await.unwrap();

        assert_eq!(placed.size_bytes, 200_000);
        assert!(source.exists());
        assert_eq!(fs::read(&dest).await.unwrap().len(), 200_000);
    }

    #[tokio::test]
    async fn test_copy_missing_source() {
        let temp = TempDir::new().unwrap();
        let placer = FsPlacer::with_defaults();

        let err = placer
            .copy(&temp.path().join("nope"), &temp.path().join("dest"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlacerError::SourceNotFound { .. }));
    }
}
