//! Temporary audio files for batch playback.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::synth::AudioFormat;

/// Host file operations used by batch playback.
#[async_trait]
pub trait HostStorage: Send + Sync {
    /// Persist `bytes` to a temporary file.
    ///
    /// Returns `None` when the file could not be written; callers fall back to
    /// an in-memory source.
    async fn write_temp_file(&self, bytes: &[u8], format: AudioFormat) -> Option<PathBuf>;

    /// Remove a file previously returned by [`HostStorage::write_temp_file`].
    async fn remove_temp_file(&self, path: &Path);
}

/// Stores temporary audio under a per-application directory.
#[derive(Debug, Clone)]
pub struct TempFileStorage {
    dir: PathBuf,
}

impl TempFileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The user cache directory (`~/.cache/read-aloud` on Linux), or the
    /// system temp directory when there is none.
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join("read-aloud")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Default for TempFileStorage {
    fn default() -> Self {
        Self::new(Self::default_dir())
    }
}

#[async_trait]
impl HostStorage for TempFileStorage {
    async fn write_temp_file(&self, bytes: &[u8], format: AudioFormat) -> Option<PathBuf> {
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!("Cannot create temp directory {}: {}", self.dir.display(), e);
            return None;
        }

        let path = self.dir.join(format!("playback-{}.{}", Uuid::new_v4(), format.extension()));
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => {
                debug!("Wrote {} bytes to {}", bytes.len(), path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to write temp audio file {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn remove_temp_file(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove temp audio file {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_remove_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TempFileStorage::new(dir.path().join("audio"));

        let path = storage.write_temp_file(&[1, 2, 3], AudioFormat::Mp3).await.unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp3"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), vec![1, 2, 3]);

        storage.remove_temp_file(&path).await;
        assert!(!path.exists());
        // Removing twice is harmless.
        storage.remove_temp_file(&path).await;
    }

    #[tokio::test]
    async fn test_unwritable_directory_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        // A regular file where the directory should be.
        let storage = TempFileStorage::new(blocker.join("nested"));
        assert!(storage.write_temp_file(&[1], AudioFormat::Wav).await.is_none());
    }
}
