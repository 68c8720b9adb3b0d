//! Where resume blobs live between sessions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::fs;

use super::resume::ResumeData;
use super::{InfoHash, TorrentError};
use crate::config::StorageConfig;

/// Persistent storage for resume data.
#[async_trait]
pub trait ResumeStore: Send + Sync {
    async fn save(&self, info_hash: InfoHash, resume: &ResumeData) -> Result<(), TorrentError>;

    /// Raw blob, `None` if nothing was saved for this torrent.
    async fn load(&self, info_hash: InfoHash) -> Result<Option<Vec<u8>>, TorrentError>;

    async fn remove(&self, info_hash: InfoHash) -> Result<(), TorrentError>;
}

/// One `<info-hash>.resume` file per torrent in a directory.
#[derive(Debug, Clone)]
pub struct FileResumeStore {
    dir: PathBuf,
}

impl FileResumeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.resume_dir.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, info_hash: InfoHash) -> PathBuf {
        self.dir.join(format!("{info_hash}.resume"))
    }
}

#[async_trait]
impl ResumeStore for FileResumeStore {
    async fn save(&self, info_hash: InfoHash, resume: &ResumeData) -> Result<(), TorrentError> {
        let blob = resume.encode()?;
        fs::create_dir_all(&self.dir).await?;

        // Write-then-rename so a crash never leaves a truncated file
        let path = self.path_for(info_hash);
        let partial = path.with_extension("resume.part");
        fs::write(&partial, &blob).await?;
        fs::rename(&partial, &path).await?;
        tracing::debug!(%info_hash, path = %path.display(), "Saved resume data");
        Ok(())
    }

    async fn load(&self, info_hash: InfoHash) -> Result<Option<Vec<u8>>, TorrentError> {
        match fs::read(self.path_for(info_hash)).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, info_hash: InfoHash) -> Result<(), TorrentError> {
        match fs::remove_file(self.path_for(info_hash)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Keeps blobs in memory. Used when no resume directory is configured.
#[derive(Debug, Default)]
pub struct MemoryResumeStore {
    blobs: Mutex<HashMap<InfoHash, Vec<u8>>>,
}

impl MemoryResumeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResumeStore for MemoryResumeStore {
    async fn save(&self, info_hash: InfoHash, resume: &ResumeData) -> Result<(), TorrentError> {
        let blob = resume.encode()?;
        self.blobs.lock().insert(info_hash, blob);
        Ok(())
    }

    async fn load(&self, info_hash: InfoHash) -> Result<Option<Vec<u8>>, TorrentError> {
        Ok(self.blobs.lock().get(&info_hash).cloned())
    }

    async fn remove(&self, info_hash: InfoHash) -> Result<(), TorrentError> {
        self.blobs.lock().remove(&info_hash);
        Ok(())
    }
}
