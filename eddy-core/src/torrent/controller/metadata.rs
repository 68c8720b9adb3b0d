use std::path::{Path, PathBuf};
use std::time::Instant;

use bytes::Bytes;

use super::Torrent;
use crate::torrent::alerts::Alert;
use crate::torrent::connection::DisconnectReason;
use crate::torrent::disk::{DiskError, DiskJob};
use crate::torrent::layout::TorrentLayout;
use crate::torrent::{FileIndex, TorrentError, TorrentState};

impl Torrent {
    /// Installs metadata fetched from the swarm.
    ///
    /// A bad info dictionary is dropped and the torrent keeps waiting for
    /// metadata.
    ///
    /// # Errors
    ///
    /// - `TorrentError::MetadataHashMismatch` - If the bytes don't hash to the info-hash
    /// - `TorrentError::InvalidMetadata` - If the dictionary can't be parsed
    pub fn set_metadata(&mut self, info: Bytes, now: Instant) -> Result<(), TorrentError> {
        if self.layout.is_some() || self.unloaded_files.is_some() {
            return Ok(());
        }
        let layout = match TorrentLayout::from_info_bytes(self.info_hash, &info) {
            Ok(layout) => layout,
            Err(e) => {
                tracing::warn!(info_hash = %self.info_hash, error = %e, "Rejected metadata");
                self.post(Alert::MetadataFailed {
                    info_hash: self.info_hash,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        tracing::info!(
            info_hash = %self.info_hash,
            name = layout.name(),
            pieces = layout.num_pieces(),
            "Metadata received"
        );
        self.layout = Some(layout);
        self.info_bytes = Some(info);
        self.need_save_resume = true;
        self.post(Alert::MetadataReceived {
            info_hash: self.info_hash,
        });
        if self.error.is_some() {
            return Ok(());
        }

        self.init(now);
        // Availability of peers that connected before the picker existed
        if let Some(picker) = self.picker.as_mut() {
            for connection in self.connections.values() {
                if let Some(handle) = connection.peer() {
                    for piece in connection.have_pieces() {
                        picker.inc_refcount(piece, handle);
                    }
                }
            }
        }
        Ok(())
    }

    /// Bencoded info dictionary, if known.
    pub fn metadata(&self) -> Option<&Bytes> {
        self.info_bytes.as_ref()
    }

    /// Drops the parsed layout of an idle, paused torrent to save memory.
    ///
    /// Returns false if the torrent is in use or could not reload it.
    pub fn unload_metadata(&mut self) -> bool {
        let idle = self.is_paused()
            && self.connections.is_empty()
            && self.jobs.is_empty()
            && !matches!(
                self.state,
                TorrentState::CheckingFiles | TorrentState::CheckingResumeData
            );
        if !idle || self.info_bytes.is_none() {
            return false;
        }
        let Some(layout) = self.layout.take() else {
            return false;
        };
        tracing::debug!(info_hash = %self.info_hash, "Unloading metadata");
        self.unloaded_files = Some(layout.files().iter().map(|f| f.path.join("/")).collect());
        true
    }

    /// Parses the metadata again after [`Torrent::unload_metadata`].
    ///
    /// # Errors
    ///
    /// - `TorrentError::MetadataMissing` - If there is nothing to load from
    /// - `TorrentError::InvalidMetadata` - If the stored dictionary no longer parses
    pub fn load_metadata(&mut self) -> Result<(), TorrentError> {
        let Some(paths) = &self.unloaded_files else {
            return Ok(());
        };
        let Some(info) = &self.info_bytes else {
            return Err(TorrentError::MetadataMissing);
        };
        let mut layout = TorrentLayout::from_info_bytes(self.info_hash, info)?;
        for (index, path) in paths.iter().enumerate() {
            layout.rename_file(FileIndex(index as u32), path);
        }
        tracing::debug!(info_hash = %self.info_hash, "Metadata loaded");
        self.layout = Some(layout);
        self.unloaded_files = None;
        Ok(())
    }

    pub fn is_metadata_loaded(&self) -> bool {
        self.unloaded_files.is_none()
    }

    pub fn save_path(&self) -> &Path {
        &self.save_path
    }

    /// # Errors
    ///
    /// - `TorrentError::MetadataMissing` - If there is no layout yet
    /// - `TorrentError::InvalidFileIndex` - If the file is out of range
    pub fn rename_file(&mut self, file: FileIndex, name: String) -> Result<(), TorrentError> {
        self.check_file_index(file)?;
        self.submit_plain(DiskJob::RenameFile { file, name });
        Ok(())
    }

    pub(super) fn on_file_renamed(&mut self, file: FileIndex, name: String, error: Option<DiskError>) {
        match error {
            None => {
                if let Some(layout) = self.layout.as_mut() {
                    layout.rename_file(file, &name);
                }
                self.need_save_resume = true;
                tracing::debug!(info_hash = %self.info_hash, %file, %name, "File renamed");
                self.post(Alert::FileRenamed {
                    info_hash: self.info_hash,
                    file,
                    name,
                });
            }
            Some(error) => {
                tracing::warn!(info_hash = %self.info_hash, %file, %error, "Rename failed");
                self.post(Alert::FileRenameFailed {
                    info_hash: self.info_hash,
                    file,
                    error,
                });
            }
        }
    }

    /// Moves the data to `path`. Without metadata only the save path changes.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidState` - If the torrent was removed
    pub fn move_storage(&mut self, path: PathBuf) -> Result<(), TorrentError> {
        if self.aborted {
            return Err(TorrentError::InvalidState { state: self.state });
        }
        if self.layout.is_none() {
            self.save_path = path.clone();
            self.post(Alert::StorageMoved {
                info_hash: self.info_hash,
                path,
            });
            return Ok(());
        }
        self.submit_plain(DiskJob::MoveStorage { path });
        Ok(())
    }

    pub(super) fn on_storage_moved(&mut self, path: PathBuf, error: Option<DiskError>) {
        match error {
            None => {
                tracing::info!(info_hash = %self.info_hash, path = %path.display(), "Storage moved");
                self.save_path = path.clone();
                self.need_save_resume = true;
                self.post(Alert::StorageMoved {
                    info_hash: self.info_hash,
                    path,
                });
            }
            Some(error) => {
                tracing::warn!(info_hash = %self.info_hash, %error, "Move storage failed");
                self.post(Alert::StorageMoveFailed {
                    info_hash: self.info_hash,
                    error,
                });
            }
        }
    }

    /// Deletes the downloaded files. Also allowed after the torrent was
    /// removed, which is the usual order.
    pub fn delete_files(&mut self, now: Instant) {
        self.disconnect_all(DisconnectReason::TorrentRemoved, now);
        self.submit_plain(DiskJob::DeleteFiles);
    }

    pub(super) fn on_files_deleted(&mut self, error: Option<DiskError>) {
        match error {
            None => {
                tracing::info!(info_hash = %self.info_hash, "Files deleted");
                self.post(Alert::FilesDeleted {
                    info_hash: self.info_hash,
                });
            }
            Some(error) => {
                tracing::warn!(info_hash = %self.info_hash, %error, "Deleting files failed");
                self.post(Alert::FileDeleteFailed {
                    info_hash: self.info_hash,
                    error,
                });
            }
        }
    }

    /// Closes open file handles.
    pub fn release_files(&mut self) {
        if self.layout.is_some() {
            self.submit_plain(DiskJob::ReleaseFiles);
        }
    }
}
