//! Eddy Core - swarm coordination for a BitTorrent engine
//!
//! This crate decides, per torrent, which peers to know about and connect
//! to, when to announce, which pieces to fetch first, and how to react to
//! hash results and disk failures. Wire protocol, disk I/O and tracker
//! transports plug in through traits.

pub mod config;
pub mod engine;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::{ConfigError, EddyConfig};
pub use engine::{SessionHandle, spawn_session};
pub use torrent::{AddTorrentParams, Alert, InfoHash, Torrent, TorrentError, TorrentStatus};

/// Errors that can bubble up from any Eddy subsystem.
#[derive(Debug, thiserror::Error)]
pub enum EddyError {
    #[error("Torrent error: {0}")]
    Torrent(#[from] TorrentError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EddyError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            EddyError::Torrent(e) => match e {
                TorrentError::InvalidInfoHash { value } => format!("Not a valid info-hash: {value}"),
                TorrentError::TorrentNotFound { info_hash } => {
                    format!("Torrent {info_hash} not found")
                }
                TorrentError::DuplicateTorrent { info_hash } => {
                    format!("Torrent {info_hash} is already added")
                }
                TorrentError::InvalidTrackerUrl { url } => format!("Not a tracker URL: {url}"),
                TorrentError::InvalidMetadata { .. } | TorrentError::MetadataHashMismatch { .. } => {
                    "The torrent metadata is invalid".to_string()
                }
                TorrentError::EngineShutdown => "The session has stopped".to_string(),
                _ => "Torrent operation failed".to_string(),
            },
            EddyError::Config(e) => format!("Invalid configuration: {e}"),
            EddyError::Configuration { .. } => "Configuration error occurred".to_string(),
            EddyError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            EddyError::Config(_)
                | EddyError::Configuration { .. }
                | EddyError::Torrent(
                    TorrentError::InvalidInfoHash { .. }
                        | TorrentError::InvalidTrackerUrl { .. }
                        | TorrentError::InvalidPieceIndex { .. }
                        | TorrentError::InvalidFileIndex { .. }
                        | TorrentError::DuplicateTorrent { .. }
                )
        )
    }
}

pub type Result<T> = std::result::Result<T, EddyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let info_hash = InfoHash::new([0xab; 20]);
        let error = EddyError::from(TorrentError::TorrentNotFound { info_hash });
        assert_eq!(error.user_message(), format!("Torrent {info_hash} not found"));
        assert!(!error.is_user_error());

        let error = EddyError::from(TorrentError::InvalidTrackerUrl {
            url: "ftp://x".to_string(),
        });
        assert!(error.is_user_error());
    }

    #[test]
    fn test_config_errors_are_user_errors() {
        let mut config = EddyConfig::default();
        config.swarm.max_failcount = 0;
        let error: EddyError = config.validate().unwrap_err().into();
        assert!(error.is_user_error());
        assert!(error.user_message().contains("max_failcount"));
    }
}
