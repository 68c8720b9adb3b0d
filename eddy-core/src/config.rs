//! Centralized configuration for Eddy.
//!
//! All tunable swarm, tracker and queueing parameters live here so the
//! controller and peer list never carry hard-coded limits.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Central configuration for all Eddy components.
///
/// Groups related settings into logical sections. Supports environment
/// variable overrides for runtime customization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EddyConfig {
    pub swarm: SwarmConfig,
    pub tracker: TrackerConfig,
    pub queue: QueueConfig,
    pub storage: StorageConfig,
}

/// Peer list and connection policy configuration.
///
/// Bounds the peer list, controls reconnect pacing and selects the
/// trust and share-mode heuristics used by the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Maximum number of known peers kept per torrent
    pub max_peerlist_size: usize,
    /// Maximum number of known peers kept while a torrent is paused
    pub max_paused_peerlist_size: usize,
    /// Failed connection attempts before a peer stops being a candidate
    pub max_failcount: u8,
    /// Base delay between reconnect attempts, multiplied by failcount + 1
    pub min_reconnect_time: Duration,
    /// Whether several peers may share one IP address
    pub allow_multiple_connections_per_ip: bool,
    /// Peers involved in a failed piece only download whole pieces alone
    pub use_parole_mode: bool,
    /// Number of have-gaps tolerated before sparse pieces are promoted
    pub max_sparse_regions: usize,
    /// Refuse outgoing connections to ports below 1024 learned from DHT
    pub no_connect_privileged_ports: bool,
    /// Maximum open connections per torrent
    pub max_connections: usize,
    /// Upload to download ratio a share-mode torrent tries to hold
    pub share_mode_target: u32,
    /// Disconnect seeds once we become a seed ourselves
    pub close_redundant_connections: bool,
    /// Stop assigning time-critical blocks to peers slower than this
    pub max_time_critical_queue_time: Duration,
    /// Extra margin added to the time-critical admission horizon
    pub time_critical_horizon_margin: Duration,
    /// Seed for the peer list and share mode random source
    pub deterministic_seed: Option<u64>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_peerlist_size: 4000,
            max_paused_peerlist_size: 1000,
            max_failcount: 3,
            min_reconnect_time: Duration::from_secs(60),
            allow_multiple_connections_per_ip: false,
            use_parole_mode: true,
            max_sparse_regions: 0, // Disabled
            no_connect_privileged_ports: false,
            max_connections: 200,
            share_mode_target: 3,
            close_redundant_connections: true,
            max_time_critical_queue_time: Duration::from_secs(2),
            time_critical_horizon_margin: Duration::from_secs(1),
            deterministic_seed: None,
        }
    }
}

/// Tracker, DHT and local discovery announce configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Announce to every tier instead of stopping at the first working one
    pub announce_to_all_tiers: bool,
    /// Announce to every tracker within a tier
    pub announce_to_all_trackers: bool,
    /// Backoff multiplier in percent applied to tracker retry delays
    pub tracker_backoff: u32,
    /// Lower bound on the interval a tracker may ask for
    pub min_announce_interval: Duration,
    /// Failures before a tracker is disabled (0 = unlimited)
    pub default_fail_limit: u8,
    /// Number of peers requested per announce
    pub num_want: u32,
    /// Interval between DHT announces
    pub dht_announce_interval: Duration,
    /// Interval between local service discovery announces
    pub local_service_announce_interval: Duration,
    /// How long a stopped event may stay in flight before being dropped
    pub stop_tracker_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            announce_to_all_tiers: false,
            announce_to_all_trackers: false,
            tracker_backoff: 250,
            min_announce_interval: Duration::from_secs(300), // 5 minutes
            default_fail_limit: 0,
            num_want: 200,
            dht_announce_interval: Duration::from_secs(900), // 15 minutes
            local_service_announce_interval: Duration::from_secs(300),
            stop_tracker_timeout: Duration::from_secs(5),
        }
    }
}

/// Queueing and auto-management limits.
///
/// Auto-managed torrents are started and paused by the session so that
/// no more than the configured number are active at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum active auto-managed downloading torrents
    pub active_downloads: usize,
    /// Maximum active auto-managed seeding torrents
    pub active_seeds: usize,
    /// Maximum active auto-managed torrents of any kind
    pub active_limit: usize,
    /// Seeding time after which a seed no longer counts as needing upload
    pub seed_time_limit: Duration,
    /// Share ratio after which a seed no longer counts as needing upload
    pub share_ratio_limit: f32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            active_downloads: 3,
            active_seeds: 5,
            active_limit: 15,
            seed_time_limit: Duration::from_secs(24 * 60 * 60),
            share_ratio_limit: 2.0,
        }
    }
}

/// Persistent state configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one resume file per torrent
    pub resume_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            resume_dir: PathBuf::from(".eddy/resume"),
        }
    }
}

/// Errors from configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl EddyConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparsable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(size) = env_parse::<usize>("EDDY_MAX_PEERLIST_SIZE") {
            config.swarm.max_peerlist_size = size;
        }

        if let Some(count) = env_parse::<u8>("EDDY_MAX_FAILCOUNT") {
            config.swarm.max_failcount = count;
        }

        if let Some(count) = env_parse::<usize>("EDDY_MAX_CONNECTIONS") {
            config.swarm.max_connections = count;
        }

        if let Some(seed) = env_parse::<u64>("EDDY_SEED") {
            config.swarm.deterministic_seed = Some(seed);
        }

        if let Some(all_tiers) = env_parse::<bool>("EDDY_ANNOUNCE_TO_ALL_TIERS") {
            config.tracker.announce_to_all_tiers = all_tiers;
        }

        if let Some(all_trackers) = env_parse::<bool>("EDDY_ANNOUNCE_TO_ALL_TRACKERS") {
            config.tracker.announce_to_all_trackers = all_trackers;
        }

        if let Some(seconds) = env_parse::<u64>("EDDY_MIN_ANNOUNCE_INTERVAL") {
            config.tracker.min_announce_interval = Duration::from_secs(seconds);
        }

        if let Some(downloads) = env_parse::<usize>("EDDY_ACTIVE_DOWNLOADS") {
            config.queue.active_downloads = downloads;
        }

        if let Ok(dir) = std::env::var("EDDY_RESUME_DIR") {
            config.storage.resume_dir = PathBuf::from(dir);
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Small peer lists, no reconnect delay and a fixed random seed.
    pub fn for_testing() -> Self {
        Self {
            swarm: SwarmConfig {
                max_peerlist_size: 100,
                max_paused_peerlist_size: 50,
                min_reconnect_time: Duration::ZERO,
                deterministic_seed: Some(42),
                ..Default::default()
            },
            tracker: TrackerConfig {
                min_announce_interval: Duration::from_secs(1),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Checks for settings that cannot work together.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidValue` - If a limit is zero or out of range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.swarm.max_peerlist_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "swarm.max_peerlist_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.swarm.max_failcount == 0 || self.swarm.max_failcount > 31 {
            return Err(ConfigError::InvalidValue {
                field: "swarm.max_failcount",
                reason: format!("{} is outside 1..=31", self.swarm.max_failcount),
            });
        }
        if self.tracker.tracker_backoff == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tracker.tracker_backoff",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.queue.active_limit < self.queue.active_downloads.min(self.queue.active_seeds) {
            return Err(ConfigError::InvalidValue {
                field: "queue.active_limit",
                reason: "smaller than both download and seed limits".to_string(),
            });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = EddyConfig::default();

        assert_eq!(config.swarm.max_peerlist_size, 4000);
        assert_eq!(config.swarm.max_failcount, 3);
        assert_eq!(config.swarm.min_reconnect_time, Duration::from_secs(60));
        assert_eq!(config.tracker.tracker_backoff, 250);
        assert!(!config.tracker.announce_to_all_tiers);
        assert!(!config.tracker.announce_to_all_trackers);
        assert_eq!(config.queue.active_downloads, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_testing_preset() {
        let config = EddyConfig::for_testing();
        assert_eq!(config.swarm.deterministic_seed, Some(42));
        assert_eq!(config.swarm.min_reconnect_time, Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_failcount() {
        let mut config = EddyConfig::default();
        config.swarm.max_failcount = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "swarm.max_failcount", .. })
        ));

        config.swarm.max_failcount = 40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("EDDY_MAX_PEERLIST_SIZE", "250");
            std::env::set_var("EDDY_ANNOUNCE_TO_ALL_TIERS", "true");
            std::env::set_var("EDDY_SEED", "12345");
            std::env::set_var("EDDY_MIN_ANNOUNCE_INTERVAL", "not-a-number");
        }

        let config = EddyConfig::from_env();

        assert_eq!(config.swarm.max_peerlist_size, 250);
        assert!(config.tracker.announce_to_all_tiers);
        assert_eq!(config.swarm.deterministic_seed, Some(12345));
        assert_eq!(
            config.tracker.min_announce_interval,
            Duration::from_secs(300)
        );

        // Cleanup
        unsafe {
            std::env::remove_var("EDDY_MAX_PEERLIST_SIZE");
            std::env::remove_var("EDDY_ANNOUNCE_TO_ALL_TIERS");
            std::env::remove_var("EDDY_SEED");
            std::env::remove_var("EDDY_MIN_ANNOUNCE_INTERVAL");
        }
    }
}
