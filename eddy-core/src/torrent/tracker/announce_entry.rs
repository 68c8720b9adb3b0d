//! Per-tracker announce state.

use std::time::{Duration, Instant};

use url::Url;

use crate::torrent::TorrentError;

/// Shortest retry delay after a failure, in seconds.
const RETRY_DELAY_MIN: u64 = 10;
/// Longest retry delay after repeated failures, in seconds.
const RETRY_DELAY_MAX: u64 = 60 * 60;

/// Where a tracker URL came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackerSource(u8);

impl TrackerSource {
    pub const TORRENT: TrackerSource = TrackerSource(0x01);
    pub const CLIENT: TrackerSource = TrackerSource(0x02);
    pub const MAGNET: TrackerSource = TrackerSource(0x04);
    pub const RESUME_DATA: TrackerSource = TrackerSource(0x08);

    pub fn contains(self, other: TrackerSource) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOrAssign for TrackerSource {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One tracker URL and everything we know about talking to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceEntry {
    pub url: String,
    /// Opaque id the tracker asked us to echo back
    pub trackerid: Option<String>,
    /// Last warning or failure message from the tracker
    pub message: Option<String>,
    pub last_error: Option<String>,
    /// Earliest regular re-announce, `None` = immediately
    pub next_announce: Option<Instant>,
    /// Announces before this are refused by the tracker
    pub min_announce: Option<Instant>,
    /// Scrape counters, -1 while unknown
    pub scrape_complete: i32,
    pub scrape_incomplete: i32,
    pub scrape_downloaded: i32,
    /// Lower tiers are tried first
    pub tier: u8,
    /// Failures before giving up, 0 = never
    pub fail_limit: u8,
    pub fails: u8,
    /// A request is in flight
    pub updating: bool,
    pub source: TrackerSource,
    /// The tracker responded at least once
    pub verified: bool,
    pub start_sent: bool,
    pub complete_sent: bool,
}

impl AnnounceEntry {
    pub fn new(url: impl Into<String>, tier: u8) -> Self {
        Self {
            url: url.into(),
            trackerid: None,
            message: None,
            last_error: None,
            next_announce: None,
            min_announce: None,
            scrape_complete: -1,
            scrape_incomplete: -1,
            scrape_downloaded: -1,
            tier,
            fail_limit: 0,
            fails: 0,
            updating: false,
            source: TrackerSource::CLIENT,
            verified: false,
            start_sent: false,
            complete_sent: false,
        }
    }

    /// Parses and checks a tracker URL.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTrackerUrl` - If the URL is malformed or not http, https or udp
    pub fn validated(url: &str, tier: u8) -> Result<Self, TorrentError> {
        let parsed = Url::parse(url).map_err(|_| TorrentError::InvalidTrackerUrl {
            url: url.to_string(),
        })?;
        match parsed.scheme() {
            "http" | "https" | "udp" if parsed.host().is_some() => Ok(Self::new(url, tier)),
            _ => Err(TorrentError::InvalidTrackerUrl {
                url: url.to_string(),
            }),
        }
    }

    /// No failure since the last success.
    pub fn is_working(&self) -> bool {
        self.fails == 0
    }

    pub fn is_disabled(&self) -> bool {
        self.fail_limit != 0 && self.fails >= self.fail_limit
    }

    /// Whether an announce may be sent now.
    ///
    /// A seed that has not yet reported completion may bypass the
    /// tracker's minimum interval.
    pub fn can_announce(&self, now: Instant, is_seed: bool) -> bool {
        let need_send_complete = is_seed && !self.complete_sent;
        self.next_announce.is_none_or(|t| now >= t)
            && (self.min_announce.is_none_or(|t| now >= t) || need_send_complete)
            && !self.is_disabled()
            && !self.updating
    }

    /// Records a failure and schedules the retry.
    ///
    /// The delay grows with the square of consecutive failures, scaled by
    /// `backoff_percent`, and never drops below the tracker's own
    /// `retry_interval`.
    pub fn failed(&mut self, now: Instant, backoff_percent: u32, retry_interval: Duration) {
        self.fails = self.fails.saturating_add(1);
        let fails = u64::from(self.fails);
        let delay = (RETRY_DELAY_MIN + fails * fails * RETRY_DELAY_MIN * u64::from(backoff_percent) / 100)
            .min(RETRY_DELAY_MAX);
        let delay = Duration::from_secs(delay).max(retry_interval);
        self.next_announce = Some(now + delay);
        self.updating = false;
    }

    /// Forgets the announce schedule, as after stopping.
    pub fn reset(&mut self) {
        self.start_sent = false;
        self.next_announce = None;
        self.min_announce = None;
    }

    /// Time until the next regular announce.
    pub fn next_announce_in(&self, now: Instant) -> Duration {
        self.next_announce
            .map_or(Duration::ZERO, |t| t.saturating_duration_since(now))
    }

    pub fn min_announce_in(&self, now: Instant) -> Duration {
        self.min_announce
            .map_or(Duration::ZERO, |t| t.saturating_duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_urls() {
        assert!(AnnounceEntry::validated("http://tracker.example/announce", 0).is_ok());
        assert!(AnnounceEntry::validated("udp://tracker.example:1337", 0).is_ok());
        assert!(AnnounceEntry::validated("ftp://tracker.example", 0).is_err());
        assert!(AnnounceEntry::validated("not a url", 0).is_err());
    }

    #[test]
    fn test_backoff_grows_quadratically() {
        let now = Instant::now();
        let mut entry = AnnounceEntry::new("http://t/announce", 0);

        entry.failed(now, 250, Duration::ZERO);
        assert_eq!(entry.next_announce_in(now), Duration::from_secs(35));
        entry.failed(now, 250, Duration::ZERO);
        assert_eq!(entry.next_announce_in(now), Duration::from_secs(110));
        entry.failed(now, 250, Duration::from_secs(600));
        assert_eq!(entry.next_announce_in(now), Duration::from_secs(600));

        for _ in 0..20 {
            entry.failed(now, 250, Duration::ZERO);
        }
        assert_eq!(entry.next_announce_in(now), Duration::from_secs(RETRY_DELAY_MAX));
        assert!(!entry.is_working());
    }

    #[test]
    fn test_can_announce_rules() {
        let now = Instant::now();
        let mut entry = AnnounceEntry::new("http://t/announce", 0);
        assert!(entry.can_announce(now, false));

        entry.min_announce = Some(now + Duration::from_secs(10));
        assert!(!entry.can_announce(now, false));
        // Seeds must get their completed event out
        assert!(entry.can_announce(now, true));

        entry.updating = true;
        assert!(!entry.can_announce(now, true));
        entry.updating = false;

        entry.fail_limit = 1;
        entry.fails = 1;
        assert!(!entry.can_announce(now, true));
    }
}
