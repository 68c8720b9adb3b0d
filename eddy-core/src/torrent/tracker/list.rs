//! Tiered tracker list and announce scheduling.
//!
//! Trackers are kept sorted by tier. A round walks the list and stops at
//! the first tier holding a working tracker, unless configured to reach
//! every tier or every tracker.

use std::time::{Duration, Instant};

use super::announce_entry::AnnounceEntry;
use super::types::{AnnounceEvent, ScrapeResponse, TrackerFailure, TrackerResponse};
use crate::config::TrackerConfig;

/// Delay before an announce that got no reply may be retried.
const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(20);
/// Minimum spacing enforced between our own announces.
const ANNOUNCE_SPACING: Duration = Duration::from_secs(10);

/// A tracker chosen for an announce in this round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceTarget {
    pub url: String,
    pub event: AnnounceEvent,
    pub trackerid: Option<String>,
}

/// The ordered announce entries of one torrent.
#[derive(Debug, Clone)]
pub struct TrackerList {
    entries: Vec<AnnounceEntry>,
    last_working: Option<usize>,
    announce_to_all_tiers: bool,
    announce_to_all_trackers: bool,
    backoff_percent: u32,
    min_announce_interval: Duration,
    default_fail_limit: u8,
}

impl TrackerList {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            entries: Vec::new(),
            last_working: None,
            announce_to_all_tiers: config.announce_to_all_tiers,
            announce_to_all_trackers: config.announce_to_all_trackers,
            backoff_percent: config.tracker_backoff,
            min_announce_interval: config.min_announce_interval,
            default_fail_limit: config.default_fail_limit,
        }
    }

    pub fn entries(&self) -> &[AnnounceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, url: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.url == url)
    }

    pub fn get(&self, url: &str) -> Option<&AnnounceEntry> {
        self.entries.iter().find(|e| e.url == url)
    }

    /// The tracker that answered most recently.
    pub fn last_working(&self) -> Option<&AnnounceEntry> {
        self.last_working.and_then(|i| self.entries.get(i))
    }

    /// Adds a tracker after every tracker of the same or a lower tier.
    ///
    /// Returns false if the URL is already present; its source flags are
    /// merged.
    pub fn add(&mut self, mut entry: AnnounceEntry) -> bool {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.url == entry.url) {
            existing.source |= entry.source;
            return false;
        }
        if entry.fail_limit == 0 {
            entry.fail_limit = self.default_fail_limit;
        }
        let pos = self.entries.partition_point(|e| e.tier <= entry.tier);
        if let Some(last) = self.last_working.as_mut() {
            if *last >= pos {
                *last += 1;
            }
        }
        self.entries.insert(pos, entry);
        true
    }

    /// Replaces the whole list. Duplicate URLs keep their first entry.
    pub fn replace(&mut self, entries: Vec<AnnounceEntry>) {
        self.entries.clear();
        self.last_working = None;
        for entry in entries {
            self.add(entry);
        }
    }

    /// URLs indexed by tier number.
    ///
    /// Tiers without trackers stay as empty lists, so feeding the result
    /// back through resume data or `replace_trackers` keeps every tier.
    pub fn tiers(&self) -> Vec<Vec<String>> {
        let mut tiers: Vec<Vec<String>> = Vec::new();
        for entry in &self.entries {
            let tier = usize::from(entry.tier);
            if tiers.len() <= tier {
                tiers.resize_with(tier + 1, Vec::new);
            }
            tiers[tier].push(entry.url.clone());
        }
        tiers
    }

    /// Picks the trackers to announce to now and marks them in flight.
    ///
    /// `event` overrides the per-tracker event; with [`AnnounceEvent::None`]
    /// each tracker gets `started` until it acknowledged one and
    /// `completed` once we are a seed.
    pub fn announce(&mut self, now: Instant, is_seed: bool, event: AnnounceEvent) -> Vec<AnnounceTarget> {
        let mut targets = Vec::new();
        let mut sent_announce = false;
        let mut tier = u8::MAX;
        let mut tier_set = false;

        for entry in &mut self.entries {
            // No point in stopping what was never started
            if event == AnnounceEvent::Stopped && !entry.start_sent {
                continue;
            }
            if self.announce_to_all_tiers
                && !self.announce_to_all_trackers
                && sent_announce
                && tier_set
                && entry.tier <= tier
            {
                continue;
            }
            if tier_set && entry.tier > tier && sent_announce && !self.announce_to_all_tiers {
                break;
            }
            if entry.is_working() {
                tier = entry.tier;
                tier_set = true;
                sent_announce = false;
            }
            if event != AnnounceEvent::Stopped && !entry.can_announce(now, is_seed) {
                // A working tracker waiting for its interval still counts
                if entry.is_working() {
                    sent_announce = true;
                }
                continue;
            }

            let event = match event {
                AnnounceEvent::None if !entry.start_sent => AnnounceEvent::Started,
                AnnounceEvent::None if is_seed && !entry.complete_sent => AnnounceEvent::Completed,
                other => other,
            };

            entry.updating = true;
            entry.next_announce = Some(now + ANNOUNCE_TIMEOUT);
            entry.min_announce = Some(now + ANNOUNCE_SPACING);
            targets.push(AnnounceTarget {
                url: entry.url.clone(),
                event,
                trackerid: entry.trackerid.clone(),
            });

            sent_announce = true;
            if entry.is_working() && !self.announce_to_all_trackers && !self.announce_to_all_tiers {
                break;
            }
        }
        targets
    }

    /// Applies a successful announce reply.
    ///
    /// Returns false if the tracker was removed meanwhile.
    pub fn on_response(
        &mut self,
        url: &str,
        event: AnnounceEvent,
        response: &TrackerResponse,
        now: Instant,
    ) -> bool {
        let Some(index) = self.find(url) else {
            return false;
        };
        let interval = response.interval.max(self.min_announce_interval);
        let entry = &mut self.entries[index];
        match event {
            AnnounceEvent::Started => entry.start_sent = true,
            AnnounceEvent::Completed => entry.complete_sent = true,
            AnnounceEvent::Stopped => entry.start_sent = false,
            AnnounceEvent::None => {}
        }
        entry.verified = true;
        entry.updating = false;
        entry.fails = 0;
        entry.next_announce = Some(now + interval);
        entry.min_announce = Some(now + response.min_interval);
        entry.message = response.warning_message.clone();
        entry.last_error = None;
        if response.complete >= 0 {
            entry.scrape_complete = response.complete;
        }
        if response.incomplete >= 0 {
            entry.scrape_incomplete = response.incomplete;
        }
        if response.downloaded >= 0 {
            entry.scrape_downloaded = response.downloaded;
        }
        if let Some(id) = response.trackerid.as_ref().filter(|id| !id.is_empty()) {
            entry.trackerid = Some(id.clone());
        }

        self.last_working = Some(self.prioritize(index));
        true
    }

    pub fn on_scrape(&mut self, url: &str, scrape: &ScrapeResponse) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.url == url) {
            entry.scrape_complete = scrape.complete;
            entry.scrape_incomplete = scrape.incomplete;
            entry.scrape_downloaded = scrape.downloaded;
        }
    }

    /// Applies a failed announce. Returns the tracker's consecutive
    /// failure count.
    pub fn on_failure(&mut self, url: &str, failure: &TrackerFailure, now: Instant) -> Option<u8> {
        let index = self.find(url)?;
        let entry = &mut self.entries[index];
        entry.failed(now, self.backoff_percent, failure.retry_interval);
        entry.last_error = Some(failure.message.clone());
        entry.message = Some(failure.message.clone());
        if failure.is_permanent() {
            entry.fail_limit = 1;
        }
        let fails = entry.fails;
        self.deprioritize(index);
        Some(fails)
    }

    /// Clears the in-flight flag of a tracker whose request was dropped.
    pub fn clear_updating(&mut self, url: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.url == url) {
            entry.updating = false;
        }
    }

    /// When the tracker timer should fire next.
    ///
    /// Walks the tiers like [`Self::announce`] and takes the earliest time
    /// a tracker that would be announced to becomes ready.
    pub fn next_announce(&self, now: Instant) -> Option<Instant> {
        let mut next: Option<Instant> = None;
        let mut tier = u8::MAX;
        let mut tier_set = false;
        let mut found_working = false;

        for entry in &self.entries {
            if self.announce_to_all_tiers && found_working && tier_set && entry.tier <= tier {
                continue;
            }
            if tier_set && entry.tier > tier && !self.announce_to_all_tiers {
                break;
            }
            if entry.is_working() {
                tier = entry.tier;
                tier_set = true;
                found_working = false;
            }
            if entry.is_disabled() {
                continue;
            }
            if entry.updating {
                found_working = true;
            } else {
                let ready = match (entry.next_announce, entry.min_announce) {
                    (Some(a), Some(b)) => a.max(b),
                    (Some(a), None) | (None, Some(a)) => a,
                    (None, None) => now,
                };
                if (!found_working || entry.is_working()) && next.is_none_or(|n| ready < n) {
                    next = Some(ready);
                }
            }
            if entry.is_working() {
                found_working = true;
            }
            if found_working && !self.announce_to_all_trackers && !self.announce_to_all_tiers {
                break;
            }
        }
        next.map(|n| n.max(now))
    }

    /// Schedules a re-announce `after` from now, ignoring the tracker's
    /// minimum interval. `url` limits it to one tracker.
    pub fn force_reannounce(&mut self, now: Instant, after: Duration, url: Option<&str>) {
        for entry in &mut self.entries {
            if url.is_some_and(|u| u != entry.url) {
                continue;
            }
            entry.next_announce = Some(now + after);
            entry.min_announce = Some(now + after);
            entry.fails = 0;
        }
    }

    /// Forgets announce schedules, as after stopping.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.reset();
            entry.updating = false;
        }
    }

    /// Moves a tracker to the front of its tier.
    fn prioritize(&mut self, mut index: usize) -> usize {
        while index > 0 && self.entries[index].tier == self.entries[index - 1].tier {
            self.entries.swap(index, index - 1);
            self.last_working = match self.last_working {
                Some(w) if w == index => Some(w - 1),
                Some(w) if w == index - 1 => Some(w + 1),
                other => other,
            };
            index -= 1;
        }
        index
    }

    /// Moves a tracker to the back of its tier.
    fn deprioritize(&mut self, mut index: usize) -> usize {
        while index + 1 < self.entries.len() && self.entries[index].tier == self.entries[index + 1].tier {
            self.entries.swap(index, index + 1);
            self.last_working = match self.last_working {
                Some(w) if w == index => Some(w + 1),
                Some(w) if w == index + 1 => Some(w - 1),
                other => other,
            };
            index += 1;
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(all_tiers: bool, all_trackers: bool) -> TrackerList {
        let config = TrackerConfig {
            announce_to_all_tiers: all_tiers,
            announce_to_all_trackers: all_trackers,
            min_announce_interval: Duration::from_secs(60),
            ..Default::default()
        };
        let mut list = TrackerList::new(&config);
        list.add(AnnounceEntry::new("http://a/announce", 0));
        list.add(AnnounceEntry::new("http://b/announce", 0));
        list.add(AnnounceEntry::new("http://c/announce", 1));
        list
    }

    fn urls(targets: &[AnnounceTarget]) -> Vec<&str> {
        targets.iter().map(|t| t.url.as_str()).collect()
    }

    fn reply(interval: u64) -> TrackerResponse {
        TrackerResponse {
            interval: Duration::from_secs(interval),
            complete: -1,
            incomplete: -1,
            downloaded: -1,
            ..Default::default()
        }
    }

    #[test]
    fn test_tiers_keep_sparse_numbering() {
        let mut list = list(false, false);
        list.add(AnnounceEntry::new("http://d/announce", 4));
        let tiers = list.tiers();
        assert_eq!(tiers.len(), 5);
        assert_eq!(tiers[1], vec!["http://c/announce".to_string()]);
        assert!(tiers[2].is_empty() && tiers[3].is_empty());
        assert_eq!(tiers[4], vec!["http://d/announce".to_string()]);
    }

    #[test]
    fn test_add_keeps_tier_order_and_dedupes() {
        let mut list = list(false, false);
        assert!(list.add(AnnounceEntry::new("http://d/announce", 0)));
        assert!(!list.add(AnnounceEntry::new("http://a/announce", 3)));
        let order: Vec<&str> = list.entries().iter().map(|e| e.url.as_str()).collect();
        assert_eq!(order, vec!["http://a/announce", "http://b/announce", "http://d/announce", "http://c/announce"]);
        assert_eq!(
            list.tiers(),
            vec![
                vec!["http://a/announce".to_string(), "http://b/announce".into(), "http://d/announce".into()],
                vec!["http://c/announce".to_string()],
            ]
        );
    }

    #[test]
    fn test_announce_stops_at_first_working_tracker() {
        let mut list = list(false, false);
        let now = Instant::now();
        let targets = list.announce(now, false, AnnounceEvent::None);
        assert_eq!(urls(&targets), vec!["http://a/announce"]);
        assert_eq!(targets[0].event, AnnounceEvent::Started);
    }

    #[test]
    fn test_announce_to_all_tiers_reaches_one_per_tier() {
        let mut list = list(true, false);
        let targets = list.announce(Instant::now(), false, AnnounceEvent::None);
        assert_eq!(urls(&targets), vec!["http://a/announce", "http://c/announce"]);
    }

    #[test]
    fn test_announce_to_all_trackers() {
        let mut list = list(false, true);
        let targets = list.announce(Instant::now(), false, AnnounceEvent::None);
        assert_eq!(urls(&targets), vec!["http://a/announce", "http://b/announce"]);

        let mut list = self::list(true, true);
        let targets = list.announce(Instant::now(), false, AnnounceEvent::None);
        assert_eq!(targets.len(), 3);
    }

    #[test]
    fn test_successful_reply_keeps_lower_tier_quiet() {
        let mut list = TrackerList::new(&TrackerConfig::default());
        list.add(AnnounceEntry::new("http://a/announce", 0));
        list.add(AnnounceEntry::new("http://c/announce", 1));
        let now = Instant::now();
        list.announce(now, false, AnnounceEvent::None);
        assert!(list.on_response("http://a/announce", AnnounceEvent::Started, &reply(1800), now));

        let later = now + Duration::from_secs(30);
        assert!(list.announce(later, false, AnnounceEvent::None).is_empty());
        assert_eq!(list.next_announce(later), Some(now + Duration::from_secs(1800)));

        let entry = list.get("http://a/announce").unwrap();
        assert!(entry.start_sent);
        assert!(entry.verified);
        assert!(!entry.updating);
    }

    #[test]
    fn test_failure_moves_to_next_tracker() {
        let mut list = list(false, false);
        let now = Instant::now();
        list.announce(now, false, AnnounceEvent::None);
        assert_eq!(list.on_failure("http://a/announce", &TrackerFailure::new("timeout"), now), Some(1));

        // a moved behind b within tier 0
        assert_eq!(list.entries()[1].url, "http://a/announce");
        let targets = list.announce(now, false, AnnounceEvent::None);
        assert_eq!(urls(&targets), vec!["http://b/announce"]);
    }

    #[test]
    fn test_failing_tier_falls_through() {
        let config = TrackerConfig::default();
        let mut list = TrackerList::new(&config);
        list.add(AnnounceEntry::new("http://a/announce", 0));
        list.add(AnnounceEntry::new("http://c/announce", 1));
        let now = Instant::now();

        list.announce(now, false, AnnounceEvent::None);
        list.on_failure("http://a/announce", &TrackerFailure::new("refused"), now);
        let targets = list.announce(now, false, AnnounceEvent::None);
        assert_eq!(urls(&targets), vec!["http://c/announce"]);
    }

    #[test]
    fn test_gone_tracker_is_disabled() {
        let mut list = list(false, false);
        let now = Instant::now();
        list.announce(now, false, AnnounceEvent::None);
        let gone = TrackerFailure::new("gone").with_status(410);
        list.on_failure("http://a/announce", &gone, now);

        let entry = list.get("http://a/announce").unwrap();
        assert!(entry.is_disabled());
        assert!(!entry.can_announce(now + Duration::from_secs(100_000), false));
    }

    #[test]
    fn test_interval_clamped_to_minimum() {
        let mut list = list(false, false);
        let now = Instant::now();
        list.announce(now, false, AnnounceEvent::None);
        let mut short = reply(5);
        short.min_interval = Duration::from_secs(30);
        list.on_response("http://a/announce", AnnounceEvent::Started, &short, now);
        let entry = list.get("http://a/announce").unwrap();
        assert_eq!(entry.next_announce, Some(now + Duration::from_secs(60)));
        assert_eq!(entry.min_announce_in(now), Duration::from_secs(30));
        assert_eq!(entry.min_announce_in(now + Duration::from_secs(45)), Duration::ZERO);
    }

    #[test]
    fn test_success_prioritizes_tracker_in_tier() {
        let mut list = list(false, true);
        let now = Instant::now();
        list.announce(now, false, AnnounceEvent::None);
        list.on_response("http://b/announce", AnnounceEvent::Started, &reply(900), now);
        assert_eq!(list.entries()[0].url, "http://b/announce");
        assert_eq!(list.last_working().unwrap().url, "http://b/announce");
    }

    #[test]
    fn test_completed_and_stopped_events() {
        let mut list = list(false, false);
        let now = Instant::now();
        list.announce(now, false, AnnounceEvent::None);
        list.on_response("http://a/announce", AnnounceEvent::Started, &reply(900), now);

        // A seed bypasses the minimum interval to report completion
        list.entries[0].next_announce = Some(now);
        let targets = list.announce(now, true, AnnounceEvent::None);
        assert_eq!(targets[0].event, AnnounceEvent::Completed);
        list.on_response("http://a/announce", AnnounceEvent::Completed, &reply(900), now);

        let stopping = list.announce(now, true, AnnounceEvent::Stopped);
        assert_eq!(urls(&stopping), vec!["http://a/announce"]);
        assert_eq!(stopping[0].event, AnnounceEvent::Stopped);
    }

    #[test]
    fn test_timer_waits_for_updating_tracker() {
        let mut list = list(false, false);
        let now = Instant::now();
        list.announce(now, false, AnnounceEvent::None);
        // Only the in-flight tracker is relevant; nothing else is due
        assert_eq!(list.next_announce(now), None);

        list.clear_updating("http://a/announce");
        assert_eq!(list.next_announce(now), Some(now + ANNOUNCE_TIMEOUT));
    }
}
