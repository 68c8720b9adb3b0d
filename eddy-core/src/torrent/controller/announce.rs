use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::Torrent;
use crate::torrent::alerts::Alert;
use crate::torrent::peer_list::PeerSource;
use crate::torrent::picker::BLOCK_SIZE;
use crate::torrent::tracker::{
    AnnounceEntry, AnnounceEvent, AnnounceTarget, RequestKind, TrackerEvent, TrackerReply,
    TrackerRequest,
};
use crate::torrent::TorrentError;

impl Torrent {
    /// Starts the tracker timer and the DHT and local discovery cycles.
    pub(super) fn start_announcing(&mut self, now: Instant) {
        if self.announcing || self.is_paused() || self.aborted || self.error.is_some() {
            return;
        }
        // Checking files first; announcing waits for the result
        if self.layout.is_some() && !self.files_checked {
            return;
        }
        tracing::debug!(info_hash = %self.info_hash, trackers = self.trackers.len(), "Start announcing");
        self.announcing = true;
        self.next_dht_announce = Some(now);
        self.next_lsd_announce = Some(now);
        self.announce_with_tracker(now, AnnounceEvent::None);
        self.maybe_announce_dht(now);
        self.maybe_announce_lsd(now);
    }

    /// Sends `stopped` to every tracker that saw `started` and cancels all
    /// announce timers.
    pub(super) fn stop_announcing(&mut self, now: Instant) {
        if !self.announcing {
            return;
        }
        tracing::debug!(info_hash = %self.info_hash, "Stop announcing");
        self.announce_with_tracker(now, AnnounceEvent::Stopped);
        self.announcing = false;
        self.trackers.reset();
        self.tracker_timer = None;
        self.next_dht_announce = None;
        self.next_lsd_announce = None;
    }

    /// Announces to the trackers that are due, honoring tiers.
    pub(super) fn announce_with_tracker(&mut self, now: Instant, event: AnnounceEvent) {
        if event != AnnounceEvent::Stopped && (!self.announcing || !self.announce_to_trackers) {
            return;
        }
        let targets = self.trackers.announce(now, self.is_seed(), event);
        for target in targets {
            let request = self.tracker_request(&target, RequestKind::Announce);
            tracing::debug!(
                info_hash = %self.info_hash,
                url = %target.url,
                event = ?target.event,
                "Announcing to tracker"
            );
            self.post(Alert::TrackerAnnounce {
                info_hash: self.info_hash,
                url: target.url.clone(),
                event: target.event,
            });
            self.collab.tracker.queue_request(request);
        }
        self.update_tracker_timer(now);
    }

    fn tracker_request(&self, target: &AnnounceTarget, kind: RequestKind) -> TrackerRequest {
        let left = match &self.layout {
            Some(layout) => {
                let payload = layout.total_size() - layout.total_pad_bytes();
                payload.saturating_sub(self.total_done())
            }
            None => u64::from(BLOCK_SIZE),
        };
        TrackerRequest {
            info_hash: self.info_hash,
            url: target.url.clone(),
            kind,
            event: target.event,
            trackerid: target.trackerid.clone(),
            uploaded: self.counters.uploaded,
            downloaded: self.counters.downloaded,
            left,
            corrupt: self.counters.failed_bytes,
            redundant: self.counters.redundant_bytes,
            num_want: if target.event == AnnounceEvent::Stopped {
                0
            } else {
                self.config.tracker.num_want
            },
            listen_port: self.listen_port,
            key: self.tracker_key,
            timeout: (target.event == AnnounceEvent::Stopped)
                .then_some(self.config.tracker.stop_tracker_timeout),
        }
    }

    fn update_tracker_timer(&mut self, now: Instant) {
        self.tracker_timer = if self.announcing {
            self.trackers.next_announce(now)
        } else {
            None
        };
    }

    /// A tracker answered, or failed to.
    pub fn on_tracker_event(&mut self, event: TrackerEvent, now: Instant) {
        if self.aborted {
            return;
        }
        let url = event.url;
        match event.reply {
            TrackerReply::Announce(response) => {
                if !self.trackers.on_response(&url, event.event, &response, now) {
                    return;
                }
                tracing::debug!(
                    info_hash = %self.info_hash,
                    %url,
                    peers = response.peers.len(),
                    interval = response.interval.as_secs(),
                    "Tracker reply"
                );
                if response.complete >= 0 {
                    self.num_complete = response.complete;
                }
                if response.incomplete >= 0 {
                    self.num_incomplete = response.incomplete;
                }
                if response.downloaded >= 0 {
                    self.num_downloaded = response.downloaded;
                }
                if let Some(ip) = response.external_ip {
                    self.set_external_address(SocketAddr::new(ip, self.listen_port));
                }
                if let Some(message) = &response.warning_message {
                    tracing::warn!(info_hash = %self.info_hash, %url, %message, "Tracker warning");
                    self.post(Alert::TrackerWarning {
                        info_hash: self.info_hash,
                        url: url.clone(),
                        message: message.clone(),
                    });
                }
                self.post(Alert::TrackerReply {
                    info_hash: self.info_hash,
                    url,
                    num_peers: response.peers.len(),
                });
                if event.event != AnnounceEvent::Stopped {
                    for &addr in &response.peers {
                        self.add_peer(addr, PeerSource::TRACKER, now);
                    }
                }
            }
            TrackerReply::Scrape(scrape) => {
                self.trackers.on_scrape(&url, &scrape);
                if scrape.complete >= 0 {
                    self.num_complete = scrape.complete;
                }
                if scrape.incomplete >= 0 {
                    self.num_incomplete = scrape.incomplete;
                }
                self.post(Alert::ScrapeReply {
                    info_hash: self.info_hash,
                    url,
                    complete: scrape.complete,
                    incomplete: scrape.incomplete,
                });
            }
            TrackerReply::Failed(failure) => {
                if event.kind == RequestKind::Scrape {
                    tracing::debug!(info_hash = %self.info_hash, %url, message = %failure.message, "Scrape failed");
                    self.trackers.clear_updating(&url);
                    return;
                }
                let Some(fails) = self.trackers.on_failure(&url, &failure, now) else {
                    return;
                };
                tracing::warn!(
                    info_hash = %self.info_hash,
                    %url,
                    fails,
                    status = ?failure.status_code,
                    message = %failure.message,
                    "Tracker announce failed"
                );
                self.post(Alert::TrackerError {
                    info_hash: self.info_hash,
                    url,
                    times_in_row: u32::from(fails),
                    status_code: failure.status_code,
                    message: failure.message,
                });
            }
        }
        self.update_tracker_timer(now);
    }

    /// Adds a tracker at `tier`. Returns false if it was already present.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTrackerUrl` - If the URL is malformed or uses an unsupported scheme
    pub fn add_tracker(&mut self, url: &str, tier: u8, now: Instant) -> Result<bool, TorrentError> {
        let entry = AnnounceEntry::validated(url, tier)?;
        let added = self.trackers.add(entry);
        if added {
            self.need_save_resume = true;
            self.update_tracker_timer(now);
        }
        Ok(added)
    }

    /// Replaces every tracker. Nothing changes if any URL is invalid.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTrackerUrl` - If a URL is malformed or uses an unsupported scheme
    pub fn replace_trackers(&mut self, tiers: Vec<Vec<String>>, now: Instant) -> Result<(), TorrentError> {
        let mut entries = Vec::new();
        for (tier, urls) in tiers.iter().enumerate() {
            for url in urls {
                entries.push(AnnounceEntry::validated(url, tier as u8)?);
            }
        }
        self.trackers.replace(entries);
        self.need_save_resume = true;
        self.announce_with_tracker(now, AnnounceEvent::None);
        self.update_tracker_timer(now);
        Ok(())
    }

    /// Re-announces `after` from now. `url` limits it to one tracker.
    pub fn force_reannounce(&mut self, after: Duration, url: Option<&str>, now: Instant) {
        self.trackers.force_reannounce(now, after, url);
        if after.is_zero() {
            self.announce_with_tracker(now, AnnounceEvent::None);
        } else {
            self.update_tracker_timer(now);
        }
    }

    /// Scrapes one tracker, or the last working one.
    pub fn scrape_tracker(&mut self, url: Option<&str>) {
        let entry = match url {
            Some(url) => self.trackers.get(url),
            None => self
                .trackers
                .last_working()
                .or_else(|| self.trackers.entries().first()),
        };
        let Some(entry) = entry else {
            return;
        };
        let target = AnnounceTarget {
            url: entry.url.clone(),
            event: AnnounceEvent::None,
            trackerid: entry.trackerid.clone(),
        };
        let request = self.tracker_request(&target, RequestKind::Scrape);
        self.collab.tracker.queue_request(request);
    }

    pub fn next_tracker_timer(&self) -> Option<Instant> {
        self.tracker_timer
    }

    fn is_private(&self) -> bool {
        self.layout.as_ref().is_some_and(|l| l.is_private())
    }

    fn should_announce_dht(&self) -> bool {
        self.collab.dht.as_ref().is_some_and(|d| d.is_running())
            && self.announce_to_dht
            && !self.is_private()
            && !self.is_paused()
            && (self.layout.is_none() || self.files_checked)
    }

    pub(super) fn maybe_announce_dht(&mut self, now: Instant) {
        if !self.should_announce_dht() || self.next_dht_announce.is_none_or(|t| t > now) {
            return;
        }
        self.next_dht_announce = Some(now + self.config.tracker.dht_announce_interval);
        if let Some(dht) = &self.collab.dht {
            tracing::debug!(info_hash = %self.info_hash, "Announcing to DHT");
            dht.announce(self.info_hash, self.listen_port, self.is_seed());
        }
    }

    pub(super) fn maybe_announce_lsd(&mut self, now: Instant) {
        let eligible = self.collab.lsd.is_some()
            && self.announce_to_lsd
            && !self.is_private()
            && !self.is_paused()
            && (self.layout.is_none() || self.files_checked);
        if !eligible || self.next_lsd_announce.is_none_or(|t| t > now) {
            return;
        }
        self.next_lsd_announce = Some(now + self.config.tracker.local_service_announce_interval);
        if let Some(lsd) = &self.collab.lsd {
            tracing::trace!(info_hash = %self.info_hash, "Local service discovery announce");
            lsd.announce(self.info_hash, self.listen_port);
        }
    }

    pub fn url_seeds(&self) -> &[String] {
        &self.url_seeds
    }

    pub fn http_seeds(&self) -> &[String] {
        &self.http_seeds
    }

    pub fn add_url_seed(&mut self, url: String) {
        if !self.url_seeds.contains(&url) {
            self.url_seeds.push(url);
            self.need_save_resume = true;
        }
    }

    pub fn remove_url_seed(&mut self, url: &str) {
        let before = self.url_seeds.len();
        self.url_seeds.retain(|u| u != url);
        if self.url_seeds.len() != before {
            self.need_save_resume = true;
        }
    }

    pub fn add_http_seed(&mut self, url: String) {
        if !self.http_seeds.contains(&url) {
            self.http_seeds.push(url);
            self.need_save_resume = true;
        }
    }
}
