//! All torrents of one session, driven from a single task.
//!
//! [`Session`] is synchronous and takes the current time on every call;
//! the actor feeds it commands, transport events and ticks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::events::{PeerEvent, SessionEvent};
use crate::config::EddyConfig;
use crate::torrent::alerts::Alert;
use crate::torrent::controller::{AddTorrentParams, Collaborators, Torrent, TorrentStatus};
use crate::torrent::peer_list::PeerSource;
use crate::torrent::{InfoHash, TorrentError, TorrentState};

/// Torrents of a session plus the ones still draining disk jobs after
/// removal.
pub struct Session {
    config: Arc<EddyConfig>,
    collab: Collaborators,
    torrents: HashMap<InfoHash, Torrent>,
    /// Insertion order, which is also the download queue order
    queue: Vec<InfoHash>,
    removed: Vec<Torrent>,
}

impl Session {
    pub fn new(config: EddyConfig, collab: Collaborators) -> Self {
        Self {
            config: Arc::new(config),
            collab,
            torrents: HashMap::new(),
            queue: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn config(&self) -> &EddyConfig {
        &self.config
    }

    /// Adds and starts a torrent.
    ///
    /// # Errors
    ///
    /// - `TorrentError::DuplicateTorrent` - If the info-hash is already in the session
    pub fn add_torrent(&mut self, params: AddTorrentParams, now: Instant) -> Result<InfoHash, TorrentError> {
        let info_hash = params.info_hash;
        if self.torrents.contains_key(&info_hash) {
            return Err(TorrentError::DuplicateTorrent { info_hash });
        }
        let mut torrent = Torrent::new(params, Arc::clone(&self.config), self.collab.clone(), now);
        tracing::info!(%info_hash, name = torrent.name().unwrap_or(""), "Adding torrent");
        self.collab.alerts.post(Alert::TorrentAdded { info_hash });
        torrent.start(now);
        self.torrents.insert(info_hash, torrent);
        self.queue.push(info_hash);
        self.recalculate_auto_managed(now);
        Ok(info_hash)
    }

    /// Removes a torrent, optionally deleting its files.
    ///
    /// The torrent is aborted right away but kept until its outstanding
    /// disk jobs have completed.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the info-hash is unknown
    pub fn remove_torrent(
        &mut self,
        info_hash: InfoHash,
        delete_files: bool,
        now: Instant,
    ) -> Result<(), TorrentError> {
        let mut torrent = self
            .torrents
            .remove(&info_hash)
            .ok_or(TorrentError::TorrentNotFound { info_hash })?;
        self.queue.retain(|h| *h != info_hash);
        tracing::info!(%info_hash, delete_files, "Removing torrent");
        torrent.abort(now);
        if delete_files {
            torrent.delete_files(now);
        }
        self.collab.alerts.post(Alert::TorrentRemoved { info_hash });
        if torrent.jobs_in_flight() > 0 {
            self.removed.push(torrent);
        }
        self.recalculate_auto_managed(now);
        Ok(())
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the info-hash is unknown
    pub fn torrent(&self, info_hash: InfoHash) -> Result<&Torrent, TorrentError> {
        self.torrents
            .get(&info_hash)
            .ok_or(TorrentError::TorrentNotFound { info_hash })
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the info-hash is unknown
    pub fn torrent_mut(&mut self, info_hash: InfoHash) -> Result<&mut Torrent, TorrentError> {
        self.torrents
            .get_mut(&info_hash)
            .ok_or(TorrentError::TorrentNotFound { info_hash })
    }

    pub fn contains(&self, info_hash: InfoHash) -> bool {
        self.torrents.contains_key(&info_hash)
    }

    pub fn len(&self) -> usize {
        self.torrents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.torrents.is_empty()
    }

    /// Removed torrents still waiting for disk jobs.
    pub fn num_draining(&self) -> usize {
        self.removed.len()
    }

    /// Status of every torrent in queue order.
    pub fn list(&self, now: Instant) -> Vec<TorrentStatus> {
        self.queue
            .iter()
            .filter_map(|h| self.torrents.get(h))
            .map(|t| t.status(now))
            .collect()
    }

    /// Pauses a torrent on the user's behalf, taking it out of the queue.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the info-hash is unknown
    pub fn pause_torrent(&mut self, info_hash: InfoHash, graceful: bool, now: Instant) -> Result<(), TorrentError> {
        let torrent = self.torrent_mut(info_hash)?;
        torrent.set_auto_managed(false);
        torrent.pause(graceful, now);
        self.recalculate_auto_managed(now);
        Ok(())
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the info-hash is unknown
    pub fn resume_torrent(&mut self, info_hash: InfoHash, now: Instant) -> Result<(), TorrentError> {
        self.torrent_mut(info_hash)?.resume(now);
        self.recalculate_auto_managed(now);
        Ok(())
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the info-hash is unknown
    pub fn set_auto_managed(&mut self, info_hash: InfoHash, auto_managed: bool, now: Instant) -> Result<(), TorrentError> {
        self.torrent_mut(info_hash)?.set_auto_managed(auto_managed);
        self.recalculate_auto_managed(now);
        Ok(())
    }

    /// Routes a transport event to its torrent.
    pub fn handle_event(&mut self, event: SessionEvent, now: Instant) {
        let info_hash = event.info_hash();
        let Some(torrent) = self.torrents.get_mut(&info_hash) else {
            // Completions of removed torrents settle their in-flight count
            if let SessionEvent::Disk(completion) = event {
                if let Some(torrent) = self.removed.iter_mut().find(|t| t.info_hash() == info_hash) {
                    torrent.on_disk_completion(completion, now);
                }
                self.removed.retain(|t| t.jobs_in_flight() > 0);
            } else {
                tracing::trace!(%info_hash, "Event for unknown torrent");
            }
            return;
        };

        match event {
            SessionEvent::Disk(completion) => torrent.on_disk_completion(completion, now),
            SessionEvent::Tracker(reply) => torrent.on_tracker_event(reply, now),
            SessionEvent::Dht(found) => torrent.on_dht_peers(&found.peers, now),
            SessionEvent::LocalPeer { peer, .. } => torrent.on_lsd_peer(peer, now),
            SessionEvent::Peer {
                connection, event, ..
            } => match event {
                PeerEvent::Have { piece } => torrent.peer_has_piece(connection, piece),
                PeerEvent::Seed => torrent.peer_is_seed(connection, now),
                PeerEvent::Block { block, data } => {
                    if let Err(e) = torrent.on_block_received(connection, block, data) {
                        tracing::debug!(%info_hash, %connection, error = %e, "Dropped block");
                    }
                }
                PeerEvent::ListenPort { port } => {
                    torrent.update_peer_port(connection, port, now);
                }
                PeerEvent::Disconnected => torrent.on_peer_disconnected(connection, now),
            },
        }
    }

    /// Adds a peer to a torrent's list.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - If the info-hash is unknown
    pub fn add_peer(&mut self, info_hash: InfoHash, peer: std::net::SocketAddr, now: Instant) -> Result<bool, TorrentError> {
        let torrent = self.torrent_mut(info_hash)?;
        Ok(torrent.add_peer(peer, PeerSource::empty(), now).is_some())
    }

    /// Once-per-second housekeeping for every torrent.
    pub fn tick(&mut self, now: Instant) {
        for torrent in self.torrents.values_mut() {
            torrent.tick(now);
        }
        self.recalculate_auto_managed(now);
    }

    /// Starts and pauses auto-managed torrents to honor the queue limits.
    ///
    /// Downloads are admitted in queue order, seeds by seed rank. Torrents
    /// in the error state and ones still checking files are left alone.
    pub fn recalculate_auto_managed(&mut self, now: Instant) {
        let queue = &self.config.queue;
        let mut downloaders = Vec::new();
        let mut seeds = Vec::new();
        for (position, info_hash) in self.queue.iter().enumerate() {
            let Some(torrent) = self.torrents.get(info_hash) else {
                continue;
            };
            if !torrent.is_auto_managed()
                || torrent.error().is_some()
                || torrent.state() == TorrentState::CheckingFiles
            {
                continue;
            }
            if torrent.is_finished() {
                seeds.push((torrent.seed_rank(queue, now), *info_hash));
            } else {
                downloaders.push((position, *info_hash));
            }
        }
        seeds.sort_by(|a, b| b.0.cmp(&a.0));

        let mut hard_limit = queue.active_limit;
        let mut decisions = Vec::with_capacity(downloaders.len() + seeds.len());
        let mut downloads_left = queue.active_downloads;
        for (_, info_hash) in downloaders {
            let active = downloads_left > 0 && hard_limit > 0;
            if active {
                downloads_left -= 1;
                hard_limit -= 1;
            }
            decisions.push((info_hash, active));
        }
        let mut seeds_left = queue.active_seeds;
        for (_, info_hash) in seeds {
            let active = seeds_left > 0 && hard_limit > 0;
            if active {
                seeds_left -= 1;
                hard_limit -= 1;
            }
            decisions.push((info_hash, active));
        }

        for (info_hash, active) in decisions {
            let Some(torrent) = self.torrents.get_mut(&info_hash) else {
                continue;
            };
            if active && torrent.is_paused() {
                tracing::debug!(%info_hash, "Queue starting torrent");
                torrent.resume(now);
            } else if !active && !torrent.is_paused() {
                tracing::debug!(%info_hash, "Queue pausing torrent");
                torrent.pause(false, now);
            }
        }

        let mut position = 0;
        for info_hash in &self.queue {
            let Some(torrent) = self.torrents.get_mut(info_hash) else {
                continue;
            };
            if torrent.is_finished() {
                torrent.set_queue_position(None);
            } else {
                torrent.set_queue_position(Some(position));
                position += 1;
            }
        }
    }

    /// Aborts every torrent. Used on shutdown.
    pub fn abort_all(&mut self, now: Instant) {
        for (info_hash, mut torrent) in self.torrents.drain() {
            tracing::debug!(%info_hash, "Aborting on shutdown");
            torrent.abort(now);
            if torrent.jobs_in_flight() > 0 {
                self.removed.push(torrent);
            }
        }
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::test_mocks::{MockServices, TestTorrent};
    use crate::torrent::alerts::AlertSink;
    use crate::torrent::disk::DiskJob;

    fn session(config: EddyConfig) -> (Session, MockServices) {
        let services = MockServices::new();
        let session = Session::new(config, services.collaborators(AlertSink::disabled()));
        (session, services)
    }

    fn settle(session: &mut Session, services: &MockServices, now: Instant) {
        for _ in 0..10 {
            let completions = services.disk.complete_all();
            if completions.is_empty() {
                break;
            }
            for completion in completions {
                session.handle_event(SessionEvent::Disk(completion), now);
            }
        }
    }

    fn params(torrent: &TestTorrent) -> AddTorrentParams {
        let mut params = AddTorrentParams::new(torrent.info_hash).with_layout(torrent.layout.clone());
        params.auto_managed = true;
        params
    }

    #[test]
    fn test_duplicate_torrent_is_rejected() {
        let now = Instant::now();
        let (mut session, _services) = session(EddyConfig::for_testing());
        let torrent = TestTorrent::new(2, 16 * 1024);

        session.add_torrent(params(&torrent), now).unwrap();
        let result = session.add_torrent(params(&torrent), now);
        assert!(matches!(result, Err(TorrentError::DuplicateTorrent { .. })));
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_queue_limits_active_downloads() {
        let now = Instant::now();
        let mut config = EddyConfig::for_testing();
        config.queue.active_downloads = 2;
        let (mut session, services) = session(config);

        let torrents: Vec<_> = (0..4)
            .map(|i| TestTorrent::named(&format!("t{i}"), 2, 16 * 1024))
            .collect();
        for torrent in &torrents {
            session.add_torrent(params(torrent), now).unwrap();
        }
        settle(&mut session, &services, now);
        session.recalculate_auto_managed(now);

        let active: Vec<bool> = torrents
            .iter()
            .map(|t| !session.torrent(t.info_hash).unwrap().is_paused())
            .collect();
        assert_eq!(active, vec![true, true, false, false]);

        let positions: Vec<_> = session.list(now).iter().map(|s| s.queue_position).collect();
        assert_eq!(positions, vec![Some(0), Some(1), Some(2), Some(3)]);

        // Removing an active download admits the next one in line
        session.remove_torrent(torrents[0].info_hash, false, now).unwrap();
        assert!(!session.torrent(torrents[2].info_hash).unwrap().is_paused());
        assert!(session.torrent(torrents[3].info_hash).unwrap().is_paused());
    }

    #[test]
    fn test_user_pause_leaves_queue() {
        let now = Instant::now();
        let (mut session, services) = session(EddyConfig::for_testing());
        let torrent = TestTorrent::new(2, 16 * 1024);
        session.add_torrent(params(&torrent), now).unwrap();
        settle(&mut session, &services, now);

        session.pause_torrent(torrent.info_hash, false, now).unwrap();
        session.tick(now + Duration::from_secs(1));
        let t = session.torrent(torrent.info_hash).unwrap();
        assert!(t.is_paused());
        assert!(!t.is_auto_managed());
    }

    #[test]
    fn test_removed_torrent_drains_disk_jobs() {
        let now = Instant::now();
        let (mut session, services) = session(EddyConfig::for_testing());
        let torrent = TestTorrent::new(2, 16 * 1024);
        session.add_torrent(params(&torrent), now).unwrap();
        settle(&mut session, &services, now);

        session.remove_torrent(torrent.info_hash, true, now).unwrap();
        assert!(!session.contains(torrent.info_hash));
        assert_eq!(session.num_draining(), 1);
        assert!(services.disk.submitted().contains(&DiskJob::DeleteFiles));

        settle(&mut session, &services, now);
        assert_eq!(session.num_draining(), 0);
        assert!(matches!(
            session.remove_torrent(torrent.info_hash, false, now),
            Err(TorrentError::TorrentNotFound { .. })
        ));
    }
}
