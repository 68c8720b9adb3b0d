//! User-facing torrent operations: metadata, files, modes, filters and
//! peer discovery.

mod common;

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use common::{TorrentFixture, addr, seeded_config};
use eddy_core::config::QueueConfig;
use eddy_core::engine::{ConnectionMonitor, MockConnection, TestTorrent};
use eddy_core::torrent::connection::PendingBlock;
use eddy_core::torrent::controller::{NO_SEEDS, RECENTLY_STARTED, SEED_RATIO_NOT_MET};
use eddy_core::torrent::disk::DiskJob;
use eddy_core::torrent::picker::BlockRef;
use eddy_core::torrent::tracker::RequestKind;
use eddy_core::torrent::{
    AddTorrentParams, Alert, ConnectionId, DisconnectReason, FileIndex, PeerConnection, PeerEndpoint,
    PeerSource, PiecePicker, PieceIndex, TorrentError, TorrentState,
};

const TRACKER: &str = "http://tracker.test/announce";
const OTHER_TRACKER: &str = "udp://other.test:6969/announce";

fn peer_count(fixture: &TorrentFixture, piece: u32) -> u32 {
    fixture
        .torrent
        .picker()
        .unwrap()
        .piece_stats(PieceIndex::new(piece))
        .peer_count
}

/// Gives a connected peer `piece` and some upload history.
fn seed_history(fixture: &mut TorrentFixture, monitor: &ConnectionMonitor, piece: u32, uploaded: u64) {
    monitor.update(|s| {
        s.pieces.insert(PieceIndex::new(piece));
        s.stats.total_uploaded = uploaded;
    });
    fixture.torrent.peer_has_piece(monitor.id(), PieceIndex::new(piece));
}

fn finish_all(fixture: &mut TorrentFixture, test: &TestTorrent) {
    for piece in 0..test.layout.num_pieces() {
        fixture
            .torrent
            .add_piece(PieceIndex::new(piece), test.piece(piece))
            .unwrap();
    }
    fixture.settle();
}

#[test]
fn test_metadata_from_swarm_starts_download() {
    let test = TestTorrent::new(2, 16 * 1024);
    let mut fixture = TorrentFixture::started_with(AddTorrentParams::new(test.info_hash), seeded_config());
    assert_eq!(fixture.torrent.state(), TorrentState::DownloadingMetadata);
    assert!(!fixture.torrent.has_metadata());

    let now = fixture.now;
    let bad = fixture.torrent.set_metadata(Bytes::from_static(b"d4:name3:bade"), now);
    assert!(matches!(bad, Err(TorrentError::MetadataHashMismatch { .. })));
    assert_eq!(fixture.torrent.state(), TorrentState::DownloadingMetadata);
    assert!(fixture
        .drain_alerts()
        .iter()
        .any(|a| matches!(a, Alert::MetadataFailed { .. })));

    fixture.torrent.set_metadata(test.info.clone(), now).unwrap();
    fixture.settle();
    assert_eq!(fixture.torrent.state(), TorrentState::Downloading);
    assert_eq!(fixture.torrent.metadata(), Some(&test.info));
    assert_eq!(fixture.torrent.layout().unwrap().num_pieces(), 2);
    assert!(fixture
        .drain_alerts()
        .iter()
        .any(|a| matches!(a, Alert::MetadataReceived { .. })));
}

#[test]
fn test_unloaded_metadata_reloads_with_renames() {
    let test = TestTorrent::new(2, 16 * 1024);
    let mut fixture = TorrentFixture::started_with(AddTorrentParams::new(test.info_hash), seeded_config());
    let now = fixture.now;
    fixture.torrent.set_metadata(test.info.clone(), now).unwrap();
    fixture.settle();

    fixture
        .torrent
        .rename_file(FileIndex(0), "renamed/data.bin".to_string())
        .unwrap();
    fixture.settle();
    assert!(fixture
        .drain_alerts()
        .iter()
        .any(|a| matches!(a, Alert::FileRenamed { file: FileIndex(0), .. })));

    // Only an idle, paused torrent gives up its layout
    assert!(!fixture.torrent.unload_metadata());
    fixture.torrent.pause(false, now);
    fixture.settle();
    assert!(fixture.torrent.unload_metadata());
    assert!(!fixture.torrent.is_metadata_loaded());
    assert!(fixture.torrent.layout().is_none());

    fixture.torrent.load_metadata().unwrap();
    assert!(fixture.torrent.is_metadata_loaded());
    let layout = fixture.torrent.layout().unwrap();
    assert_eq!(layout.file(FileIndex(0)).unwrap().path, vec!["renamed", "data.bin"]);
}

#[test]
fn test_storage_operations_report_completion() {
    let test = TestTorrent::new(2, 16 * 1024);
    let mut fixture = TorrentFixture::started(&test, seeded_config());
    let now = fixture.now;
    fixture.torrent.add_piece(PieceIndex::new(0), test.piece(0)).unwrap();
    fixture.settle();
    fixture.drain_alerts();

    let moved = PathBuf::from("/data/moved");
    fixture.torrent.move_storage(moved.clone()).unwrap();
    fixture.settle();
    assert_eq!(fixture.torrent.save_path(), moved.as_path());
    assert!(fixture
        .drain_alerts()
        .iter()
        .any(|a| matches!(a, Alert::StorageMoved { path, .. } if *path == moved)));

    fixture.torrent.release_files();
    assert!(fixture
        .services
        .disk
        .submitted()
        .iter()
        .any(|job| matches!(job, DiskJob::ReleaseFiles)));
    fixture.settle();

    fixture.torrent.abort(now);
    assert!(fixture.torrent.is_aborted());
    assert_eq!(fixture.services.disk.aborts(), vec![test.info_hash]);
    assert!(matches!(
        fixture.torrent.move_storage(PathBuf::from("/elsewhere")),
        Err(TorrentError::InvalidState { .. })
    ));

    // Deleting after removal is the usual order
    fixture.torrent.delete_files(now);
    fixture.settle();
    assert!(!fixture.services.disk.has_piece_data(test.info_hash, PieceIndex::new(0)));
    assert!(fixture
        .drain_alerts()
        .iter()
        .any(|a| matches!(a, Alert::FilesDeleted { .. })));
}

#[test]
fn test_upload_mode_cancels_queued_requests() {
    let test = TestTorrent::new(2, 32 * 1024);
    let mut fixture = TorrentFixture::started(&test, seeded_config());
    let monitor = fixture.attach(1, addr(10, 0, 0, 1, 6881));
    let block = BlockRef::new(PieceIndex::new(0), 1);
    monitor.update(|s| {
        s.request_queue.push(PendingBlock {
            block,
            timed_out: false,
            busy: false,
        })
    });
    fixture.drain_alerts();

    fixture.torrent.set_upload_mode(true);
    let state = monitor.state();
    assert_eq!(state.cancelled, vec![block]);
    assert!(state.request_queue.is_empty());
    assert_eq!(state.upload_only, Some(true));
    assert!(fixture.torrent.status(fixture.now).upload_mode);
    assert!(fixture
        .drain_alerts()
        .iter()
        .any(|a| matches!(a, Alert::UploadModeChanged { upload_mode: true, .. })));

    fixture.torrent.set_upload_mode(false);
    assert_eq!(monitor.state().upload_only, Some(false));
}

#[test]
fn test_share_mode_downloads_only_rare_pieces() {
    let test = TestTorrent::new(4, 16 * 1024);
    let mut fixture = TorrentFixture::started(&test, seeded_config());
    let monitors: Vec<_> = (0..4)
        .map(|n| fixture.attach(n + 1, addr(10, 0, 0, n as u8 + 1, 6881)))
        .collect();
    let rare = PieceIndex::new(2);
    monitors[0].update(|s| {
        s.pieces.insert(rare);
    });
    fixture.torrent.peer_has_piece(monitors[0].id(), rare);

    let now = fixture.now;
    fixture.torrent.set_share_mode(true, now);
    assert!(fixture.torrent.share_mode());
    assert!(monitors.iter().all(|p| p.state().share_mode_sent == Some(true)));
    // Three peers lack the piece, enough to upload it again
    assert_eq!(fixture.torrent.piece_priority(rare).unwrap(), 1);
    for piece in [0, 1, 3].map(PieceIndex::new) {
        assert_eq!(fixture.torrent.piece_priority(piece).unwrap(), 0);
    }
    assert_eq!(fixture.torrent.state(), TorrentState::Downloading);

    fixture.torrent.set_share_mode(false, now);
    for piece in (0..4).map(PieceIndex::new) {
        assert_eq!(fixture.torrent.piece_priority(piece).unwrap(), 4);
    }
}

#[test]
fn test_share_mode_sheds_surplus_seeds() {
    let test = TestTorrent::new(4, 16 * 1024);
    let mut fixture = TorrentFixture::started(&test, seeded_config());
    let now = fixture.now;
    let mut seeds = Vec::new();
    for n in 0..22u8 {
        let connection = MockConnection::new(ConnectionId(u64::from(n) + 1), addr(10, 3, 0, n + 1, 6881));
        let connection = if n < 12 {
            connection.as_seed()
        } else {
            connection.in_share_mode()
        };
        let monitor = connection.monitor();
        fixture.torrent.attach_peer(Box::new(connection), now).unwrap();
        if n < 12 {
            seeds.push(monitor);
        }
    }

    fixture.torrent.set_share_mode(true, now);
    // 12 seeds among 22 peers: one goes so seeds are at most half
    let dropped = seeds
        .iter()
        .filter(|p| p.disconnect_reason() == Some(DisconnectReason::UploadToUpload))
        .count();
    assert_eq!(dropped, 1);
    assert_eq!(fixture.torrent.num_connections(), 21);
    // Share-mode peers download nothing from us, so no piece is enabled
    for piece in (0..4).map(PieceIndex::new) {
        assert_eq!(fixture.torrent.piece_priority(piece).unwrap(), 0);
    }
}

#[test]
fn test_ip_and_port_filters_remove_peers() {
    let test = TestTorrent::new(2, 16 * 1024);
    let mut fixture = TorrentFixture::started(&test, seeded_config());
    let now = fixture.now;
    let quiet = addr(10, 0, 0, 1, 6881);
    let odd_port = addr(10, 0, 0, 2, 7000);
    fixture.torrent.add_peer(quiet, PeerSource::TRACKER, now);
    fixture.torrent.add_peer(odd_port, PeerSource::TRACKER, now);
    let connected = fixture.attach(1, addr(10, 0, 0, 3, 6881));
    seed_history(&mut fixture, &connected, 0, 1000);
    assert_eq!(peer_count(&fixture, 0), 1);

    let blocked_ip = connected.remote().ip();
    let removed = fixture.torrent.apply_ip_filter(|ip| ip == blocked_ip, now);
    assert_eq!(removed, vec![blocked_ip]);
    assert_eq!(connected.disconnect_reason(), Some(DisconnectReason::BannedByIpFilter));
    assert_eq!(fixture.torrent.num_connections(), 0);
    assert!(fixture.torrent.peer_list().find_ip(blocked_ip).is_none());
    // The erased peer's availability and uploads are settled on close
    assert_eq!(peer_count(&fixture, 0), 0);
    assert_eq!(fixture.torrent.status(now).total_uploaded, 1000);

    let on_odd_port = fixture.attach(2, addr(10, 0, 0, 4, 7000));
    seed_history(&mut fixture, &on_odd_port, 1, 500);
    assert_eq!(peer_count(&fixture, 1), 1);
    let removed = fixture.torrent.apply_port_filter(|port| port == 7000, now);
    assert_eq!(removed.len(), 2);
    assert!(removed.contains(&odd_port.ip()));
    assert_eq!(on_odd_port.disconnect_reason(), Some(DisconnectReason::BannedByPortFilter));
    assert_eq!(peer_count(&fixture, 1), 0);
    assert_eq!(fixture.torrent.status(now).total_uploaded, 1500);
    assert_eq!(fixture.torrent.peer_list().len(), 1);
    assert!(fixture.torrent.peer_list().find(&PeerEndpoint::Ip(quiet)).is_some());
}

#[test]
fn test_duplicate_listen_port_releases_availability() {
    let test = TestTorrent::new(2, 16 * 1024);
    let mut config = seeded_config();
    config.swarm.allow_multiple_connections_per_ip = true;
    let mut fixture = TorrentFixture::started(&test, config);
    let now = fixture.now;

    let listening = fixture.attach(1, addr(10, 0, 0, 5, 6881));
    let second = fixture.attach(2, addr(10, 0, 0, 5, 51234));
    seed_history(&mut fixture, &second, 0, 700);
    assert_eq!(peer_count(&fixture, 0), 1);

    // The second connection claims a listen port another connected entry holds
    assert!(!fixture.torrent.update_peer_port(second.id(), 6881, now));
    assert_eq!(second.disconnect_reason(), Some(DisconnectReason::DuplicatePeer));
    assert_eq!(listening.disconnect_reason(), None);
    assert_eq!(fixture.torrent.num_connections(), 1);
    assert_eq!(fixture.torrent.peer_list().len(), 1);
    assert_eq!(peer_count(&fixture, 0), 0);
    assert_eq!(fixture.torrent.status(now).total_uploaded, 700);
}

#[test]
fn test_discovered_peers_are_connected_on_tick() {
    let test = TestTorrent::new(2, 16 * 1024);
    let mut config = seeded_config();
    config.swarm.min_reconnect_time = Duration::from_secs(60);
    let mut fixture = TorrentFixture::started(&test, config);
    let now = fixture.now;
    let (dht_a, dht_b, local) = (
        addr(10, 1, 0, 1, 6881),
        addr(10, 1, 0, 2, 6881),
        addr(192, 168, 0, 7, 6881),
    );

    fixture.torrent.on_dht_peers(&[dht_a, dht_b], now);
    fixture.torrent.on_lsd_peer(local, now);
    assert!(fixture
        .drain_alerts()
        .iter()
        .any(|a| matches!(a, Alert::DhtReply { num_peers: 2, .. })));
    let list = fixture.torrent.peer_list();
    let lsd = list.find(&PeerEndpoint::Ip(local)).unwrap();
    assert!(list.get(lsd).unwrap().source().contains(PeerSource::LSD));
    assert_eq!(list.num_connect_candidates(), 3);

    fixture.services.connector.refuse(dht_b);
    fixture.advance(Duration::from_secs(1));

    assert_eq!(fixture.services.connector.attempts().len(), 3);
    assert_eq!(fixture.torrent.num_connections(), 2);
    assert!(fixture.services.connector.monitor_for(dht_b).is_none());
    let list = fixture.torrent.peer_list();
    let refused = list.find(&PeerEndpoint::Ip(dht_b)).unwrap();
    // Refused once, then left alone for the reconnect delay
    assert_eq!(list.get(refused).unwrap().failcount(), 1);

    let list = fixture.torrent.peer_list();
    let reached = list.find(&PeerEndpoint::Ip(dht_a)).unwrap();
    assert!(list.get(reached).unwrap().is_connected());
    let monitor = fixture.services.connector.monitor_for(dht_a).unwrap();
    assert!(fixture.torrent.connection(monitor.id()).unwrap().is_connecting());
    monitor.set_connected();
    assert!(!fixture.torrent.connection(monitor.id()).unwrap().is_connecting());
}

#[test]
fn test_dht_announce_waits_for_running_node() {
    let test = TestTorrent::new(2, 16 * 1024);
    let params = AddTorrentParams::new(test.info_hash).with_layout(test.layout.clone());
    let mut fixture = TorrentFixture::new(params, seeded_config());
    fixture.services.dht.set_running(false);
    let now = fixture.now;
    fixture.torrent.start(now);
    fixture.settle();
    assert!(fixture.services.dht.announces().is_empty());
    assert_eq!(fixture.services.lsd.announces(), vec![test.info_hash]);

    fixture.services.dht.set_running(true);
    fixture.advance(Duration::from_secs(1));
    assert_eq!(fixture.services.dht.announces(), vec![(test.info_hash, 6881, false)]);
}

#[test]
fn test_i2p_peer_and_listen_port_update() {
    let test = TestTorrent::new(2, 16 * 1024);
    let mut fixture = TorrentFixture::started(&test, seeded_config());
    let now = fixture.now;

    let destination = "ukeu3k5oycgaauneqgtnvselmt4yemvoilkln7jpvamvfx7dnkdq.b32.i2p";
    let handle = fixture
        .torrent
        .add_i2p_peer(destination, PeerSource::TRACKER, now)
        .unwrap();
    assert_eq!(
        fixture
            .torrent
            .peer_list()
            .find(&PeerEndpoint::I2p(destination.to_string())),
        Some(handle)
    );
    assert!(fixture.torrent.add_i2p_peer("", PeerSource::TRACKER, now).is_none());

    // An incoming peer tells us where it listens
    let monitor = fixture.attach(1, addr(10, 0, 0, 5, 51234));
    let peer = monitor.state().peer.unwrap();
    assert!(!fixture.torrent.peer_list().get(peer).unwrap().is_connectable());
    assert!(fixture.torrent.update_peer_port(monitor.id(), 6881, now));
    let entry = fixture.torrent.peer_list().get(peer).unwrap();
    assert_eq!(entry.endpoint(), &PeerEndpoint::Ip(addr(10, 0, 0, 5, 6881)));
    assert!(entry.is_connectable());
}

#[test]
fn test_seed_connections_dropped_once_seeding() {
    let test = TestTorrent::new(2, 16 * 1024);
    let mut fixture = TorrentFixture::started(&test, seeded_config());
    let now = fixture.now;

    let early = fixture.attach(1, addr(10, 0, 0, 1, 6881));
    fixture.torrent.peer_is_seed(early.id(), now);
    assert_eq!(early.disconnect_reason(), None);
    assert_eq!(fixture.torrent.status(now).list_seeds, 1);

    finish_all(&mut fixture, &test);
    assert_eq!(fixture.torrent.state(), TorrentState::Seeding);
    let late = fixture.attach(2, addr(10, 0, 0, 2, 6881));
    fixture.torrent.peer_is_seed(late.id(), now);
    assert_eq!(late.disconnect_reason(), Some(DisconnectReason::UploadToUpload));
}

#[test]
fn test_disconnect_peers_closes_slowest_first() {
    let test = TestTorrent::new(2, 16 * 1024);
    let mut fixture = TorrentFixture::started(&test, seeded_config());
    let rates = [300, 100, 200];
    let monitors: Vec<_> = rates
        .iter()
        .enumerate()
        .map(|(n, &rate)| {
            let monitor = fixture.attach(n as u64 + 1, addr(10, 0, 0, n as u8 + 1, 6881));
            monitor.update(|s| s.stats.download_rate = rate);
            monitor
        })
        .collect();

    let now = fixture.now;
    let closed = fixture
        .torrent
        .disconnect_peers(1, DisconnectReason::TooManyConnections, now);
    assert_eq!(closed, 1);
    assert_eq!(monitors[1].disconnect_reason(), Some(DisconnectReason::TooManyConnections));
    assert_eq!(monitors[0].disconnect_reason(), None);
    assert_eq!(monitors[2].disconnect_reason(), None);
    assert_eq!(fixture.torrent.num_connections(), 2);
}

#[test]
fn test_seed_rank_and_queue_hooks() {
    let test = TestTorrent::new(2, 16 * 1024);
    let mut fixture = TorrentFixture::started(&test, seeded_config());
    let queue = QueueConfig::default();
    let now = fixture.now;
    assert_eq!(fixture.torrent.seed_rank(&queue, now), 0);

    finish_all(&mut fixture, &test);
    let rank = fixture.torrent.seed_rank(&queue, now);
    assert_ne!(rank & SEED_RATIO_NOT_MET, 0);
    assert_ne!(rank & RECENTLY_STARTED, 0);
    assert_ne!(rank & NO_SEEDS, 0);

    fixture.torrent.pause(false, now);
    assert_eq!(fixture.torrent.seed_rank(&queue, now) & RECENTLY_STARTED, 0);

    fixture.torrent.set_queue_position(Some(3));
    fixture.torrent.set_auto_managed(false);
    let status = fixture.torrent.status(now);
    assert_eq!(status.queue_position, Some(3));
    assert!(!status.auto_managed);
}

#[test]
fn test_file_priorities_deadlines_and_progress() {
    let test = TestTorrent::new(4, 16 * 1024);
    let mut fixture = TorrentFixture::started(&test, seeded_config());
    let now = fixture.now;

    fixture.torrent.prioritize_files(vec![0], now);
    assert_eq!(fixture.torrent.file_priorities(), vec![0]);
    assert_eq!(fixture.torrent.state(), TorrentState::Finished);
    fixture.torrent.prioritize_files(Vec::new(), now);
    assert_eq!(fixture.torrent.file_priorities(), vec![4]);
    assert_eq!(fixture.torrent.state(), TorrentState::Downloading);

    for piece in [0, 1].map(PieceIndex::new) {
        fixture
            .torrent
            .set_piece_deadline(piece, now + Duration::from_secs(3), false, now)
            .unwrap();
        assert_eq!(fixture.torrent.piece_priority(piece).unwrap(), 7);
    }
    fixture.torrent.clear_time_critical();
    assert!(fixture.torrent.time_critical().is_empty());
    assert_eq!(fixture.torrent.piece_priority(PieceIndex::new(0)).unwrap(), 4);
    assert_eq!(fixture.torrent.piece_priority(PieceIndex::new(1)).unwrap(), 4);

    fixture.torrent.set_sequential_download(true);
    assert!(fixture.torrent.sequential_download());

    fixture.torrent.add_piece(PieceIndex::new(0), test.piece(0)).unwrap();
    fixture.settle();
    assert_eq!(fixture.torrent.file_progress(), vec![16 * 1024]);
}

#[test]
fn test_tracker_and_seed_list_editing() {
    let test = TestTorrent::new(2, 16 * 1024);
    let params = AddTorrentParams::new(test.info_hash)
        .with_layout(test.layout.clone())
        .with_trackers(vec![vec![TRACKER.to_string()]]);
    let mut fixture = TorrentFixture::started_with(params, seeded_config());
    let now = fixture.now;
    fixture.services.tracker.take_requests();

    fixture
        .torrent
        .replace_trackers(vec![vec![OTHER_TRACKER.to_string()]], now)
        .unwrap();
    assert_eq!(fixture.torrent.trackers().tiers(), vec![vec![OTHER_TRACKER.to_string()]]);
    let requests = fixture.services.tracker.take_requests();
    assert!(requests.iter().any(|r| r.url == OTHER_TRACKER));

    let invalid = fixture
        .torrent
        .replace_trackers(vec![vec!["ftp://tracker.test/announce".to_string()]], now);
    assert!(matches!(invalid, Err(TorrentError::InvalidTrackerUrl { .. })));
    assert_eq!(fixture.torrent.trackers().len(), 1);

    fixture.torrent.scrape_tracker(None);
    let requests = fixture.services.tracker.take_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, RequestKind::Scrape);
    assert_eq!(requests[0].url, OTHER_TRACKER);

    let seed = "http://mirror.test/files/".to_string();
    fixture.torrent.add_url_seed(seed.clone());
    fixture.torrent.add_url_seed(seed.clone());
    assert_eq!(fixture.torrent.url_seeds(), [seed.clone()]);
    fixture.torrent.remove_url_seed(&seed);
    assert!(fixture.torrent.url_seeds().is_empty());
}
