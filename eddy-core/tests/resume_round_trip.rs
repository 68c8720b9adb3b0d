//! Saving resume data and restarting from it.

mod common;

use common::{TorrentFixture, addr, seeded_config};
use eddy_core::engine::TestTorrent;
use eddy_core::torrent::connection::ConnectionId;
use eddy_core::torrent::disk::FastresumeResult;
use eddy_core::torrent::picker::{BlockRef, PiecePicker};
use eddy_core::torrent::{
    AddTorrentParams, Alert, PeerEndpoint, PeerSource, PieceIndex, ResumeData, TorrentErrorCode,
    TorrentState,
};

const TIERS: [&str; 2] = ["http://a.test/announce", "udp://b.test:6969/announce"];

fn saved_resume(fixture: &mut TorrentFixture) -> ResumeData {
    fixture.drain_alerts();
    fixture.torrent.save_resume_data().unwrap();
    fixture.settle();
    fixture
        .drain_alerts()
        .into_iter()
        .find_map(|alert| match alert {
            Alert::SaveResumeData { resume, .. } => Some(*resume),
            _ => None,
        })
        .expect("resume data posted after the flush")
}

#[test]
fn test_restart_from_saved_resume_data() -> anyhow::Result<()> {
    let test = TestTorrent::new(4, 32 * 1024);
    let params = AddTorrentParams::new(test.info_hash)
        .with_layout(test.layout.clone())
        .with_trackers(vec![vec![TIERS[0].to_string()], vec![TIERS[1].to_string()]]);
    let mut first = TorrentFixture::started_with(params, seeded_config());
    let now = first.now;

    first.torrent.add_piece(PieceIndex::new(0), test.piece(0))?;
    let half = BlockRef::new(PieceIndex::new(1), 0);
    first
        .torrent
        .on_block_received(ConnectionId(99), half, test.block(half))?;
    first.settle();
    first.torrent.set_piece_priority(PieceIndex::new(3), 0, now)?;

    let good = addr(10, 1, 0, 1, 6881);
    let bad = addr(10, 1, 0, 2, 6881);
    first.torrent.add_peer(good, PeerSource::TRACKER, now);
    first.torrent.add_peer(bad, PeerSource::TRACKER, now);
    assert!(first.torrent.ban_peer(bad, now));

    let resume = saved_resume(&mut first);
    assert!(!first.torrent.need_save_resume_data());
    let blob = resume.encode()?;

    let params = AddTorrentParams::new(test.info_hash)
        .with_layout(test.layout.clone())
        .with_resume_data(blob);
    let second = TorrentFixture::started_with(params, seeded_config());

    assert_eq!(second.torrent.state(), TorrentState::Downloading);
    assert!(second.torrent.have_piece(PieceIndex::new(0)));
    assert!(!second.torrent.have_piece(PieceIndex::new(1)));
    assert_eq!(second.torrent.piece_priority(PieceIndex::new(3))?, 0);
    assert_eq!(
        second.torrent.trackers().tiers(),
        vec![vec![TIERS[0].to_string()], vec![TIERS[1].to_string()]]
    );

    let picker = second.torrent.picker().unwrap();
    let partial = picker.downloading_piece(PieceIndex::new(1)).expect("partial piece restored");
    assert_eq!(partial.num_finished(), 1);

    let peers = second.torrent.peer_list();
    let restored = peers.find(&PeerEndpoint::Ip(good)).expect("peer restored");
    assert!(!peers.get(restored).unwrap().is_banned());
    let banned = peers.find(&PeerEndpoint::Ip(bad)).expect("banned peer restored");
    assert!(peers.get(banned).unwrap().is_banned());

    let status = second.torrent.status(second.now);
    assert_eq!(status.total_downloaded, 16 * 1024);
    assert_eq!(status.num_have, 1);
    Ok(())
}

#[test]
fn test_sparse_tracker_tiers_survive_restart() -> anyhow::Result<()> {
    let test = TestTorrent::new(2, 16 * 1024);
    let params = AddTorrentParams::new(test.info_hash)
        .with_layout(test.layout.clone())
        .with_trackers(vec![vec![TIERS[0].to_string()]]);
    let mut first = TorrentFixture::started_with(params, seeded_config());
    let now = first.now;
    assert!(first.torrent.add_tracker(TIERS[1], 5, now)?);

    let blob = saved_resume(&mut first).encode()?;
    let params = AddTorrentParams::new(test.info_hash)
        .with_layout(test.layout.clone())
        .with_resume_data(blob);
    let second = TorrentFixture::started_with(params, seeded_config());

    let tiers: Vec<(&str, u8)> = second
        .torrent
        .trackers()
        .entries()
        .iter()
        .map(|e| (e.url.as_str(), e.tier))
        .collect();
    assert_eq!(tiers, vec![(TIERS[0], 0), (TIERS[1], 5)]);
    Ok(())
}

#[test]
fn test_resume_data_for_other_torrent_is_ignored() {
    let test = TestTorrent::new(2, 16 * 1024);
    let other = TestTorrent::named("other", 2, 16 * 1024);
    let blob = ResumeData::new(other.info_hash).encode().unwrap();

    let params = AddTorrentParams::new(test.info_hash)
        .with_layout(test.layout.clone())
        .with_resume_data(blob);
    let mut fixture = TorrentFixture::new(params, seeded_config());
    fixture.services.disk.store_piece(test.info_hash, PieceIndex::new(1), &test.piece(1));
    fixture.services.disk.set_fastresume_result(FastresumeResult::NeedFullCheck);
    let now = fixture.now;
    fixture.torrent.start(now);
    fixture.settle();

    let alerts = fixture.drain_alerts();
    assert!(alerts.iter().any(|a| matches!(a, Alert::FastresumeRejected { .. })));
    // Piece 0 is missing on disk, piece 1 passes the check
    assert_eq!(fixture.torrent.state(), TorrentState::Downloading);
    assert!(!fixture.torrent.have_piece(PieceIndex::new(0)));
    assert!(fixture.torrent.have_piece(PieceIndex::new(1)));
}

#[test]
fn test_unsupported_resume_version_is_an_error() {
    let test = TestTorrent::new(2, 16 * 1024);
    let mut resume = ResumeData::new(test.info_hash);
    resume.file_version = 99;
    let params = AddTorrentParams::new(test.info_hash)
        .with_layout(test.layout.clone())
        .with_resume_data(resume.encode().unwrap());
    let fixture = TorrentFixture::started_with(params, seeded_config());

    assert_eq!(fixture.torrent.state(), TorrentState::Error);
    assert!(matches!(
        fixture.torrent.error(),
        Some(TorrentErrorCode::UnsupportedResumeVersion { found: 99 })
    ));
    assert!(fixture.torrent.picker().is_none());
}
