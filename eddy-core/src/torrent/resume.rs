//! Persisted swarm state of a torrent.
//!
//! Stored as a JSON dictionary. Binary fields (piece flags, block bitmasks,
//! compact peer lists) are hex strings so the file stays diffable.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};

use super::{InfoHash, PieceIndex, TorrentError, TorrentErrorCode};

pub const RESUME_FORMAT: &str = "eddy resume file";
pub const RESUME_VERSION: u32 = 1;
/// Oldest version this build can read.
pub const MIN_RESUME_VERSION: u32 = 1;

/// Piece flag: the piece is on disk.
pub const PIECE_HAVE: u8 = 0x01;
/// Piece flag: the piece passed a hash check since it was written.
pub const PIECE_VERIFIED: u8 = 0x02;

/// Blocks already written for a piece that is not complete yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnfinishedPiece {
    pub piece: u32,
    /// One bit per block, most significant bit first
    pub bitmask: String,
}

impl UnfinishedPiece {
    pub fn new(piece: PieceIndex, finished: &[bool]) -> Self {
        let mut bytes = vec![0u8; finished.len().div_ceil(8)];
        for (i, _) in finished.iter().enumerate().filter(|(_, done)| **done) {
            bytes[i / 8] |= 0x80 >> (i % 8);
        }
        Self {
            piece: piece.as_u32(),
            bitmask: hex::encode(bytes),
        }
    }

    /// Indices of finished blocks below `num_blocks`.
    ///
    /// # Errors
    ///
    /// - `ResumeRejection::Corrupt` - If the bitmask is not valid hex
    pub fn finished_blocks(&self, num_blocks: u32) -> Result<Vec<u32>, ResumeRejection> {
        let bytes = decode_hex("unfinished", &self.bitmask)?;
        Ok((0..num_blocks)
            .filter(|&b| {
                bytes
                    .get(b as usize / 8)
                    .is_some_and(|byte| byte & (0x80 >> (b % 8)) != 0)
            })
            .collect())
    }
}

/// Why resume data could not be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResumeRejection {
    #[error("Not a resume file (format {found:?})")]
    BadFormat { found: String },

    #[error("Resume data belongs to torrent {found}")]
    InfoHashMismatch { found: String },

    #[error("Resume data version {found} is not supported")]
    UnsupportedVersion { found: u32 },

    #[error("Resume data is corrupt: {reason}")]
    Corrupt { reason: String },
}

impl ResumeRejection {
    /// The error a torrent enters when it cannot start from this data at
    /// all, not even with a full recheck.
    ///
    /// `None` means the blob is dropped and the torrent checks its files
    /// without it.
    pub fn error_code(&self) -> Option<TorrentErrorCode> {
        match self {
            ResumeRejection::UnsupportedVersion { found } => {
                Some(TorrentErrorCode::UnsupportedResumeVersion { found: *found })
            }
            _ => None,
        }
    }
}

/// The resume blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeData {
    #[serde(rename = "file-format")]
    pub file_format: String,
    #[serde(rename = "file-version")]
    pub file_version: u32,
    #[serde(rename = "info-hash")]
    pub info_hash: String,

    pub total_uploaded: u64,
    pub total_downloaded: u64,
    /// Seconds
    pub active_time: u64,
    pub finished_time: u64,
    pub seeding_time: u64,
    /// Unix timestamps, 0 = never
    pub added_time: i64,
    pub completed_time: i64,
    pub last_seen_complete: i64,
    pub num_complete: i32,
    pub num_incomplete: i32,
    pub num_downloaded: i32,

    /// One byte of `PIECE_*` flags per piece
    pub pieces: String,
    pub unfinished: Vec<UnfinishedPiece>,
    pub blocks_per_piece: u32,
    pub piece_priority: String,
    pub file_priority: Vec<u8>,

    pub trackers: Vec<Vec<String>>,
    #[serde(rename = "url-list")]
    pub url_list: Vec<String>,
    pub httpseeds: Vec<String>,
    /// Renamed file paths, one per file, empty when nothing was renamed
    pub mapped_files: Vec<String>,

    pub peers: String,
    pub peers6: String,
    pub banned_peers: String,
    pub banned_peers6: String,

    /// Bytes per second, -1 = unlimited
    pub upload_rate_limit: i64,
    pub download_rate_limit: i64,
    pub max_connections: i64,
    pub max_uploads: i64,

    pub paused: bool,
    pub auto_managed: bool,
    pub announce_to_dht: bool,
    pub announce_to_lsd: bool,
    pub announce_to_trackers: bool,
    pub seed_mode: bool,
    pub sequential_download: bool,
    pub super_seeding: bool,
    pub share_mode: bool,
    pub upload_mode: bool,
}

impl Default for ResumeData {
    fn default() -> Self {
        Self {
            file_format: String::new(),
            file_version: 0,
            info_hash: String::new(),
            total_uploaded: 0,
            total_downloaded: 0,
            active_time: 0,
            finished_time: 0,
            seeding_time: 0,
            added_time: 0,
            completed_time: 0,
            last_seen_complete: 0,
            num_complete: -1,
            num_incomplete: -1,
            num_downloaded: -1,
            pieces: String::new(),
            unfinished: Vec::new(),
            blocks_per_piece: 0,
            piece_priority: String::new(),
            file_priority: Vec::new(),
            trackers: Vec::new(),
            url_list: Vec::new(),
            httpseeds: Vec::new(),
            mapped_files: Vec::new(),
            peers: String::new(),
            peers6: String::new(),
            banned_peers: String::new(),
            banned_peers6: String::new(),
            upload_rate_limit: -1,
            download_rate_limit: -1,
            max_connections: -1,
            max_uploads: -1,
            paused: false,
            auto_managed: true,
            announce_to_dht: true,
            announce_to_lsd: true,
            announce_to_trackers: true,
            seed_mode: false,
            sequential_download: false,
            super_seeding: false,
            share_mode: false,
            upload_mode: false,
        }
    }
}

impl ResumeData {
    /// Empty resume data stamped with the current format and version.
    pub fn new(info_hash: InfoHash) -> Self {
        Self {
            file_format: RESUME_FORMAT.to_string(),
            file_version: RESUME_VERSION,
            info_hash: info_hash.to_string(),
            ..Self::default()
        }
    }

    /// Serializes the blob.
    ///
    /// # Errors
    ///
    /// - `TorrentError::Serialization` - If JSON encoding fails
    pub fn encode(&self) -> Result<Vec<u8>, TorrentError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parses a blob without validating it.
    ///
    /// # Errors
    ///
    /// - `ResumeRejection::Corrupt` - If the bytes are not a resume dictionary
    pub fn decode(bytes: &[u8]) -> Result<Self, ResumeRejection> {
        serde_json::from_slice(bytes).map_err(|e| ResumeRejection::Corrupt {
            reason: e.to_string(),
        })
    }

    /// Checks that the blob is ours and belongs to `info_hash`.
    ///
    /// # Errors
    ///
    /// - `ResumeRejection::BadFormat` - If the format tag is wrong
    /// - `ResumeRejection::UnsupportedVersion` - If the version is too old or too new
    /// - `ResumeRejection::InfoHashMismatch` - If the blob is for another torrent
    pub fn validate(&self, info_hash: InfoHash) -> Result<(), ResumeRejection> {
        if self.file_format != RESUME_FORMAT {
            return Err(ResumeRejection::BadFormat {
                found: self.file_format.clone(),
            });
        }
        if !(MIN_RESUME_VERSION..=RESUME_VERSION).contains(&self.file_version) {
            return Err(ResumeRejection::UnsupportedVersion {
                found: self.file_version,
            });
        }
        if !self.info_hash.eq_ignore_ascii_case(&info_hash.to_string()) {
            return Err(ResumeRejection::InfoHashMismatch {
                found: self.info_hash.clone(),
            });
        }
        Ok(())
    }

    pub fn set_piece_flags(&mut self, flags: &[u8]) {
        self.pieces = hex::encode(flags);
    }

    /// # Errors
    ///
    /// - `ResumeRejection::Corrupt` - If the field is not valid hex
    pub fn piece_flags(&self) -> Result<Vec<u8>, ResumeRejection> {
        decode_hex("pieces", &self.pieces)
    }

    pub fn set_piece_priorities(&mut self, priorities: &[u8]) {
        self.piece_priority = hex::encode(priorities);
    }

    /// # Errors
    ///
    /// - `ResumeRejection::Corrupt` - If the field is not valid hex
    pub fn piece_priorities(&self) -> Result<Vec<u8>, ResumeRejection> {
        decode_hex("piece_priority", &self.piece_priority)
    }

    /// Stores peers in compact form, split by address family.
    pub fn set_peers(&mut self, peers: &[SocketAddr]) {
        (self.peers, self.peers6) = encode_compact(peers);
    }

    pub fn set_banned_peers(&mut self, peers: &[SocketAddr]) {
        (self.banned_peers, self.banned_peers6) = encode_compact(peers);
    }

    /// # Errors
    ///
    /// - `ResumeRejection::Corrupt` - If a peer field is malformed
    pub fn peer_addrs(&self) -> Result<Vec<SocketAddr>, ResumeRejection> {
        let mut peers = decode_compact("peers", &self.peers, false)?;
        peers.extend(decode_compact("peers6", &self.peers6, true)?);
        Ok(peers)
    }

    /// # Errors
    ///
    /// - `ResumeRejection::Corrupt` - If a peer field is malformed
    pub fn banned_addrs(&self) -> Result<Vec<SocketAddr>, ResumeRejection> {
        let mut peers = decode_compact("banned_peers", &self.banned_peers, false)?;
        peers.extend(decode_compact("banned_peers6", &self.banned_peers6, true)?);
        Ok(peers)
    }
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, ResumeRejection> {
    hex::decode(value).map_err(|e| ResumeRejection::Corrupt {
        reason: format!("{field}: {e}"),
    })
}

/// Encodes addresses as 6 byte (IPv4) and 18 byte (IPv6) entries.
pub fn encode_compact(peers: &[SocketAddr]) -> (String, String) {
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();
    for peer in peers {
        match peer.ip() {
            IpAddr::V4(ip) => {
                v4.extend_from_slice(&ip.octets());
                v4.extend_from_slice(&peer.port().to_be_bytes());
            }
            IpAddr::V6(ip) => {
                v6.extend_from_slice(&ip.octets());
                v6.extend_from_slice(&peer.port().to_be_bytes());
            }
        }
    }
    (hex::encode(v4), hex::encode(v6))
}

fn decode_compact(field: &str, value: &str, v6: bool) -> Result<Vec<SocketAddr>, ResumeRejection> {
    let bytes = decode_hex(field, value)?;
    let entry = if v6 { 18 } else { 6 };
    if bytes.len() % entry != 0 {
        return Err(ResumeRejection::Corrupt {
            reason: format!("{field}: length {} is not a multiple of {entry}", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(entry)
        .map(|chunk| {
            let (ip, port) = chunk.split_at(entry - 2);
            let port = u16::from_be_bytes([port[0], port[1]]);
            let ip = if v6 {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(ip);
                IpAddr::V6(Ipv6Addr::from(octets))
            } else {
                IpAddr::V4(Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]))
            };
            SocketAddr::new(ip, port)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_hash() -> InfoHash {
        InfoHash::new([0x5a; 20])
    }

    #[test]
    fn test_blob_survives_encoding() {
        let mut resume = ResumeData::new(info_hash());
        resume.set_piece_flags(&[PIECE_HAVE | PIECE_VERIFIED, 0, PIECE_HAVE]);
        resume.trackers = vec![vec!["http://a/announce".into()], vec!["udp://b:80".into()]];
        resume.unfinished = vec![UnfinishedPiece::new(PieceIndex::new(1), &[true, false, true])];
        resume.set_peers(&["1.2.3.4:6881".parse().unwrap(), "[2001:db8::1]:51413".parse().unwrap()]);
        resume.paused = true;

        let decoded = ResumeData::decode(&resume.encode().unwrap()).unwrap();
        assert_eq!(decoded, resume);
        assert!(decoded.validate(info_hash()).is_ok());
    }

    #[test]
    fn test_uses_dashed_keys() {
        let json = String::from_utf8(ResumeData::new(info_hash()).encode().unwrap()).unwrap();
        assert!(json.contains("\"file-format\": \"eddy resume file\""));
        assert!(json.contains("\"info-hash\""));
        assert!(json.contains("\"url-list\""));
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let resume = ResumeData::decode(
            br#"{"file-format": "eddy resume file", "file-version": 1, "info-hash": "5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a"}"#,
        )
        .unwrap();
        assert!(resume.validate(info_hash()).is_ok());
        assert!(resume.auto_managed);
        assert_eq!(resume.upload_rate_limit, -1);
        assert!(resume.piece_flags().unwrap().is_empty());
    }

    #[test]
    fn test_rejections() {
        assert!(matches!(
            ResumeData::decode(b"not json"),
            Err(ResumeRejection::Corrupt { .. })
        ));

        let mut resume = ResumeData::new(info_hash());
        resume.file_format = "other client".into();
        assert!(matches!(
            resume.validate(info_hash()),
            Err(ResumeRejection::BadFormat { .. })
        ));

        let resume = ResumeData::new(InfoHash::new([1; 20]));
        let rejection = resume.validate(info_hash()).unwrap_err();
        assert!(matches!(rejection, ResumeRejection::InfoHashMismatch { .. }));
        assert_eq!(rejection.error_code(), None);

        let mut resume = ResumeData::new(info_hash());
        resume.file_version = RESUME_VERSION + 1;
        let rejection = resume.validate(info_hash()).unwrap_err();
        assert_eq!(rejection, ResumeRejection::UnsupportedVersion { found: 2 });
        assert_eq!(
            rejection.error_code(),
            Some(TorrentErrorCode::UnsupportedResumeVersion { found: 2 })
        );
    }

    #[test]
    fn test_compact_peers_split_by_family() {
        let mut resume = ResumeData::new(info_hash());
        let v4: SocketAddr = "10.1.2.3:80".parse().unwrap();
        let v6: SocketAddr = "[::1]:443".parse().unwrap();
        resume.set_peers(&[v4, v6]);
        assert_eq!(resume.peers, "0a0102030050");
        assert_eq!(resume.peers6.len(), 36);
        assert_eq!(resume.peer_addrs().unwrap(), vec![v4, v6]);

        resume.peers = "0a0102".into();
        assert!(matches!(resume.peer_addrs(), Err(ResumeRejection::Corrupt { .. })));
    }

    #[test]
    fn test_unfinished_bitmask() {
        let mut finished = vec![false; 10];
        finished[0] = true;
        finished[9] = true;
        let piece = UnfinishedPiece::new(PieceIndex::new(4), &finished);
        assert_eq!(piece.bitmask, "8040");
        assert_eq!(piece.finished_blocks(10).unwrap(), vec![0, 9]);
        // Bits past the piece's block count are ignored
        assert_eq!(piece.finished_blocks(5).unwrap(), vec![0]);
    }
}
