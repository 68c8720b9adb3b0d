//! File and piece geometry of a torrent.
//!
//! Built from the bencoded info dictionary. The raw bytes are kept by the
//! controller so the layout can be dropped and rebuilt on demand.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use sha1::{Digest, Sha1};

use super::picker::BLOCK_SIZE;
use super::{FileIndex, InfoHash, PieceIndex, TorrentError};

type BencodeDict<'a> = HashMap<&'a [u8], bencode_rs::Value<'a>>;

/// One file of a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path components relative to the torrent's root
    pub path: Vec<String>,
    pub length: u64,
    /// Byte offset of the file within the torrent's data
    pub offset: u64,
    /// BEP 47 padding file, never written to disk
    pub pad: bool,
}

/// Piece and file geometry plus piece hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentLayout {
    name: String,
    piece_length: u32,
    piece_hashes: Vec<[u8; 20]>,
    files: Vec<FileEntry>,
    total_size: u64,
    private: bool,
}

impl TorrentLayout {
    /// Builds a layout from explicit parts.
    ///
    /// `files` are given as `(path, length, pad)`; offsets are assigned in
    /// order.
    pub fn new(
        name: impl Into<String>,
        piece_length: u32,
        piece_hashes: Vec<[u8; 20]>,
        files: Vec<(Vec<String>, u64, bool)>,
    ) -> Self {
        let mut offset = 0;
        let files: Vec<FileEntry> = files
            .into_iter()
            .map(|(path, length, pad)| {
                let entry = FileEntry {
                    path,
                    length,
                    offset,
                    pad,
                };
                offset += length;
                entry
            })
            .collect();
        Self {
            name: name.into(),
            piece_length,
            piece_hashes,
            files,
            total_size: offset,
            private: false,
        }
    }

    /// Marks the torrent private (no DHT, no local discovery).
    pub fn with_private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    /// Parses a bencoded info dictionary and checks it against `info_hash`.
    ///
    /// # Errors
    ///
    /// - `TorrentError::MetadataHashMismatch` - If the SHA-1 of the bytes is not the info hash
    /// - `TorrentError::InvalidMetadata` - If the dictionary is malformed
    pub fn from_info_bytes(info_hash: InfoHash, info: &[u8]) -> Result<Self, TorrentError> {
        if sha1_digest(info) != *info_hash.as_bytes() {
            return Err(TorrentError::MetadataHashMismatch {
                expected: info_hash,
            });
        }

        let parsed = bencode_rs::Value::parse(info).map_err(|e| invalid(format!("bencode: {e:?}")))?;
        let Some(bencode_rs::Value::Dictionary(dict)) = parsed.first() else {
            return Err(invalid("info must be a dictionary"));
        };

        let name = string_field(dict, b"name")?;
        let piece_length = integer_field(dict, b"piece length")?;
        if piece_length <= 0 || piece_length > i64::from(u32::MAX) {
            return Err(invalid(format!("piece length {piece_length}")));
        }

        let pieces = bytes_field(dict, b"pieces")?;
        if !pieces.len().is_multiple_of(20) {
            return Err(invalid("pieces length is not a multiple of 20"));
        }
        let piece_hashes: Vec<[u8; 20]> = pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let files = match (dict.get(b"length".as_slice()), dict.get(b"files".as_slice())) {
            (Some(bencode_rs::Value::Integer(length)), _) if *length >= 0 => {
                vec![(vec![name.clone()], *length as u64, false)]
            }
            (_, Some(bencode_rs::Value::List(list))) => parse_files(list)?,
            _ => return Err(invalid("missing length or files")),
        };

        let private = matches!(dict.get(b"private".as_slice()), Some(bencode_rs::Value::Integer(1)));
        let layout = Self::new(name, piece_length as u32, piece_hashes, files).with_private(private);

        let expected = layout.total_size.div_ceil(u64::from(layout.piece_length));
        if expected != layout.piece_hashes.len() as u64 {
            return Err(invalid(format!(
                "{} piece hashes for {} bytes",
                layout.piece_hashes.len(),
                layout.total_size
            )));
        }
        Ok(layout)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn num_pieces(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    pub fn file(&self, index: FileIndex) -> Option<&FileEntry> {
        self.files.get(index.0 as usize)
    }

    pub fn piece_hash(&self, piece: PieceIndex) -> Option<&[u8; 20]> {
        self.piece_hashes.get(piece.as_usize())
    }

    /// Size of a piece; the last one may be short.
    pub fn piece_size(&self, piece: PieceIndex) -> u32 {
        let start = u64::from(piece.as_u32()) * u64::from(self.piece_length);
        let remaining = self.total_size.saturating_sub(start);
        remaining.min(u64::from(self.piece_length)) as u32
    }

    pub fn blocks_per_piece(&self) -> u32 {
        self.piece_length.div_ceil(BLOCK_SIZE)
    }

    pub fn blocks_in_piece(&self, piece: PieceIndex) -> u32 {
        self.piece_size(piece).div_ceil(BLOCK_SIZE)
    }

    pub fn blocks_in_last_piece(&self) -> u32 {
        match self.num_pieces() {
            0 => 0,
            n => self.blocks_in_piece(PieceIndex::new(n - 1)),
        }
    }

    /// Size of a block; the last block of the last piece may be short.
    pub fn block_size(&self, piece: PieceIndex, block: u32) -> u32 {
        let piece_size = self.piece_size(piece);
        piece_size.saturating_sub(block * BLOCK_SIZE).min(BLOCK_SIZE)
    }

    /// Pieces overlapping a file. `None` for empty files.
    pub fn file_piece_range(&self, file: FileIndex) -> Option<RangeInclusive<PieceIndex>> {
        let entry = self.file(file)?;
        if entry.length == 0 || self.piece_length == 0 {
            return None;
        }
        let piece_length = u64::from(self.piece_length);
        let first = entry.offset / piece_length;
        let last = (entry.offset + entry.length - 1) / piece_length;
        Some(PieceIndex::new(first as u32)..=PieceIndex::new(last as u32))
    }

    /// Files overlapping a piece, in order.
    pub fn files_in_piece(&self, piece: PieceIndex) -> Vec<FileIndex> {
        let start = u64::from(piece.as_u32()) * u64::from(self.piece_length);
        let end = start + u64::from(self.piece_size(piece));
        self.files
            .iter()
            .enumerate()
            .filter(|(_, f)| f.length > 0 && f.offset < end && f.offset + f.length > start)
            .map(|(i, _)| FileIndex(i as u32))
            .collect()
    }

    /// Bytes of padding files inside a piece.
    pub fn pad_bytes_in_piece(&self, piece: PieceIndex) -> u64 {
        let start = u64::from(piece.as_u32()) * u64::from(self.piece_length);
        let end = start + u64::from(self.piece_size(piece));
        self.files
            .iter()
            .filter(|f| f.pad)
            .map(|f| {
                let lo = f.offset.max(start);
                let hi = (f.offset + f.length).min(end);
                hi.saturating_sub(lo)
            })
            .sum()
    }

    pub fn total_pad_bytes(&self) -> u64 {
        self.files.iter().filter(|f| f.pad).map(|f| f.length).sum()
    }

    /// Bytes of a file covered by a piece.
    pub fn file_bytes_in_piece(&self, file: FileIndex, piece: PieceIndex) -> u64 {
        let Some(entry) = self.file(file) else {
            return 0;
        };
        let start = u64::from(piece.as_u32()) * u64::from(self.piece_length);
        let end = start + u64::from(self.piece_size(piece));
        let lo = entry.offset.max(start);
        let hi = (entry.offset + entry.length).min(end);
        hi.saturating_sub(lo)
    }

    /// Renames a file in place.
    pub fn rename_file(&mut self, file: FileIndex, name: &str) -> bool {
        match self.files.get_mut(file.0 as usize) {
            Some(entry) => {
                entry.path = name.split('/').map(str::to_string).collect();
                true
            }
            None => false,
        }
    }
}

/// SHA-1 of a byte string.
pub fn sha1_digest(bytes: &[u8]) -> [u8; 20] {
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&Sha1::digest(bytes));
    hash
}

fn invalid(reason: impl Into<String>) -> TorrentError {
    TorrentError::InvalidMetadata {
        reason: reason.into(),
    }
}

fn bytes_field<'a>(dict: &'a BencodeDict<'_>, key: &[u8]) -> Result<&'a [u8], TorrentError> {
    match dict.get(key) {
        Some(bencode_rs::Value::Bytes(bytes)) => Ok(bytes),
        _ => Err(invalid(format!("missing {}", String::from_utf8_lossy(key)))),
    }
}

fn string_field(dict: &BencodeDict<'_>, key: &[u8]) -> Result<String, TorrentError> {
    let bytes = bytes_field(dict, key)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| invalid(format!("{} is not UTF-8", String::from_utf8_lossy(key))))
}

fn integer_field(dict: &BencodeDict<'_>, key: &[u8]) -> Result<i64, TorrentError> {
    match dict.get(key) {
        Some(bencode_rs::Value::Integer(value)) => Ok(*value),
        _ => Err(invalid(format!("missing {}", String::from_utf8_lossy(key)))),
    }
}

fn parse_files(list: &[bencode_rs::Value<'_>]) -> Result<Vec<(Vec<String>, u64, bool)>, TorrentError> {
    let mut files = Vec::with_capacity(list.len());
    for value in list {
        let bencode_rs::Value::Dictionary(file) = value else {
            return Err(invalid("file entry must be a dictionary"));
        };
        let length = integer_field(file, b"length")?;
        if length < 0 {
            return Err(invalid("negative file length"));
        }
        let Some(bencode_rs::Value::List(components)) = file.get(b"path".as_slice()) else {
            return Err(invalid("missing path"));
        };
        let mut path = Vec::with_capacity(components.len());
        for component in components {
            let bencode_rs::Value::Bytes(bytes) = component else {
                return Err(invalid("path component must be a string"));
            };
            path.push(String::from_utf8_lossy(bytes).into_owned());
        }
        let pad = matches!(
            file.get(b"attr".as_slice()),
            Some(bencode_rs::Value::Bytes(attr)) if attr.contains(&b'p')
        );
        files.push((path, length as u64, pad));
    }
    Ok(files)
}
