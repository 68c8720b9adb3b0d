//! Disk subsystem interface.
//!
//! The controller never touches files. It submits [`DiskJob`]s and later
//! receives one [`DiskCompletion`] per job, in submission order per piece,
//! on the session's event loop.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;

use super::picker::BlockRef;
use super::{FileIndex, InfoHash, PieceIndex};

/// Identifier of a submitted disk job, unique per torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

/// The disk operation a job or an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskOperation {
    Read,
    Write,
    Hash,
    CheckFastresume,
    ReleaseFiles,
    RenameFile,
    MoveStorage,
    DeleteFiles,
    SaveResumeData,
}

impl fmt::Display for DiskOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiskOperation::Read => "read",
            DiskOperation::Write => "write",
            DiskOperation::Hash => "hash",
            DiskOperation::CheckFastresume => "check resume data",
            DiskOperation::ReleaseFiles => "release files",
            DiskOperation::RenameFile => "rename file",
            DiskOperation::MoveStorage => "move storage",
            DiskOperation::DeleteFiles => "delete files",
            DiskOperation::SaveResumeData => "save resume data",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a disk failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskErrorKind {
    NoSpace,
    PermissionDenied,
    ReadOnly,
    OutOfMemory,
    NotFound,
    Other,
}

impl DiskErrorKind {
    /// Maps an I/O error onto a disk error kind.
    pub fn from_io(error: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match error.kind() {
            ErrorKind::StorageFull => DiskErrorKind::NoSpace,
            ErrorKind::PermissionDenied => DiskErrorKind::PermissionDenied,
            ErrorKind::ReadOnlyFilesystem => DiskErrorKind::ReadOnly,
            ErrorKind::OutOfMemory => DiskErrorKind::OutOfMemory,
            ErrorKind::NotFound => DiskErrorKind::NotFound,
            _ => DiskErrorKind::Other,
        }
    }
}

/// Error detail delivered with a failed disk job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Disk {operation} failed{}: {message}", .file.map(|f| format!(" on file {f}")).unwrap_or_default())]
pub struct DiskError {
    pub kind: DiskErrorKind,
    pub operation: DiskOperation,
    /// Offending file, if the failure is tied to one
    pub file: Option<FileIndex>,
    pub message: String,
}

impl DiskError {
    pub fn new(kind: DiskErrorKind, operation: DiskOperation, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation,
            file: None,
            message: message.into(),
        }
    }

    pub fn with_file(mut self, file: FileIndex) -> Self {
        self.file = Some(file);
        self
    }

    /// Builds a disk error from an I/O error.
    pub fn from_io(operation: DiskOperation, error: &std::io::Error) -> Self {
        Self::new(DiskErrorKind::from_io(error), operation, error.to_string())
    }

    pub fn is_out_of_memory(&self) -> bool {
        self.kind == DiskErrorKind::OutOfMemory
    }

    /// A write failed for lack of space or permission; uploading can go on.
    pub fn allows_upload_mode(&self) -> bool {
        self.operation == DiskOperation::Write
            && matches!(
                self.kind,
                DiskErrorKind::NoSpace | DiskErrorKind::PermissionDenied | DiskErrorKind::ReadOnly
            )
    }
}

/// Completion status of a disk job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    /// The job failed; see the completion's error
    Fatal,
    /// The job was cancelled before it ran
    Aborted,
}

/// Result of checking resume data against the files on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastresumeResult {
    /// Files match, the resume data can be trusted
    Valid,
    /// Files are missing or mismatched, hash everything
    NeedFullCheck,
}

/// Work submitted to the disk subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskJob {
    Read { block: BlockRef, length: u32 },
    Write { block: BlockRef, data: Bytes },
    /// Hash a full piece
    Hash { piece: PieceIndex },
    /// Verify that files claimed by resume data exist with sane sizes
    CheckFastresume { have: Vec<PieceIndex> },
    ReleaseFiles,
    RenameFile { file: FileIndex, name: String },
    MoveStorage { path: PathBuf },
    DeleteFiles,
    /// Flush and snapshot file state for a resume blob
    SaveResumeData,
}

impl DiskJob {
    pub fn operation(&self) -> DiskOperation {
        match self {
            DiskJob::Read { .. } => DiskOperation::Read,
            DiskJob::Write { .. } => DiskOperation::Write,
            DiskJob::Hash { .. } => DiskOperation::Hash,
            DiskJob::CheckFastresume { .. } => DiskOperation::CheckFastresume,
            DiskJob::ReleaseFiles => DiskOperation::ReleaseFiles,
            DiskJob::RenameFile { .. } => DiskOperation::RenameFile,
            DiskJob::MoveStorage { .. } => DiskOperation::MoveStorage,
            DiskJob::DeleteFiles => DiskOperation::DeleteFiles,
            DiskJob::SaveResumeData => DiskOperation::SaveResumeData,
        }
    }
}

/// Operation-specific payload of a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskOutcome {
    Read { block: BlockRef, data: Bytes },
    Written { block: BlockRef },
    Hashed { piece: PieceIndex, digest: [u8; 20] },
    Fastresume(FastresumeResult),
    Released,
    Renamed { file: FileIndex, name: String },
    Moved { path: PathBuf },
    Deleted,
    ResumeSaved,
}

/// A finished disk job, delivered back to the owning torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskCompletion {
    pub info_hash: InfoHash,
    pub job: JobId,
    pub status: JobStatus,
    pub outcome: DiskOutcome,
    pub error: Option<DiskError>,
}

impl DiskCompletion {
    pub fn success(info_hash: InfoHash, job: JobId, outcome: DiskOutcome) -> Self {
        Self {
            info_hash,
            job,
            status: JobStatus::Success,
            outcome,
            error: None,
        }
    }

    pub fn failed(info_hash: InfoHash, job: JobId, outcome: DiskOutcome, error: DiskError) -> Self {
        Self {
            info_hash,
            job,
            status: JobStatus::Fatal,
            outcome,
            error: Some(error),
        }
    }

    pub fn aborted(info_hash: InfoHash, job: JobId, outcome: DiskOutcome) -> Self {
        Self {
            info_hash,
            job,
            status: JobStatus::Aborted,
            outcome,
            error: None,
        }
    }
}

/// Asynchronous disk subsystem.
///
/// `submit` must not block; the implementation runs the job elsewhere and
/// delivers a [`DiskCompletion`] for it to the session.
pub trait DiskIo: Send + Sync {
    fn submit(&self, info_hash: InfoHash, job: JobId, request: DiskJob);

    /// Cancels queued jobs of a torrent. Each still gets an aborted
    /// completion.
    fn abort(&self, _info_hash: InfoHash) {}
}
