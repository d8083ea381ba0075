use std::path::PathBuf;

use crate::catalog::SnapshotId;
use crate::Hash;

/// error type for backuptool operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store not found at {0}")]
    NoStore(PathBuf),

    #[error("store already exists at {0}")]
    StoreExists(PathBuf),

    #[error("target directory does not exist: {0}")]
    TargetNotFound(PathBuf),

    #[error("target is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("invalid file entry: {0}")]
    InvalidEntry(String),

    #[error("invalid snapshot id: {0}")]
    InvalidSnapshotId(String),

    #[error("snapshot {0} does not exist")]
    SnapshotNotFound(SnapshotId),

    #[error("content not found: {0}")]
    ContentNotFound(Hash),

    #[error("content {hash} for {path} is missing from the store")]
    MissingContent { hash: Hash, path: String },

    #[error("file exceeds maximum size of {limit} bytes: {path}")]
    FileTooLarge { path: PathBuf, limit: u64 },

    #[error("lock contention on store")]
    LockContention,

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store write failed at {path}: {source}")]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cbor serialization error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("cbor deserialization error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("invalid exclude pattern: {0}")]
    InvalidPattern(#[from] glob::PatternError),

    #[error("invalid hash hex: {0}")]
    InvalidHashHex(String),

    #[error("corrupt catalog: {0}")]
    CorruptCatalog(String),
}

/// broad classification of an [`Error`], for callers that branch on failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// bad input: missing directory, empty path or hash, malformed id
    Validation,
    /// snapshot or content absent
    NotFound,
    /// filesystem access refused
    Permission,
    /// any other filesystem failure
    Io,
    /// catalog and content store disagree, or stored data is damaged
    Integrity,
    /// persistence layer failure (encoding, config, locking)
    Store,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TargetNotFound(_)
            | Error::NotADirectory(_)
            | Error::InvalidEntry(_)
            | Error::InvalidSnapshotId(_)
            | Error::InvalidHashHex(_)
            | Error::InvalidPattern(_)
            | Error::FileTooLarge { .. } => ErrorKind::Validation,

            Error::SnapshotNotFound(_) | Error::ContentNotFound(_) => ErrorKind::NotFound,

            Error::PermissionDenied(_) => ErrorKind::Permission,

            Error::Io { source, .. } => match source.kind() {
                std::io::ErrorKind::PermissionDenied => ErrorKind::Permission,
                _ => ErrorKind::Io,
            },

            Error::MissingContent { .. } | Error::CorruptCatalog(_) => ErrorKind::Integrity,

            Error::NoStore(_)
            | Error::StoreExists(_)
            | Error::LockContention
            | Error::StoreIo { .. }
            | Error::CborEncode(_)
            | Error::CborDecode(_)
            | Error::Config(_)
            | Error::ConfigSerialize(_) => ErrorKind::Store,
        }
    }

    /// whether a snapshot may skip the offending file and carry on
    ///
    /// only failures on the source side qualify; store writes never do.
    pub(crate) fn is_skippable(&self) -> bool {
        match self {
            Error::FileTooLarge { .. } | Error::PermissionDenied(_) => true,
            Error::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::NotFound
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;

    /// like `with_path`, for writes inside the store itself
    fn with_store_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }

    fn with_store_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::StoreIo {
            path: path.into(),
            source,
        })
    }
}
