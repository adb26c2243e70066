use thiserror::Error;

use crate::entity::report::ReconcileResult;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("bad manifest: {0}")]
    BadManifest(String),

    #[error("bad cli arguments: {0}")]
    BadArgs(String),

    #[error("file error: {context}: {error}")]
    FileError {
        error: std::io::Error,
        context: String,
    },

    #[error("shell command failed: {context}")]
    CmdFailed {
        error: Option<std::io::Error>,
        context: String,
    },

    #[error("duplicate names: {0}")]
    DuplicateName(String),

    #[error("pool not found: {0}")]
    PoolNotFound(String),

    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("insufficient space: {0}")]
    InsufficientSpace(String),

    #[error("resize out of bounds: {0}")]
    ResizeBounds(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("missing encryption key: {0}")]
    MissingKey(String),

    #[error("safe mode: {0}")]
    SafeMode(String),

    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("no disks: {0}")]
    NoDisks(String),

    #[error("unresolved disks: {0}")]
    UnresolvedDisk(String),

    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("raid device count: {0}")]
    RaidCount(String),

    #[error("raid chunk size: {0}")]
    ChunkSize(String),

    #[error("thin pool: {0}")]
    ThinPool(String),

    #[error("member removal: {0}")]
    MemberRemoval(String),

    #[error("device lookup: {0}")]
    DeviceLookup(String),

    #[error("failed to commit changes to disk: {error}")]
    CommitFailed {
        error: Box<ReconcileError>,
        result: Box<ReconcileResult>,
    },

    #[error("blkstack-rs bug: {0}")]
    Bug(String),
}
