//! Error kinds for each layer. Lower layers never leak their internals past
//! the engine boundary — `EngineError` is the only thing a caller of
//! [`crate::engine::Engine`] ever sees.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("volume is full")]
    NoSpace,
}

#[derive(Debug, Error)]
pub enum InodeError {
    #[error("inode number out of range")]
    OutOfRange,
    #[error("file offset beyond the supported block-mapping range")]
    BlockMappingUnsupported,
    #[error("no free inode slot and the inode region cannot grow further")]
    NoFreeInode,
    #[error(transparent)]
    Alloc(#[from] AllocError),
}

#[derive(Debug, Error)]
pub enum DirError {
    #[error("no such entry")]
    NotFound,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error(transparent)]
    Inode(#[from] InodeError),
}

/// The only error surface the engine exposes to its callers. `Ok` is the
/// success case; this enum covers exclusively the failure channel.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Generic(String),
    #[error("not logged in")]
    NotLoggedIn,
    #[error("permission denied")]
    PermissionDenied,
    #[error("volume not formatted")]
    NotFormatted,
}

impl From<DirError> for EngineError {
    fn from(e: DirError) -> Self {
        EngineError::Generic(e.to_string())
    }
}

impl From<InodeError> for EngineError {
    fn from(e: InodeError) -> Self {
        EngineError::Generic(e.to_string())
    }
}

impl From<AllocError> for EngineError {
    fn from(e: AllocError) -> Self {
        EngineError::Generic(e.to_string())
    }
}
