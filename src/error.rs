//! The coordinator-level error taxonomy (spec.md §6), one unified enum the
//! five specialized caches' lower-level errors (filesystem, storage, index,
//! digest/reference parsing) all fold into, in the same plain-variant
//! `thiserror::Error` shape `peoci/src/ocidist_cache.rs::Error` and
//! `peoci/src/ocidist.rs::Error` use.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("entry expired: {0}")]
    Expired(String),
    #[error("corrupted entry at {0}")]
    Corrupted(PathBuf),
    #[error("cache full: could not free {needed} bytes")]
    Full { needed: u64 },
    #[error("entry invalidated: {0}")]
    Invalidated(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    InvalidDigest(#[from] crate::digest::InvalidDigest),
    #[error(transparent)]
    InvalidReference(#[from] crate::reference::InvalidReference),
    #[error("operation cancelled")]
    ContextCancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Fs(#[from] crate::fs::Error),
    #[error(transparent)]
    Storage(#[from] crate::storage::Error),
    #[error(transparent)]
    Index(crate::index::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<crate::index::Error> for Error {
    fn from(e: crate::index::Error) -> Error {
        match e {
            crate::index::Error::Cancelled => Error::ContextCancelled,
            other => Error::Index(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
