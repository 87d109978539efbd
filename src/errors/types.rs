//! Error type definitions for the TSB subsystem.
//!
//! Mirrors the error taxonomy of the subsystem: storage, metadata, reader,
//! and session-lifecycle errors each get their own variant group so callers
//! can match on the layer that failed.

use thiserror::Error;

/// Top-level error type returned by the public TSB API.
#[derive(Error, Debug)]
pub enum TsbError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// Errors from the content-keyed blob store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Not actually an error condition for callers of `TsbStore::write` — a
    /// write whose key already exists is treated as success by the session
    /// manager, but the store itself surfaces it so the caller can skip
    /// re-indexing.
    #[error("key already exists: {key}")]
    AlreadyExists { key: String },

    #[error("no space available for key: {key}")]
    NoSpace { key: String },

    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the metadata manager.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("metadata type not registered")]
    NotRegistered,

    #[error("metadata type already registered")]
    AlreadyRegistered,

    #[error("duplicate metadata item")]
    Duplicate,
}

/// Errors from the per-track reader.
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("position {position} is outside the stored span")]
    OutOfRange { position: f64 },

    #[error("no such track: {track:?}")]
    NoSuchTrack { track: crate::tsb::TrackType },

    #[error("end of stored stream reached")]
    Eos,

    #[error("beginning of stored stream reached")]
    Bos,
}

/// Errors from session lifecycle management.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session is already active")]
    AlreadyActive,

    #[error("session is not active")]
    NotActive,

    #[error("failed to initialize store: {message}")]
    StoreInitFailed { message: String },
}

impl SessionError {
    pub fn store_init_failed<S: Into<String>>(message: S) -> Self {
        Self::StoreInitFailed {
            message: message.into(),
        }
    }
}
