//! Chunk-range bookkeeping, upload sessions, checksums and chunk storage.
//!
//! This crate holds the per-upload state machine and everything it needs to
//! decide what a chunk submission means. Orchestration across many uploads
//! lives in `splice-coordinator`.

mod checksum;
mod fs_store;
mod range_set;
mod session;
mod store;
mod validation;

pub use checksum::{ChecksumAlgorithm, ChecksumVerifier, checksum_bytes, verify_checksum};
pub use fs_store::FsChunkStore;
pub use range_set::{InsertOutcome, RangeSet};
pub use session::{ChunkDecision, UploadSession};
pub use store::{
    ArtifactRef, ChunkStore, MemoryChunkStore, StoreError, StoreFuture, for_each_chunk,
};
pub use validation::validate_filename;

use splice_protocol::ByteRange;

/// Errors produced by upload bookkeeping.
///
/// Duplicate chunks are not errors; they are reported through
/// [`ChunkDecision::Duplicate`].
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("upload not found: {0}")]
    NotFound(String),

    #[error("upload expired: {0}")]
    Expired(String),

    #[error("upload already finalized: {0}")]
    AlreadyFinalized(String),

    #[error("range {range} conflicts with received data")]
    ConflictingRange { range: ByteRange },

    #[error("range {range} overlaps a chunk that is still being written")]
    ChunkInFlight { range: ByteRange },

    #[error("upload incomplete: {received} of {total} bytes received")]
    IncompleteUpload { received: u64, total: u64 },

    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("store failure: {0}")]
    StoreWriteFailure(#[from] StoreError),
}

impl UploadError {
    /// Stable machine-readable code for error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidRange(_) => "invalid_range",
            Self::NotFound(_) => "not_found",
            Self::Expired(_) => "expired",
            Self::AlreadyFinalized(_) => "already_finalized",
            Self::ConflictingRange { .. } => "conflicting_range",
            Self::ChunkInFlight { .. } => "chunk_in_flight",
            Self::IncompleteUpload { .. } => "incomplete_upload",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::StoreWriteFailure(_) => "store_write_failure",
        }
    }

    /// Returns `true` if resending the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ChunkInFlight { .. } | Self::StoreWriteFailure(_))
    }
}
