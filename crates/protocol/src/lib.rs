//! Wire types for the Splice chunked-upload contract.
//!
//! Request and response payloads exchanged with the transport layer, the
//! upload status enum, and `Content-Range` parsing. Field names are
//! snake_case on the wire.

pub mod constants;
pub mod content_range;
pub mod messages;
pub mod types;

pub use content_range::ContentRange;
pub use types::{ByteRange, UploadProgress, UploadStatus};

/// Errors produced while decoding wire values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid Content-Range: {0}")]
    InvalidContentRange(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
