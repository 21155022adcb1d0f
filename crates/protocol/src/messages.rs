use serde::{Deserialize, Serialize};

use crate::types::UploadStatus;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Starts a new upload session (`POST /uploads`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartUploadRequest {
    pub filename: String,
    pub total_size: u64,
}

/// Finalizes an upload (`POST /uploads/{upload_id}`).
///
/// Both fields are optional; an empty body finalizes without a declared
/// checksum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalizeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_algo: Option<String>,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Acknowledges a new upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartUploadResponse {
    pub upload_id: String,
}

/// Acknowledges a chunk submission.
///
/// Exactly one of the two flags is set: `accepted` for a newly stored chunk,
/// `duplicate` for a chunk whose bytes were already received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResponse {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
    pub bytes_received: u64,
    pub total_size: u64,
}

impl ChunkResponse {
    pub fn accepted(bytes_received: u64, total_size: u64) -> Self {
        Self {
            accepted: true,
            duplicate: false,
            bytes_received,
            total_size,
        }
    }

    pub fn duplicate(bytes_received: u64, total_size: u64) -> Self {
        Self {
            accepted: false,
            duplicate: true,
            bytes_received,
            total_size,
        }
    }
}

/// Confirms a finalized upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub upload_id: String,
    pub status: UploadStatus,
    /// Store-specific reference to the assembled artifact.
    pub artifact: String,
    pub checksum: String,
    pub checksum_algo: String,
}

/// Contains error details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
