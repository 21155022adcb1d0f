//! Framework-agnostic request handling.
//!
//! Each function takes the raw pieces of an HTTP request (path id, header
//! value, body bytes) and returns a [`Reply`] with the status code and JSON
//! body to send. Routing `POST /uploads`, `PUT /uploads/{id}`,
//! `POST /uploads/{id}` and `GET /uploads/{id}` to these functions is left
//! to whichever HTTP server hosts the coordinator.

use serde::Serialize;
use serde_json::Value;

use splice_protocol::constants::{CHECKSUM_MISMATCH_MESSAGE, CONTENT_RANGE_HEADER};
use splice_protocol::messages::{
    ChunkResponse, FinalizeRequest, FinalizeResponse, StartUploadRequest,
    StartUploadResponse,
};
use splice_protocol::{ContentRange, ProtocolError};
use splice_transfer::UploadError;

use crate::coordinator::{ChunkOutcome, UploadCoordinator};

pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_CONFLICT: u16 = 409;
pub const STATUS_GONE: u16 = 410;
pub const STATUS_INTERNAL_ERROR: u16 = 500;
pub const STATUS_SERVICE_UNAVAILABLE: u16 = 503;

/// Status code and JSON body for one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status, body },
            Err(e) => {
                tracing::error!("failed to encode response: {e}");
                Self::error(STATUS_INTERNAL_ERROR, "internal_error", "failed to encode response")
            }
        }
    }

    fn error(status: u16, code: &str, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "code": code, "message": message }),
        }
    }

    /// Returns `true` for 2xx replies.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Maps an upload error to its HTTP status code.
pub fn status_code(err: &UploadError) -> u16 {
    match err {
        UploadError::InvalidInput(_)
        | UploadError::InvalidRange(_)
        | UploadError::AlreadyFinalized(_)
        | UploadError::ChecksumMismatch { .. }
        | UploadError::UnsupportedAlgorithm(_) => STATUS_BAD_REQUEST,
        UploadError::NotFound(_) => STATUS_NOT_FOUND,
        UploadError::Expired(_) => STATUS_GONE,
        UploadError::ConflictingRange { .. }
        | UploadError::ChunkInFlight { .. }
        | UploadError::IncompleteUpload { .. } => STATUS_CONFLICT,
        UploadError::StoreWriteFailure(_) => STATUS_SERVICE_UNAVAILABLE,
    }
}

/// Builds the error reply for an upload error.
pub fn error_reply(err: &UploadError) -> Reply {
    let message = match err {
        UploadError::ChecksumMismatch { .. } => CHECKSUM_MISMATCH_MESSAGE.to_string(),
        other => other.to_string(),
    };
    Reply::error(status_code(err), err.code(), &message)
}

fn protocol_error_reply(err: &ProtocolError) -> Reply {
    match err {
        ProtocolError::InvalidContentRange(_) => {
            Reply::error(STATUS_BAD_REQUEST, "invalid_range", &err.to_string())
        }
        ProtocolError::Json(_) => Reply::error(STATUS_BAD_REQUEST, "invalid_input", &err.to_string()),
    }
}

/// `POST /uploads` with `{filename, total_size}`.
pub fn start(coordinator: &UploadCoordinator, body: &[u8]) -> Reply {
    let req: StartUploadRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => return protocol_error_reply(&ProtocolError::from(e)),
    };
    match coordinator.start_upload(&req.filename, req.total_size) {
        Ok(upload_id) => Reply::json(STATUS_CREATED, &StartUploadResponse { upload_id }),
        Err(e) => error_reply(&e),
    }
}

/// `PUT /uploads/{upload_id}` with a `Content-Range` header and the chunk
/// bytes as body. The header's last offset may be inclusive or exclusive.
pub async fn put(
    coordinator: &UploadCoordinator,
    upload_id: &str,
    content_range: Option<&str>,
    payload: Vec<u8>,
) -> Reply {
    let Some(header) = content_range else {
        return Reply::error(
            STATUS_BAD_REQUEST,
            "invalid_range",
            &format!("missing {CONTENT_RANGE_HEADER} header"),
        );
    };
    let range = match ContentRange::for_payload(header, payload.len() as u64) {
        Ok(range) => range,
        Err(e) => return protocol_error_reply(&e),
    };

    match coordinator.put_chunk(upload_id, range, payload).await {
        Ok(ack) => {
            let body = match ack.outcome {
                ChunkOutcome::Accepted => ChunkResponse::accepted(ack.bytes_received, ack.total_size),
                ChunkOutcome::Duplicate => {
                    ChunkResponse::duplicate(ack.bytes_received, ack.total_size)
                }
            };
            Reply::json(STATUS_OK, &body)
        }
        Err(e) => error_reply(&e),
    }
}

/// `POST /uploads/{upload_id}` with an optional `{checksum, checksum_algo}`
/// body. An empty body finalizes without a declared checksum.
pub async fn finalize(coordinator: &UploadCoordinator, upload_id: &str, body: &[u8]) -> Reply {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        FinalizeRequest::default()
    } else {
        match serde_json::from_slice::<FinalizeRequest>(body) {
            Ok(req) => req,
            Err(e) => return protocol_error_reply(&ProtocolError::from(e)),
        }
    };

    match coordinator
        .finalize_upload(
            upload_id,
            req.checksum.as_deref(),
            req.checksum_algo.as_deref(),
        )
        .await
    {
        Ok(outcome) => Reply::json(
            STATUS_CREATED,
            &FinalizeResponse {
                upload_id: outcome.upload_id,
                status: outcome.status,
                artifact: outcome.artifact.location,
                checksum: outcome.checksum,
                checksum_algo: outcome.algorithm.to_string(),
            },
        ),
        Err(e) => error_reply(&e),
    }
}

/// `GET /uploads/{upload_id}`.
pub fn status(coordinator: &UploadCoordinator, upload_id: &str) -> Reply {
    match coordinator.get_status(upload_id) {
        Ok(progress) => Reply::json(STATUS_OK, &progress),
        Err(e) => error_reply(&e),
    }
}
