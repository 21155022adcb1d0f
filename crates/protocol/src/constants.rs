//! Shared protocol constants.

/// Header carrying the byte range of a chunk submission.
pub const CONTENT_RANGE_HEADER: &str = "Content-Range";

/// Message returned to clients when the assembled bytes do not match the
/// declared checksum.
pub const CHECKSUM_MISMATCH_MESSAGE: &str = "Checksum mismatch";
