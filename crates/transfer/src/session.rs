use chrono::{DateTime, SecondsFormat, Utc};
use splice_protocol::{ByteRange, ContentRange, UploadProgress, UploadStatus};

use crate::range_set::{InsertOutcome, RangeSet};
use crate::{UploadError, validate_filename};

/// What the caller should do with a submitted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDecision {
    /// The range is reserved; write the payload, then call
    /// [`UploadSession::commit_chunk`] or [`UploadSession::abort_chunk`].
    Write(ByteRange),
    /// Every byte was already received. Nothing to write.
    Duplicate,
}

/// State of one upload.
///
/// This type holds no lock of its own; the owner serializes access. Chunk
/// submission is split in two phases so that the payload can be written
/// without holding that lock: [`begin_chunk`](Self::begin_chunk) reserves the
/// range, and [`commit_chunk`](Self::commit_chunk) records it once the write
/// succeeded. Finalize works the same way through
/// [`begin_finalize`](Self::begin_finalize).
#[derive(Debug, Clone)]
pub struct UploadSession {
    id: String,
    filename: String,
    total_size: u64,
    status: UploadStatus,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    received: RangeSet,
    /// Committed chunks as submitted, sorted by start offset.
    chunks: Vec<ByteRange>,
    /// Ranges reserved by writes that have not committed yet.
    in_flight: Vec<ByteRange>,
    finalizing: bool,
    checksum: Option<String>,
    error: String,
}

impl UploadSession {
    /// Creates a pending session.
    pub fn new(
        id: String,
        filename: String,
        total_size: u64,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, UploadError> {
        validate_filename(&filename)?;
        if total_size == 0 {
            return Err(UploadError::InvalidInput(
                "total_size must be greater than zero".into(),
            ));
        }

        Ok(Self {
            id,
            filename,
            total_size,
            status: UploadStatus::Pending,
            created_at,
            expires_at,
            updated_at: created_at,
            completed_at: None,
            received: RangeSet::new(total_size),
            chunks: Vec::new(),
            in_flight: Vec::new(),
            finalizing: false,
            checksum: None,
            error: String::new(),
        })
    }

    /// Returns `true` once `now` is past the expiration deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Moves a non-terminal session to `Expired`.
    ///
    /// Returns `true` if the status changed. A session that is being
    /// finalized is left alone.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || self.finalizing {
            return false;
        }
        self.status = UploadStatus::Expired;
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Validates a chunk submission and reserves its range.
    pub fn begin_chunk(
        &mut self,
        range: &ContentRange,
        payload_len: u64,
        now: DateTime<Utc>,
    ) -> Result<ChunkDecision, UploadError> {
        self.ensure_live(now)?;
        if self.finalizing {
            return Err(UploadError::AlreadyFinalized(self.id.clone()));
        }

        if let Some(total) = range.total
            && total != self.total_size
        {
            return Err(UploadError::InvalidRange(format!(
                "declared total {total} does not match upload size {}",
                self.total_size
            )));
        }
        if payload_len != range.len() {
            return Err(UploadError::InvalidRange(format!(
                "payload is {payload_len} bytes but range {} spans {}",
                range.range(),
                range.len()
            )));
        }

        let requested = range.range();
        match self.received.classify(requested.start, requested.end)? {
            InsertOutcome::Duplicate => {
                self.updated_at = now;
                Ok(ChunkDecision::Duplicate)
            }
            InsertOutcome::Overlap => Err(UploadError::ConflictingRange { range: requested }),
            InsertOutcome::Added(_) => {
                if self.in_flight.iter().any(|r| r.intersects(&requested)) {
                    return Err(UploadError::ChunkInFlight { range: requested });
                }
                self.in_flight.push(requested);
                Ok(ChunkDecision::Write(requested))
            }
        }
    }

    /// Records a reserved range after its payload was stored.
    ///
    /// Returns the merged interval the range became part of.
    pub fn commit_chunk(
        &mut self,
        range: ByteRange,
        now: DateTime<Utc>,
    ) -> Result<ByteRange, UploadError> {
        self.release_reservation(range);
        self.ensure_live(now)?;

        match self.received.insert(range.start, range.end)? {
            InsertOutcome::Added(merged) => {
                let pos = self.chunks.partition_point(|c| c.start < range.start);
                self.chunks.insert(pos, range);
                if self.status == UploadStatus::Pending {
                    self.status = UploadStatus::InProgress;
                }
                self.updated_at = now;
                Ok(merged)
            }
            // Unreachable while reservations are honored.
            InsertOutcome::Duplicate | InsertOutcome::Overlap => {
                Err(UploadError::ConflictingRange { range })
            }
        }
    }

    /// Drops a reservation whose write did not complete.
    pub fn abort_chunk(&mut self, range: ByteRange) {
        self.release_reservation(range);
    }

    /// Checks completeness and marks the session as finalizing.
    ///
    /// No chunk is accepted until the session reaches a terminal state or
    /// [`abort_finalize`](Self::abort_finalize) is called.
    pub fn begin_finalize(&mut self, now: DateTime<Utc>) -> Result<(), UploadError> {
        self.ensure_live(now)?;
        if self.finalizing {
            return Err(UploadError::AlreadyFinalized(self.id.clone()));
        }
        if !self.received.is_complete() {
            return Err(UploadError::IncompleteUpload {
                received: self.received.covered_bytes(),
                total: self.total_size,
            });
        }
        self.finalizing = true;
        self.updated_at = now;
        Ok(())
    }

    /// Marks a finalizing session as complete.
    pub fn complete(&mut self, checksum: String, now: DateTime<Utc>) {
        self.finalizing = false;
        self.status = UploadStatus::Complete;
        self.checksum = Some(checksum);
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Marks the session as failed with an error message.
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) {
        self.finalizing = false;
        self.status = UploadStatus::Failed;
        self.error = reason.to_string();
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Returns a finalizing session to its previous state.
    pub fn abort_finalize(&mut self) {
        self.finalizing = false;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// When the session reached a terminal state.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn bytes_received(&self) -> u64 {
        self.received.covered_bytes()
    }

    pub fn received(&self) -> &RangeSet {
        &self.received
    }

    /// Committed chunk ranges in offset order. Once the upload is complete
    /// they tile `[0, total_size)` exactly.
    pub fn chunks(&self) -> &[ByteRange] {
        &self.chunks
    }

    pub fn is_finalizing(&self) -> bool {
        self.finalizing
    }

    /// Hex digest of the assembled file, once complete.
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// Failure reason (empty unless failed).
    pub fn error(&self) -> &str {
        &self.error
    }

    /// Returns current progress as a protocol-compatible struct.
    pub fn progress(&self) -> UploadProgress {
        UploadProgress {
            upload_id: self.id.clone(),
            filename: self.filename.clone(),
            status: self.status,
            bytes_received: self.bytes_received(),
            total_size: self.total_size,
            missing_ranges: self.received.missing(),
            created_at: self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            expires_at: self.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            checksum: self.checksum.clone(),
        }
    }

    /// Rejects the call if the session is expired or terminal.
    ///
    /// Past the deadline every session answers `Expired`, whatever its
    /// status; only a non-terminal one actually moves to `Expired`.
    fn ensure_live(&mut self, now: DateTime<Utc>) -> Result<(), UploadError> {
        if self.status == UploadStatus::Expired || self.is_expired(now) {
            self.expire(now);
            return Err(UploadError::Expired(self.id.clone()));
        }
        if self.status.is_terminal() {
            return Err(UploadError::AlreadyFinalized(self.id.clone()));
        }
        Ok(())
    }

    fn release_reservation(&mut self, range: ByteRange) {
        if let Some(pos) = self.in_flight.iter().position(|r| *r == range) {
            self.in_flight.swap_remove(pos);
        }
    }
}
