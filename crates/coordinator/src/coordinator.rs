//! The upload coordinator.
//!
//! Owns the session registry and drives every session through its state
//! machine. The registry lock is only taken to look up, insert or evict a
//! session; each session has its own mutex, which is never held across an
//! `.await`. Store I/O always happens with no lock held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use splice_protocol::constants::CHECKSUM_MISMATCH_MESSAGE;
use splice_protocol::{ByteRange, ContentRange, UploadProgress, UploadStatus};
use splice_transfer::{
    ArtifactRef, ChecksumAlgorithm, ChecksumVerifier, ChunkDecision, ChunkStore, StoreError,
    UploadError, UploadSession, for_each_chunk, verify_checksum,
};

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, CoordinatorConfig};
use crate::events::{EventBus, EventCallback, UploadEvent};

type Slot = Arc<Mutex<UploadSession>>;

/// How a chunk submission was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The chunk was new and has been stored.
    Accepted,
    /// The bytes were already received; nothing was written.
    Duplicate,
}

/// Result of a successful chunk submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkAck {
    pub outcome: ChunkOutcome,
    pub bytes_received: u64,
    pub total_size: u64,
}

/// Result of a successful finalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub upload_id: String,
    pub status: UploadStatus,
    pub artifact: ArtifactRef,
    pub checksum: String,
    pub algorithm: ChecksumAlgorithm,
}

/// What one expiration sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions moved to `Expired` by this sweep.
    pub expired: usize,
    /// Terminal sessions dropped from the registry.
    pub evicted: usize,
    /// Store releases that failed (retried on the next sweep).
    pub release_failures: usize,
}

/// Coordinates chunked uploads.
///
/// Shared behind an `Arc` and called concurrently from many tasks.
pub struct UploadCoordinator {
    config: CoordinatorConfig,
    expiration_window: chrono::Duration,
    retention_window: chrono::Duration,
    store: Arc<dyn ChunkStore>,
    clock: Arc<dyn Clock>,
    sessions: RwLock<HashMap<String, Slot>>,
    events: EventBus,
}

impl UploadCoordinator {
    /// Creates a coordinator on the system clock.
    pub fn new(config: CoordinatorConfig, store: Arc<dyn ChunkStore>) -> Result<Self, ConfigError> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Creates a coordinator with an explicit time source.
    pub fn with_clock(
        config: CoordinatorConfig,
        store: Arc<dyn ChunkStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let expiration_window = chrono::Duration::from_std(config.expiration_window)
            .map_err(|_| ConfigError::OutOfRange("expiration_window"))?;
        let retention_window = chrono::Duration::from_std(config.retention_window)
            .map_err(|_| ConfigError::OutOfRange("retention_window"))?;

        Ok(Self {
            config,
            expiration_window,
            retention_window,
            store,
            clock,
            sessions: RwLock::new(HashMap::new()),
            events: EventBus::new(),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Registers a lifecycle event callback.
    pub fn subscribe(&self, callback: EventCallback) {
        self.events.subscribe(callback);
    }

    /// Number of sessions currently in the registry.
    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Creates a new upload session and returns its id.
    pub fn start_upload(&self, filename: &str, total_size: u64) -> Result<String, UploadError> {
        let upload_id = uuid::Uuid::new_v4().to_string();
        let now = self.clock.now();
        let session = UploadSession::new(
            upload_id.clone(),
            filename.to_string(),
            total_size,
            now,
            now + self.expiration_window,
        )?;

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(upload_id.clone(), Arc::new(Mutex::new(session)));

        info!(upload_id = %upload_id, filename, total_size, "upload started");
        self.events.publish(UploadEvent::Started {
            upload_id: upload_id.clone(),
            filename: filename.to_string(),
            total_size,
        });
        Ok(upload_id)
    }

    /// Accepts one chunk.
    ///
    /// The range is reserved under the session lock, the payload is written
    /// with no lock held, and the range is recorded only after the store
    /// confirms the write. If this future is dropped mid-write the
    /// reservation is released and nothing is recorded.
    pub async fn put_chunk(
        &self,
        upload_id: &str,
        range: ContentRange,
        payload: Vec<u8>,
    ) -> Result<ChunkAck, UploadError> {
        let slot = self.slot(upload_id)?;
        let now = self.clock.now();
        let payload_len = payload.len() as u64;

        let begun = self.with_session(upload_id, &slot, |s| {
            let decision = s.begin_chunk(&range, payload_len, now)?;
            Ok((decision, s.bytes_received(), s.total_size()))
        });
        let (decision, bytes_received, total_size) = match begun {
            Ok(v) => v,
            Err(e) => {
                self.log_rejection(upload_id, &range, &e);
                if matches!(e, UploadError::Expired(_)) {
                    self.release_if_expired(upload_id, &slot).await;
                }
                return Err(e);
            }
        };

        let reserved = match decision {
            ChunkDecision::Duplicate => {
                debug!(upload_id, start = range.start, end = range.end, "duplicate chunk");
                return Ok(ChunkAck {
                    outcome: ChunkOutcome::Duplicate,
                    bytes_received,
                    total_size,
                });
            }
            ChunkDecision::Write(reserved) => reserved,
        };

        let mut reservation = Reservation::new(&slot, reserved);
        if let Err(e) = self.store.write_chunk(upload_id, reserved, payload).await {
            error!(upload_id, start = reserved.start, end = reserved.end, "chunk write failed: {e}");
            return Err(UploadError::StoreWriteFailure(e));
        }
        reservation.disarm();

        let now = self.clock.now();
        let committed = self.with_session(upload_id, &slot, |s| {
            let merged = s.commit_chunk(reserved, now)?;
            Ok((merged, s.bytes_received(), s.total_size()))
        });
        match committed {
            Ok((merged, bytes_received, total_size)) => {
                debug!(
                    upload_id,
                    start = reserved.start,
                    end = reserved.end,
                    %merged,
                    bytes_received,
                    total_size,
                    "chunk accepted"
                );
                Ok(ChunkAck {
                    outcome: ChunkOutcome::Accepted,
                    bytes_received,
                    total_size,
                })
            }
            Err(e) => {
                warn!(upload_id, start = reserved.start, "chunk stored but not recorded: {e}");
                if matches!(e, UploadError::Expired(_)) {
                    self.release_if_expired(upload_id, &slot).await;
                }
                Err(e)
            }
        }
    }

    /// Verifies and assembles a fully received upload.
    ///
    /// `checksum` is the client-declared hex digest and `algorithm` its
    /// algorithm name; the configured default is used when no name is given.
    pub async fn finalize_upload(
        &self,
        upload_id: &str,
        checksum: Option<&str>,
        algorithm: Option<&str>,
    ) -> Result<FinalizeOutcome, UploadError> {
        let slot = self.slot(upload_id)?;
        let algorithm = self.resolve_algorithm(algorithm)?;
        if self.config.checksum_required && checksum.is_none() {
            return Err(UploadError::InvalidInput("checksum is required".into()));
        }

        let now = self.clock.now();
        let begun = self.with_session(upload_id, &slot, |s| {
            s.begin_finalize(now)?;
            Ok((s.filename().to_string(), s.total_size(), s.chunks().to_vec()))
        });
        let (filename, total_size, chunks) = match begun {
            Ok(v) => v,
            Err(e) => {
                debug!(upload_id, "finalize rejected: {e}");
                if matches!(e, UploadError::Expired(_)) {
                    self.release_if_expired(upload_id, &slot).await;
                }
                return Err(e);
            }
        };

        let mut finalizing = Finalizing::new(&slot);

        let mut verifier = ChecksumVerifier::new(algorithm);
        let streamed = match for_each_chunk(self.store.as_ref(), upload_id, &chunks, |_, data| {
            verifier.update(data)
        })
        .await
        {
            Ok(n) => n,
            Err(e) => {
                finalizing.disarm();
                return Err(self.fail_on_store_error(upload_id, &slot, e));
            }
        };
        if streamed != total_size {
            finalizing.disarm();
            let e = StoreError::Discontiguous {
                upload_id: upload_id.to_string(),
                expected: total_size,
                found: streamed,
            };
            return Err(self.fail_on_store_error(upload_id, &slot, e));
        }

        let digest = verifier.finalize();
        if let Some(declared) = checksum
            && !verify_checksum(&digest, declared)
        {
            if self.config.verify_checksums {
                finalizing.disarm();
                warn!(
                    upload_id,
                    algorithm = %algorithm,
                    expected = declared,
                    actual = %digest,
                    "checksum mismatch"
                );
                self.fail(upload_id, &slot, CHECKSUM_MISMATCH_MESSAGE);
                return Err(UploadError::ChecksumMismatch {
                    expected: declared.to_string(),
                    actual: digest,
                });
            }
            warn!(
                upload_id,
                algorithm = %algorithm,
                expected = declared,
                actual = %digest,
                "checksum mismatch ignored, verification disabled"
            );
        }

        let artifact = match self.store.commit_artifact(upload_id, &filename, &chunks).await {
            Ok(a) => a,
            Err(e) => {
                finalizing.disarm();
                return Err(self.fail_on_store_error(upload_id, &slot, e));
            }
        };

        let now = self.clock.now();
        lock(&slot).complete(digest.clone(), now);
        finalizing.disarm();

        info!(
            upload_id,
            filename = %filename,
            size = artifact.size,
            algorithm = %algorithm,
            checksum = %digest,
            artifact = %artifact,
            "upload complete"
        );
        self.events.publish(UploadEvent::Completed {
            upload_id: upload_id.to_string(),
            filename,
            artifact: artifact.clone(),
            checksum: digest.clone(),
            algorithm,
        });

        Ok(FinalizeOutcome {
            upload_id: upload_id.to_string(),
            status: UploadStatus::Complete,
            artifact,
            checksum: digest,
            algorithm,
        })
    }

    /// Returns progress for an upload.
    ///
    /// Read-only: a session past its deadline is reported as `Expired` but
    /// is only transitioned by the next write or sweep.
    pub fn get_status(&self, upload_id: &str) -> Result<UploadProgress, UploadError> {
        let slot = self.slot(upload_id)?;
        let now = self.clock.now();
        let session = lock(&slot);
        let mut progress = session.progress();
        if !session.status().is_terminal() && !session.is_finalizing() && session.is_expired(now)
        {
            progress.status = UploadStatus::Expired;
        }
        Ok(progress)
    }

    /// Expires overdue sessions and evicts old terminal ones.
    ///
    /// Overdue sessions move to `Expired` and their chunk data is released.
    /// Terminal sessions that ended more than the retention window ago are
    /// removed from the registry; chunk data kept for failed uploads is
    /// released at that point.
    pub async fn sweep_expired(&self) -> SweepReport {
        let now = self.clock.now();
        let snapshot: Vec<(String, Slot)> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut report = SweepReport::default();
        for (upload_id, slot) in snapshot {
            let action = {
                let mut session = lock(&slot);
                if session.is_expired(now) && session.expire(now) {
                    SweepAction::Expire
                } else if let Some(ended) = session.completed_at()
                    && session.status().is_terminal()
                    && now - ended > self.retention_window
                {
                    SweepAction::Evict {
                        release: session.status() != UploadStatus::Complete,
                    }
                } else {
                    SweepAction::Keep
                }
            };

            match action {
                SweepAction::Keep => {}
                SweepAction::Expire => {
                    report.expired += 1;
                    self.on_expired(&upload_id);
                    if let Err(e) = self.store.release(&upload_id).await {
                        warn!(upload_id = %upload_id, "failed to release expired chunks: {e}");
                        report.release_failures += 1;
                    }
                }
                SweepAction::Evict { release } => {
                    if release && let Err(e) = self.store.release(&upload_id).await {
                        warn!(upload_id = %upload_id, "failed to release chunks: {e}");
                        report.release_failures += 1;
                        continue;
                    }
                    self.sessions
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&upload_id);
                    report.evicted += 1;
                    debug!(upload_id = %upload_id, "session evicted");
                }
            }
        }

        if report != SweepReport::default() {
            info!(
                expired = report.expired,
                evicted = report.evicted,
                release_failures = report.release_failures,
                "sweep finished"
            );
        }
        report
    }

    fn slot(&self, upload_id: &str) -> Result<Slot, UploadError> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(upload_id)
            .cloned()
            .ok_or_else(|| UploadError::NotFound(upload_id.to_string()))
    }

    fn resolve_algorithm(&self, name: Option<&str>) -> Result<ChecksumAlgorithm, UploadError> {
        let algorithm = match name {
            Some(name) => ChecksumAlgorithm::parse(name)?,
            None => self.config.default_algorithm,
        };
        if !self.config.allows(algorithm) {
            return Err(UploadError::UnsupportedAlgorithm(algorithm.to_string()));
        }
        Ok(algorithm)
    }

    /// Runs `f` under the session lock and publishes an `Expired` event if
    /// the call expired the session.
    fn with_session<T>(
        &self,
        upload_id: &str,
        slot: &Mutex<UploadSession>,
        f: impl FnOnce(&mut UploadSession) -> Result<T, UploadError>,
    ) -> Result<T, UploadError> {
        let (result, expired_now) = {
            let mut session = lock(slot);
            let was_live = !session.status().is_terminal();
            let result = f(&mut session);
            (result, was_live && session.status() == UploadStatus::Expired)
        };
        if expired_now {
            self.on_expired(upload_id);
        }
        result
    }

    fn on_expired(&self, upload_id: &str) {
        info!(upload_id, "upload expired");
        self.events.publish(UploadEvent::Expired {
            upload_id: upload_id.to_string(),
        });
    }

    fn fail(&self, upload_id: &str, slot: &Mutex<UploadSession>, reason: &str) {
        lock(slot).fail(reason, self.clock.now());
        self.events.publish(UploadEvent::Failed {
            upload_id: upload_id.to_string(),
            reason: reason.to_string(),
        });
    }

    fn fail_on_store_error(
        &self,
        upload_id: &str,
        slot: &Mutex<UploadSession>,
        e: StoreError,
    ) -> UploadError {
        error!(upload_id, "finalize failed: {e}");
        self.fail(upload_id, slot, &e.to_string());
        UploadError::StoreWriteFailure(e)
    }

    /// Drops stored chunks once a session has moved to `Expired`. A session
    /// that finished before its deadline keeps its data until eviction.
    async fn release_if_expired(&self, upload_id: &str, slot: &Mutex<UploadSession>) {
        if lock(slot).status() == UploadStatus::Expired {
            self.release_quietly(upload_id).await;
        }
    }

    async fn release_quietly(&self, upload_id: &str) {
        if let Err(e) = self.store.release(upload_id).await {
            warn!(upload_id, "failed to release chunks: {e}");
        }
    }

    fn log_rejection(&self, upload_id: &str, range: &ContentRange, e: &UploadError) {
        match e {
            UploadError::ConflictingRange { .. } => {
                warn!(upload_id, start = range.start, end = range.end, "conflicting chunk: {e}");
            }
            _ => debug!(upload_id, start = range.start, end = range.end, "chunk rejected: {e}"),
        }
    }
}

enum SweepAction {
    Keep,
    Expire,
    Evict { release: bool },
}

fn lock(slot: &Mutex<UploadSession>) -> MutexGuard<'_, UploadSession> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases a chunk reservation unless disarmed.
struct Reservation<'a> {
    slot: &'a Mutex<UploadSession>,
    range: ByteRange,
    armed: bool,
}

impl<'a> Reservation<'a> {
    fn new(slot: &'a Mutex<UploadSession>, range: ByteRange) -> Self {
        Self {
            slot,
            range,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.slot).abort_chunk(self.range);
        }
    }
}

/// Clears the finalizing mark unless disarmed.
struct Finalizing<'a> {
    slot: &'a Mutex<UploadSession>,
    armed: bool,
}

impl<'a> Finalizing<'a> {
    fn new(slot: &'a Mutex<UploadSession>) -> Self {
        Self { slot, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Finalizing<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.slot).abort_finalize();
        }
    }
}
