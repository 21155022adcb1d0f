//! Upload lifecycle notifications.
//!
//! Subscribers register a callback and receive every event published after
//! the corresponding state transition has been committed. Delivery is
//! synchronous on the publishing task, so callbacks should hand work off
//! rather than block.

use std::sync::{PoisonError, RwLock};

use splice_transfer::{ArtifactRef, ChecksumAlgorithm};

/// A lifecycle event for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Started {
        upload_id: String,
        filename: String,
        total_size: u64,
    },
    Completed {
        upload_id: String,
        filename: String,
        artifact: ArtifactRef,
        checksum: String,
        algorithm: ChecksumAlgorithm,
    },
    Failed {
        upload_id: String,
        reason: String,
    },
    Expired {
        upload_id: String,
    },
}

impl UploadEvent {
    pub fn upload_id(&self) -> &str {
        match self {
            Self::Started { upload_id, .. }
            | Self::Completed { upload_id, .. }
            | Self::Failed { upload_id, .. }
            | Self::Expired { upload_id } => upload_id,
        }
    }

    /// Short event name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Expired { .. } => "expired",
        }
    }
}

/// Callback invoked with each upload event.
pub type EventCallback = Box<dyn Fn(&UploadEvent) + Send + Sync>;

/// Registry of event subscribers.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<EventCallback>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback.
    pub fn subscribe(&self, callback: EventCallback) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// Delivers `event` to every subscriber.
    pub fn publish(&self, event: UploadEvent) {
        let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner);
        tracing::trace!(
            upload_id = event.upload_id(),
            kind = event.kind(),
            subscribers = callbacks.len(),
            "publishing upload event"
        );
        for cb in callbacks.iter() {
            cb(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
