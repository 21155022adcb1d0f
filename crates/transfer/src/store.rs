//! Chunk storage seam.
//!
//! The coordinator never touches bytes directly: chunk payloads go to a
//! [`ChunkStore`] keyed by `(upload_id, range)` and are read back at finalize
//! time. Only the ranges the session committed are read; anything else a
//! store holds for the upload (writes whose caller went away before the
//! commit) is ignored and dropped with the rest of the upload's chunks.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};

use splice_protocol::ByteRange;

/// Errors produced by chunk stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk not found: {upload_id} at {range}")]
    ChunkNotFound { upload_id: String, range: ByteRange },

    #[error("stored chunks are not contiguous: {upload_id} expected offset {expected}, found {found}")]
    Discontiguous {
        upload_id: String,
        expected: u64,
        found: u64,
    },

    #[error("stored chunk {range} of {upload_id} holds {found} bytes")]
    ChunkLength {
        upload_id: String,
        range: ByteRange,
        found: u64,
    },

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// A boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Reference to an assembled artifact, handed to completion subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    /// Store-specific location (a path for the filesystem store).
    pub location: String,
    pub size: u64,
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}

/// Byte sink for chunk payloads.
///
/// Implementations must make `write_chunk` all-or-nothing: a chunk that was
/// not written completely must not be visible to `chunk_ranges`. Chunks with
/// different ranges never replace each other, even when they share a start
/// offset.
pub trait ChunkStore: Send + Sync {
    /// Stores the payload of one chunk.
    fn write_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        range: ByteRange,
        data: Vec<u8>,
    ) -> StoreFuture<'a, ()>;

    /// Lists every stored chunk range in ascending order.
    fn chunk_ranges<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, Vec<ByteRange>>;

    /// Reads back one stored chunk.
    fn read_chunk<'a>(&'a self, upload_id: &'a str, range: ByteRange)
    -> StoreFuture<'a, Vec<u8>>;

    /// Concatenates `chunks` into the final artifact named `filename` and
    /// drops every chunk held for the upload.
    fn commit_artifact<'a>(
        &'a self,
        upload_id: &'a str,
        filename: &'a str,
        chunks: &'a [ByteRange],
    ) -> StoreFuture<'a, ArtifactRef>;

    /// Deletes all chunk data for an upload. Releasing an unknown upload is
    /// not an error.
    fn release<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, ()>;
}

/// Streams the given chunks in order.
///
/// `chunks` must be sorted and contiguous from offset zero. `visit` is called
/// once per chunk with its range and bytes. Fails with
/// [`StoreError::Discontiguous`] on a gap or overlap and with
/// [`StoreError::ChunkLength`] if a stored chunk does not match its range.
/// Returns the number of bytes visited.
pub async fn for_each_chunk<F>(
    store: &dyn ChunkStore,
    upload_id: &str,
    chunks: &[ByteRange],
    mut visit: F,
) -> Result<u64, StoreError>
where
    F: FnMut(ByteRange, &[u8]) + Send,
{
    let mut position = 0u64;
    for &range in chunks {
        check_next(upload_id, position, range)?;
        let data = store.read_chunk(upload_id, range).await?;
        check_length(upload_id, range, &data)?;
        visit(range, &data);
        position = range.end;
    }
    Ok(position)
}

pub(crate) fn check_next(
    upload_id: &str,
    position: u64,
    range: ByteRange,
) -> Result<(), StoreError> {
    if range.start != position {
        return Err(StoreError::Discontiguous {
            upload_id: upload_id.to_string(),
            expected: position,
            found: range.start,
        });
    }
    Ok(())
}

pub(crate) fn check_length(
    upload_id: &str,
    range: ByteRange,
    data: &[u8],
) -> Result<(), StoreError> {
    let found = data.len() as u64;
    if found != range.len() {
        return Err(StoreError::ChunkLength {
            upload_id: upload_id.to_string(),
            range,
            found,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MemoryChunkStore
// ---------------------------------------------------------------------------

/// In-memory store, useful for tests and embedding.
#[derive(Default)]
pub struct MemoryChunkStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    chunks: HashMap<String, BTreeMap<ByteRange, Vec<u8>>>,
    artifacts: HashMap<String, (String, Vec<u8>)>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the assembled bytes of a committed upload.
    pub fn artifact(&self, upload_id: &str) -> Option<Vec<u8>> {
        self.lock()
            .artifacts
            .get(upload_id)
            .map(|(_, data)| data.clone())
    }

    /// Number of chunks currently held for an upload.
    pub fn chunk_count(&self, upload_id: &str) -> usize {
        self.lock().chunks.get(upload_id).map_or(0, BTreeMap::len)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChunkStore for MemoryChunkStore {
    fn write_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        range: ByteRange,
        data: Vec<u8>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.lock()
                .chunks
                .entry(upload_id.to_string())
                .or_default()
                .insert(range, data);
            Ok(())
        })
    }

    fn chunk_ranges<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, Vec<ByteRange>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .chunks
                .get(upload_id)
                .map(|c| c.keys().copied().collect())
                .unwrap_or_default())
        })
    }

    fn read_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        range: ByteRange,
    ) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.lock()
                .chunks
                .get(upload_id)
                .and_then(|c| c.get(&range))
                .cloned()
                .ok_or_else(|| StoreError::ChunkNotFound {
                    upload_id: upload_id.to_string(),
                    range,
                })
        })
    }

    fn commit_artifact<'a>(
        &'a self,
        upload_id: &'a str,
        filename: &'a str,
        chunks: &'a [ByteRange],
    ) -> StoreFuture<'a, ArtifactRef> {
        Box::pin(async move {
            let mut assembled = Vec::new();
            for_each_chunk(self, upload_id, chunks, |_, data| {
                assembled.extend_from_slice(data)
            })
            .await?;

            let size = assembled.len() as u64;
            let mut inner = self.lock();
            inner.chunks.remove(upload_id);
            inner
                .artifacts
                .insert(upload_id.to_string(), (filename.to_string(), assembled));
            Ok(ArtifactRef {
                location: format!("memory://{upload_id}/{filename}"),
                size,
            })
        })
    }

    fn release<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.lock().chunks.remove(upload_id);
            Ok(())
        })
    }
}
