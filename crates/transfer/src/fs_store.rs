//! Filesystem-backed chunk store.
//!
//! Layout under the root directory:
//!
//! ```text
//! chunks/<upload_id>/<start>-<end>.part  one file per accepted chunk
//! artifacts/<upload_id>/<filename>       assembled file after finalize
//! ```
//!
//! Chunk files are written to a `.tmp` sibling and renamed into place, so a
//! write interrupted halfway never shows up as a stored chunk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use splice_protocol::ByteRange;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

use crate::store::{ArtifactRef, ChunkStore, StoreError, StoreFuture, check_length, check_next};
use crate::validate_filename;

const PART_EXTENSION: &str = "part";
const TMP_EXTENSION: &str = "tmp";

/// Stores chunks as individual files under a root directory.
#[derive(Debug, Clone)]
pub struct FsChunkStore {
    root: PathBuf,
}

impl FsChunkStore {
    /// Creates a store rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_dir(&self, upload_id: &str) -> Result<PathBuf, StoreError> {
        check_component(upload_id)?;
        Ok(self.root.join("chunks").join(upload_id))
    }

    fn artifact_path(&self, upload_id: &str, filename: &str) -> Result<PathBuf, StoreError> {
        check_component(upload_id)?;
        check_component(filename)?;
        Ok(self.root.join("artifacts").join(upload_id).join(filename))
    }

    fn part_path(dir: &Path, range: ByteRange) -> PathBuf {
        // Zero padding keeps lexical and numeric order identical.
        dir.join(format!(
            "{:020}-{:020}.{PART_EXTENSION}",
            range.start, range.end
        ))
    }

    fn parse_part_name(stem: &str) -> Option<ByteRange> {
        let (start, end) = stem.split_once('-')?;
        let range = ByteRange::new(start.parse().ok()?, end.parse().ok()?);
        (!range.is_empty()).then_some(range)
    }

    async fn list_ranges(&self, upload_id: &str) -> Result<Vec<ByteRange>, StoreError> {
        let dir = self.chunk_dir(upload_id)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ranges = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PART_EXTENSION) {
                continue;
            }
            if let Some(range) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(Self::parse_part_name)
            {
                ranges.push(range);
            }
        }
        ranges.sort_unstable();
        Ok(ranges)
    }

    async fn read_part(&self, upload_id: &str, range: ByteRange) -> Result<Vec<u8>, StoreError> {
        let path = Self::part_path(&self.chunk_dir(upload_id)?, range);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::ChunkNotFound {
                upload_id: upload_id.to_string(),
                range,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn assemble(
        &self,
        upload_id: &str,
        filename: &str,
        chunks: &[ByteRange],
    ) -> Result<ArtifactRef, StoreError> {
        let target = self.artifact_path(upload_id, filename)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = target.with_extension(TMP_EXTENSION);

        let dir = self.chunk_dir(upload_id)?;
        let mut file = tokio::fs::File::create(&tmp).await?;
        let written = self.write_parts(&mut file, upload_id, chunks).await;
        let size = match written {
            Ok(size) => size,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e);
            }
        };
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            error!(
                from = %tmp.display(),
                to = %target.display(),
                "failed to move assembled artifact into place: {e}"
            );
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        remove_dir(&dir).await?;
        debug!(upload_id, size, path = %target.display(), "artifact assembled");

        Ok(ArtifactRef {
            location: target.to_string_lossy().into_owned(),
            size,
        })
    }

    async fn write_parts(
        &self,
        file: &mut tokio::fs::File,
        upload_id: &str,
        chunks: &[ByteRange],
    ) -> Result<u64, StoreError> {
        let mut size = 0u64;
        for &range in chunks {
            check_next(upload_id, size, range)?;
            let data = self.read_part(upload_id, range).await?;
            check_length(upload_id, range, &data)?;
            file.write_all(&data).await?;
            size = range.end;
        }
        Ok(size)
    }
}

impl ChunkStore for FsChunkStore {
    fn write_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        range: ByteRange,
        data: Vec<u8>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let dir = self.chunk_dir(upload_id)?;
            tokio::fs::create_dir_all(&dir).await?;

            let path = Self::part_path(&dir, range);
            let tmp = path.with_extension(TMP_EXTENSION);
            tokio::fs::write(&tmp, &data).await?;
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                error!(
                    from = %tmp.display(),
                    to = %path.display(),
                    "failed to move chunk into place: {e}"
                );
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e.into());
            }
            Ok(())
        })
    }

    fn chunk_ranges<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, Vec<ByteRange>> {
        Box::pin(self.list_ranges(upload_id))
    }

    fn read_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        range: ByteRange,
    ) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(self.read_part(upload_id, range))
    }

    fn commit_artifact<'a>(
        &'a self,
        upload_id: &'a str,
        filename: &'a str,
        chunks: &'a [ByteRange],
    ) -> StoreFuture<'a, ArtifactRef> {
        Box::pin(self.assemble(upload_id, filename, chunks))
    }

    fn release<'a>(&'a self, upload_id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let dir = self.chunk_dir(upload_id)?;
            remove_dir(&dir).await
        })
    }
}

/// Removes a directory tree, treating a missing directory as success.
async fn remove_dir(dir: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn check_component(name: &str) -> Result<(), StoreError> {
    validate_filename(name).map_err(|e| StoreError::InvalidPath(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::for_each_chunk;
    use tempfile::TempDir;

    fn r(start: u64, end: u64) -> ByteRange {
        ByteRange::new(start, end)
    }

    #[tokio::test]
    async fn writes_and_lists_chunks_in_order() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::new(dir.path());

        store.write_chunk("u1", r(6, 12), b"World!".to_vec()).await.unwrap();
        store.write_chunk("u1", r(0, 6), b"Hello ".to_vec()).await.unwrap();

        assert_eq!(
            store.chunk_ranges("u1").await.unwrap(),
            vec![r(0, 6), r(6, 12)]
        );
        assert_eq!(store.read_chunk("u1", r(6, 12)).await.unwrap(), b"World!");
    }

    #[tokio::test]
    async fn commit_assembles_and_drops_parts() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::new(dir.path());

        store.write_chunk("u1", r(6, 12), b"World!".to_vec()).await.unwrap();
        store.write_chunk("u1", r(0, 6), b"Hello ".to_vec()).await.unwrap();

        let artifact = store
            .commit_artifact("u1", "hello.txt", &[r(0, 6), r(6, 12)])
            .await
            .unwrap();
        assert_eq!(artifact.size, 12);

        let expected = dir.path().join("artifacts").join("u1").join("hello.txt");
        assert_eq!(artifact.location, expected.to_string_lossy());
        assert_eq!(std::fs::read(&expected).unwrap(), b"Hello World!");
        assert!(!dir.path().join("chunks").join("u1").exists());
    }

    #[tokio::test]
    async fn stray_parts_do_not_reach_the_artifact() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::new(dir.path());

        store.write_chunk("u1", r(0, 6), b"Hello ".to_vec()).await.unwrap();
        store.write_chunk("u1", r(9, 12), b"xyz".to_vec()).await.unwrap();
        store.write_chunk("u1", r(6, 9), b"Wor".to_vec()).await.unwrap();
        store.write_chunk("u1", r(6, 12), b"World!".to_vec()).await.unwrap();
        assert_eq!(store.chunk_ranges("u1").await.unwrap().len(), 4);

        let artifact = store
            .commit_artifact("u1", "hello.txt", &[r(0, 6), r(6, 12)])
            .await
            .unwrap();
        assert_eq!(artifact.size, 12);
        let path = dir.path().join("artifacts").join("u1").join("hello.txt");
        assert_eq!(std::fs::read(path).unwrap(), b"Hello World!");
        assert!(!dir.path().join("chunks").join("u1").exists());
    }

    #[tokio::test]
    async fn commit_with_gap_fails_and_keeps_parts() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::new(dir.path());

        store.write_chunk("u1", r(0, 3), b"abc".to_vec()).await.unwrap();
        store.write_chunk("u1", r(4, 7), b"efg".to_vec()).await.unwrap();

        let err = store
            .commit_artifact("u1", "out.bin", &[r(0, 3), r(4, 7)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Discontiguous { .. }));
        assert_eq!(
            store.chunk_ranges("u1").await.unwrap(),
            vec![r(0, 3), r(4, 7)]
        );
        let artifacts = dir.path().join("artifacts").join("u1");
        assert!(!artifacts.join("out.bin").exists());
        assert!(!artifacts.join("out.tmp").exists());
    }

    #[tokio::test]
    async fn ignores_leftover_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::new(dir.path());
        store.write_chunk("u1", r(0, 3), b"abc".to_vec()).await.unwrap();

        // Simulates a write that was interrupted before the rename.
        let chunk_dir = dir.path().join("chunks").join("u1");
        std::fs::write(
            chunk_dir.join("00000000000000000003-00000000000000000010.tmp"),
            b"partial",
        )
        .unwrap();

        assert_eq!(store.chunk_ranges("u1").await.unwrap(), vec![r(0, 3)]);
        let total = for_each_chunk(&store, "u1", &[r(0, 3)], |_, _| {})
            .await
            .unwrap();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn release_removes_chunks() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::new(dir.path());
        store.write_chunk("u1", r(0, 3), b"abc".to_vec()).await.unwrap();

        store.release("u1").await.unwrap();
        assert!(store.chunk_ranges("u1").await.unwrap().is_empty());
        // Second release is a no-op.
        store.release("u1").await.unwrap();
    }

    #[tokio::test]
    async fn missing_chunk_maps_to_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::new(dir.path());
        let err = store.read_chunk("u1", r(0, 3)).await.unwrap_err();
        assert!(matches!(err, StoreError::ChunkNotFound { .. }));
    }

    #[tokio::test]
    async fn rejects_traversal_in_ids() {
        let dir = TempDir::new().unwrap();
        let store = FsChunkStore::new(dir.path());

        let err = store
            .write_chunk("../escape", r(0, 4), b"evil".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(_)));

        let err = store
            .commit_artifact("u1", "../../etc/passwd", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(_)));
    }
}
