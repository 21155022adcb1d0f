fn main() {
    println!("Run `cargo test -p contract` to execute the upload contract tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    use splice_coordinator::transport::{self, Reply};
    use splice_coordinator::{CoordinatorConfig, ManualClock, UploadCoordinator};
    use splice_protocol::messages::{
        ChunkResponse, ErrorResponse, FinalizeRequest, FinalizeResponse, StartUploadRequest,
        StartUploadResponse,
    };
    use splice_protocol::{UploadProgress, UploadStatus};
    use splice_transfer::{ChecksumAlgorithm, FsChunkStore, checksum_bytes};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values.
    fn roundtrip_test<T>(name: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
    }

    // --- Wire format ---

    #[test]
    fn fixture_start_upload() {
        roundtrip_test::<StartUploadRequest>("start_upload_request.json");
        roundtrip_test::<StartUploadResponse>("start_upload_response.json");
    }

    #[test]
    fn fixture_chunk_responses() {
        roundtrip_test::<ChunkResponse>("chunk_response_accepted.json");
        roundtrip_test::<ChunkResponse>("chunk_response_duplicate.json");
    }

    #[test]
    fn fixture_finalize() {
        roundtrip_test::<FinalizeRequest>("finalize_request.json");
        roundtrip_test::<FinalizeResponse>("finalize_response.json");
    }

    #[test]
    fn fixture_error_response() {
        roundtrip_test::<ErrorResponse>("error_response.json");
    }

    #[test]
    fn fixture_upload_progress() {
        roundtrip_test::<UploadProgress>("upload_progress.json");
        let progress: UploadProgress =
            serde_json::from_value(load_fixture("upload_progress.json")).unwrap();
        assert_eq!(progress.status, UploadStatus::InProgress);
        assert_eq!(progress.percentage(), 50.0);
    }

    // --- End to end over the transport contract ---

    struct Harness {
        coordinator: UploadCoordinator,
        clock: Arc<ManualClock>,
        dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let coordinator = UploadCoordinator::with_clock(
            CoordinatorConfig {
                verify_checksums: true,
                ..Default::default()
            },
            Arc::new(FsChunkStore::new(dir.path())),
            clock.clone(),
        )
        .unwrap();
        Harness {
            coordinator,
            clock,
            dir,
        }
    }

    fn start(h: &Harness, filename: &str, total_size: u64) -> String {
        let body = serde_json::to_vec(&StartUploadRequest {
            filename: filename.into(),
            total_size,
        })
        .unwrap();
        let reply = transport::start(&h.coordinator, &body);
        assert_eq!(reply.status, 201, "start failed: {}", reply.body);
        let resp: StartUploadResponse = serde_json::from_value(reply.body).unwrap();
        resp.upload_id
    }

    async fn put(h: &Harness, id: &str, range: &str, data: &[u8]) -> Reply {
        transport::put(&h.coordinator, id, Some(range), data.to_vec()).await
    }

    #[tokio::test]
    async fn chunked_upload_flow() {
        let h = harness();
        let full = b"Hello World!";
        let id = start(&h, "testfile.txt", full.len() as u64);

        let reply = put(&h, &id, "bytes 0-5/12", b"Hello ").await;
        assert_eq!(reply.status, 200);
        let ack: ChunkResponse = serde_json::from_value(reply.body).unwrap();
        assert!(ack.accepted);
        assert_eq!(ack.bytes_received, 6);

        let reply = put(&h, &id, "bytes 6-12/12", b"World!").await;
        assert_eq!(reply.status, 200, "second chunk failed: {}", reply.body);

        let md5 = checksum_bytes(ChecksumAlgorithm::Md5, full);
        let body = serde_json::to_vec(&FinalizeRequest {
            checksum: Some(md5.clone()),
            checksum_algo: Some("md5".into()),
        })
        .unwrap();
        let reply = transport::finalize(&h.coordinator, &id, &body).await;
        assert_eq!(reply.status, 201, "finalize failed: {}", reply.body);
        let done: FinalizeResponse = serde_json::from_value(reply.body).unwrap();
        assert_eq!(done.status, UploadStatus::Complete);
        assert_eq!(done.checksum, md5);

        let on_disk = h.dir.path().join("artifacts").join(&id).join("testfile.txt");
        assert_eq!(fs::read(on_disk).unwrap(), full);

        let reply = transport::status(&h.coordinator, &id);
        assert_eq!(reply.body["status"], "complete");
        assert_eq!(reply.body["checksum"], md5.as_str());

        // A second finalize is refused.
        let reply = transport::finalize(&h.coordinator, &id, b"").await;
        assert_eq!(reply.status, 400);
        assert_eq!(reply.body["code"], "already_finalized");
    }

    #[tokio::test]
    async fn chunks_in_reverse_order() {
        let h = harness();
        let id = start(&h, "testfile.txt", 12);

        let reply = put(&h, &id, "bytes 6-11/12", b"World!").await;
        assert_eq!(reply.status, 200);
        let reply = put(&h, &id, "bytes 0-5/12", b"Hello ").await;
        assert_eq!(reply.status, 200);

        let reply = transport::finalize(&h.coordinator, &id, b"").await;
        assert_eq!(reply.status, 201, "finalize failed: {}", reply.body);
        let on_disk = h.dir.path().join("artifacts").join(&id).join("testfile.txt");
        assert_eq!(fs::read(on_disk).unwrap(), b"Hello World!");
    }

    #[tokio::test]
    async fn duplicate_chunk_skipped() {
        let h = harness();
        let id = start(&h, "testfile.txt", 13);

        let mut reply = put(&h, &id, "bytes 0-5/13", b"Hello ").await;
        for _ in 0..2 {
            reply = put(&h, &id, "bytes 0-5/13", b"Hello ").await;
        }
        assert_eq!(reply.status, 200);
        assert!(reply.body.get("duplicate").is_some());
        assert_eq!(reply.body["bytes_received"], 6);
    }

    #[tokio::test]
    async fn overlapping_chunk_conflicts() {
        let h = harness();
        let id = start(&h, "testfile.txt", 12);

        put(&h, &id, "bytes 0-5/12", b"Hello ").await;
        let reply = put(&h, &id, "bytes 3-8/12", b"lo Wor").await;
        assert_eq!(reply.status, 409);
        assert_eq!(reply.body["code"], "conflicting_range");
    }

    #[tokio::test]
    async fn total_mismatch_is_bad_request() {
        let h = harness();
        let id = start(&h, "testfile.txt", 12);
        let reply = put(&h, &id, "bytes 0-5/13", b"Hello ").await;
        assert_eq!(reply.status, 400);
        assert_eq!(reply.body["code"], "invalid_range");
    }

    #[tokio::test]
    async fn incomplete_finalize_conflicts() {
        let h = harness();
        let id = start(&h, "testfile.txt", 12);
        put(&h, &id, "bytes 0-5/12", b"Hello ").await;

        let reply = transport::finalize(&h.coordinator, &id, b"").await;
        assert_eq!(reply.status, 409);
        assert_eq!(reply.body["code"], "incomplete_upload");

        let reply = transport::status(&h.coordinator, &id);
        let progress: UploadProgress = serde_json::from_value(reply.body).unwrap();
        assert_eq!(progress.status, UploadStatus::InProgress);
        assert_eq!(progress.missing_ranges.len(), 1);
    }

    #[tokio::test]
    async fn checksum_mismatch() {
        let h = harness();
        let chunk = b"Hello ";
        let id = start(&h, "testfile.txt", chunk.len() as u64);
        put(&h, &id, "bytes 0-5/6", chunk).await;

        let reply = transport::finalize(
            &h.coordinator,
            &id,
            br#"{"checksum": "WRONG", "checksum_algo": "md5"}"#,
        )
        .await;
        assert_eq!(reply.status, 400);
        let err: ErrorResponse = serde_json::from_value(reply.body).unwrap();
        assert!(err.message.contains("Checksum mismatch"));

        let reply = transport::status(&h.coordinator, &id);
        assert_eq!(reply.body["status"], "failed");
    }

    #[tokio::test]
    async fn expired_upload() {
        let h = harness();
        let id = start(&h, "testfile.txt", 12);

        h.clock.advance(Duration::hours(24) + Duration::minutes(1));
        let reply = put(&h, &id, "bytes 0-5/12", b"Hello ").await;
        assert_eq!(reply.status, 410);

        let reply = transport::finalize(&h.coordinator, &id, b"").await;
        assert_eq!(reply.status, 410);
    }

    #[tokio::test]
    async fn unknown_upload() {
        let h = harness();
        let reply = put(&h, "does-not-exist", "bytes 0-5/12", b"Hello ").await;
        assert_eq!(reply.status, 404);
        assert_eq!(transport::status(&h.coordinator, "does-not-exist").status, 404);
    }
}
