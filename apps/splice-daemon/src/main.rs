//! Splice daemon.
//!
//! Hosts an [`UploadCoordinator`] backed by the filesystem store and keeps
//! the expiration sweeper running until Ctrl-C. The HTTP front end embeds
//! the coordinator through `splice_coordinator::transport`.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use splice_coordinator::{ExpirationSweeper, UploadCoordinator, UploadEvent};
use splice_transfer::FsChunkStore;

use config::{CONFIG_ENV, DaemonConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,splice=debug")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    let cfg = DaemonConfig::load(config_path.as_deref())?;

    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("creating data dir {}", cfg.data_dir.display()))?;
    let store = Arc::new(FsChunkStore::new(&cfg.data_dir));

    let coordinator = Arc::new(
        UploadCoordinator::new(cfg.coordinator.clone(), store)
            .context("invalid coordinator configuration")?,
    );
    coordinator.subscribe(Box::new(log_event));

    let sweeper = ExpirationSweeper::spawn(Arc::clone(&coordinator));
    tracing::info!(
        data_dir = %cfg.data_dir.display(),
        expiration_window = ?cfg.coordinator.expiration_window,
        checksum_required = cfg.coordinator.checksum_required,
        "splice daemon running"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    sweeper.shutdown().await;

    Ok(())
}

fn log_event(event: &UploadEvent) {
    match event {
        UploadEvent::Completed {
            upload_id,
            artifact,
            checksum,
            algorithm,
            ..
        } => tracing::info!(
            upload_id = %upload_id,
            artifact = %artifact,
            algorithm = %algorithm,
            checksum = %checksum,
            "artifact ready"
        ),
        UploadEvent::Failed { upload_id, reason } => {
            tracing::warn!(upload_id = %upload_id, reason = %reason, "upload failed")
        }
        other => tracing::debug!(upload_id = other.upload_id(), kind = other.kind(), "upload event"),
    }
}
