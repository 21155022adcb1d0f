//! Daemon configuration.
//!
//! Reads an optional JSON file. Every field may be omitted; missing or
//! out-of-range values fall back to the coordinator defaults. Durations are
//! given in seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use splice_coordinator::CoordinatorConfig;
use splice_transfer::ChecksumAlgorithm;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SPLICE_CONFIG";

/// Environment variable overriding the storage directory.
pub const DATA_DIR_ENV: &str = "SPLICE_DATA_DIR";

const DEFAULT_DATA_DIR: &str = "splice-data";

/// On-disk config format.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    data_dir: Option<PathBuf>,
    #[serde(default)]
    expiration_window_secs: Option<u64>,
    #[serde(default)]
    checksum_required: Option<bool>,
    #[serde(default)]
    verify_checksums: Option<bool>,
    #[serde(default)]
    checksum_algorithms: Vec<String>,
    #[serde(default)]
    default_algorithm: Option<String>,
    #[serde(default)]
    sweep_interval_secs: Option<u64>,
    #[serde(default)]
    retention_window_secs: Option<u64>,
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Root directory of the filesystem chunk store.
    pub data_dir: PathBuf,
    pub coordinator: CoordinatorConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Loads configuration from `path`, if given and present.
    ///
    /// A file that does not parse is logged and ignored.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(path) = path
            && path.exists()
        {
            let content = std::fs::read_to_string(path)?;
            match serde_json::from_str::<ConfigFile>(&content) {
                Ok(file) => config.apply(file),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    "failed to parse daemon config, using defaults: {e}"
                ),
            }
        }

        if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
            config.data_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    fn apply(&mut self, file: ConfigFile) {
        let c = &mut self.coordinator;

        if let Some(dir) = file.data_dir {
            self.data_dir = dir;
        }
        if let Some(secs) = file.expiration_window_secs.filter(|s| *s > 0) {
            c.expiration_window = Duration::from_secs(secs);
        }
        if let Some(required) = file.checksum_required {
            c.checksum_required = required;
        }
        if let Some(verify) = file.verify_checksums {
            c.verify_checksums = verify;
        }

        let algorithms: Vec<ChecksumAlgorithm> = file
            .checksum_algorithms
            .iter()
            .filter_map(|name| match ChecksumAlgorithm::parse(name) {
                Ok(algo) => Some(algo),
                Err(_) => {
                    tracing::warn!(name = %name, "ignoring unknown checksum algorithm");
                    None
                }
            })
            .collect();
        if !algorithms.is_empty() {
            c.checksum_algorithms = algorithms;
        }

        match file.default_algorithm.as_deref().map(ChecksumAlgorithm::parse) {
            Some(Ok(algo)) => c.default_algorithm = algo,
            Some(Err(e)) => tracing::warn!("ignoring default_algorithm: {e}"),
            None => {}
        }
        // Keep the default usable when the allowlist was narrowed.
        if !c.allows(c.default_algorithm)
            && let Some(first) = c.checksum_algorithms.first()
        {
            c.default_algorithm = *first;
        }

        if let Some(secs) = file.sweep_interval_secs.filter(|s| *s > 0) {
            c.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.retention_window_secs.filter(|s| *s > 0) {
            c.retention_window = Duration::from_secs(secs);
        }
    }
}
