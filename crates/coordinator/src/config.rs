use std::time::Duration;

use splice_transfer::ChecksumAlgorithm;

/// Default expiration window (24 hours).
pub const DEFAULT_EXPIRATION_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Default interval between expiration sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// How long terminal sessions stay queryable (7 days).
pub const DEFAULT_RETENTION_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Errors produced by [`CoordinatorConfig::validate`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("{0} is out of range")]
    OutOfRange(&'static str),

    #[error("checksum algorithm allowlist is empty")]
    EmptyAllowlist,

    #[error("default checksum algorithm {0} is not in the allowlist")]
    DefaultNotAllowed(ChecksumAlgorithm),
}

/// Coordinator settings, passed in at construction.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum age of a session before it stops accepting chunks.
    pub expiration_window: Duration,
    /// Reject finalize calls that do not declare a checksum.
    pub checksum_required: bool,
    /// Checksum enforcement: fail the upload when a declared checksum does
    /// not match. Off by default, in which case a mismatch is only logged and
    /// the computed digest is still returned.
    pub verify_checksums: bool,
    /// Algorithms clients may name in a finalize call.
    pub checksum_algorithms: Vec<ChecksumAlgorithm>,
    /// Algorithm used when the client names none.
    pub default_algorithm: ChecksumAlgorithm,
    /// Interval between background expiration sweeps.
    pub sweep_interval: Duration,
    /// How long terminal sessions are kept before eviction.
    pub retention_window: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            expiration_window: DEFAULT_EXPIRATION_WINDOW,
            checksum_required: false,
            verify_checksums: false,
            checksum_algorithms: ChecksumAlgorithm::ALL.to_vec(),
            default_algorithm: ChecksumAlgorithm::Sha256,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            retention_window: DEFAULT_RETENTION_WINDOW,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("expiration_window", self.expiration_window),
            ("sweep_interval", self.sweep_interval),
            ("retention_window", self.retention_window),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
            chrono::Duration::from_std(value).map_err(|_| ConfigError::OutOfRange(name))?;
        }

        if self.checksum_algorithms.is_empty() {
            return Err(ConfigError::EmptyAllowlist);
        }
        if !self.allows(self.default_algorithm) {
            return Err(ConfigError::DefaultNotAllowed(self.default_algorithm));
        }
        Ok(())
    }

    /// Returns `true` if `algorithm` is in the allowlist.
    pub fn allows(&self, algorithm: ChecksumAlgorithm) -> bool {
        self.checksum_algorithms.contains(&algorithm)
    }
}
