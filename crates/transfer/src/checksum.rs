use std::fmt;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::UploadError;

/// Digest algorithms a client may declare for the assembled file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
}

impl ChecksumAlgorithm {
    pub const ALL: [ChecksumAlgorithm; 2] = [Self::Md5, Self::Sha256];

    /// Canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    /// Length of the hex-encoded digest.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }

    /// Resolves an algorithm name (case-insensitive).
    pub fn parse(name: &str) -> Result<Self, UploadError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            _ => Err(UploadError::UnsupportedAlgorithm(name.to_string())),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
}

/// Incremental digest over a byte stream.
///
/// Feed the assembled file chunk by chunk with [`update`](Self::update) and
/// read the hex digest with [`finalize`](Self::finalize).
pub struct ChecksumVerifier {
    algorithm: ChecksumAlgorithm,
    hasher: Hasher,
    bytes: u64,
}

impl ChecksumVerifier {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        let hasher = match algorithm {
            ChecksumAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        };
        Self {
            algorithm,
            hasher,
            bytes: 0,
        }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Bytes consumed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.hasher {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
        self.bytes += data.len() as u64;
    }

    /// Consumes the verifier and returns the lowercase hex digest.
    pub fn finalize(self) -> String {
        match self.hasher {
            Hasher::Md5(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Computes the digest of `data` and returns it hex-encoded.
pub fn checksum_bytes(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    let mut verifier = ChecksumVerifier::new(algorithm);
    verifier.update(data);
    verifier.finalize()
}

/// Compares a computed hex digest with a client-declared one.
///
/// This is an integrity check, not authentication, so a plain comparison is
/// used. Hex case and surrounding whitespace are ignored.
pub fn verify_checksum(digest: &str, declared: &str) -> bool {
    digest.trim().eq_ignore_ascii_case(declared.trim())
}
