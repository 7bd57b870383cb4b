//! # Persistence Format
//!
//! Canonical binary interchange for fact logs.
//!
//! redb files are not guaranteed bit-identical across runs, so exports use
//! this format as the source of truth for verification: an ordered fact
//! log serializes to bit-exact bytes, and export -> import -> export
//! reproduces them exactly.
//!
//! Format: Header (6 bytes) + postcard-serialized log image.
//! - 4 bytes: Magic ("VARV")
//! - 1 byte: Version
//! - 1 byte: Flags (reserved, zero)
//!
//! All validation (size bounds, magic, version, checksum) happens BEFORE
//! payload use to prevent allocation-based DoS and silent corruption.

use crate::primitives::{self, MAX_PERSISTENCE_PAYLOAD_SIZE};
use crate::types::{Fact, VarveError};
use serde::{Deserialize, Serialize};

/// Minimum valid file size (header only).
const MIN_FILE_SIZE: usize = 6;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The persistence header precedes all log data.
#[derive(Debug, Clone, Copy)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub flags: u8,
}

impl PersistenceHeader {
    /// Create a new header with the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
            flags: 0,
        }
    }

    /// Validate the header.
    pub fn validate(&self) -> Result<(), VarveError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(VarveError::Serialization(
                "invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(VarveError::Serialization(format!(
                "unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    /// Write header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 6] {
        let mut bytes = [0u8; 6];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes[5] = self.flags;
        bytes
    }

    /// Read header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VarveError> {
        if bytes.len() < MIN_FILE_SIZE {
            return Err(VarveError::Serialization("header too short".to_string()));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
            flags: bytes[5],
        })
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// LOG IMAGE
// =============================================================================

/// The serialized payload: checksum plus the ordered facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogImage {
    checksum: u64,
    facts: Vec<Fact>,
}

/// Deterministic FNV-1a style checksum over the encoded facts.
///
/// Not cryptographic; detects truncation and bit rot, nothing more.
#[must_use]
pub fn log_checksum(facts: &[Fact]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut mix = |bytes: &[u8]| {
        for b in bytes {
            hash ^= u64::from(*b);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    };
    for fact in facts {
        if let Ok(bytes) = postcard::to_stdvec(fact) {
            mix(&bytes);
        }
    }
    hash
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a fact log to bytes (header + payload).
///
/// This is a pure transformation - no file I/O.
pub fn log_to_bytes(facts: &[Fact]) -> Result<Vec<u8>, VarveError> {
    let header = PersistenceHeader::new();
    let image = LogImage {
        checksum: log_checksum(facts),
        facts: facts.to_vec(),
    };

    let payload =
        postcard::to_stdvec(&image).map_err(|e| VarveError::Serialization(e.to_string()))?;

    let mut result = Vec::with_capacity(MIN_FILE_SIZE + payload.len());
    result.extend_from_slice(&header.to_bytes());
    result.extend_from_slice(&payload);

    Ok(result)
}

/// Deserialize a fact log from bytes.
///
/// Validates:
/// 1. Minimum data size (header must be present)
/// 2. Maximum payload size (prevents memory exhaustion)
/// 3. Header magic bytes and version
/// 4. Payload checksum
pub fn log_from_bytes(bytes: &[u8]) -> Result<Vec<Fact>, VarveError> {
    if bytes.len() < MIN_FILE_SIZE {
        return Err(VarveError::Serialization(format!(
            "data too short: minimum {} bytes required",
            MIN_FILE_SIZE
        )));
    }
    if bytes.len() > MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(VarveError::Serialization(format!(
            "data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }

    let header = PersistenceHeader::from_bytes(bytes)?;
    header.validate()?;

    let payload = &bytes[MIN_FILE_SIZE..];
    let image: LogImage = postcard::from_bytes(payload)
        .map_err(|e| VarveError::Serialization(format!("failed to deserialize log: {}", e)))?;

    if log_checksum(&image.facts) != image.checksum {
        return Err(VarveError::Serialization(
            "checksum mismatch: log data corrupted".to_string(),
        ));
    }

    Ok(image.facts)
}

/// Verify serialized bytes against an in-memory log.
pub fn verify_log_bytes(facts: &[Fact], bytes: &[u8]) -> Result<bool, VarveError> {
    let decoded = log_from_bytes(bytes)?;
    Ok(decoded == facts)
}

// =============================================================================
// TESTS
// =============================================================================
