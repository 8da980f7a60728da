//! Hash entries and the strong-hash provider.
//!
//! Each file entry may carry several hashes, distinguished by algorithm and
//! purpose. The checksum engine is the sole writer of these entries; readers
//! only consult them.

use crate::codec::{Reader, Writer};
use crate::error::{NovusError, Result};
use sha2::{Digest, Sha256, Sha512};

/// Hash algorithm identifiers (on-disk u8).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashType {
    Sha256 = 0x00,
    Sha512 = 0x01,
    Blake3 = 0x02,
    Xxh3 = 0x03,
    Blake2b = 0x04,
    Blake2s = 0x05,
    Sha3_256 = 0x06,
    Sha3_512 = 0x07,
    Crc32 = 0x08,
    Crc64 = 0x09,
}

impl HashType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(HashType::Sha256),
            0x01 => Some(HashType::Sha512),
            0x02 => Some(HashType::Blake3),
            0x03 => Some(HashType::Xxh3),
            0x04 => Some(HashType::Blake2b),
            0x05 => Some(HashType::Blake2s),
            0x06 => Some(HashType::Sha3_256),
            0x07 => Some(HashType::Sha3_512),
            0x08 => Some(HashType::Crc32),
            0x09 => Some(HashType::Crc64),
            _ => None,
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            HashType::Sha256 | HashType::Blake3 | HashType::Blake2s | HashType::Sha3_256 => 32,
            HashType::Sha512 | HashType::Blake2b | HashType::Sha3_512 => 64,
            HashType::Xxh3 | HashType::Crc64 => 8,
            HashType::Crc32 => 4,
        }
    }
}

/// What a stored hash is for.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashPurpose {
    ContentVerification = 0x00,
    Deduplication = 0x01,
    Integrity = 0x02,
    FastLookup = 0x03,
    ErrorDetection = 0x04,
}

impl HashPurpose {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(HashPurpose::ContentVerification),
            0x01 => Some(HashPurpose::Deduplication),
            0x02 => Some(HashPurpose::Integrity),
            0x03 => Some(HashPurpose::FastLookup),
            0x04 => Some(HashPurpose::ErrorDetection),
            _ => None,
        }
    }
}

/// One hash record in a file entry's hash section.
///
/// Layout: HashType (1) + HashPurpose (1) + HashLength (2) + data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashEntry {
    pub hash_type: HashType,
    pub hash_purpose: HashPurpose,
    pub data: Vec<u8>,
}

impl HashEntry {
    pub fn new(hash_type: HashType, hash_purpose: HashPurpose, data: Vec<u8>) -> Self {
        HashEntry {
            hash_type,
            hash_purpose,
            data,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.data.is_empty() {
            return Err(NovusError::format("hash data cannot be empty", 0));
        }
        if self.data.len() != self.hash_type.digest_len() {
            return Err(NovusError::format(
                format!(
                    "hash data length {} does not match {:?} digest length {}",
                    self.data.len(),
                    self.hash_type,
                    self.hash_type.digest_len()
                ),
                0,
            ));
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        4 + self.data.len()
    }

    pub fn encode(&self, w: &mut Writer) {
        w.u8(self.hash_type as u8);
        w.u8(self.hash_purpose as u8);
        w.u16(self.data.len() as u16);
        w.bytes(&self.data);
    }

    pub fn decode(r: &mut Reader) -> Result<Self> {
        let offset = r.offset();
        let type_raw = r.u8("HashType")?;
        let hash_type = HashType::from_u8(type_raw).ok_or(NovusError::Unsupported {
            what: "hash type",
            value: type_raw as u32,
        })?;
        let purpose_raw = r.u8("HashPurpose")?;
        let hash_purpose = HashPurpose::from_u8(purpose_raw).ok_or(NovusError::Unsupported {
            what: "hash purpose",
            value: purpose_raw as u32,
        })?;
        let len = r.u16("HashLength")? as usize;
        let data = r.bytes(len, "HashData")?;
        let entry = HashEntry {
            hash_type,
            hash_purpose,
            data,
        };
        entry.validate().map_err(|_| {
            NovusError::format(
                format!("hash entry length inconsistent with {:?}", hash_type),
                offset,
            )
        })?;
        Ok(entry)
    }
}

/// Compute a digest with one of the built-in algorithms.
///
/// BLAKE2 and SHA-3 variants are valid on-disk constants but have no built-in
/// implementation; they report `Unsupported` so callers can fall back or fail
/// cleanly.
pub fn compute_hash(hash_type: HashType, data: &[u8]) -> Result<Vec<u8>> {
    match hash_type {
        HashType::Sha256 => Ok(Sha256::digest(data).to_vec()),
        HashType::Sha512 => Ok(Sha512::digest(data).to_vec()),
        HashType::Blake3 => Ok(blake3::hash(data).as_bytes().to_vec()),
        HashType::Xxh3 => Ok(xxhash_rust::xxh3::xxh3_64(data).to_le_bytes().to_vec()),
        HashType::Crc32 => Ok(crc32(data).to_le_bytes().to_vec()),
        other => Err(NovusError::Unsupported {
            what: "hash type",
            value: other as u32,
        }),
    }
}

/// CRC32 fast path used for Raw/Stored checksums.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Streaming CRC32 over chunked input.
pub struct Crc32Stream {
    hasher: crc32fast::Hasher,
}

impl Crc32Stream {
    pub fn new() -> Self {
        Crc32Stream {
            hasher: crc32fast::Hasher::new(),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl Default for Crc32Stream {
    fn default() -> Self {
        Self::new()
    }
}
