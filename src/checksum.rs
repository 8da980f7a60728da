//! Checksum and deduplication engine.
//!
//! Content staged for a write gets a CRC32 raw checksum immediately. The
//! dedup table matches candidates by (raw checksum, original size) and then
//! confirms byte equality against the candidate's decoded content before
//! any sharing happens, so CRC collisions can never merge distinct files.
//! Encrypted entries never participate: a random nonce per file makes their
//! stored bytes unique by construction.

use std::collections::HashMap;

use crate::entry::FileEntry;
use crate::error::Result;
use crate::hash::{compute_hash, crc32, HashEntry, HashPurpose, HashType};

/// Content staged for writing, with its raw checksum precomputed.
#[derive(Debug, Clone)]
pub struct StagedContent {
    pub data: Vec<u8>,
    pub raw_checksum: u32,
    pub original_size: u64,
}

/// Key for the first-pass dedup probe. Cheap to compute, collision-prone,
/// never trusted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DedupKey {
    raw_checksum: u32,
    original_size: u64,
}

/// Outcome of a dedup probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMatch {
    /// No candidate matched; store the content fresh.
    Unique,
    /// Byte-identical to the named file; share its stored region.
    Duplicate { file_id: u64 },
}

/// Tracks staged checksums and candidate entries for deduplication.
#[derive(Debug, Default)]
pub struct ChecksumEngine {
    /// Candidates by (raw checksum, original size). Multiple IDs under one
    /// key are genuine CRC collisions kept apart by the byte comparison.
    candidates: HashMap<DedupKey, Vec<u64>>,
}

impl ChecksumEngine {
    pub fn new() -> Self {
        ChecksumEngine {
            candidates: HashMap::new(),
        }
    }

    /// Stage content: compute the raw checksum up front.
    pub fn stage(&self, data: Vec<u8>) -> StagedContent {
        let raw_checksum = crc32(&data);
        let original_size = data.len() as u64;
        StagedContent {
            data,
            raw_checksum,
            original_size,
        }
    }

    /// Register a persisted entry as a future dedup candidate. Encrypted
    /// entries are skipped.
    pub fn register(&mut self, entry: &FileEntry) {
        if entry.is_encrypted() {
            return;
        }
        let key = DedupKey {
            raw_checksum: entry.raw_checksum,
            original_size: entry.original_size,
        };
        let ids = self.candidates.entry(key).or_default();
        if !ids.contains(&entry.file_id) {
            ids.push(entry.file_id);
        }
    }

    /// Drop a removed entry from the candidate table.
    pub fn unregister(&mut self, entry: &FileEntry) {
        let key = DedupKey {
            raw_checksum: entry.raw_checksum,
            original_size: entry.original_size,
        };
        if let Some(ids) = self.candidates.get_mut(&key) {
            ids.retain(|id| *id != entry.file_id);
            if ids.is_empty() {
                self.candidates.remove(&key);
            }
        }
    }

    /// Probe for a duplicate of the staged content. `load_content` decodes
    /// a candidate's raw bytes; the match is confirmed byte-for-byte.
    /// `encrypt` marks content headed for encryption, which is exempt from
    /// reuse.
    pub fn find_duplicate<F>(
        &self,
        staged: &StagedContent,
        encrypt: bool,
        mut load_content: F,
    ) -> Result<DedupMatch>
    where
        F: FnMut(u64) -> Result<Vec<u8>>,
    {
        if encrypt {
            return Ok(DedupMatch::Unique);
        }
        let key = DedupKey {
            raw_checksum: staged.raw_checksum,
            original_size: staged.original_size,
        };
        let Some(ids) = self.candidates.get(&key) else {
            return Ok(DedupMatch::Unique);
        };
        for &file_id in ids {
            let existing = load_content(file_id)?;
            if existing == staged.data {
                return Ok(DedupMatch::Duplicate { file_id });
            }
        }
        Ok(DedupMatch::Unique)
    }

    /// Build the standard hash entries for new content: a BLAKE3 dedup
    /// hash plus a SHA-256 verification hash.
    pub fn hash_entries(&self, data: &[u8]) -> Result<Vec<HashEntry>> {
        Ok(vec![
            HashEntry::new(
                HashType::Blake3,
                HashPurpose::Deduplication,
                compute_hash(HashType::Blake3, data)?,
            ),
            HashEntry::new(
                HashType::Sha256,
                HashPurpose::ContentVerification,
                compute_hash(HashType::Sha256, data)?,
            ),
        ])
    }
}

/// Checksum over bytes as persisted, after compression and encryption.
pub fn stored_checksum(stored: &[u8]) -> u32 {
    crc32(stored)
}
