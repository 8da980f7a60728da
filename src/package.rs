//! Top-level package API.
//!
//! A `Package` is a handle to one archive on disk. Handles come in two
//! capabilities: `ReadWrite` handles may mutate, `ReadOnly` handles reject
//! every mutating call with a `Security` error before touching anything.
//! Metadata (header, index, comment, signatures) lives behind a `RwLock`
//! so listings and lookups share access; the file handle is seek-based and
//! serialized behind its own `Mutex`.
//!
//! The add pipeline stages content, compresses when beneficial, encrypts
//! when asked, computes checksums, and probes the dedup table before
//! storing anything. Writes land in the data region immediately; tail
//! sections (index, comment, signatures) and the final header are
//! persisted by [`crate::writer`] at commit time.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::buffer_pool::BufferPool;
use crate::checksum::{stored_checksum, ChecksumEngine, DedupMatch};
use crate::comment::PackageComment;
use crate::compression::{self, CompressionConfig, CompressionType};
use crate::encryption::{CryptoProvider, CryptoRegistry, EncryptionType, KeyRef};
use crate::entry::{FileEntry, OptionalDataEntry, OptionalDataKind, PathEntry, ENTRY_FIXED_SIZE};
use crate::error::{NovusError, Result};
use crate::file_info::{FileFilter, FileInfo};
use crate::hash::{compute_hash, Crc32Stream, HashEntry, HashPurpose, HashType};
use crate::header::{
    Header, FLAG_HAS_COMPRESSED_FILES, FLAG_HAS_ENCRYPTED_FILES, FLAG_HAS_PACKAGE_COMMENT,
    FLAG_HAS_PER_FILE_TAGS, FLAG_HAS_SIGNATURES, FLAG_HAS_SPECIAL_METADATA, HEADER_SIZE,
};
use crate::index::FileIndex;
use crate::io::PackageFile;
use crate::signature::{verify_all, Signature, SignatureBlock, SignatureType, SignatureVerifier, TrustLevel};
use crate::worker_pool::{Job, WorkerPool, WorkerPoolConfig};

/// Files at or above this size hash on the worker pool.
const PARALLEL_HASH_THRESHOLD: usize = 1 << 20;

/// Handle capability. Decided at open time, never widened later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

/// Options for adding a file.
#[derive(Clone)]
pub struct AddFileOptions {
    pub compression: CompressionConfig,
    /// Encrypt with the named key. Encrypted files never deduplicate.
    pub encryption: Option<KeyRef>,
    pub file_type: u16,
    /// Tag blob stored as optional data.
    pub tags: Option<Vec<u8>>,
}

impl Default for AddFileOptions {
    fn default() -> Self {
        AddFileOptions {
            compression: CompressionConfig::default(),
            encryption: None,
            file_type: 0,
            tags: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct PackageState {
    pub(crate) header: Header,
    pub(crate) index: FileIndex,
    pub(crate) comment: PackageComment,
    pub(crate) signatures: SignatureBlock,
    pub(crate) engine: ChecksumEngine,
    pub(crate) crypto: CryptoRegistry,
    /// End of the data region: where the next entry record goes and where
    /// the index will be written at commit.
    pub(crate) data_end: u64,
    pub(crate) dirty: bool,
}

/// Handle to one package archive.
#[derive(Debug)]
pub struct Package {
    mode: AccessMode,
    pub(crate) state: RwLock<PackageState>,
    pub(crate) file: Mutex<PackageFile>,
    /// Scratch buffers for checksum and copy loops.
    pub(crate) buffers: BufferPool,
    /// Chunk transform workers for large-file hashing.
    workers: WorkerPool,
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

impl Package {
    /// Create a new empty package at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut header = Header::new();
        header.created_time = now_nanos();
        header.modified_time = header.created_time;
        header.index_start = HEADER_SIZE as u64;

        let file = PackageFile::create(&path, &header)?;
        info!(path = %path.as_ref().display(), "created package");

        Ok(Package {
            mode: AccessMode::ReadWrite,
            state: RwLock::new(PackageState {
                header,
                index: FileIndex::new(),
                comment: PackageComment::new(),
                signatures: SignatureBlock::new(),
                engine: ChecksumEngine::new(),
                crypto: CryptoRegistry::new(),
                data_end: HEADER_SIZE as u64,
                dirty: true,
            }),
            file: Mutex::new(file),
            buffers: BufferPool::default(),
            workers: WorkerPool::new(WorkerPoolConfig::default()),
        })
    }

    /// Open an existing package for reading and writing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = PackageFile::open(&path)?;
        Self::load(file, AccessMode::ReadWrite)
    }

    /// Open an existing package read-only. Every mutating call on the
    /// returned handle fails with `Security`.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = PackageFile::open_read_only(&path)?;
        Self::load(file, AccessMode::ReadOnly)
    }

    fn load(mut file: PackageFile, mode: AccessMode) -> Result<Self> {
        let header = file.read_header()?;
        header.validate()?;

        // Every tail-section extent is bounds-checked against the real file
        // length before any offset arithmetic, so a corrupt header fails
        // with Format instead of an overflow or a short read.
        let file_len = file.len()?;
        Self::check_extent("index", header.index_start, header.index_size, file_len)?;
        Self::check_extent(
            "comment",
            header.comment_start,
            header.comment_size as u64,
            file_len,
        )?;
        if header.is_signed() && header.signature_offset >= file_len {
            return Err(NovusError::format(
                format!(
                    "signature block starts at {} but file is {} bytes",
                    header.signature_offset, file_len
                ),
                header.signature_offset,
            ));
        }

        let mut index = FileIndex::new();
        let mut engine = ChecksumEngine::new();

        if header.index_size > 0 {
            let table = file.read_at(header.index_start, header.index_size as usize)?;
            let (records, first_entry_offset) =
                FileIndex::decode_table(&table, header.index_start)?;
            index.set_first_entry_offset(first_entry_offset);

            for (file_id, offset) in records {
                let (entry, record_len) = Self::read_entry_at(&mut file, offset)?;
                if entry.file_id != file_id {
                    return Err(NovusError::format(
                        format!(
                            "index says file {} at offset {}, entry says file {}",
                            file_id, offset, entry.file_id
                        ),
                        offset,
                    ));
                }
                engine.register(&entry);
                index.add_entry(entry, offset, offset + record_len as u64)?;
            }
        }

        let mut comment = PackageComment::new();
        if header.comment_size > 0 {
            let bytes = file.read_at(header.comment_start, header.comment_size as usize)?;
            comment = PackageComment::from_bytes(&bytes, header.comment_start)?;
        }

        let mut signatures = SignatureBlock::new();
        if header.is_signed() {
            let size = (file_len - header.signature_offset) as usize;
            let bytes = file.read_at(header.signature_offset, size)?;
            signatures = SignatureBlock::from_bytes(&bytes, header.signature_offset)?;
        }

        let data_end = header.index_start;
        debug!(
            files = index.len(),
            signatures = signatures.len(),
            "opened package"
        );

        Ok(Package {
            mode,
            state: RwLock::new(PackageState {
                header,
                index,
                comment,
                signatures,
                engine,
                crypto: CryptoRegistry::new(),
                data_end,
                dirty: false,
            }),
            file: Mutex::new(file),
            buffers: BufferPool::default(),
            workers: WorkerPool::new(WorkerPoolConfig::default()),
        })
    }

    /// Reject a section whose declared extent overflows u64 or crosses the
    /// end of the file. A zero-size section is never read, so it passes.
    fn check_extent(section: &str, start: u64, size: u64, file_len: u64) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        let end = start.checked_add(size).ok_or_else(|| {
            NovusError::format(
                format!("{} extent {}+{} overflows", section, start, size),
                start,
            )
        })?;
        if end > file_len {
            return Err(NovusError::format(
                format!(
                    "{} spans {}..{} but file is {} bytes",
                    section, start, end, file_len
                ),
                start,
            ));
        }
        Ok(())
    }

    /// Decode one entry record. The 64-byte prefix carries every section
    /// length, so two reads suffice regardless of record size.
    fn read_entry_at(file: &mut PackageFile, offset: u64) -> Result<(FileEntry, usize)> {
        let prefix = file.read_at(offset, ENTRY_FIXED_SIZE)?;
        let paths_size = u32::from_le_bytes(prefix[48..52].try_into().unwrap()) as usize;
        let hash_size = u16::from_le_bytes(prefix[52..54].try_into().unwrap()) as usize;
        let optional_size = u16::from_le_bytes(prefix[54..56].try_into().unwrap()) as usize;

        let total = ENTRY_FIXED_SIZE + paths_size + hash_size + optional_size;
        let bytes = file.read_at(offset, total)?;
        let (entry, consumed) = FileEntry::from_bytes(&bytes, offset)?;
        Ok((entry, consumed))
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.mode == AccessMode::ReadOnly {
            return Err(NovusError::security(
                "operation requires a writable package handle",
            ));
        }
        Ok(())
    }

    /// Register an encryption/decryption provider for this handle.
    pub fn register_provider(&self, provider: Box<dyn CryptoProvider>) {
        self.state.write().crypto.register(provider);
    }

    // ---- file operations ----

    /// Add a file from an in-memory buffer. Content is staged, compressed
    /// when beneficial, encrypted when requested, checksummed, and checked
    /// against the dedup table before new bytes are stored. Returns the
    /// FileID, which is the existing file's ID when content deduplicated.
    pub fn add_file_from_memory(
        &self,
        path: &str,
        data: &[u8],
        options: &AddFileOptions,
    ) -> Result<u64> {
        self.check_writable()?;
        let mut state = self.state.write();
        let mut file = self.file.lock();

        if state.index.find_by_path(path).is_some() {
            return Err(NovusError::security(format!(
                "path {:?} already exists in package",
                path
            )));
        }

        let staged = state.engine.stage(data.to_vec());
        let encrypt = options.encryption.is_some();

        // Dedup probe with byte-level confirmation.
        let dedup = {
            let index = &state.index;
            let crypto = &state.crypto;
            state.engine.find_duplicate(&staged, encrypt, |candidate_id| {
                Self::read_content(index, crypto, &mut file, candidate_id, None)
            })?
        };
        if let DedupMatch::Duplicate { file_id } = dedup {
            debug!(path, file_id, "content deduplicated, adding path alias");
            let entry = state
                .index
                .find_by_id_mut(file_id)
                .ok_or_else(|| NovusError::format(format!("unknown file ID {}", file_id), 0))?;
            let mut path_entry = PathEntry::new(path);
            path_entry.mod_time = now_nanos();
            entry.add_path(path_entry)?;
            state.index.reindex_paths(file_id)?;
            Self::relocate_entry(&mut state, &mut file, file_id)?;
            state.dirty = true;
            return Ok(file_id);
        }

        // Transform pipeline: compress, then encrypt.
        let (mut stored, method) = compression::compress_if_beneficial(data, &options.compression)?;
        let mut encryption_type = EncryptionType::None;
        if let Some(key_ref) = &options.encryption {
            let provider = state.crypto.provider(EncryptionType::Aes256Gcm)?;
            let (ciphertext, _metadata) = provider.encrypt(&stored, key_ref)?;
            stored = ciphertext;
            encryption_type = EncryptionType::Aes256Gcm;
        }

        let file_id = state.index.allocate_file_id();
        let mut entry = FileEntry::new(file_id);
        entry.original_size = staged.original_size;
        entry.stored_size = stored.len() as u64;
        entry.raw_checksum = staged.raw_checksum;
        entry.stored_checksum = stored_checksum(&stored);
        entry.file_type = options.file_type;
        entry.compression_type = method;
        entry.compression_level = if method == CompressionType::Zstd {
            options.compression.level as u8
        } else {
            0
        };
        entry.encryption_type = encryption_type;
        entry.hashes = if data.len() >= PARALLEL_HASH_THRESHOLD {
            self.hash_parallel(data)?
        } else {
            state.engine.hash_entries(data)?
        };
        if let Some(tags) = &options.tags {
            entry
                .optional_data
                .push(OptionalDataEntry::new(OptionalDataKind::Tags, tags.clone()));
        }
        let mut path_entry = PathEntry::new(path);
        path_entry.mod_time = now_nanos();
        path_entry.create_time = path_entry.mod_time;
        entry.add_path(path_entry)?;

        // Persist [record][stored data] at the end of the data region.
        let record = entry.to_bytes()?;
        let offset = state.data_end;
        file.write_at(offset, &record)?;
        file.write_at(offset + record.len() as u64, &stored)?;
        state.data_end = offset + record.len() as u64 + stored.len() as u64;

        state.engine.register(&entry);
        state
            .index
            .add_entry(entry, offset, offset + record.len() as u64)?;
        if state.index.len() == 1 {
            state.index.set_first_entry_offset(offset);
        }
        state.dirty = true;
        debug!(path, file_id, stored = stored.len(), "added file");
        Ok(file_id)
    }

    /// Read a file's content by path. Encrypted files need
    /// [`Package::read_file_with_key`].
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let state = self.state.read();
        let entry = state
            .index
            .find_by_path(path)
            .ok_or_else(|| NovusError::format(format!("no file at path {:?}", path), 0))?;
        let id = entry.file_id;
        drop(state);
        self.read_file_by_id(id)
    }

    /// Read a file's content by FileID.
    pub fn read_file_by_id(&self, file_id: u64) -> Result<Vec<u8>> {
        let state = self.state.read();
        let mut file = self.file.lock();
        Self::read_content(&state.index, &state.crypto, &mut file, file_id, None)
    }

    /// Read an encrypted file, decrypting with the named key.
    pub fn read_file_with_key(&self, path: &str, key_ref: &KeyRef) -> Result<Vec<u8>> {
        let state = self.state.read();
        let entry = state
            .index
            .find_by_path(path)
            .ok_or_else(|| NovusError::format(format!("no file at path {:?}", path), 0))?;
        let id = entry.file_id;
        let mut file = self.file.lock();
        Self::read_content(&state.index, &state.crypto, &mut file, id, Some(key_ref))
    }

    /// Compute the standard dedup and verification hashes on the worker
    /// pool. Worth the fanout only for large content.
    fn hash_parallel(&self, data: &[u8]) -> Result<Vec<HashEntry>> {
        let shared = Arc::new(data.to_vec());
        let jobs: Vec<Job> = [HashType::Blake3, HashType::Sha256]
            .into_iter()
            .map(|hash_type| {
                let shared = Arc::clone(&shared);
                Box::new(move || compute_hash(hash_type, &shared)) as Job
            })
            .collect();
        let mut results = self.workers.run_ordered(jobs, None)?;
        let sha256 = results.pop().unwrap_or_default();
        let blake3 = results.pop().unwrap_or_default();
        Ok(vec![
            HashEntry::new(HashType::Blake3, HashPurpose::Deduplication, blake3),
            HashEntry::new(HashType::Sha256, HashPurpose::ContentVerification, sha256),
        ])
    }

    /// Decode, decrypt, decompress, and verify one file's content.
    fn read_content(
        index: &FileIndex,
        crypto: &CryptoRegistry,
        file: &mut PackageFile,
        file_id: u64,
        key_ref: Option<&KeyRef>,
    ) -> Result<Vec<u8>> {
        let entry = index
            .find_by_id(file_id)
            .ok_or_else(|| NovusError::format(format!("unknown file ID {}", file_id), 0))?;
        let data_offset = index
            .data_offset_of(file_id)
            .ok_or_else(|| NovusError::format(format!("unknown file ID {}", file_id), 0))?;
        let stored = file.read_at(data_offset, entry.stored_size as usize)?;

        if stored_checksum(&stored) != entry.stored_checksum {
            return Err(NovusError::integrity(format!(
                "stored checksum mismatch for file {}",
                file_id
            )));
        }

        let mut content = stored;
        if entry.is_encrypted() {
            let key_ref = key_ref.ok_or_else(|| {
                NovusError::security(format!("file {} is encrypted, key required", file_id))
            })?;
            let provider = crypto.provider(entry.encryption_type)?;
            content = provider.decrypt(&content, key_ref, &[])?;
        }
        if entry.is_compressed() {
            content =
                compression::decompress(&content, entry.compression_type, entry.original_size)?;
        }

        if content.len() as u64 != entry.original_size {
            return Err(NovusError::integrity(format!(
                "file {} decoded to {} bytes, expected {}",
                file_id,
                content.len(),
                entry.original_size
            )));
        }
        if crate::hash::crc32(&content) != entry.raw_checksum {
            return Err(NovusError::integrity(format!(
                "raw checksum mismatch for file {}",
                file_id
            )));
        }
        Ok(content)
    }

    /// Rewrite a mutated entry record at the end of the data region,
    /// copying its stored bytes along. The old region becomes unused
    /// space until defragment. Needed because records are interleaved
    /// with data, which in-place tail rewrites never touch.
    fn relocate_entry(
        state: &mut PackageState,
        file: &mut PackageFile,
        file_id: u64,
    ) -> Result<()> {
        let entry = state
            .index
            .find_by_id(file_id)
            .ok_or_else(|| NovusError::format(format!("unknown file ID {}", file_id), 0))?;
        let old_data_offset = state
            .index
            .data_offset_of(file_id)
            .ok_or_else(|| NovusError::format(format!("unknown file ID {}", file_id), 0))?;
        let stored = file.read_at(old_data_offset, entry.stored_size as usize)?;
        let record = entry.to_bytes()?;

        let offset = state.data_end;
        file.write_at(offset, &record)?;
        file.write_at(offset + record.len() as u64, &stored)?;
        state.data_end = offset + record.len() as u64 + stored.len() as u64;
        state
            .index
            .set_offsets(file_id, offset, offset + record.len() as u64)?;
        Ok(())
    }

    /// Remove a file. The entry leaves the index; its on-disk bytes stay
    /// behind as unused space until defragment.
    pub fn remove_file(&self, path: &str) -> Result<u64> {
        self.check_writable()?;
        let mut state = self.state.write();
        let file_id = state
            .index
            .find_by_path(path)
            .map(|e| e.file_id)
            .ok_or_else(|| NovusError::format(format!("no file at path {:?}", path), 0))?;
        let entry = state.index.remove_entry(file_id)?;
        state.engine.unregister(&entry);
        state.dirty = true;
        info!(path, file_id, "removed file");
        Ok(file_id)
    }

    /// Add a path alias to an existing file.
    pub fn add_path(&self, file_id: u64, path: &str) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        let mut file = self.file.lock();
        if state.index.find_by_path(path).is_some() {
            return Err(NovusError::security(format!(
                "path {:?} already exists in package",
                path
            )));
        }
        let entry = state
            .index
            .find_by_id_mut(file_id)
            .ok_or_else(|| NovusError::format(format!("unknown file ID {}", file_id), 0))?;
        let mut path_entry = PathEntry::new(path);
        path_entry.mod_time = now_nanos();
        entry.add_path(path_entry)?;
        state.index.reindex_paths(file_id)?;
        Self::relocate_entry(&mut state, &mut file, file_id)?;
        state.dirty = true;
        Ok(())
    }

    /// Remove a path alias. The last path of a file cannot be removed.
    pub fn remove_path(&self, path: &str) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        let mut file = self.file.lock();
        let file_id = state
            .index
            .find_by_path(path)
            .map(|e| e.file_id)
            .ok_or_else(|| NovusError::format(format!("no file at path {:?}", path), 0))?;
        let entry = state
            .index
            .find_by_id_mut(file_id)
            .ok_or_else(|| NovusError::format(format!("unknown file ID {}", file_id), 0))?;
        entry.remove_path(path)?;
        state.index.reindex_paths(file_id)?;
        Self::relocate_entry(&mut state, &mut file, file_id)?;
        state.dirty = true;
        Ok(())
    }

    /// List files as read-only snapshots, optionally filtered. Touches no
    /// stored data.
    pub fn list_files(&self, filter: Option<&FileFilter>) -> Vec<FileInfo> {
        self.state.read().index.list_files(filter)
    }

    pub fn find_by_path(&self, path: &str) -> Option<FileInfo> {
        self.state.read().index.find_by_path(path).map(FileInfo::from)
    }

    pub fn find_by_id(&self, file_id: u64) -> Option<FileInfo> {
        self.state.read().index.find_by_id(file_id).map(FileInfo::from)
    }

    pub fn file_count(&self) -> usize {
        self.state.read().index.len()
    }

    // ---- comment ----

    pub fn comment(&self) -> String {
        self.state.read().comment.comment.clone()
    }

    pub fn set_comment(&self, text: &str) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        state.comment.set(text)?;
        state.dirty = true;
        Ok(())
    }

    pub fn clear_comment(&self) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        state.comment.clear();
        state.dirty = true;
        Ok(())
    }

    // ---- identity ----

    pub fn vendor_id(&self) -> u32 {
        self.state.read().header.vendor_id
    }

    pub fn app_id(&self) -> u64 {
        self.state.read().header.app_id
    }

    pub fn set_identity(&self, vendor_id: u32, app_id: u64, creator_id: u32) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        state.header.vendor_id = vendor_id;
        state.header.app_id = app_id;
        state.header.creator_id = creator_id;
        state.dirty = true;
        Ok(())
    }

    /// Multi-part archive identity: (chain ID, part, total parts).
    pub fn archive_identity(&self) -> (u64, u16, u16) {
        let state = self.state.read();
        (
            state.header.archive_chain_id,
            state.header.archive_part(),
            state.header.archive_total_parts(),
        )
    }

    pub fn set_archive_identity(&self, chain_id: u64, part: u16, total: u16) -> Result<()> {
        self.check_writable()?;
        if part == 0 || total == 0 || part > total {
            return Err(NovusError::format(
                format!("invalid archive part {}/{}", part, total),
                0,
            ));
        }
        let mut state = self.state.write();
        state.header.archive_chain_id = chain_id;
        state.header.set_archive_part_info(part, total);
        state.dirty = true;
        Ok(())
    }

    // ---- signatures ----

    /// Append a signature. The block is append-only; earlier signatures
    /// are never modified.
    pub fn sign(&self, signature_type: SignatureType, data: Vec<u8>, comment: &str) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        let sig = Signature::new(signature_type, data).with_comment(comment);
        state.signatures.add(sig)?;
        state.header.set_feature(FLAG_HAS_SIGNATURES);
        state.dirty = true;
        info!(?signature_type, "signature appended");
        Ok(())
    }

    pub fn signature_count(&self) -> usize {
        self.state.read().signatures.len()
    }

    /// Verify every signature against the signed byte range (everything
    /// before the signature block).
    pub fn verify_signatures(
        &self,
        verifiers: &[Box<dyn SignatureVerifier>],
    ) -> Result<Vec<(SignatureType, TrustLevel)>> {
        let state = self.state.read();
        if state.signatures.is_empty() {
            return Ok(Vec::new());
        }
        if state.header.signature_offset == 0 {
            return Err(NovusError::security(
                "signatures not yet committed to disk",
            ));
        }
        let mut file = self.file.lock();
        let signed = file.read_at(0, state.header.signature_offset as usize)?;
        verify_all(&state.signatures, verifiers, &signed)
    }

    // ---- package checksum ----

    /// Verify the package CRC recorded at the last commit. Covers every
    /// byte between the header and the signature block; signatures can be
    /// appended without invalidating it.
    pub fn verify_package_crc(&self) -> Result<()> {
        let state = self.state.read();
        let expected = state.header.package_crc;
        if expected == 0 {
            return Ok(());
        }
        let mut file = self.file.lock();
        let end = if state.header.signature_offset > 0 {
            state.header.signature_offset
        } else {
            file.len()?
        };
        let mut stream = Crc32Stream::new();
        let mut buf = self.buffers.checkout(64 * 1024);
        buf.resize(64 * 1024, 0);
        let mut offset = HEADER_SIZE as u64;
        while offset < end {
            let chunk = (end - offset).min(64 * 1024) as usize;
            file.read_into(offset, &mut buf[..chunk])?;
            stream.update(&buf[..chunk]);
            offset += chunk as u64;
        }
        self.buffers.checkin(buf);
        let actual = stream.finalize();
        if actual != expected {
            warn!(expected, actual, "package checksum mismatch");
            return Err(NovusError::integrity("package checksum mismatch"));
        }
        Ok(())
    }

    /// Recompute header flags from current contents. Called at commit.
    pub(crate) fn refresh_flags(state: &mut PackageState) {
        let mut compressed = false;
        let mut encrypted = false;
        let mut tagged = false;
        let mut special = false;
        for entry in state.index.entries() {
            compressed |= entry.is_compressed();
            encrypted |= entry.is_encrypted();
            tagged |= entry.has_tags();
            special |= entry.is_special_metadata();
        }
        for (flag, on) in [
            (FLAG_HAS_COMPRESSED_FILES, compressed),
            (FLAG_HAS_ENCRYPTED_FILES, encrypted),
            (FLAG_HAS_PER_FILE_TAGS, tagged),
            (FLAG_HAS_SPECIAL_METADATA, special),
            (FLAG_HAS_PACKAGE_COMMENT, !state.comment.is_empty()),
            (FLAG_HAS_SIGNATURES, !state.signatures.is_empty()),
        ] {
            if on {
                state.header.set_feature(flag);
            } else {
                state.header.clear_feature(flag);
            }
        }
        state.header.modified_time = now_nanos();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::AesGcmProvider;
    use tempfile::tempdir;

    fn new_package(dir: &tempfile::TempDir) -> Package {
        Package::create(dir.path().join("test.nvpk")).unwrap()
    }

    #[test]
    fn test_add_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let pkg = new_package(&dir);

        let data = b"The quick brown fox jumps over the lazy dog. ".repeat(50);
        let id = pkg
            .add_file_from_memory("docs/fox.txt", &data, &AddFileOptions::default())
            .unwrap();
        assert_eq!(id, 1);

        let read = pkg.read_file("docs/fox.txt").unwrap();
        assert_eq!(read, data);

        let info = pkg.find_by_id(1).unwrap();
        assert!(info.is_compressed());
        assert!(info.stored_size < info.original_size);
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.nvpk");
        {
            let pkg = Package::create(&path).unwrap();
            pkg.add_file_from_memory("a.txt", b"data", &AddFileOptions::default())
                .unwrap();
            crate::writer::commit(&pkg, crate::writer::WriteStrategy::Safe, None).unwrap();
        }

        let pkg = Package::open_read_only(&path).unwrap();
        assert_eq!(pkg.mode(), AccessMode::ReadOnly);
        assert_eq!(pkg.read_file("a.txt").unwrap(), b"data");

        let err = pkg
            .add_file_from_memory("b.txt", b"x", &AddFileOptions::default())
            .unwrap_err();
        assert!(matches!(err, NovusError::Security(_)));
        assert!(pkg.remove_file("a.txt").is_err());
        assert!(pkg.set_comment("nope").is_err());
        assert!(pkg.set_identity(1, 2, 3).is_err());
    }

    #[test]
    fn test_duplicate_content_shares_entry() {
        let dir = tempdir().unwrap();
        let pkg = new_package(&dir);

        let data = b"identical payload".repeat(100);
        let first = pkg
            .add_file_from_memory("one.bin", &data, &AddFileOptions::default())
            .unwrap();
        let second = pkg
            .add_file_from_memory("two.bin", &data, &AddFileOptions::default())
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(pkg.file_count(), 1);
        let info = pkg.find_by_id(first).unwrap();
        assert_eq!(info.paths, vec!["one.bin", "two.bin"]);
        assert_eq!(pkg.read_file("two.bin").unwrap(), data);
    }

    #[test]
    fn test_encrypted_files_do_not_dedup() {
        let dir = tempdir().unwrap();
        let pkg = new_package(&dir);

        let mut provider = AesGcmProvider::new();
        let key_ref = KeyRef::new("k1");
        provider.add_key(key_ref.clone(), AesGcmProvider::generate_key());
        pkg.register_provider(Box::new(provider));

        let data = b"secret payload".repeat(100);
        let opts = AddFileOptions {
            encryption: Some(key_ref.clone()),
            ..Default::default()
        };
        let a = pkg.add_file_from_memory("a.enc", &data, &opts).unwrap();
        let b = pkg.add_file_from_memory("b.enc", &data, &opts).unwrap();
        assert_ne!(a, b);

        // Plain read refuses; keyed read succeeds.
        assert!(matches!(
            pkg.read_file("a.enc").unwrap_err(),
            NovusError::Security(_)
        ));
        assert_eq!(pkg.read_file_with_key("a.enc", &key_ref).unwrap(), data);
    }

    #[test]
    fn test_remove_file_is_tombstone() {
        let dir = tempdir().unwrap();
        let pkg = new_package(&dir);

        pkg.add_file_from_memory("gone.txt", b"bye", &AddFileOptions::default())
            .unwrap();
        pkg.remove_file("gone.txt").unwrap();

        assert_eq!(pkg.file_count(), 0);
        assert!(pkg.read_file("gone.txt").is_err());

        // IDs are never reused.
        let next = pkg
            .add_file_from_memory("new.txt", b"hi", &AddFileOptions::default())
            .unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn test_path_aliases() {
        let dir = tempdir().unwrap();
        let pkg = new_package(&dir);

        let id = pkg
            .add_file_from_memory("m/b.txt", b"content", &AddFileOptions::default())
            .unwrap();
        pkg.add_path(id, "m/a.txt").unwrap();

        let info = pkg.find_by_id(id).unwrap();
        assert_eq!(info.primary_path, "m/a.txt");
        assert_eq!(pkg.read_file("m/a.txt").unwrap(), b"content");

        pkg.remove_path("m/a.txt").unwrap();
        assert!(pkg.find_by_path("m/a.txt").is_none());
        assert!(pkg.find_by_path("m/b.txt").is_some());

        // Last path is protected.
        assert!(pkg.remove_path("m/b.txt").is_err());
    }

    #[test]
    fn test_comment_and_identity() {
        let dir = tempdir().unwrap();
        let pkg = new_package(&dir);

        pkg.set_comment("Game assets v2").unwrap();
        assert_eq!(pkg.comment(), "Game assets v2");
        pkg.clear_comment().unwrap();
        assert_eq!(pkg.comment(), "");

        pkg.set_identity(crate::header::vendor::STEAM, 440, 9).unwrap();
        assert_eq!(pkg.vendor_id(), crate::header::vendor::STEAM);
        assert_eq!(pkg.app_id(), 440);
    }

    #[test]
    fn test_archive_identity_validation() {
        let dir = tempdir().unwrap();
        let pkg = new_package(&dir);

        pkg.set_archive_identity(99, 2, 3).unwrap();
        assert_eq!(pkg.archive_identity(), (99, 2, 3));

        assert!(pkg.set_archive_identity(99, 0, 3).is_err());
        assert!(pkg.set_archive_identity(99, 4, 3).is_err());
    }

    #[test]
    fn test_list_files_with_filter() {
        let dir = tempdir().unwrap();
        let pkg = new_package(&dir);

        pkg.add_file_from_memory("a.txt", &b"A".repeat(5000), &AddFileOptions::default())
            .unwrap();
        let opts = AddFileOptions {
            compression: CompressionConfig::none(),
            ..Default::default()
        };
        pkg.add_file_from_memory("b.txt", b"tiny", &opts).unwrap();

        assert_eq!(pkg.list_files(None).len(), 2);
        let filter = FileFilter {
            compressed: Some(true),
            ..Default::default()
        };
        let compressed = pkg.list_files(Some(&filter));
        assert_eq!(compressed.len(), 1);
        assert_eq!(compressed[0].primary_path, "a.txt");
    }
}
