//! File entries: the full on-disk record for one logical file.
//!
//! An entry is a 64-byte fixed prefix followed by variable-length data in a
//! fixed order: path entries, hash entries, optional data. The file's stored
//! bytes follow the entry record directly, so the data offset is the entry
//! offset plus the entry's total size.

use crate::codec::{Reader, Writer};
use crate::compression::CompressionType;
use crate::encryption::EncryptionType;
use crate::error::{NovusError, Result};
use crate::hash::HashEntry;

/// Size of the fixed prefix of a file entry.
pub const ENTRY_FIXED_SIZE: usize = 64;

/// File type ranges: 0-64999 content, 65000-65535 special metadata files.
pub const FILE_TYPE_SPECIAL_START: u16 = 65000;

/// One path alias with its filesystem metadata.
///
/// Layout: PathLength (u16) + UTF-8 path + Mode/UserID/GroupID (u32 each)
/// + ModTime/CreateTime/AccessTime (u64 each, Unix nanoseconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub path: String,
    pub mode: u32,
    pub user_id: u32,
    pub group_id: u32,
    pub mod_time: u64,
    pub create_time: u64,
    pub access_time: u64,
}

impl PathEntry {
    pub fn new(path: impl Into<String>) -> Self {
        PathEntry {
            path: path.into(),
            mode: 0o644,
            user_id: 0,
            group_id: 0,
            mod_time: 0,
            create_time: 0,
            access_time: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(NovusError::format("path cannot be empty", 0));
        }
        if self.path.len() > u16::MAX as usize {
            return Err(NovusError::format("path exceeds maximum length", 0));
        }
        if self.path.contains('\0') {
            return Err(NovusError::security("path must not contain null bytes"));
        }
        Ok(())
    }

    /// Encoded size: length prefix + path bytes + 36 bytes of metadata.
    pub fn size(&self) -> usize {
        2 + self.path.len() + 36
    }

    pub fn encode(&self, w: &mut Writer) {
        w.u16(self.path.len() as u16);
        w.bytes(self.path.as_bytes());
        w.u32(self.mode);
        w.u32(self.user_id);
        w.u32(self.group_id);
        w.u64(self.mod_time);
        w.u64(self.create_time);
        w.u64(self.access_time);
    }

    pub fn decode(r: &mut Reader) -> Result<Self> {
        let len = r.u16("PathLength")? as usize;
        let path = r.utf8(len, "Path")?;
        let entry = PathEntry {
            path,
            mode: r.u32("Mode")?,
            user_id: r.u32("UserID")?,
            group_id: r.u32("GroupID")?,
            mod_time: r.u64("ModTime")?,
            create_time: r.u64("CreateTime")?,
            access_time: r.u64("AccessTime")?,
        };
        entry.validate()?;
        Ok(entry)
    }
}

/// Kinds of optional data records attached to a file entry.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalDataKind {
    Tags = 0x00,
    PathEncoding = 0x01,
    PathFlags = 0x02,
    CompressionDictionary = 0x03,
    SolidGroupId = 0x04,
    FileSystemFlags = 0x05,
    WindowsAttributes = 0x06,
    ExtendedAttributes = 0x07,
    Acl = 0x08,
}

impl OptionalDataKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(OptionalDataKind::Tags),
            0x01 => Some(OptionalDataKind::PathEncoding),
            0x02 => Some(OptionalDataKind::PathFlags),
            0x03 => Some(OptionalDataKind::CompressionDictionary),
            0x04 => Some(OptionalDataKind::SolidGroupId),
            0x05 => Some(OptionalDataKind::FileSystemFlags),
            0x06 => Some(OptionalDataKind::WindowsAttributes),
            0x07 => Some(OptionalDataKind::ExtendedAttributes),
            0x08 => Some(OptionalDataKind::Acl),
            _ => None,
        }
    }
}

/// Type-tagged optional data blob: Kind (1) + Length (2) + data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalDataEntry {
    pub kind: OptionalDataKind,
    pub data: Vec<u8>,
}

impl OptionalDataEntry {
    pub fn new(kind: OptionalDataKind, data: Vec<u8>) -> Self {
        OptionalDataEntry { kind, data }
    }

    pub fn size(&self) -> usize {
        3 + self.data.len()
    }

    pub fn encode(&self, w: &mut Writer) {
        w.u8(self.kind as u8);
        w.u16(self.data.len() as u16);
        w.bytes(&self.data);
    }

    pub fn decode(r: &mut Reader) -> Result<Self> {
        let kind_raw = r.u8("DataType")?;
        let kind = OptionalDataKind::from_u8(kind_raw).ok_or(NovusError::Unsupported {
            what: "optional data type",
            value: kind_raw as u32,
        })?;
        let len = r.u16("DataLength")? as usize;
        let data = r.bytes(len, "OptionalData")?;
        Ok(OptionalDataEntry { kind, data })
    }
}

/// Full record for one logical file.
///
/// The fixed prefix orders fields largest-first within each group so the
/// layout stays aligned; the variable tail holds paths, hashes, and optional
/// data in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Unique, stable, sequentially assigned; never reused after removal.
    pub file_id: u64,
    /// Size before compression/encryption.
    pub original_size: u64,
    /// Size of the bytes actually persisted.
    pub stored_size: u64,
    /// CRC32 over decompressed/decrypted content.
    pub raw_checksum: u32,
    /// CRC32 over the persisted bytes.
    pub stored_checksum: u32,
    pub file_version: u32,
    pub metadata_version: u32,
    pub file_type: u16,
    pub compression_type: CompressionType,
    pub compression_level: u8,
    pub encryption_type: EncryptionType,
    /// Reserved, must be zero.
    pub reserved: u32,

    /// Lexicographically sorted; first element is the primary path.
    pub paths: Vec<PathEntry>,
    pub hashes: Vec<HashEntry>,
    pub optional_data: Vec<OptionalDataEntry>,
}

impl FileEntry {
    pub fn new(file_id: u64) -> Self {
        FileEntry {
            file_id,
            original_size: 0,
            stored_size: 0,
            raw_checksum: 0,
            stored_checksum: 0,
            file_version: 1,
            metadata_version: 1,
            file_type: 0,
            compression_type: CompressionType::None,
            compression_level: 0,
            encryption_type: EncryptionType::None,
            reserved: 0,
            paths: Vec::new(),
            hashes: Vec::new(),
            optional_data: Vec::new(),
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compression_type != CompressionType::None
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption_type != EncryptionType::None
    }

    pub fn has_tags(&self) -> bool {
        self.optional_data
            .iter()
            .any(|o| o.kind == OptionalDataKind::Tags)
    }

    pub fn is_special_metadata(&self) -> bool {
        self.file_type >= FILE_TYPE_SPECIAL_START
    }

    /// Primary path: first element of the sorted paths array.
    pub fn primary_path(&self) -> Option<&str> {
        self.paths.first().map(|p| p.path.as_str())
    }

    /// Add a path alias, keeping the array sorted. Duplicate paths on the
    /// same entry are rejected.
    pub fn add_path(&mut self, entry: PathEntry) -> Result<()> {
        entry.validate()?;
        if self.paths.iter().any(|p| p.path == entry.path) {
            return Err(NovusError::security(format!(
                "path {:?} already present on file {}",
                entry.path, self.file_id
            )));
        }
        self.paths.push(entry);
        self.sort_paths();
        self.metadata_version += 1;
        Ok(())
    }

    /// Remove a path alias. The last path cannot be removed; remove the
    /// entry itself instead.
    pub fn remove_path(&mut self, path: &str) -> Result<()> {
        if self.paths.len() <= 1 {
            return Err(NovusError::security(format!(
                "cannot remove the last path of file {}",
                self.file_id
            )));
        }
        let before = self.paths.len();
        self.paths.retain(|p| p.path != path);
        if self.paths.len() == before {
            return Err(NovusError::format(
                format!("path {:?} not found on file {}", path, self.file_id),
                0,
            ));
        }
        self.metadata_version += 1;
        Ok(())
    }

    fn sort_paths(&mut self) {
        self.paths.sort_by(|a, b| a.path.cmp(&b.path));
    }

    pub fn validate(&self) -> Result<()> {
        if self.file_id == 0 {
            return Err(NovusError::format("file ID cannot be zero", 0));
        }
        if self.reserved != 0 {
            return Err(NovusError::format("entry reserved field must be zero", 0));
        }
        if self.paths.is_empty() {
            return Err(NovusError::format(
                format!("file {} has no paths", self.file_id),
                0,
            ));
        }
        if self.paths.len() > u16::MAX as usize {
            return Err(NovusError::format("too many paths", 0));
        }
        if self.hashes.len() > u8::MAX as usize {
            return Err(NovusError::format("too many hash entries", 0));
        }
        for path in &self.paths {
            path.validate()?;
        }
        for hash in &self.hashes {
            hash.validate()?;
        }
        if !self
            .paths
            .windows(2)
            .all(|pair| pair[0].path < pair[1].path)
        {
            return Err(NovusError::format(
                format!("paths of file {} are not sorted", self.file_id),
                0,
            ));
        }
        // Section byte sizes are encoded as u32/u16 fields in the fixed
        // prefix; reject anything that would silently truncate there.
        let paths_size: usize = self.paths.iter().map(|p| p.size()).sum();
        if paths_size > u32::MAX as usize {
            return Err(NovusError::format(
                format!("path section of file {} exceeds 4 GiB", self.file_id),
                0,
            ));
        }
        let hashes_size: usize = self.hashes.iter().map(|h| h.size()).sum();
        if hashes_size > u16::MAX as usize {
            return Err(NovusError::format(
                format!("hash section of file {} exceeds 64 KiB", self.file_id),
                0,
            ));
        }
        let optional_size: usize = self.optional_data.iter().map(|o| o.size()).sum();
        if optional_size > u16::MAX as usize {
            return Err(NovusError::format(
                format!("optional data of file {} exceeds 64 KiB", self.file_id),
                0,
            ));
        }
        Ok(())
    }

    pub fn fixed_size(&self) -> usize {
        ENTRY_FIXED_SIZE
    }

    pub fn variable_size(&self) -> usize {
        let paths: usize = self.paths.iter().map(|p| p.size()).sum();
        let hashes: usize = self.hashes.iter().map(|h| h.size()).sum();
        let optional: usize = self.optional_data.iter().map(|o| o.size()).sum();
        paths + hashes + optional
    }

    /// Total encoded size of the entry record (not including stored data).
    pub fn total_size(&self) -> usize {
        self.fixed_size() + self.variable_size()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;

        let paths_size: usize = self.paths.iter().map(|p| p.size()).sum();
        let hashes_size: usize = self.hashes.iter().map(|h| h.size()).sum();
        let optional_size: usize = self.optional_data.iter().map(|o| o.size()).sum();

        let mut w = Writer::with_capacity(self.total_size());
        w.u64(self.file_id);
        w.u64(self.original_size);
        w.u64(self.stored_size);
        w.u32(self.raw_checksum);
        w.u32(self.stored_checksum);
        w.u32(self.file_version);
        w.u32(self.metadata_version);
        w.u16(self.paths.len() as u16);
        w.u16(self.file_type);
        w.u8(self.compression_type as u8);
        w.u8(self.compression_level);
        w.u8(self.encryption_type as u8);
        w.u8(self.hashes.len() as u8);
        w.u32(paths_size as u32); // HashDataOffset
        w.u16(hashes_size as u16); // HashDataLen
        w.u16(optional_size as u16); // OptionalDataLen
        w.u32((paths_size + hashes_size) as u32); // OptionalDataOffset
        w.u32(self.reserved);
        debug_assert_eq!(w.len(), ENTRY_FIXED_SIZE);

        for path in &self.paths {
            path.encode(&mut w);
        }
        for hash in &self.hashes {
            hash.encode(&mut w);
        }
        for opt in &self.optional_data {
            opt.encode(&mut w);
        }
        Ok(w.into_vec())
    }

    /// Decode an entry from `bytes`, which must span at least the whole
    /// record. `base_offset` is the entry's absolute file offset for error
    /// context. Returns the entry and its encoded length.
    pub fn from_bytes(bytes: &[u8], base_offset: u64) -> Result<(Self, usize)> {
        let mut r = Reader::new(bytes, base_offset);

        let file_id = r.u64("FileID")?;
        let original_size = r.u64("OriginalSize")?;
        let stored_size = r.u64("StoredSize")?;
        let raw_checksum = r.u32("RawChecksum")?;
        let stored_checksum = r.u32("StoredChecksum")?;
        let file_version = r.u32("FileVersion")?;
        let metadata_version = r.u32("MetadataVersion")?;
        let path_count = r.u16("PathCount")?;
        let file_type = r.u16("FileType")?;
        let compression_raw = r.u8("CompressionType")?;
        let compression_type =
            CompressionType::from_u8(compression_raw).ok_or(NovusError::Unsupported {
                what: "compression type",
                value: compression_raw as u32,
            })?;
        let compression_level = r.u8("CompressionLevel")?;
        let encryption_raw = r.u8("EncryptionType")?;
        let encryption_type =
            EncryptionType::from_u8(encryption_raw).ok_or(NovusError::Unsupported {
                what: "encryption type",
                value: encryption_raw as u32,
            })?;
        let hash_count = r.u8("HashCount")?;
        let hash_data_offset = r.u32("HashDataOffset")?;
        let hash_data_len = r.u16("HashDataLen")?;
        let optional_data_len = r.u16("OptionalDataLen")?;
        let _optional_data_offset = r.u32("OptionalDataOffset")?;
        let reserved = r.u32("Reserved")?;

        let mut paths = Vec::with_capacity(path_count.min(256) as usize);
        for _ in 0..path_count {
            paths.push(PathEntry::decode(&mut r)?);
        }

        let paths_size: usize = paths.iter().map(|p| p.size()).sum();
        if hash_data_offset as usize != paths_size && hash_count > 0 {
            return Err(NovusError::format(
                format!(
                    "HashDataOffset {} does not match path section size {}",
                    hash_data_offset, paths_size
                ),
                base_offset,
            ));
        }

        let mut hashes = Vec::with_capacity(hash_count as usize);
        for _ in 0..hash_count {
            hashes.push(HashEntry::decode(&mut r)?);
        }
        let hashes_size: usize = hashes.iter().map(|h| h.size()).sum();
        if hash_count > 0 && hashes_size != hash_data_len as usize {
            return Err(NovusError::format(
                format!(
                    "hash section is {} bytes, header declares {}",
                    hashes_size, hash_data_len
                ),
                base_offset,
            ));
        }

        let mut optional_data = Vec::new();
        let mut optional_read = 0usize;
        while optional_read < optional_data_len as usize {
            let opt = OptionalDataEntry::decode(&mut r)?;
            optional_read += opt.size();
            optional_data.push(opt);
        }
        if optional_read != optional_data_len as usize {
            return Err(NovusError::format(
                format!(
                    "optional data section is {} bytes, header declares {}",
                    optional_read, optional_data_len
                ),
                base_offset,
            ));
        }

        let entry = FileEntry {
            file_id,
            original_size,
            stored_size,
            raw_checksum,
            stored_checksum,
            file_version,
            metadata_version,
            file_type,
            compression_type,
            compression_level,
            encryption_type,
            reserved,
            paths,
            hashes,
            optional_data,
        };
        entry.validate()?;
        let consumed = ENTRY_FIXED_SIZE + paths_size + hashes_size + optional_read;
        Ok((entry, consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{compute_hash, HashPurpose, HashType};

    fn sample_entry() -> FileEntry {
        let mut entry = FileEntry::new(7);
        entry.original_size = 10_000;
        entry.stored_size = 4_200;
        entry.raw_checksum = 0xAABBCCDD;
        entry.stored_checksum = 0x11223344;
        entry.compression_type = CompressionType::Zstd;
        entry.compression_level = 3;
        entry.add_path(PathEntry::new("assets/logo.png")).unwrap();
        entry
    }

    #[test]
    fn test_round_trip() {
        let mut entry = sample_entry();
        entry.hashes.push(HashEntry::new(
            HashType::Blake3,
            HashPurpose::Deduplication,
            compute_hash(HashType::Blake3, b"payload").unwrap(),
        ));
        entry.optional_data.push(OptionalDataEntry::new(
            OptionalDataKind::Tags,
            b"category=art".to_vec(),
        ));

        let bytes = entry.to_bytes().unwrap();
        let (decoded, consumed) = FileEntry::from_bytes(&bytes, 112).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(consumed, entry.total_size());
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_paths_sorted_and_primary_is_first() {
        let mut entry = FileEntry::new(1);
        entry.add_path(PathEntry::new("b.txt")).unwrap();
        entry.add_path(PathEntry::new("a.txt")).unwrap();
        entry.add_path(PathEntry::new("c.txt")).unwrap();

        let order: Vec<&str> = entry.paths.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(order, vec!["a.txt", "b.txt", "c.txt"]);
        assert_eq!(entry.primary_path(), Some("a.txt"));
    }

    #[test]
    fn test_sort_invariant_survives_removal() {
        let mut entry = FileEntry::new(1);
        entry.add_path(PathEntry::new("b.txt")).unwrap();
        entry.add_path(PathEntry::new("a.txt")).unwrap();
        entry.add_path(PathEntry::new("c.txt")).unwrap();
        entry.remove_path("a.txt").unwrap();
        assert_eq!(entry.primary_path(), Some("b.txt"));
        entry.validate().unwrap();
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let mut entry = FileEntry::new(1);
        entry.add_path(PathEntry::new("a.txt")).unwrap();
        assert!(entry.add_path(PathEntry::new("a.txt")).is_err());
    }

    #[test]
    fn test_last_path_cannot_be_removed() {
        let mut entry = FileEntry::new(1);
        entry.add_path(PathEntry::new("only.txt")).unwrap();
        assert!(entry.remove_path("only.txt").is_err());
    }

    #[test]
    fn test_zero_file_id_rejected() {
        let mut entry = FileEntry::new(0);
        entry.add_path(PathEntry::new("a.txt")).unwrap();
        assert!(entry.to_bytes().is_err());
    }

    #[test]
    fn test_entry_without_paths_rejected() {
        let entry = FileEntry::new(1);
        assert!(entry.validate().is_err());
    }

    #[test]
    fn test_truncated_entry_is_format_error() {
        let entry = sample_entry();
        let bytes = entry.to_bytes().unwrap();
        let err = FileEntry::from_bytes(&bytes[..bytes.len() - 5], 0).unwrap_err();
        assert!(matches!(err, NovusError::Format { .. }));
    }

    #[test]
    fn test_oversized_declared_path_length_is_format_error() {
        let entry = sample_entry();
        let mut bytes = entry.to_bytes().unwrap();
        // Inflate the first path's declared length far past the section.
        bytes[ENTRY_FIXED_SIZE] = 0xFF;
        bytes[ENTRY_FIXED_SIZE + 1] = 0xFF;
        let err = FileEntry::from_bytes(&bytes, 0).unwrap_err();
        assert!(matches!(err, NovusError::Format { .. }));
    }

    #[test]
    fn test_fixed_prefix_is_64_bytes() {
        let entry = sample_entry();
        let bytes = entry.to_bytes().unwrap();
        // FileID occupies the first 8 bytes.
        assert_eq!(u64::from_le_bytes(bytes[..8].try_into().unwrap()), 7);
        assert_eq!(entry.fixed_size(), 64);
        assert_eq!(bytes.len(), 64 + entry.variable_size());
    }

    #[test]
    fn test_oversized_optional_data_section_rejected() {
        let mut entry = sample_entry();
        // Two entries whose combined encoded size overflows the u16
        // OptionalDataLen field.
        entry.optional_data.push(OptionalDataEntry::new(
            OptionalDataKind::Tags,
            vec![0xAA; 40_000],
        ));
        entry.optional_data.push(OptionalDataEntry::new(
            OptionalDataKind::Tags,
            vec![0xBB; 40_000],
        ));
        let err = entry.to_bytes().unwrap_err();
        assert!(matches!(err, NovusError::Format { .. }));
    }

    #[test]
    fn test_mutations_bump_metadata_version() {
        let mut entry = FileEntry::new(1);
        entry.add_path(PathEntry::new("a.txt")).unwrap();
        let v = entry.metadata_version;
        entry.add_path(PathEntry::new("b.txt")).unwrap();
        assert_eq!(entry.metadata_version, v + 1);
    }
}
