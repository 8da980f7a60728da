//! Read-only file listing snapshots.
//!
//! `FileInfo` projects the cheap, always-resident parts of a file entry
//! (fixed prefix plus path strings) for listing and filtering without
//! touching stored data or decoding optional sections.

use crate::compression::CompressionType;
use crate::encryption::EncryptionType;
use crate::entry::FileEntry;

/// Snapshot of one file's metadata at listing time. Holds no handle to the
/// package; later mutations do not show through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub file_id: u64,
    /// First path in sorted order.
    pub primary_path: String,
    /// All path aliases, sorted.
    pub paths: Vec<String>,
    pub original_size: u64,
    pub stored_size: u64,
    pub file_type: u16,
    pub file_version: u32,
    pub metadata_version: u32,
    pub compression_type: CompressionType,
    pub encryption_type: EncryptionType,
    pub has_tags: bool,
    pub mod_time: u64,
}

impl FileInfo {
    pub fn is_compressed(&self) -> bool {
        self.compression_type != CompressionType::None
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption_type != EncryptionType::None
    }
}

impl From<&FileEntry> for FileInfo {
    fn from(entry: &FileEntry) -> Self {
        FileInfo {
            file_id: entry.file_id,
            primary_path: entry.primary_path().unwrap_or_default().to_string(),
            paths: entry.paths.iter().map(|p| p.path.clone()).collect(),
            original_size: entry.original_size,
            stored_size: entry.stored_size,
            file_type: entry.file_type,
            file_version: entry.file_version,
            metadata_version: entry.metadata_version,
            compression_type: entry.compression_type,
            encryption_type: entry.encryption_type,
            has_tags: entry.has_tags(),
            mod_time: entry.paths.first().map(|p| p.mod_time).unwrap_or(0),
        }
    }
}

/// Listing filter over projected fields only.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    pub file_type: Option<u16>,
    pub compressed: Option<bool>,
    pub encrypted: Option<bool>,
    pub has_tags: Option<bool>,
}

impl FileFilter {
    pub fn matches(&self, info: &FileInfo) -> bool {
        if let Some(t) = self.file_type {
            if info.file_type != t {
                return false;
            }
        }
        if let Some(c) = self.compressed {
            if info.is_compressed() != c {
                return false;
            }
        }
        if let Some(e) = self.encrypted {
            if info.is_encrypted() != e {
                return false;
            }
        }
        if let Some(t) = self.has_tags {
            if info.has_tags != t {
                return false;
            }
        }
        true
    }
}
