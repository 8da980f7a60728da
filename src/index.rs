//! File index: FileID and path lookup tables.
//!
//! On-disk the index is a flat table written after the last entry:
//! EntryCount (u32) + Reserved (u32) + FirstEntryOffset (u64) followed by
//! EntryCount pairs of (FileID u64, Offset u64). In memory it owns the
//! decoded entries and keeps O(1) maps from FileID and from every path
//! alias to the entry.

use std::collections::HashMap;

use crate::codec::{Reader, Writer};
use crate::entry::FileEntry;
use crate::error::{NovusError, Result};
use crate::file_info::{FileFilter, FileInfo};

/// Fixed index header size: EntryCount + Reserved + FirstEntryOffset.
pub const INDEX_HEADER_SIZE: usize = 16;

/// Size of one on-disk index record.
pub const INDEX_RECORD_SIZE: usize = 16;

/// In-memory file index.
///
/// Removal is a tombstone: the entry leaves both maps and its on-disk
/// region becomes unused space until the next defragment pass. FileIDs are
/// assigned sequentially from 1 and never reused within a session.
#[derive(Debug, Default)]
pub struct FileIndex {
    entries: HashMap<u64, FileEntry>,
    /// Absolute offsets of each live entry: (record offset, data offset).
    /// Tracked separately because in-memory records can grow (path
    /// aliases) while the stored data stays where it was written.
    offsets: HashMap<u64, (u64, u64)>,
    by_path: HashMap<String, u64>,
    next_file_id: u64,
    /// Offset of the first entry record, as persisted.
    first_entry_offset: u64,
}

impl FileIndex {
    pub fn new() -> Self {
        FileIndex {
            entries: HashMap::new(),
            offsets: HashMap::new(),
            by_path: HashMap::new(),
            next_file_id: 1,
            first_entry_offset: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_entry_offset(&self) -> u64 {
        self.first_entry_offset
    }

    pub fn set_first_entry_offset(&mut self, offset: u64) {
        self.first_entry_offset = offset;
    }

    /// Allocate the next FileID. IDs are monotonic within a session.
    pub fn allocate_file_id(&mut self) -> u64 {
        let id = self.next_file_id;
        self.next_file_id += 1;
        id
    }

    /// Insert a new entry at the given record and data offsets. Every
    /// path alias must be unused by other entries.
    pub fn add_entry(&mut self, entry: FileEntry, offset: u64, data_offset: u64) -> Result<()> {
        entry.validate()?;
        if self.entries.contains_key(&entry.file_id) {
            return Err(NovusError::format(
                format!("duplicate file ID {}", entry.file_id),
                offset,
            ));
        }
        for path in &entry.paths {
            if self.by_path.contains_key(&path.path) {
                return Err(NovusError::security(format!(
                    "path {:?} already maps to another file",
                    path.path
                )));
            }
        }
        for path in &entry.paths {
            self.by_path.insert(path.path.clone(), entry.file_id);
        }
        self.offsets.insert(entry.file_id, (offset, data_offset));
        if entry.file_id >= self.next_file_id {
            self.next_file_id = entry.file_id + 1;
        }
        self.entries.insert(entry.file_id, entry);
        Ok(())
    }

    /// Replace an existing entry, rebuilding its path mappings. The new
    /// paths must not collide with other entries.
    pub fn update_entry(&mut self, entry: FileEntry, offset: u64, data_offset: u64) -> Result<()> {
        entry.validate()?;
        let old = self
            .entries
            .get(&entry.file_id)
            .ok_or_else(|| NovusError::format(format!("unknown file ID {}", entry.file_id), 0))?;
        for path in &entry.paths {
            if let Some(&owner) = self.by_path.get(&path.path) {
                if owner != entry.file_id {
                    return Err(NovusError::security(format!(
                        "path {:?} already maps to another file",
                        path.path
                    )));
                }
            }
        }
        let old_paths: Vec<String> = old.paths.iter().map(|p| p.path.clone()).collect();
        for path in old_paths {
            self.by_path.remove(&path);
        }
        for path in &entry.paths {
            self.by_path.insert(path.path.clone(), entry.file_id);
        }
        self.offsets.insert(entry.file_id, (offset, data_offset));
        self.entries.insert(entry.file_id, entry);
        Ok(())
    }

    /// Tombstone removal: the entry leaves the maps, its on-disk bytes stay
    /// behind as unused space. The ID is not reissued.
    pub fn remove_entry(&mut self, file_id: u64) -> Result<FileEntry> {
        let entry = self
            .entries
            .remove(&file_id)
            .ok_or_else(|| NovusError::format(format!("unknown file ID {}", file_id), 0))?;
        for path in &entry.paths {
            self.by_path.remove(&path.path);
        }
        self.offsets.remove(&file_id);
        Ok(entry)
    }

    pub fn find_by_id(&self, file_id: u64) -> Option<&FileEntry> {
        self.entries.get(&file_id)
    }

    pub fn find_by_id_mut(&mut self, file_id: u64) -> Option<&mut FileEntry> {
        self.entries.get_mut(&file_id)
    }

    pub fn find_by_path(&self, path: &str) -> Option<&FileEntry> {
        self.by_path.get(path).and_then(|id| self.entries.get(id))
    }

    /// Record offset of a live entry.
    pub fn offset_of(&self, file_id: u64) -> Option<u64> {
        self.offsets.get(&file_id).map(|&(offset, _)| offset)
    }

    /// Stored-data offset of a live entry.
    pub fn data_offset_of(&self, file_id: u64) -> Option<u64> {
        self.offsets.get(&file_id).map(|&(_, data)| data)
    }

    /// Point a live entry at new offsets after its record was relocated.
    pub fn set_offsets(&mut self, file_id: u64, offset: u64, data_offset: u64) -> Result<()> {
        if !self.entries.contains_key(&file_id) {
            return Err(NovusError::format(format!("unknown file ID {}", file_id), 0));
        }
        self.offsets.insert(file_id, (offset, data_offset));
        Ok(())
    }

    /// Rebuild the path map for one entry after its paths changed in place.
    pub fn reindex_paths(&mut self, file_id: u64) -> Result<()> {
        let entry = self
            .entries
            .get(&file_id)
            .ok_or_else(|| NovusError::format(format!("unknown file ID {}", file_id), 0))?;
        let new_paths: Vec<String> = entry.paths.iter().map(|p| p.path.clone()).collect();
        self.by_path.retain(|_, id| *id != file_id);
        for path in new_paths {
            self.by_path.insert(path, file_id);
        }
        Ok(())
    }

    /// Project every live entry. Sorted by FileID so listings are stable.
    /// Touches only resident metadata, never stored data.
    pub fn list_files(&self, filter: Option<&FileFilter>) -> Vec<FileInfo> {
        let mut infos: Vec<FileInfo> = self
            .entries
            .values()
            .map(FileInfo::from)
            .filter(|info| filter.map_or(true, |f| f.matches(info)))
            .collect();
        infos.sort_by_key(|info| info.file_id);
        infos
    }

    pub fn entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.values()
    }

    /// Total bytes used by live entry records and their stored data,
    /// assuming data directly follows each record.
    pub fn live_bytes(&self) -> u64 {
        self.entries
            .values()
            .map(|e| e.total_size() as u64 + e.stored_size)
            .sum()
    }

    /// Encode the on-disk index table, records sorted by FileID.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut ids: Vec<u64> = self.entries.keys().copied().collect();
        ids.sort_unstable();

        let mut w = Writer::with_capacity(INDEX_HEADER_SIZE + ids.len() * INDEX_RECORD_SIZE);
        w.u32(ids.len() as u32);
        w.u32(0); // Reserved
        w.u64(self.first_entry_offset);
        for id in ids {
            w.u64(id);
            w.u64(self.offsets[&id].0);
        }
        w.into_vec()
    }

    /// Decode the index table. Returns (records, first_entry_offset); the
    /// caller decodes each record's entry from its offset.
    pub fn decode_table(bytes: &[u8], base_offset: u64) -> Result<(Vec<(u64, u64)>, u64)> {
        let mut r = Reader::new(bytes, base_offset);
        let count = r.u32("EntryCount")? as usize;
        let reserved = r.u32("Reserved")?;
        if reserved != 0 {
            return Err(NovusError::format(
                "index reserved field must be zero",
                base_offset,
            ));
        }
        let first_entry_offset = r.u64("FirstEntryOffset")?;
        let mut records = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            let file_id = r.u64("FileID")?;
            let offset = r.u64("Offset")?;
            records.push((file_id, offset));
        }
        Ok((records, first_entry_offset))
    }

    /// Encoded size of the index table.
    pub fn encoded_size(&self) -> usize {
        INDEX_HEADER_SIZE + self.entries.len() * INDEX_RECORD_SIZE
    }
}
