//! Write strategies and defragmentation.
//!
//! Commits persist a package's tail sections (index, comment, signatures)
//! and final header using one of two caller-selected strategies, never
//! silently substituted:
//!
//! - **Safe**: serialize the whole archive into a temp file next to the
//!   target, fsync, then atomically rename over it. A failure before the
//!   rename leaves the original archive untouched.
//! - **Fast**: rewrite the tail in place. Lower durability; a partial
//!   write detected mid-commit falls back to the safe path as cleanup.
//!
//! Defragmentation is safe-write-based compaction: live entries are
//! copied, tombstoned regions are skipped, and index offsets are
//! recomputed. Long runs honor a cancellation token and an optional
//! deadline.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{NovusError, Result};
use crate::hash::Crc32Stream;
use crate::header::HEADER_SIZE;
use crate::io::PackageFile;
use crate::package::Package;
use crate::worker_pool::CancellationToken;

/// How a commit reaches disk. Caller-selected; never substituted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Temp file + fsync + atomic rename
    Safe,
    /// In-place tail rewrite
    Fast,
}

/// Commit lifecycle, logged as the write progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Staged,
    Writing,
    /// Safe strategy: renamed into place
    Committed,
    /// Fast strategy: tail rewritten in place
    Published,
}

/// Persist all pending changes using the given strategy.
pub fn commit(
    pkg: &Package,
    strategy: WriteStrategy,
    token: Option<&CancellationToken>,
) -> Result<()> {
    commit_with_deadline(pkg, strategy, token, None)
}

/// Persist all pending changes, bounded by an optional deadline.
pub fn commit_with_deadline(
    pkg: &Package,
    strategy: WriteStrategy,
    token: Option<&CancellationToken>,
    deadline: Option<Duration>,
) -> Result<()> {
    pkg.check_writable()?;
    let mut state = pkg.state.write();
    let mut file = pkg.file.lock();
    debug!(?strategy, state = ?WriteState::Staged, "commit starting");

    match strategy {
        WriteStrategy::Safe => safe_commit(&mut state, &mut file, token, deadline),
        WriteStrategy::Fast => {
            match fast_commit(&mut state, &mut file, &pkg.buffers) {
                Ok(()) => Ok(()),
                Err(NovusError::Io(err)) => {
                    // Partial in-place write: the tail may be torn. The
                    // one permitted recovery is rebuilding through the
                    // safe path.
                    warn!(%err, "in-place commit failed part-way, rebuilding via safe write");
                    safe_commit(&mut state, &mut file, token, deadline)
                }
                Err(other) => Err(other),
            }
        }
    }
}

/// Compact the archive: copy live entries, drop tombstoned regions,
/// recompute index offsets. Abort via token leaves the original archive
/// current.
pub fn defragment(pkg: &Package, token: Option<&CancellationToken>) -> Result<()> {
    defragment_with_deadline(pkg, token, None)
}

/// Defragment bounded by an optional deadline; exceeding it aborts with
/// `Timeout` and the original archive stays current.
pub fn defragment_with_deadline(
    pkg: &Package,
    token: Option<&CancellationToken>,
    deadline: Option<Duration>,
) -> Result<()> {
    pkg.check_writable()?;
    let mut state = pkg.state.write();
    let mut file = pkg.file.lock();

    let before = file.len()?;
    info!(bytes = before, "defragment: compacting");
    safe_commit(&mut state, &mut file, token, deadline)?;
    let after = file.len()?;
    info!(
        reclaimed = before.saturating_sub(after),
        "defragment: complete"
    );
    Ok(())
}

fn check_interrupt(
    token: Option<&CancellationToken>,
    start: Instant,
    deadline: Option<Duration>,
) -> Result<()> {
    if let Some(token) = token {
        if token.is_cancelled() {
            return Err(NovusError::Cancelled("write cancelled".into()));
        }
    }
    if let Some(limit) = deadline {
        if start.elapsed() > limit {
            return Err(NovusError::Timeout(format!("write exceeded {:?}", limit)));
        }
    }
    Ok(())
}

fn temp_path(target: &std::path::Path) -> PathBuf {
    let dir = target.parent().unwrap_or_else(|| std::path::Path::new("."));
    dir.join(format!(".nvpk-tmp-{:016x}", rand::random::<u64>()))
}

/// Serialize the full archive to a temp file and atomically rename it
/// over the target. On any error the temp file is removed and the
/// original archive stays untouched.
fn safe_commit(
    state: &mut crate::package::PackageState,
    file: &mut PackageFile,
    token: Option<&CancellationToken>,
    deadline: Option<Duration>,
) -> Result<()> {
    let start = Instant::now();
    let target = file.path().to_path_buf();
    let tmp = temp_path(&target);

    let result = write_full_archive(state, file, &tmp, token, start, deadline);
    match result {
        Ok(relocated) => {
            fs::rename(&tmp, &target)?;
            debug!(state = ?WriteState::Committed, "archive renamed into place");

            // The old handle points at the unlinked inode; reopen.
            *file = PackageFile::open(&target)?;
            for (file_id, offset, data_offset) in relocated {
                state.index.set_offsets(file_id, offset, data_offset)?;
            }
            state.data_end = state.header.index_start;
            state.dirty = false;
            Ok(())
        }
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            Err(err)
        }
    }
}

/// Write header, live entries with their data, index, comment, and
/// signatures to `tmp`. Returns the relocated (id, offset, data_offset)
/// triples.
fn write_full_archive(
    state: &mut crate::package::PackageState,
    source: &mut PackageFile,
    tmp: &std::path::Path,
    token: Option<&CancellationToken>,
    start: Instant,
    deadline: Option<Duration>,
) -> Result<Vec<(u64, u64, u64)>> {
    Package::refresh_flags(state);

    // Placeholder header; rewritten with final offsets at the end.
    let mut out = PackageFile::create(tmp, &state.header)?;
    debug!(state = ?WriteState::Writing, path = %tmp.display(), "serializing archive");

    let mut crc = Crc32Stream::new();
    let mut cursor = HEADER_SIZE as u64;
    let mut relocated = Vec::with_capacity(state.index.len());

    let mut ids: Vec<u64> = state.index.entries().map(|e| e.file_id).collect();
    ids.sort_unstable();

    for file_id in ids {
        check_interrupt(token, start, deadline)?;

        let old_data_offset = state
            .index
            .data_offset_of(file_id)
            .ok_or_else(|| NovusError::format(format!("unknown file ID {}", file_id), 0))?;
        let entry = state
            .index
            .find_by_id(file_id)
            .ok_or_else(|| NovusError::format(format!("unknown file ID {}", file_id), 0))?;

        let stored = source.read_at(old_data_offset, entry.stored_size as usize)?;
        let record = entry.to_bytes()?;

        let offset = cursor;
        out.write_at(offset, &record)?;
        out.write_at(offset + record.len() as u64, &stored)?;
        crc.update(&record);
        crc.update(&stored);
        relocated.push((file_id, offset, offset + record.len() as u64));
        cursor += record.len() as u64 + stored.len() as u64;
    }
    check_interrupt(token, start, deadline)?;

    // The in-memory offsets still describe the source archive here; build
    // the index table from the relocated positions instead.
    let index_start = cursor;
    let first_entry = relocated
        .first()
        .map(|&(_, offset, _)| offset)
        .unwrap_or(HEADER_SIZE as u64);
    let mut table = crate::codec::Writer::with_capacity(16 + relocated.len() * 16);
    table.u32(relocated.len() as u32);
    table.u32(0);
    table.u64(first_entry);
    for &(file_id, offset, _) in &relocated {
        table.u64(file_id);
        table.u64(offset);
    }
    let table = table.into_vec();
    out.write_at(index_start, &table)?;
    crc.update(&table);
    cursor += table.len() as u64;

    state.header.index_start = index_start;
    state.header.index_size = table.len() as u64;
    state.index.set_first_entry_offset(first_entry);

    if state.comment.is_empty() {
        state.header.comment_start = 0;
        state.header.comment_size = 0;
    } else {
        let bytes = state.comment.to_bytes();
        out.write_at(cursor, &bytes)?;
        crc.update(&bytes);
        state.header.comment_start = cursor;
        state.header.comment_size = bytes.len() as u32;
        cursor += bytes.len() as u64;
    }

    // Signatures sit past the checksummed range so re-signing does not
    // invalidate the package CRC.
    if state.signatures.is_empty() {
        state.header.signature_offset = 0;
    } else {
        let bytes = state.signatures.to_bytes();
        out.write_at(cursor, &bytes)?;
        state.header.signature_offset = cursor;
        cursor += bytes.len() as u64;
    }

    state.header.package_crc = crc.finalize();
    out.write_header(&state.header)?;
    out.truncate(cursor)?;
    out.sync()?;
    Ok(relocated)
}

/// Rewrite the tail in place: index at the end of the data region, then
/// comment, signatures, and the final header.
fn fast_commit(
    state: &mut crate::package::PackageState,
    file: &mut PackageFile,
    buffers: &crate::buffer_pool::BufferPool,
) -> Result<()> {
    Package::refresh_flags(state);
    debug!(state = ?WriteState::Writing, "rewriting tail in place");

    let index_start = state.data_end;
    let table = {
        let first = state.index.first_entry_offset();
        state.index.set_first_entry_offset(if state.index.is_empty() {
            HEADER_SIZE as u64
        } else {
            first.max(HEADER_SIZE as u64)
        });
        state.index.to_bytes()
    };
    file.write_at(index_start, &table)?;
    state.header.index_start = index_start;
    state.header.index_size = table.len() as u64;
    let mut cursor = index_start + table.len() as u64;

    if state.comment.is_empty() {
        state.header.comment_start = 0;
        state.header.comment_size = 0;
    } else {
        let bytes = state.comment.to_bytes();
        file.write_at(cursor, &bytes)?;
        state.header.comment_start = cursor;
        state.header.comment_size = bytes.len() as u32;
        cursor += bytes.len() as u64;
    }

    // Signatures sit past the checksummed range.
    let crc_end = cursor;
    if state.signatures.is_empty() {
        state.header.signature_offset = 0;
    } else {
        let bytes = state.signatures.to_bytes();
        file.write_at(cursor, &bytes)?;
        state.header.signature_offset = cursor;
        cursor += bytes.len() as u64;
    }

    file.truncate(cursor)?;

    // Checksum the archive as written, header and signatures excluded.
    let mut crc = Crc32Stream::new();
    let mut buf = buffers.checkout(64 * 1024);
    buf.resize(64 * 1024, 0);
    let mut offset = HEADER_SIZE as u64;
    while offset < crc_end {
        let chunk = (crc_end - offset).min(64 * 1024) as usize;
        file.read_into(offset, &mut buf[..chunk])?;
        crc.update(&buf[..chunk]);
        offset += chunk as u64;
    }
    buffers.checkin(buf);
    state.header.package_crc = crc.finalize();

    file.write_header(&state.header)?;
    file.sync()?;
    state.dirty = false;
    debug!(state = ?WriteState::Published, "tail rewritten");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::AddFileOptions;
    use crate::signature::SignatureType;
    use tempfile::tempdir;

    fn populate(pkg: &Package) {
        pkg.add_file_from_memory("assets/a.txt", &b"alpha ".repeat(200), &AddFileOptions::default())
            .unwrap();
        pkg.add_file_from_memory("assets/b.txt", &b"beta ".repeat(300), &AddFileOptions::default())
            .unwrap();
        pkg.set_comment("two files").unwrap();
    }

    #[test]
    fn test_safe_commit_then_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pkg.nvpk");
        {
            let pkg = Package::create(&path).unwrap();
            populate(&pkg);
            commit(&pkg, WriteStrategy::Safe, None).unwrap();

            // Handle stays usable after the rename.
            assert_eq!(pkg.read_file("assets/a.txt").unwrap(), b"alpha ".repeat(200));
        }

        let pkg = Package::open(&path).unwrap();
        assert_eq!(pkg.file_count(), 2);
        assert_eq!(pkg.comment(), "two files");
        assert_eq!(pkg.read_file("assets/b.txt").unwrap(), b"beta ".repeat(300));
        pkg.verify_package_crc().unwrap();
    }

    #[test]
    fn test_fast_commit_then_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pkg.nvpk");
        {
            let pkg = Package::create(&path).unwrap();
            populate(&pkg);
            commit(&pkg, WriteStrategy::Fast, None).unwrap();
        }

        let pkg = Package::open(&path).unwrap();
        assert_eq!(pkg.file_count(), 2);
        assert_eq!(pkg.read_file("assets/a.txt").unwrap(), b"alpha ".repeat(200));
        pkg.verify_package_crc().unwrap();
    }

    #[test]
    fn test_cancelled_safe_commit_leaves_original() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pkg.nvpk");

        let pkg = Package::create(&path).unwrap();
        populate(&pkg);
        commit(&pkg, WriteStrategy::Safe, None).unwrap();

        pkg.add_file_from_memory("late.txt", b"late", &AddFileOptions::default())
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = commit(&pkg, WriteStrategy::Safe, Some(&token)).unwrap_err();
        assert!(matches!(err, NovusError::Cancelled(_)));
        drop(pkg);

        // The archive on disk is still the previous commit.
        let pkg = Package::open(&path).unwrap();
        assert_eq!(pkg.file_count(), 2);
        assert!(pkg.find_by_path("late.txt").is_none());
        pkg.verify_package_crc().unwrap();
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pkg.nvpk");
        let pkg = Package::create(&path).unwrap();
        populate(&pkg);

        let token = CancellationToken::new();
        token.cancel();
        let _ = commit(&pkg, WriteStrategy::Safe, Some(&token));
        commit(&pkg, WriteStrategy::Safe, None).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".nvpk-tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_defragment_reclaims_tombstones() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pkg.nvpk");

        let pkg = Package::create(&path).unwrap();
        pkg.add_file_from_memory("keep.bin", &b"K".repeat(10_000), &AddFileOptions::default())
            .unwrap();
        pkg.add_file_from_memory(
            "drop.bin",
            &(0u32..4000)
                .flat_map(|i| i.to_le_bytes())
                .collect::<Vec<u8>>(),
            &AddFileOptions::default(),
        )
        .unwrap();
        commit(&pkg, WriteStrategy::Safe, None).unwrap();
        let full = std::fs::metadata(&path).unwrap().len();

        pkg.remove_file("drop.bin").unwrap();
        defragment(&pkg, None).unwrap();
        let compacted = std::fs::metadata(&path).unwrap().len();
        assert!(compacted < full);

        // Survivor still reads back through the relocated offsets.
        assert_eq!(pkg.read_file("keep.bin").unwrap(), b"K".repeat(10_000));
        drop(pkg);
        let pkg = Package::open(&path).unwrap();
        assert_eq!(pkg.file_count(), 1);
        assert_eq!(pkg.read_file("keep.bin").unwrap(), b"K".repeat(10_000));
    }

    #[test]
    fn test_signatures_survive_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pkg.nvpk");

        let pkg = Package::create(&path).unwrap();
        populate(&pkg);
        pkg.sign(SignatureType::MlDsa, vec![0xAB; 64], "build signer")
            .unwrap();
        commit(&pkg, WriteStrategy::Safe, None).unwrap();
        drop(pkg);

        let pkg = Package::open(&path).unwrap();
        assert_eq!(pkg.signature_count(), 1);
        pkg.verify_package_crc().unwrap();
    }

    #[test]
    fn test_dedup_alias_survives_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pkg.nvpk");

        let pkg = Package::create(&path).unwrap();
        let data = b"shared content ".repeat(100);
        let id = pkg
            .add_file_from_memory("first.bin", &data, &AddFileOptions::default())
            .unwrap();
        let alias = pkg
            .add_file_from_memory("second.bin", &data, &AddFileOptions::default())
            .unwrap();
        assert_eq!(id, alias);
        commit(&pkg, WriteStrategy::Safe, None).unwrap();
        drop(pkg);

        let pkg = Package::open(&path).unwrap();
        assert_eq!(pkg.file_count(), 1);
        assert_eq!(pkg.read_file("first.bin").unwrap(), data);
        assert_eq!(pkg.read_file("second.bin").unwrap(), data);
    }
}
