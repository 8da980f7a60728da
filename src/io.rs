//! Disk I/O operations for package files

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{NovusError, Result};
use crate::header::{Header, HEADER_SIZE};

/// Disk-backed package storage
#[derive(Debug)]
pub struct PackageFile {
    file: File,
    path: PathBuf,
    writable: bool,
}

impl PackageFile {
    /// Create a new package file with the given header
    pub fn create<P: AsRef<Path>>(path: P, header: &Header) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.write_all(&header.to_bytes())?;
        file.flush()?;

        Ok(PackageFile {
            file,
            path: path.as_ref().to_path_buf(),
            writable: true,
        })
    }

    /// Open an existing package file for reading and writing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        Ok(PackageFile {
            file,
            path: path.as_ref().to_path_buf(),
            writable: true,
        })
    }

    /// Open an existing package file read-only
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(&path)?;

        Ok(PackageFile {
            file,
            path: path.as_ref().to_path_buf(),
            writable: false,
        })
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Read the header at offset 0
    pub fn read_header(&mut self) -> Result<Header> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buffer = [0u8; HEADER_SIZE];
        self.file.read_exact(&mut buffer)?;
        Header::from_bytes(&buffer)
    }

    /// Write the header at offset 0
    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        self.write_at(0, &header.to_bytes())
    }

    /// Read exactly `len` bytes at the given offset
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        self.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Read exactly `buf.len()` bytes at the given offset into a caller
    /// buffer
    pub fn read_into(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Write bytes at the given offset
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(NovusError::security("package file opened read-only"));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        Ok(())
    }

    /// Append bytes at the end, returning the offset they were written at
    pub fn append(&mut self, data: &[u8]) -> Result<u64> {
        if !self.writable {
            return Err(NovusError::security("package file opened read-only"));
        }
        let offset = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(data)?;
        Ok(offset)
    }

    /// Truncate the file to the given length
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        if !self.writable {
            return Err(NovusError::security("package file opened read-only"));
        }
        self.file.set_len(len)?;
        Ok(())
    }

    /// Current file length
    pub fn len(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
