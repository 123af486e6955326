//! Offset-shifted positional file access.
//!
//! Every position handed to [`RandomAccessFile::seek`] is relative to the
//! start of the logical database content; the license header in front of it
//! is skipped by adding a fixed `offset`.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{CzdbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    ReadWrite,
}

/// A file handle with an implicit cursor. Not meant for concurrent use.
#[derive(Debug)]
pub struct RandomAccessFile {
    file: Option<File>,
    offset: u64,
    position: u64,
}

impl RandomAccessFile {
    pub fn open<P: AsRef<Path>>(path: P, mode: AccessMode, offset: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(mode == AccessMode::ReadWrite)
            .open(path)?;
        Ok(Self {
            file: Some(file),
            offset,
            position: offset,
        })
    }

    /// Sets the next read/write position to `position + offset`.
    pub fn seek(&mut self, position: u64) {
        self.position = position + self.offset;
    }

    /// Current logical position.
    pub fn position(&self) -> u64 {
        self.position - self.offset
    }

    /// Fills `buf`, failing with [`CzdbError::ShortRead`] if the file ends first.
    pub fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        let start = self.position;
        let file = self.file.as_mut().ok_or(CzdbError::Closed)?;
        file.seek(SeekFrom::Start(start))?;

        let mut read = 0;
        while read < buf.len() {
            match file.read(&mut buf[read..]) {
                Ok(0) => {
                    return Err(CzdbError::ShortRead {
                        position: start - self.offset,
                        expected: buf.len(),
                        read,
                    })
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.position += read as u64;
        Ok(())
    }

    /// Writes all of `buf` at the current position.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let file = self.file.as_mut().ok_or(CzdbError::Closed)?;
        file.seek(SeekFrom::Start(self.position))?;
        file.write_all(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    /// File size minus the offset.
    pub fn length(&self) -> Result<u64> {
        let file = self.file.as_ref().ok_or(CzdbError::Closed)?;
        Ok(file.metadata()?.len().saturating_sub(self.offset))
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Releases the handle. Calling it again is a no-op.
    pub fn close(&mut self) {
        self.file = None;
    }
}
