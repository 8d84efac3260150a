//! Local file and in-memory range readers.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::Mutex;

use super::RangeReader;
use crate::error::IoError;

/// Range reader backed by a local file.
///
/// Size and modification time are captured once at open time, so a file that
/// is rewritten while open keeps the identity it had when it was opened.
pub struct FileRangeReader {
    file: Mutex<File>,
    size: u64,
    modified: Option<SystemTime>,
    identifier: String,
}

impl FileRangeReader {
    /// Open a file for positional reads.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let metadata = file.metadata()?;

        Ok(Self {
            file: Mutex::new(file),
            size: metadata.len(),
            modified: metadata.modified().ok(),
            identifier: path.to_string_lossy().into_owned(),
        })
    }
}

impl RangeReader for FileRangeReader {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if offset.saturating_add(len as u64) > self.size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }

        let mut buf = vec![0u8; len];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn modified(&self) -> Option<SystemTime> {
        self.modified
    }
}

/// Range reader over bytes already in memory.
#[derive(Clone)]
pub struct MemoryReader {
    data: Bytes,
    identifier: String,
    modified: Option<SystemTime>,
}

impl MemoryReader {
    pub fn new(data: impl Into<Bytes>, identifier: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
            modified: None,
        }
    }

    /// Attach a modification time so the source can be cached.
    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = Some(modified);
        self
    }
}

impl RangeReader for MemoryReader {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let size = self.data.len() as u64;
        if offset.saturating_add(len as u64) > size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            });
        }

        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn modified(&self) -> Option<SystemTime> {
        self.modified
    }
}
