use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use crate::error::IoError;

/// Identity of a byte source for cache lookups: path plus modification time.
///
/// Two opens of the same path only share decoded data when the modification
/// time matches exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceIdentity {
    pub path: String,
    pub modified: SystemTime,
}

impl SourceIdentity {
    pub fn new(path: impl Into<String>, modified: SystemTime) -> Self {
        Self {
            path: path.into(),
            modified,
        }
    }
}

/// Trait for reading byte ranges from a file-like resource.
///
/// This abstraction allows the tag parser and tile decoder to work with
/// positional reads instead of a shared seek cursor. Implementations must be
/// thread-safe.
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Get the total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Get a unique identifier for this resource (for logging and cache keys).
    ///
    /// For local files this is the path as given when opening.
    fn identifier(&self) -> &str;

    /// Modification time of the resource, if known.
    fn modified(&self) -> Option<SystemTime> {
        None
    }

    /// Cache identity of this resource.
    ///
    /// Resources without a modification time have no identity and are never
    /// cached.
    fn identity(&self) -> Option<SourceIdentity> {
        self.modified()
            .map(|modified| SourceIdentity::new(self.identifier(), modified))
    }
}

impl<R: RangeReader + ?Sized> RangeReader for Arc<R> {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        (**self).read_exact_at(offset, len)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    fn identifier(&self) -> &str {
        (**self).identifier()
    }

    fn modified(&self) -> Option<SystemTime> {
        (**self).modified()
    }
}

impl<R: RangeReader + ?Sized> RangeReader for &R {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        (**self).read_exact_at(offset, len)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    fn identifier(&self) -> &str {
        (**self).identifier()
    }

    fn modified(&self) -> Option<SystemTime> {
        (**self).modified()
    }
}

// =============================================================================
// Endian Helper Functions
// =============================================================================
//
// VRimg files are written in Intel byte order. The big-endian readers exist
// for the explicit byte-order conversion step in `format::vrimg::ByteOrder`.

/// Read a little-endian u32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a big-endian u32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a little-endian u64 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 8 bytes.
#[inline]
pub fn read_u64_le(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}
