//! File-type probe for VRimg files.
//!
//! Importability is decided solely by the magic word in the first four bytes.
//! A file that passes the probe can still fail to open if its tag table is
//! damaged.

use crate::error::IoError;
use crate::io::RangeReader;

use super::vrimg::{ByteOrder, FILE_BYTE_ORDER, MAGIC};

/// Bytes needed for the probe.
pub const PROBE_LEN: usize = 4;

/// Check whether bytes start with the VRimg magic word.
///
/// Returns false when fewer than four bytes are given.
pub fn is_vrimg_magic(bytes: &[u8]) -> bool {
    bytes.len() >= PROBE_LEN && read_magic(FILE_BYTE_ORDER, bytes) == MAGIC
}

fn read_magic(order: ByteOrder, bytes: &[u8]) -> u32 {
    order.read_u32(&bytes[..PROBE_LEN])
}

/// Probe a byte source.
///
/// # Returns
/// * `Ok(true)` - The source starts with the VRimg magic
/// * `Ok(false)` - It does not, or it is shorter than four bytes
/// * `Err(_)` - The first bytes could not be read
pub fn probe<R: RangeReader + ?Sized>(reader: &R) -> Result<bool, IoError> {
    if reader.size() < PROBE_LEN as u64 {
        return Ok(false);
    }
    let bytes = reader.read_exact_at(0, PROBE_LEN)?;
    Ok(is_vrimg_magic(&bytes))
}
