//! One unit of parallel tile work.
//!
//! The scanning thread reads a tile's payload and hands it to a
//! [`TileDecodeTask`] running on the worker pool. The task inflates the
//! payload if needed and copies its rows into a [`TileSink`], converting each
//! 32-bit element from file order to host order.

use std::io::Read;

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use parking_lot::Mutex;

use crate::error::TileError;
use crate::format::vrimg::{LocatedTag, TileRect, FILE_BYTE_ORDER};

// =============================================================================
// TileSink
// =============================================================================

/// Destination buffer for the tiles of one layer.
///
/// Tiles of one layer cover disjoint rectangles, but each rectangle spans
/// many partial rows, so the buffer cannot be split into per-tile slices.
/// Tasks writing to the same layer therefore take turns on the lock. It is
/// taken only for the row copy, after inflation, so decompression still runs
/// in parallel and tasks of different layers never wait on each other.
pub struct TileSink<'a> {
    buffer: Mutex<&'a mut [u8]>,
    row_bytes: usize,
    pixel_bytes: usize,
    width: u32,
    height: u32,
}

impl<'a> TileSink<'a> {
    /// Wrap a destination buffer.
    ///
    /// # Arguments
    /// * `buffer` - Destination bytes
    /// * `row_bytes` - Stride between destination rows
    /// * `pixel_bytes` - Bytes per pixel of the layer
    /// * `width`, `height` - Image size in pixels
    pub fn new(
        buffer: &'a mut [u8],
        row_bytes: usize,
        pixel_bytes: usize,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            buffer: Mutex::new(buffer),
            row_bytes,
            pixel_bytes,
            width,
            height,
        }
    }

    pub fn pixel_bytes(&self) -> usize {
        self.pixel_bytes
    }

    /// Copy a decoded tile (file byte order, tightly packed rows) into place.
    fn write(&self, rect: TileRect, pixels: &[u8]) -> Result<(), TileError> {
        let out_of_bounds = || TileError::OutOfBounds {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            image_width: self.width,
            image_height: self.height,
        };

        if !rect.fits_within(self.width, self.height) {
            return Err(out_of_bounds());
        }

        let tile_row = rect.width as usize * self.pixel_bytes;
        let x_offset = rect.x as usize * self.pixel_bytes;

        let mut buffer = self.buffer.lock();

        let last_row_end = (rect.y as usize + rect.height as usize)
            .checked_sub(1)
            .map(|last| last * self.row_bytes + x_offset + tile_row)
            .unwrap_or(0);
        if last_row_end > buffer.len() {
            return Err(out_of_bounds());
        }

        for (row, src) in pixels.chunks_exact(tile_row).enumerate() {
            let start = (rect.y as usize + row) * self.row_bytes + x_offset;
            FILE_BYTE_ORDER.copy_words_to_native(src, &mut buffer[start..start + tile_row]);
        }

        Ok(())
    }
}

// =============================================================================
// TileDecodeTask
// =============================================================================

/// Decode work for a single tile tag.
pub struct TileDecodeTask {
    tag: LocatedTag,
    payload: Bytes,
    compressed: bool,
}

impl TileDecodeTask {
    /// Create a task from a tile tag and the payload bytes read for it.
    ///
    /// `payload` may be shorter than the tag declares if the file is
    /// truncated; the task then fails without writing.
    pub fn new(tag: LocatedTag, payload: Bytes, compressed: bool) -> Self {
        Self {
            tag,
            payload,
            compressed,
        }
    }

    pub fn rect(&self) -> TileRect {
        self.tag.tag.tile_rect()
    }

    pub fn offset(&self) -> u64 {
        self.tag.offset
    }

    /// Decode the tile into `sink`.
    ///
    /// On error nothing has been written to the sink.
    pub fn run(&self, sink: &TileSink<'_>) -> Result<(), TileError> {
        let rect = self.rect();
        if !rect.fits_within(sink.width, sink.height) {
            return Err(TileError::OutOfBounds {
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                image_width: sink.width,
                image_height: sink.height,
            });
        }

        // Cannot overflow: the tile fits inside an image whose buffer exists
        let full_size = rect.width as usize * rect.height as usize * sink.pixel_bytes;
        if full_size == 0 {
            return Ok(());
        }

        if self.compressed {
            let pixels = inflate(&self.payload, full_size)?;
            sink.write(rect, &pixels)
        } else {
            let pixels = self
                .payload
                .get(..full_size)
                .ok_or(TileError::Truncated {
                    expected: full_size,
                    actual: self.payload.len(),
                })?;
            sink.write(rect, pixels)
        }
    }
}

/// Inflate a zlib stream into exactly `full_size` bytes.
fn inflate(compressed: &[u8], full_size: usize) -> Result<Vec<u8>, TileError> {
    let mut scratch = Vec::new();
    scratch
        .try_reserve_exact(full_size)
        .map_err(|_| TileError::Alloc(full_size))?;
    scratch.resize(full_size, 0);

    ZlibDecoder::new(compressed)
        .read_exact(&mut scratch)
        .map_err(|e| TileError::Inflate(e.to_string()))?;

    Ok(scratch)
}
