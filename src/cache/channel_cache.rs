//! Fully decoded snapshot of one VRimg file.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::DecodeError;
use crate::format::vrimg::PixelType;
use crate::io::{RangeReader, SourceIdentity};
use crate::tile::{allocate_buffers, required_len, InputFile, LoadReport};

/// One decoded layer held by a [`ChannelCache`].
#[derive(Debug)]
pub struct CachedLayer {
    pub pixel_type: PixelType,
    pub dimensions: u32,
    data: Vec<u8>,
}

impl CachedLayer {
    /// Native-order pixel data, rows packed without padding.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Every layer of one file, decoded once and served by memory copy.
///
/// Identified by the source's path and modification time. The last-access
/// stamp is updated at construction and by every
/// [`copy_layer_to_buffer`](Self::copy_layer_to_buffer).
#[derive(Debug)]
pub struct ChannelCache {
    identity: SourceIdentity,
    width: u32,
    height: u32,
    layers: HashMap<String, CachedLayer>,
    report: LoadReport,
    last_access: Mutex<Instant>,
}

impl ChannelCache {
    /// Decode every layer of `file`.
    ///
    /// Damaged tiles and a tag table that cannot be read to the end are
    /// tolerated, so a partially written file is cached partially. The
    /// shortfall is visible through [`report`](Self::report).
    ///
    /// # Errors
    /// - `OutOfMemory` if a layer buffer cannot be allocated; nothing is kept
    /// - `Format(UnknownLayerIndex)` if a tile addresses an undeclared layer
    /// - `Cancelled` if the file's interrupt fired
    pub fn build<R: RangeReader>(
        file: &InputFile<R>,
        identity: SourceIdentity,
    ) -> Result<Self, DecodeError> {
        let header = file.header();
        let mut buffers = allocate_buffers(header)?;

        let report = file.decode_into(&mut buffers)?;
        if !report.is_complete() {
            warn!(
                "{}: caching partial decode ({} tiles failed{})",
                identity.path,
                report.tiles_failed,
                if report.scan_failed { ", tag table cut short" } else { "" }
            );
        }

        let layers: HashMap<String, CachedLayer> = buffers
            .into_iter()
            .filter_map(|(name, data)| {
                let layer = header.find_layer(&name)?;
                let cached = CachedLayer {
                    pixel_type: layer.pixel_type,
                    dimensions: layer.dimensions,
                    data,
                };
                Some((name, cached))
            })
            .collect();

        let cache = Self {
            identity,
            width: header.width(),
            height: header.height(),
            layers,
            report,
            last_access: Mutex::new(Instant::now()),
        };

        info!(
            "Built channel cache for {} ({} layers, {} bytes)",
            cache.identity.path,
            cache.layers.len(),
            cache.memory_size()
        );

        Ok(cache)
    }

    pub fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    /// Exact match on path and modification time.
    pub fn matches(&self, identity: &SourceIdentity) -> bool {
        self.identity == *identity
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn contains_layer(&self, name: &str) -> bool {
        self.layers.contains_key(name)
    }

    pub fn layer(&self, name: &str) -> Option<&CachedLayer> {
        self.layers.get(name)
    }

    /// Counters from the load that filled this cache.
    pub fn report(&self) -> LoadReport {
        self.report
    }

    /// Total bytes of pixel data held.
    pub fn memory_size(&self) -> usize {
        self.layers.values().map(|layer| layer.data.len()).sum()
    }

    /// Copy a cached layer into `dest` with rows `dest_row_bytes` apart.
    ///
    /// Returns `Ok(false)` if the layer is not cached. Rows are copied in
    /// parallel; no I/O is performed.
    pub fn copy_layer_to_buffer(
        &self,
        name: &str,
        dest: &mut [u8],
        dest_row_bytes: usize,
    ) -> Result<bool, DecodeError> {
        let Some(layer) = self.layers.get(name) else {
            return Ok(false);
        };

        let row_bytes =
            self.width as usize * layer.dimensions as usize * layer.pixel_type.element_size();
        let required = required_len(row_bytes, dest_row_bytes, self.height)?;
        if dest.len() < required {
            return Err(DecodeError::BufferTooSmall {
                required,
                actual: dest.len(),
            });
        }

        copy_rows(&layer.data, row_bytes, dest, dest_row_bytes, self.height);
        self.touch();

        Ok(true)
    }

    /// Time of the last access.
    pub fn last_access(&self) -> Instant {
        *self.last_access.lock()
    }

    /// Time since the last access.
    pub fn cache_age(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    /// Whether the cache has gone unused for longer than `timeout`.
    pub fn cache_is_stale(&self, timeout: Duration) -> bool {
        self.cache_age() > timeout
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    /// Pretend the last access happened `by` earlier.
    #[cfg(test)]
    pub(crate) fn backdate(&self, by: Duration) {
        let mut last = self.last_access.lock();
        if let Some(earlier) = last.checked_sub(by) {
            *last = earlier;
        }
    }
}

/// Copy `height` rows of `row_bytes` from a packed `src` into `dest` rows
/// that are `dest_row_bytes` apart.
///
/// The caller guarantees `dest` holds every row.
pub(crate) fn copy_rows(
    src: &[u8],
    row_bytes: usize,
    dest: &mut [u8],
    dest_row_bytes: usize,
    height: u32,
) {
    let height = height as usize;
    if row_bytes == 0 || height == 0 {
        return;
    }

    if dest_row_bytes == row_bytes {
        let len = row_bytes * height;
        dest[..len].copy_from_slice(&src[..len]);
        return;
    }

    dest.par_chunks_mut(dest_row_bytes)
        .zip(src.par_chunks(row_bytes))
        .take(height)
        .for_each(|(out, row)| out[..row_bytes].copy_from_slice(row));
}
