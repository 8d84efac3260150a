//! Full-image loads and single-layer extraction.
//!
//! # Decode Flow
//!
//! ```text
//! scanning thread                         rayon workers
//! ───────────────                         ─────────────
//! for each tag:
//!   poll interrupt
//!   tile tag? ── no ──> skip by tag size
//!      │ yes
//!   read payload ──── spawn ────────────> inflate (if compressed)
//!                                         lock layer sink, copy rows
//! end of table
//! join (scope exit) <──────────────────── all tasks finished
//! ```
//!
//! No task outlives the call that spawned it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use super::task::{TileDecodeTask, TileSink};
use crate::cache::{copy_rows, ChannelCache};
use crate::error::{DecodeError, FormatError, IoError};
use crate::format::vrimg::{describe, FileDescription, Header, LocatedTag, TagCursor};
use crate::io::{BlockCache, FileRangeReader, RangeReader, SourceIdentity};

/// Decoded layer buffers keyed by layer name.
///
/// Each buffer holds `width * height * dimensions` native-order 32-bit
/// elements, rows packed without padding.
pub type BufferMap = HashMap<String, Vec<u8>>;

/// Host-supplied cancellation predicate.
///
/// Polled once per tag by the scanning thread and once by every tile task
/// before it starts.
pub trait Interrupt: Send + Sync {
    fn should_abort(&self) -> bool;
}

impl<F> Interrupt for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn should_abort(&self) -> bool {
        self()
    }
}

/// Outcome counters of one load or extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Tags read from the table, tile or not
    pub tags_visited: usize,
    /// Tiles written to their destination
    pub tiles_decoded: usize,
    /// Tiles skipped because of truncation, corruption or bad geometry
    pub tiles_failed: usize,
    /// The tag walk hit a read error before the end of the table, so tiles
    /// after it were never seen
    pub scan_failed: bool,
}

impl LoadReport {
    /// Whether the whole tag table was walked and every tile decoded cleanly.
    pub fn is_complete(&self) -> bool {
        self.tiles_failed == 0 && !self.scan_failed
    }
}

/// Allocate a zeroed buffer for every layer of `header`.
///
/// # Errors
/// `OutOfMemory` for the first buffer that cannot be reserved. Buffers
/// allocated before it are released.
pub fn allocate_buffers(header: &Header) -> Result<BufferMap, DecodeError> {
    let mut buffers = BufferMap::with_capacity(header.layers().len());

    for layer in header.layers().values() {
        let len = layer
            .buffer_len(header.width(), header.height())
            .ok_or_else(|| DecodeError::OutOfMemory {
                layer: layer.name.clone(),
                bytes: usize::MAX,
            })?;

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|_| DecodeError::OutOfMemory {
                layer: layer.name.clone(),
                bytes: len,
            })?;
        buffer.resize(len, 0);

        buffers.insert(layer.name.clone(), buffer);
    }

    Ok(buffers)
}

/// Bytes a destination needs to hold `height` rows of `row_bytes` at
/// `stride`.
pub(crate) fn required_len(
    row_bytes: usize,
    stride: usize,
    height: u32,
) -> Result<usize, DecodeError> {
    if stride < row_bytes {
        return Err(DecodeError::BufferTooSmall {
            required: row_bytes,
            actual: stride,
        });
    }
    match height.checked_sub(1) {
        None => Ok(0),
        Some(last) => (last as usize)
            .checked_mul(stride)
            .and_then(|n| n.checked_add(row_bytes))
            .ok_or(DecodeError::BufferTooSmall {
                required: usize::MAX,
                actual: 0,
            }),
    }
}

/// An open VRimg file.
///
/// Holds the parsed header for the lifetime of the byte source. Layers are
/// served, in order of preference, from buffers decoded by
/// [`load_from_file`](Self::load_from_file), from an attached
/// [`ChannelCache`], or by re-streaming the file's tiles.
pub struct InputFile<R> {
    reader: R,
    header: Header,
    resident: BufferMap,
    cache: Option<Arc<ChannelCache>>,
    interrupt: Option<Arc<dyn Interrupt>>,
}

/// Open a local file through a block cache.
pub fn open_path(
    path: impl AsRef<Path>,
) -> Result<InputFile<BlockCache<FileRangeReader>>, FormatError> {
    let reader = FileRangeReader::open(path)?;
    InputFile::open(BlockCache::new(reader))
}

impl<R: RangeReader> InputFile<R> {
    /// Parse the header of `reader`.
    pub fn open(reader: R) -> Result<Self, FormatError> {
        let header = Header::read_from(&reader)?;
        Ok(Self {
            reader,
            header,
            resident: BufferMap::new(),
            cache: None,
            interrupt: None,
        })
    }

    /// Install a cancellation predicate for subsequent loads.
    pub fn with_interrupt(mut self, interrupt: Arc<dyn Interrupt>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Cache identity (path and modification time) of the source.
    pub fn identity(&self) -> Option<SourceIdentity> {
        self.reader.identity()
    }

    /// Serve layers from a decoded snapshot of this file.
    pub fn attach_cache(&mut self, cache: Arc<ChannelCache>) {
        self.cache = Some(cache);
    }

    pub fn cache(&self) -> Option<&Arc<ChannelCache>> {
        self.cache.as_ref()
    }

    /// Whether a layer can be copied without I/O.
    pub fn is_resident(&self, name: &str) -> bool {
        self.resident.contains_key(name)
            || self
                .cache
                .as_ref()
                .is_some_and(|cache| cache.contains_layer(name))
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|interrupt| interrupt.should_abort())
    }

    /// Decode every layer of the file.
    ///
    /// With `buffers` set, tiles are written into the caller's map, which must
    /// hold a correctly sized buffer for every layer. Without it, buffers are
    /// allocated here and kept resident, so later
    /// [`copy_layer_to_buffer`](Self::copy_layer_to_buffer) calls need no I/O.
    ///
    /// Tile-local failures are counted in the report, never returned.
    ///
    /// # Errors
    /// - `MissingBuffer` if a supplied map lacks a layer
    /// - `OutOfMemory` if a buffer cannot be allocated
    /// - `Format(UnknownLayerIndex)` if a tile addresses an undeclared layer
    /// - `Cancelled` if the interrupt fired
    pub fn load_from_file(
        &mut self,
        buffers: Option<&mut BufferMap>,
    ) -> Result<LoadReport, DecodeError> {
        match buffers {
            Some(buffers) => {
                self.check_buffers(buffers)?;
                self.decode_into(buffers)
            }
            None => {
                let mut buffers = allocate_buffers(&self.header)?;
                let report = self.decode_into(&mut buffers)?;
                self.resident = buffers;
                Ok(report)
            }
        }
    }

    fn check_buffers(&self, buffers: &BufferMap) -> Result<(), DecodeError> {
        let (width, height) = (self.header.width(), self.header.height());
        for layer in self.header.layers().values() {
            let expected = layer.buffer_len(width, height);
            match buffers.get(&layer.name) {
                Some(buffer) if Some(buffer.len()) == expected => {}
                _ => return Err(DecodeError::MissingBuffer(layer.name.clone())),
            }
        }
        Ok(())
    }

    /// Decode every layer into `buffers`, which must already be sized.
    pub(crate) fn decode_into(&self, buffers: &mut BufferMap) -> Result<LoadReport, DecodeError> {
        let (width, height) = (self.header.width(), self.header.height());

        let sinks: HashMap<u32, TileSink<'_>> = buffers
            .iter_mut()
            .filter_map(|(name, buffer)| {
                let layer = self.header.find_layer(name)?;
                let sink = TileSink::new(
                    buffer.as_mut_slice(),
                    layer.row_bytes(width),
                    layer.pixel_bytes(),
                    width,
                    height,
                );
                Some((layer.index, sink))
            })
            .collect();

        let report = self.stream_tiles(&sinks, None)?;
        debug!(
            "{}: loaded {} layers, {} tiles decoded, {} failed, {} tags{}",
            self.reader.identifier(),
            sinks.len(),
            report.tiles_decoded,
            report.tiles_failed,
            report.tags_visited,
            if report.scan_failed { ", scan cut short" } else { "" }
        );
        Ok(report)
    }

    /// Copy one layer into `dest`, whose rows are `dest_row_bytes` apart.
    ///
    /// Returns `Ok(false)` without touching `dest` if the file has no layer
    /// called `name`.
    ///
    /// # Errors
    /// - `BufferTooSmall` if the stride is narrower than a layer row or `dest`
    ///   cannot hold every row
    /// - `Cancelled` if the interrupt fired while streaming
    pub fn copy_layer_to_buffer(
        &self,
        name: &str,
        dest: &mut [u8],
        dest_row_bytes: usize,
    ) -> Result<bool, DecodeError> {
        let Some(layer) = self.header.find_layer(name) else {
            return Ok(false);
        };

        let (width, height) = (self.header.width(), self.header.height());
        let row_bytes = layer.row_bytes(width);
        let required = required_len(row_bytes, dest_row_bytes, height)?;
        if dest.len() < required {
            return Err(DecodeError::BufferTooSmall {
                required,
                actual: dest.len(),
            });
        }

        if let Some(buffer) = self.resident.get(name) {
            copy_rows(buffer, row_bytes, dest, dest_row_bytes, height);
            return Ok(true);
        }

        if let Some(cache) = &self.cache {
            if cache.copy_layer_to_buffer(name, dest, dest_row_bytes)? {
                return Ok(true);
            }
        }

        let mut sinks = HashMap::with_capacity(1);
        sinks.insert(
            layer.index,
            TileSink::new(dest, dest_row_bytes, layer.pixel_bytes(), width, height),
        );
        let report = self.stream_tiles(&sinks, Some(layer.index))?;
        debug!(
            "{}: extracted layer '{}', {} tiles decoded, {} failed",
            self.reader.identifier(),
            name,
            report.tiles_decoded,
            report.tiles_failed
        );

        Ok(true)
    }

    /// Describe every metadata tag of the file.
    pub fn describe(&self) -> Result<FileDescription, IoError> {
        describe(&self.reader, &self.header)
    }

    /// Walk the tag table and decode every tile that has a sink.
    ///
    /// With `only_layer` set, tiles of other layers are skipped without
    /// checking their layer index.
    fn stream_tiles(
        &self,
        sinks: &HashMap<u32, TileSink<'_>>,
        only_layer: Option<u32>,
    ) -> Result<LoadReport, DecodeError> {
        let identifier = self.reader.identifier();
        let compressed = self.header.is_compressed();
        let interrupt = self.interrupt.as_deref();

        let stop = AtomicBool::new(false);
        let cancelled = AtomicBool::new(false);
        let decoded = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        let scanned = rayon::scope(|scope| -> Result<(usize, bool), DecodeError> {
            let mut visited = 0;
            let mut scan_failed = false;

            for entry in TagCursor::new(&self.reader) {
                if self.interrupted() {
                    cancelled.store(true, Ordering::Relaxed);
                    stop.store(true, Ordering::Relaxed);
                    return Err(DecodeError::Cancelled);
                }

                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("{}: tag scan stopped early: {}", identifier, e);
                        scan_failed = true;
                        break;
                    }
                };
                visited += 1;

                if !entry.tag.is_tile() {
                    continue;
                }
                let index = entry.tag.layer_index();
                if only_layer.is_some_and(|wanted| wanted != index) {
                    continue;
                }
                let Some(sink) = sinks.get(&index) else {
                    stop.store(true, Ordering::Relaxed);
                    return Err(FormatError::UnknownLayerIndex(index).into());
                };

                let payload = match read_payload(&self.reader, &entry) {
                    Ok(payload) => payload,
                    Err(e) => {
                        debug!(
                            "{}: tile at offset {} unreadable: {}",
                            identifier, entry.offset, e
                        );
                        failed.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                };

                let task = TileDecodeTask::new(entry, payload, compressed);
                let (stop, cancelled, decoded, failed) = (&stop, &cancelled, &decoded, &failed);

                scope.spawn(move |_| {
                    if stop.load(Ordering::Relaxed) {
                        return;
                    }
                    if interrupt.is_some_and(|i| i.should_abort()) {
                        cancelled.store(true, Ordering::Relaxed);
                        stop.store(true, Ordering::Relaxed);
                        return;
                    }

                    match task.run(sink) {
                        Ok(()) => {
                            decoded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            debug!(
                                "{}: tile at offset {} skipped: {}",
                                identifier,
                                task.offset(),
                                e
                            );
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }

            Ok((visited, scan_failed))
        });

        if cancelled.load(Ordering::Relaxed) {
            debug!("{}: load cancelled", identifier);
            return Err(DecodeError::Cancelled);
        }

        let (tags_visited, scan_failed) = scanned?;
        Ok(LoadReport {
            tags_visited,
            tiles_decoded: decoded.load(Ordering::Relaxed),
            tiles_failed: failed.load(Ordering::Relaxed),
            scan_failed,
        })
    }
}

/// Read the part of a tag's payload that lies inside the file.
fn read_payload<R: RangeReader + ?Sized>(
    reader: &R,
    entry: &LocatedTag,
) -> Result<Bytes, IoError> {
    let in_file = reader.size().saturating_sub(entry.payload_offset());
    let len = (entry.tag.payload_len() as u64).min(in_file) as usize;
    reader.read_exact_at(entry.payload_offset(), len)
}
