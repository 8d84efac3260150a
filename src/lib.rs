//! # vrimg-reader
//!
//! A reader for VRimg files, the tagged multi-layer frame format written by
//! offline renderers.
//!
//! A VRimg file holds any number of named layers (color, depth, normals and
//! other render elements), each stored as rectangular tiles that may be
//! zlib-compressed. This library parses the container, reconstructs full
//! layers by decoding tiles in parallel, and keeps decoded frames in a small
//! pool so that scrubbing a frame sequence does not decode the same file twice.
//!
//! ## Features
//!
//! - **Tolerant parsing**: works on truncated and partially written frames
//! - **Index-accelerated lookup**: uses the tag index when present, scans otherwise
//! - **Parallel tile decoding**: one rayon task per tile, cancellable by the host
//! - **Channel caching**: decoded frames keyed by path and modification time
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`io`] - Byte sources with block caching
//! - [`mod@format`] - Container detection, tags, header and metadata
//! - [`tile`] - Parallel tile decoding into layer buffers
//! - [`cache`] - Channel caches and the cache pool
//! - [`config`] - CLI configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use vrimg_reader::open_path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = open_path("frame_0001.vrimg")?;
//!     let header = file.header();
//!     let layer = header.find_layer("RGB color").ok_or("no color layer")?;
//!
//!     let row_bytes = layer.row_bytes(header.width());
//!     let mut rgb = vec![0u8; row_bytes * header.height() as usize];
//!     file.copy_layer_to_buffer("RGB color", &mut rgb, row_bytes)?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod tile;

// Re-export commonly used types
pub use cache::{CachePool, CachedLayer, ChannelCache, PoolStats};
pub use config::{Cli, Command};
pub use error::{Cancelled, DecodeError, FormatError, IoError, TileError};
pub use format::vrimg::{FileDescription, Header, Layer, LayerMap, PixelType, TagId};
pub use format::{is_vrimg_magic, probe};
pub use io::{BlockCache, FileRangeReader, MemoryReader, RangeReader, SourceIdentity};
pub use tile::{open_path, BufferMap, InputFile, Interrupt, LoadReport};
