//! Tile decode engine.
//!
//! This module reconstructs full layer buffers from the tile tags of a VRimg
//! file.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               InputFile                 │
//! │  load_from_file / copy_layer_to_buffer  │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  resident    │  │  ChannelCache   │  │
//! │  │  BufferMap   │  │  (attached)     │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ tag scan, one task per tile
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │     TileDecodeTask  ──>  TileSink       │
//! │     (inflate, byte order)  (layer rows) │
//! └─────────────────────────────────────────┘
//! ```

mod input_file;
mod task;

pub use input_file::{
    allocate_buffers, open_path, BufferMap, InputFile, Interrupt, LoadReport,
};
pub(crate) use input_file::required_len;
pub use task::{TileDecodeTask, TileSink};
