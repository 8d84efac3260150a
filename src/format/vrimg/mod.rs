//! VRimg container parsing.
//!
//! - [`tags`]: tag ids, tag headers and the sequential tag cursor
//! - [`header`]: preamble, required tags, layer map and the dual tag lookup
//! - [`byte_order`]: file-to-host word conversion for pixel data
//! - [`describe`]: metadata tag description

pub mod byte_order;
pub mod describe;
pub mod header;
pub mod tags;

pub use byte_order::{ByteOrder, FILE_BYTE_ORDER};
pub use describe::{
    describe, CameraInfo, ChannelDescription, FileDescription, Projection, RegionMeasure,
    RegionsInfo, RenderRegion, SceneInfo,
};
pub use header::{
    channel_layout, locate_tag, Header, Layer, LayerMap, PixelType, Preamble, ELEMENT_SIZE,
    FLAG_COMPRESSION, MAGIC,
};
pub use tags::{
    read_tag_at, LocatedTag, TagCursor, TagId, TagRead, TagRecord, TileRect,
    CHANNEL_DESCRIPTOR_SIZE, INDEX_ENTRY_SIZE, PREAMBLE_SIZE, TAG_HEADER_SIZE,
};
