//! VRimg preamble, required tags and the dual tag lookup.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::byte_order::FILE_BYTE_ORDER;
use super::tags::{
    read_tag_at, LocatedTag, TagCursor, TagId, TagRead, TagRecord, CHANNEL_DESCRIPTOR_SIZE,
    CHANNEL_NAME_LEN, INDEX_ENTRY_SIZE, PREAMBLE_SIZE, TAG_HEADER_SIZE,
};
use crate::error::{FormatError, IoError};
use crate::io::RangeReader;

// =============================================================================
// Constants
// =============================================================================

/// Magic word at the start of every VRimg file ("VRIM" as stored on disk).
pub const MAGIC: u32 = u32::from_le_bytes(*b"VRIM");

/// Preamble flag: tile payloads are zlib-compressed.
pub const FLAG_COMPRESSION: u32 = 0x0000_0001;

/// Size of every pixel element (f32 or i32) in bytes.
pub const ELEMENT_SIZE: usize = 4;

// =============================================================================
// Layer
// =============================================================================

/// Element type of a layer's pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    /// 32-bit IEEE float
    Float,
    /// 32-bit signed integer
    Int,
}

impl PixelType {
    /// Size of one element in bytes.
    #[inline]
    pub const fn element_size(self) -> usize {
        ELEMENT_SIZE
    }

    pub const fn name(self) -> &'static str {
        match self {
            PixelType::Float => "float",
            PixelType::Int => "int",
        }
    }
}

/// Map a channel descriptor's type code to element type and dimension count.
///
/// Codes 1 and 4 hold one element (4 is integer), code 3 holds two, codes 2
/// and 5 hold three. Unknown codes are read as a single float.
pub fn channel_layout(type_code: u32) -> (PixelType, u32) {
    match type_code {
        4 => (PixelType::Int, 1),
        2 | 5 => (PixelType::Float, 3),
        3 => (PixelType::Float, 2),
        _ => (PixelType::Float, 1),
    }
}

/// One named channel group of the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    /// Unique name from the channel list
    pub name: String,

    /// Index used by tile tags (p7) to address this layer
    pub index: u32,

    /// Element type
    pub pixel_type: PixelType,

    /// Elements per pixel (1-3)
    pub dimensions: u32,

    /// Raw type code from the descriptor
    pub type_code: u32,

    /// Raw alias word from the descriptor
    pub alias: i32,

    /// Raw flags word from the descriptor
    pub flags: u32,
}

impl Layer {
    /// Bytes per pixel.
    #[inline]
    pub fn pixel_bytes(&self) -> usize {
        self.dimensions as usize * self.pixel_type.element_size()
    }

    /// Bytes in one full-width row of this layer.
    #[inline]
    pub fn row_bytes(&self, width: u32) -> usize {
        width as usize * self.pixel_bytes()
    }

    /// Bytes in the full layer buffer, or `None` if that overflows `usize`.
    pub fn buffer_len(&self, width: u32, height: u32) -> Option<usize> {
        self.row_bytes(width).checked_mul(height as usize)
    }

    /// Short type label: `float`, `float2`, `float3` or `int`.
    pub fn type_label(&self) -> &'static str {
        match (self.pixel_type, self.dimensions) {
            (PixelType::Int, _) => "int",
            (PixelType::Float, 2) => "float2",
            (PixelType::Float, 3) => "float3",
            (PixelType::Float, _) => "float",
        }
    }

    /// Parse one 84-byte channel descriptor.
    fn parse_descriptor(bytes: &[u8]) -> Self {
        let index = FILE_BYTE_ORDER.read_u32(&bytes[0..4]);
        let type_code = FILE_BYTE_ORDER.read_u32(&bytes[4..8]);
        let alias = FILE_BYTE_ORDER.read_u32(&bytes[8..12]) as i32;
        let flags = FILE_BYTE_ORDER.read_u32(&bytes[12..16]);
        let name = nul_terminated(&bytes[16..16 + CHANNEL_NAME_LEN]);
        let (pixel_type, dimensions) = channel_layout(type_code);

        Self {
            name,
            index,
            pixel_type,
            dimensions,
            type_code,
            alias,
            flags,
        }
    }
}

/// Layers keyed by name.
pub type LayerMap = BTreeMap<String, Layer>;

/// Decode a NUL-padded text field.
pub(crate) fn nul_terminated(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

// =============================================================================
// Preamble
// =============================================================================

/// The fixed 32-byte file preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    pub version_major: u32,
    pub version_minor: u32,

    /// Absolute offset of the index tag, 0 when the file has none
    pub index_offset: u64,

    pub flags: u32,
}

impl Preamble {
    /// Parse the preamble from the first 32 bytes of a file.
    ///
    /// # Errors
    /// - `FileTooSmall` if fewer than 32 bytes are given
    /// - `BadMagic` if the first word is not [`MAGIC`]
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < PREAMBLE_SIZE {
            return Err(FormatError::FileTooSmall {
                required: PREAMBLE_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let word = |i: usize| FILE_BYTE_ORDER.read_u32(&bytes[i * 4..i * 4 + 4]);

        let magic = word(0);
        if magic != MAGIC {
            return Err(FormatError::BadMagic(magic));
        }

        let index_low = word(3) as u64;
        let index_high = word(4) as u64;

        Ok(Self {
            version_major: word(1),
            version_minor: word(2),
            index_offset: (index_high << 32) | index_low,
            flags: word(5),
        })
    }
}

// =============================================================================
// Header
// =============================================================================

/// Parsed VRimg header: image geometry plus the layer map.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    width: u32,
    height: u32,
    pixel_aspect_ratio: f32,
    flags: u32,
    version_major: u32,
    version_minor: u32,
    index_offset: Option<u64>,
    layers: LayerMap,
}

impl Header {
    /// Parse the preamble and the required resolution and channel-info tags.
    ///
    /// # Errors
    /// - `FileTooSmall` / `BadMagic` for a bad preamble
    /// - `MissingTag` if either required tag is found by neither lookup
    /// - `NoChannels` if the channel list is empty
    /// - `Io` for read failures
    pub fn read_from<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, FormatError> {
        let size = reader.size();
        if size < PREAMBLE_SIZE as u64 {
            return Err(FormatError::FileTooSmall {
                required: PREAMBLE_SIZE as u64,
                actual: size,
            });
        }

        let bytes = reader.read_exact_at(0, PREAMBLE_SIZE)?;
        let preamble = Preamble::parse(&bytes)?;
        let index_offset = (preamble.index_offset != 0).then_some(preamble.index_offset);

        let resolution = locate_tag(reader, index_offset, TagId::Resolution, false)?
            .ok_or(FormatError::MissingTag(TagId::Resolution.name()))?;
        let (width, height, pixel_aspect_ratio) = parse_resolution(&resolution.tag);

        let channel_info = locate_tag(reader, index_offset, TagId::ChannelInfo, false)?
            .ok_or(FormatError::MissingTag(TagId::ChannelInfo.name()))?;
        let layers = read_channel_list(reader, &channel_info)?;

        if layers.is_empty() {
            return Err(FormatError::NoChannels);
        }

        debug!(
            "{}: {}x{} VRimg v{}.{}, {} layers, compressed={}, index={:?}",
            reader.identifier(),
            width,
            height,
            preamble.version_major,
            preamble.version_minor,
            layers.len(),
            preamble.flags & FLAG_COMPRESSION != 0,
            index_offset
        );

        Ok(Self {
            width,
            height,
            pixel_aspect_ratio,
            flags: preamble.flags,
            version_major: preamble.version_major,
            version_minor: preamble.version_minor,
            index_offset,
            layers,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_aspect_ratio(&self) -> f32 {
        self.pixel_aspect_ratio
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Whether tile payloads are zlib-compressed.
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSION != 0
    }

    /// Format version as (major, minor).
    pub fn version(&self) -> (u32, u32) {
        (self.version_major, self.version_minor)
    }

    /// Offset of the index tag, if the preamble records one.
    pub fn index_offset(&self) -> Option<u64> {
        self.index_offset
    }

    pub fn layers(&self) -> &LayerMap {
        &self.layers
    }

    /// Look up a layer by name.
    pub fn find_layer(&self, name: &str) -> Option<&Layer> {
        self.layers.get(name)
    }

    /// Look up a layer by the index tile tags use to address it.
    pub fn layer_by_index(&self, index: u32) -> Option<&Layer> {
        self.layers.values().find(|layer| layer.index == index)
    }

    /// Find the first tag with the given id.
    ///
    /// See [`locate_tag`].
    pub fn locate_tag<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        id: TagId,
        brute_force: bool,
    ) -> Result<Option<LocatedTag>, IoError> {
        locate_tag(reader, self.index_offset, id, brute_force)
    }
}

fn parse_resolution(tag: &TagRecord) -> (u32, u32, f32) {
    let aspect = match tag.params[2] {
        0 => 1.0,
        bits => f32::from_bits(bits),
    };
    (tag.params[0], tag.params[1], aspect)
}

/// Read the channel descriptors that follow a channel-info tag header.
///
/// Descriptors that would run past the tag or the file are dropped.
fn read_channel_list<R: RangeReader + ?Sized>(
    reader: &R,
    located: &LocatedTag,
) -> Result<LayerMap, FormatError> {
    let tag = &located.tag;
    let count = tag.params[0] as usize;
    let stride = match tag.params[1] as usize {
        s if s >= CHANNEL_DESCRIPTOR_SIZE => s,
        _ => CHANNEL_DESCRIPTOR_SIZE,
    };

    let in_file = reader.size().saturating_sub(located.payload_offset());
    let available = (tag.payload_len() as u64).min(in_file) as usize;

    let fitting = if available >= CHANNEL_DESCRIPTOR_SIZE {
        (available - CHANNEL_DESCRIPTOR_SIZE) / stride + 1
    } else {
        0
    };
    let usable = count.min(fitting);
    if usable < count {
        warn!(
            "{}: channel list declares {} channels but only {} fit",
            reader.identifier(),
            count,
            usable
        );
    }

    let mut layers = LayerMap::new();
    if usable == 0 {
        return Ok(layers);
    }

    let span = (usable - 1) * stride + CHANNEL_DESCRIPTOR_SIZE;
    let payload = reader.read_exact_at(located.payload_offset(), span)?;

    for i in 0..usable {
        let start = i * stride;
        let layer = Layer::parse_descriptor(&payload[start..start + CHANNEL_DESCRIPTOR_SIZE]);
        layers.insert(layer.name.clone(), layer);
    }

    Ok(layers)
}

// =============================================================================
// Tag lookup
// =============================================================================

/// Find the first tag with the given id.
///
/// Unless `brute_force` is set, the index table at `index_offset` is consulted
/// first. Every index hit is verified against the tag header at the listed
/// offset; when the index is absent, unreadable as an index, stale or simply
/// lacks the id, the lookup falls back to a sequential scan from the first tag.
///
/// Returns `Ok(None)` only when the scan runs off the end of the file without
/// a match.
pub fn locate_tag<R: RangeReader + ?Sized>(
    reader: &R,
    index_offset: Option<u64>,
    id: TagId,
    brute_force: bool,
) -> Result<Option<LocatedTag>, IoError> {
    if let (Some(offset), false) = (index_offset, brute_force) {
        if let Some(found) = locate_via_index(reader, offset, id)? {
            return Ok(Some(found));
        }
        debug!(
            "{}: {} tag not in index, scanning",
            reader.identifier(),
            id.name()
        );
    }

    locate_by_scan(reader, id)
}

fn locate_via_index<R: RangeReader + ?Sized>(
    reader: &R,
    index_offset: u64,
    id: TagId,
) -> Result<Option<LocatedTag>, IoError> {
    let index = match read_tag_at(reader, index_offset)? {
        TagRead::Tag(tag) if tag.kind() == Some(TagId::Index) => tag,
        _ => {
            warn!(
                "{}: no index tag at offset {}, ignoring index",
                reader.identifier(),
                index_offset
            );
            return Ok(None);
        }
    };

    let entries_start = index_offset + TAG_HEADER_SIZE as u64;
    let declared = index.params[0] as u64;
    let fitting = reader.size().saturating_sub(entries_start) / INDEX_ENTRY_SIZE as u64;
    let count = declared.min(fitting) as usize;
    if (count as u64) < declared {
        warn!(
            "{}: index declares {} entries, only {} present",
            reader.identifier(),
            declared,
            count
        );
    }
    if count == 0 {
        return Ok(None);
    }

    let entries = reader.read_exact_at(entries_start, count * INDEX_ENTRY_SIZE)?;

    for entry in entries.chunks_exact(INDEX_ENTRY_SIZE) {
        if FILE_BYTE_ORDER.read_u32(&entry[0..4]) != id.as_u32() {
            continue;
        }

        let offset = FILE_BYTE_ORDER.read_u64(&entry[TAG_HEADER_SIZE..INDEX_ENTRY_SIZE]);
        match read_tag_at(reader, offset)? {
            TagRead::Tag(tag) if tag.id == id.as_u32() => {
                return Ok(Some(LocatedTag { offset, tag }));
            }
            _ => debug!(
                "{}: stale index entry for {} tag at offset {}",
                reader.identifier(),
                id.name(),
                offset
            ),
        }
    }

    Ok(None)
}

fn locate_by_scan<R: RangeReader + ?Sized>(
    reader: &R,
    id: TagId,
) -> Result<Option<LocatedTag>, IoError> {
    for entry in TagCursor::new(reader) {
        let entry = entry?;
        if entry.tag.id == id.as_u32() {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}
