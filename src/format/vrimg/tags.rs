//! VRimg tag vocabulary and the tag-table reader.
//!
//! A VRimg file is a 32-byte preamble followed by a flat sequence of tags.
//! Every tag starts with a 40-byte header:
//!
//! ```text
//! Bytes  0-3:  Tag id
//! Bytes  4-7:  Tag size (header + payload)
//! Bytes 8-39:  p0..p7, meaning depends on the tag id
//! ```
//!
//! The next tag starts at `offset + tag size`.

use tracing::warn;

use crate::error::IoError;
use super::byte_order::FILE_BYTE_ORDER;
use crate::io::RangeReader;

// =============================================================================
// Constants
// =============================================================================

/// Size of the fixed preamble at the start of every file.
pub const PREAMBLE_SIZE: usize = 32;

/// Size of a tag header in bytes.
pub const TAG_HEADER_SIZE: usize = 40;

/// Size of one index table entry: a tag-shaped record plus a 64-bit offset.
pub const INDEX_ENTRY_SIZE: usize = TAG_HEADER_SIZE + 8;

/// Size of one channel descriptor in the channel-info payload.
pub const CHANNEL_DESCRIPTOR_SIZE: usize = 84;

/// Length of the NUL-padded name inside a channel descriptor.
pub const CHANNEL_NAME_LEN: usize = 64;

// =============================================================================
// Tag IDs
// =============================================================================

/// Tag ids written by the renderer.
///
/// Ids not listed here are skipped by every reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TagId {
    /// Image width, height and pixel aspect ratio
    Resolution = 0x100,

    /// Bucket layout used while rendering
    RegionsInfo = 0x101,

    /// Tile of 3-component float data (RGB or XYZ)
    Chan3f = 0x102,

    /// Tile of 2-component float data
    Chan2f = 0x103,

    /// Tile of single float data
    ChanF = 0x104,

    /// Tile of 32-bit integer data
    ChanI = 0x105,

    /// Channel list
    ChannelInfo = 0x106,

    /// Offset table for fast tag lookup
    Index = 0x107,

    /// Camera transform and lens parameters
    CameraInfo = 0x108,

    /// Region render (data window)
    RenderRegion = 0x109,

    /// Embedded preview image
    Preview = 0x10A,

    /// Render time and scene name
    SceneInfo = 0x10B,

    /// Image stamp
    Stamp = 0x10C,

    /// User note
    Note = 0x10D,
}

impl TagId {
    /// Get the numeric id.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Create a TagId from its numeric value.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x100 => Some(TagId::Resolution),
            0x101 => Some(TagId::RegionsInfo),
            0x102 => Some(TagId::Chan3f),
            0x103 => Some(TagId::Chan2f),
            0x104 => Some(TagId::ChanF),
            0x105 => Some(TagId::ChanI),
            0x106 => Some(TagId::ChannelInfo),
            0x107 => Some(TagId::Index),
            0x108 => Some(TagId::CameraInfo),
            0x109 => Some(TagId::RenderRegion),
            0x10A => Some(TagId::Preview),
            0x10B => Some(TagId::SceneInfo),
            0x10C => Some(TagId::Stamp),
            0x10D => Some(TagId::Note),
            _ => None,
        }
    }

    /// Whether tags with this id carry tile pixel data.
    #[inline]
    pub const fn is_tile(self) -> bool {
        matches!(
            self,
            TagId::Chan3f | TagId::Chan2f | TagId::ChanF | TagId::ChanI
        )
    }

    /// Human-readable name used in logs and error messages.
    pub const fn name(self) -> &'static str {
        match self {
            TagId::Resolution => "resolution",
            TagId::RegionsInfo => "regions info",
            TagId::Chan3f => "float3 tile",
            TagId::Chan2f => "float2 tile",
            TagId::ChanF => "float tile",
            TagId::ChanI => "int tile",
            TagId::ChannelInfo => "channel info",
            TagId::Index => "index",
            TagId::CameraInfo => "camera info",
            TagId::RenderRegion => "render region",
            TagId::Preview => "preview",
            TagId::SceneInfo => "scene info",
            TagId::Stamp => "stamp",
            TagId::Note => "note",
        }
    }
}

// =============================================================================
// TagRecord
// =============================================================================

/// Rectangle covered by one tile tag, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRect {
    /// Whether the rectangle lies entirely inside a `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = self.x as u64 + self.width as u64;
        let bottom = self.y as u64 + self.height as u64;
        right <= width as u64 && bottom <= height as u64
    }
}

/// A parsed 40-byte tag header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagRecord {
    /// Raw tag id
    pub id: u32,

    /// Total size including this header
    pub size: u32,

    /// Generic fields p0..p7
    pub params: [u32; 8],
}

impl TagRecord {
    /// Parse a tag header from raw bytes.
    ///
    /// # Panics
    /// Panics if `bytes` has fewer than 40 bytes.
    pub fn parse(bytes: &[u8]) -> Self {
        let mut params = [0u32; 8];
        for (i, param) in params.iter_mut().enumerate() {
            let start = 8 + i * 4;
            *param = FILE_BYTE_ORDER.read_u32(&bytes[start..start + 4]);
        }

        Self {
            id: FILE_BYTE_ORDER.read_u32(&bytes[0..4]),
            size: FILE_BYTE_ORDER.read_u32(&bytes[4..8]),
            params,
        }
    }

    /// Known tag id, if any.
    #[inline]
    pub fn kind(&self) -> Option<TagId> {
        TagId::from_u32(self.id)
    }

    /// Whether this tag carries tile pixel data.
    #[inline]
    pub fn is_tile(&self) -> bool {
        self.kind().is_some_and(TagId::is_tile)
    }

    /// Payload length in bytes (tag size minus header).
    #[inline]
    pub fn payload_len(&self) -> usize {
        (self.size as usize).saturating_sub(TAG_HEADER_SIZE)
    }

    /// Tile rectangle (p1..p4). Only meaningful for tile tags.
    #[inline]
    pub fn tile_rect(&self) -> TileRect {
        TileRect {
            x: self.params[1],
            y: self.params[2],
            width: self.params[3],
            height: self.params[4],
        }
    }

    /// Owning layer index (p7). Only meaningful for tile tags.
    #[inline]
    pub fn layer_index(&self) -> u32 {
        self.params[7]
    }
}

/// A tag header together with the file offset it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedTag {
    pub offset: u64,
    pub tag: TagRecord,
}

impl LocatedTag {
    /// File offset of the first payload byte.
    #[inline]
    pub fn payload_offset(&self) -> u64 {
        self.offset + TAG_HEADER_SIZE as u64
    }

    /// File offset of the following tag.
    #[inline]
    pub fn next_offset(&self) -> u64 {
        self.offset + self.tag.size as u64
    }
}

// =============================================================================
// Tag reading
// =============================================================================

/// Outcome of reading one tag header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagRead {
    /// A complete tag header
    Tag(TagRecord),
    /// No further tag: the header would run past the end of the file, or the
    /// declared size cannot hold its own header
    End,
}

/// Read the tag header at `offset`.
///
/// Running out of file is reported as [`TagRead::End`]; only genuine read
/// failures are errors.
pub fn read_tag_at<R: RangeReader + ?Sized>(reader: &R, offset: u64) -> Result<TagRead, IoError> {
    let fits = offset
        .checked_add(TAG_HEADER_SIZE as u64)
        .is_some_and(|end| end <= reader.size());
    if !fits {
        return Ok(TagRead::End);
    }

    let bytes = reader.read_exact_at(offset, TAG_HEADER_SIZE)?;
    let tag = TagRecord::parse(&bytes);

    if (tag.size as usize) < TAG_HEADER_SIZE {
        warn!(
            "{}: tag 0x{:X} at offset {} declares size {}, ending tag table",
            reader.identifier(),
            tag.id,
            offset,
            tag.size
        );
        return Ok(TagRead::End);
    }

    Ok(TagRead::Tag(tag))
}

/// Sequential walk over the tag table, starting right after the preamble.
///
/// Yields every tag in file order and stops at the first [`TagRead::End`] or
/// after the first error.
pub struct TagCursor<'a, R: ?Sized> {
    reader: &'a R,
    offset: u64,
    done: bool,
}

impl<'a, R: RangeReader + ?Sized> TagCursor<'a, R> {
    pub fn new(reader: &'a R) -> Self {
        Self::at(reader, PREAMBLE_SIZE as u64)
    }

    /// Start walking at an arbitrary tag boundary.
    pub fn at(reader: &'a R, offset: u64) -> Self {
        Self {
            reader,
            offset,
            done: false,
        }
    }
}

impl<R: RangeReader + ?Sized> Iterator for TagCursor<'_, R> {
    type Item = Result<LocatedTag, IoError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match read_tag_at(self.reader, self.offset) {
            Ok(TagRead::Tag(tag)) => {
                let located = LocatedTag {
                    offset: self.offset,
                    tag,
                };
                self.offset = located.next_offset();
                Some(Ok(located))
            }
            Ok(TagRead::End) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
