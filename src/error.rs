use thiserror::Error;

/// I/O errors that can occur when reading from a byte source
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File could not be opened or read
    #[error("File error: {0}")]
    File(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(err.to_string()),
            _ => IoError::File(err.to_string()),
        }
    }
}

/// Errors in the structure of a VRimg container
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while reading the container
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// First word is not the VRimg magic
    #[error("Not a VRimg file: bad magic 0x{0:08X}")]
    BadMagic(u32),

    /// File is too small to contain the fixed preamble
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// A required tag was not found by the index or by a full scan
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// The channel list is present but declares no channels
    #[error("No channels in file")]
    NoChannels,

    /// A tile tag references a layer index the channel list does not declare
    #[error("Tile references unknown layer index {0}")]
    UnknownLayerIndex(u32),
}

/// Tile-local decode failures.
///
/// These never abort a load: the affected tile's destination region is left
/// as it was and decoding continues with the next tile.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Payload could not be read in full
    #[error("Short tile payload: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// zlib stream was corrupt or ended early
    #[error("Tile decompression failed: {0}")]
    Inflate(String),

    /// Tile rectangle does not fit inside the image
    #[error("Tile {width}x{height} at ({x}, {y}) lies outside the {image_width}x{image_height} image")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },

    /// Scratch buffer could not be allocated
    #[error("Could not allocate {0} bytes of tile scratch")]
    Alloc(usize),
}

/// Errors returned by load and extract calls.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// Container structure error
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Byte source error outside of speculative tag scanning
    #[error(transparent)]
    Io(#[from] IoError),

    /// A layer buffer could not be allocated
    #[error("Out of memory allocating {bytes} bytes for layer '{layer}'")]
    OutOfMemory { layer: String, bytes: usize },

    /// A caller-supplied buffer map has no (or a wrongly sized) buffer for a layer
    #[error("Buffer map has no usable buffer for layer '{0}'")]
    MissingBuffer(String),

    /// Destination buffer cannot hold the layer at the given row stride
    #[error("Destination buffer too small: need {required} bytes, got {actual}")]
    BufferTooSmall { required: usize, actual: usize },

    /// The host interrupt fired
    #[error("Cancelled by user")]
    Cancelled,
}

impl DecodeError {
    /// Whether this is the cancellation outcome rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DecodeError::Cancelled)
    }
}

/// Cancellation surfaced by the cache pool.
///
/// Every other cache construction failure is absorbed by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Cancelled by user")]
pub struct Cancelled;

impl From<Cancelled> for DecodeError {
    fn from(_: Cancelled) -> Self {
        DecodeError::Cancelled
    }
}
