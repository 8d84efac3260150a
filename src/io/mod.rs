mod block_cache;
mod file_reader;
mod range_reader;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};
pub use file_reader::{FileRangeReader, MemoryReader};
pub use range_reader::{
    read_u32_be, read_u32_le, read_u64_le, RangeReader, SourceIdentity,
};
