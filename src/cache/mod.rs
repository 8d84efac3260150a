//! Decoded-layer caching across repeated opens.
//!
//! - [`ChannelCache`]: every layer of one file, decoded once
//! - [`CachePool`]: bounded, age-ordered set of channel caches

mod channel_cache;
mod pool;

pub use channel_cache::{CachedLayer, ChannelCache};
pub(crate) use channel_cache::copy_rows;
pub use pool::{CachePool, PoolStats, DEFAULT_CACHE_TIMEOUT, DEFAULT_MAX_CACHES};
