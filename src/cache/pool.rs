//! Bounded, age-ordered pool of channel caches.
//!
//! The pool keeps decoded snapshots of recently read files so that scrubbing
//! back and forth over a frame sequence does not re-decode every frame.
//!
//! # Eviction
//!
//! Caches are ordered by last access, oldest first. Making room for a new
//! cache evicts from the front, and the idle sweep evicts at most one stale
//! cache per tick so the cost of freeing large buffers is spread out.
//!
//! # Threading
//!
//! Every entry point takes `&mut self`; callers serialize access by owning the
//! pool (or wrapping it in their own lock). Cache handles are `Arc`s, so a
//! cache that is evicted while a file still uses it is freed once that file
//! drops it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::channel_cache::ChannelCache;
use crate::error::{Cancelled, DecodeError};
use crate::io::{RangeReader, SourceIdentity};
use crate::tile::InputFile;

/// Default number of caches kept.
pub const DEFAULT_MAX_CACHES: usize = 3;

/// Default idle time after which a cache may be evicted.
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(30);

/// Lookup and eviction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: usize,
    pub misses: usize,
    pub builds: usize,
    pub evictions: usize,
}

/// Bounded collection of [`ChannelCache`]s.
#[derive(Debug)]
pub struct CachePool {
    /// Oldest first after every sort
    caches: Vec<Arc<ChannelCache>>,
    max_caches: usize,
    stats: PoolStats,
}

impl Default for CachePool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CACHES)
    }
}

impl CachePool {
    /// Create an empty pool holding at most `max_caches` caches.
    ///
    /// A capacity of 0 disables caching.
    pub fn new(max_caches: usize) -> Self {
        Self {
            caches: Vec::new(),
            max_caches,
            stats: PoolStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_caches
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Total bytes of pixel data held by the pool.
    pub fn memory_size(&self) -> usize {
        self.caches.iter().map(|cache| cache.memory_size()).sum()
    }

    fn sort_by_age(&mut self) {
        self.caches.sort_by_key(|cache| cache.last_access());
    }

    fn evict_oldest(&mut self) {
        if self.caches.is_empty() {
            return;
        }
        let cache = self.caches.remove(0);
        self.stats.evictions += 1;
        info!(
            "Evicted channel cache for {} ({} bytes)",
            cache.identity().path,
            cache.memory_size()
        );
    }

    /// Set the capacity and evict oldest caches until the pool fits.
    ///
    /// `configure(0)` releases every cache.
    pub fn configure(&mut self, max_caches: usize) {
        self.max_caches = max_caches;
        self.sort_by_age();
        while self.caches.len() > self.max_caches {
            self.evict_oldest();
        }
    }

    /// Find the cache for an exact (path, modification time) match.
    pub fn find_cache(&self, identity: &SourceIdentity) -> Option<Arc<ChannelCache>> {
        self.caches
            .iter()
            .find(|cache| cache.matches(identity))
            .cloned()
    }

    /// Make room for one cache, then decode `file` into a new one.
    ///
    /// Returns `Ok(None)` when caching is disabled, when the source has no
    /// modification time, or when construction fails for any reason other
    /// than cancellation.
    pub fn add_cache<R: RangeReader>(
        &mut self,
        file: &InputFile<R>,
    ) -> Result<Option<Arc<ChannelCache>>, Cancelled> {
        let Some(identity) = file.identity() else {
            debug!("{}: no modification time, not caching", file.reader().identifier());
            return Ok(None);
        };

        self.sort_by_age();
        while !self.caches.is_empty() && self.caches.len() >= self.max_caches {
            self.evict_oldest();
        }

        if self.max_caches == 0 {
            return Ok(None);
        }

        match ChannelCache::build(file, identity) {
            Ok(cache) => {
                let cache = Arc::new(cache);
                self.caches.push(Arc::clone(&cache));
                self.stats.builds += 1;
                Ok(Some(cache))
            }
            Err(DecodeError::Cancelled) => Err(Cancelled),
            Err(e) => {
                warn!(
                    "{}: caching unavailable: {}",
                    file.reader().identifier(),
                    e
                );
                Ok(None)
            }
        }
    }

    /// Return the matching cache, building one on a miss when capacity allows.
    pub fn find_or_build<R: RangeReader>(
        &mut self,
        file: &InputFile<R>,
    ) -> Result<Option<Arc<ChannelCache>>, Cancelled> {
        let Some(identity) = file.identity() else {
            return Ok(None);
        };

        if let Some(cache) = self.find_cache(&identity) {
            self.stats.hits += 1;
            debug!("Channel cache hit for {}", identity.path);
            return Ok(Some(cache));
        }

        self.stats.misses += 1;
        debug!("Channel cache miss for {}", identity.path);

        if self.max_caches == 0 {
            return Ok(None);
        }
        self.add_cache(file)
    }

    /// Evict the oldest cache if it has been idle longer than `timeout`.
    ///
    /// Returns whether a cache was evicted. At most one cache goes per call.
    pub fn delete_stale_caches(&mut self, timeout: Duration) -> bool {
        self.sort_by_age();
        match self.caches.first() {
            Some(oldest) if oldest.cache_is_stale(timeout) => {
                self.evict_oldest();
                true
            }
            _ => false,
        }
    }

    /// Idle tick from the host. A zero timeout disables the sweep.
    pub fn on_idle(&mut self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return false;
        }
        self.delete_stale_caches(timeout)
    }

    /// Memory purge from the host: drop every cache, keep the capacity.
    pub fn purge(&mut self) {
        let max_caches = self.max_caches;
        self.configure(0);
        self.configure(max_caches);
    }

    /// Release every cache and disable caching.
    pub fn shutdown(&mut self) {
        self.configure(0);
    }
}
