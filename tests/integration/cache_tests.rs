//! Channel cache integration tests.
//!
//! Tests verify:
//! - A second open of a cached frame copies layers without reading the file
//! - The pool never holds more caches than its capacity
//! - Changing the modification time invalidates a cache
//! - Stale caches are evicted one per idle tick

use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, SystemTime};

use vrimg_reader::{CachePool, ChannelCache, InputFile};

use super::test_utils::{beauty_frame, beauty_ids, depth_frame, ne_f32s, CountingReader, IndexMode};

fn frame_time(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
}

fn open_frame(path: &str, modified: SystemTime) -> (InputFile<CountingReader>, CountingReader) {
    let reader = CountingReader::new(beauty_frame(true, IndexMode::Valid), path)
        .with_modified(modified);
    let observer = reader.clone();
    (InputFile::open(reader).unwrap(), observer)
}

// =============================================================================
// Cached Reopen
// =============================================================================

#[test]
fn test_second_open_reads_nothing() {
    let (data, values) = depth_frame(false);
    let modified = frame_time(0);
    let mut pool = CachePool::new(1);

    let first = InputFile::open(
        CountingReader::new(data.clone(), "/shots/depth.0001.vrimg").with_modified(modified),
    )
    .unwrap();
    let cache = pool.find_or_build(&first).unwrap().unwrap();
    assert_eq!(pool.stats().builds, 1);
    drop(first);

    let reader =
        CountingReader::new(data, "/shots/depth.0001.vrimg").with_modified(modified);
    let observer = reader.clone();
    let mut second = InputFile::open(reader).unwrap();

    observer.reset();
    let hit = pool.find_or_build(&second).unwrap().unwrap();
    assert!(Arc::ptr_eq(&hit, &cache));
    second.attach_cache(hit);
    assert!(second.is_resident("Z"));

    let mut out = vec![0u8; 64 * 64 * 4];
    assert!(second.copy_layer_to_buffer("Z", &mut out, 64 * 4).unwrap());
    assert_eq!(observer.read_count(), 0);
    assert_eq!(out, ne_f32s(&values));
    assert_eq!(pool.stats().hits, 1);
}

#[test]
fn test_uncached_copy_reads_the_file() {
    let (file, observer) = open_frame("/shots/beauty.0001.vrimg", frame_time(0));
    observer.reset();

    let mut out = vec![0u8; 8 * 4 * 4];
    assert!(file.copy_layer_to_buffer("Render ID", &mut out, 32).unwrap());
    assert!(observer.read_count() > 0);
    assert_eq!(out, beauty_ids());
}

#[test]
fn test_touched_file_is_rebuilt() {
    let mut pool = CachePool::new(2);

    let (file, _) = open_frame("/shots/beauty.0001.vrimg", frame_time(0));
    let original = pool.find_or_build(&file).unwrap().unwrap();

    let (file, _) = open_frame("/shots/beauty.0001.vrimg", frame_time(5));
    let rebuilt = pool.find_or_build(&file).unwrap().unwrap();

    assert!(!Arc::ptr_eq(&original, &rebuilt));
    assert_eq!(pool.stats().builds, 2);
    assert_eq!(pool.stats().misses, 2);
}

#[test]
fn test_source_without_modification_time_is_not_cached() {
    let mut pool = CachePool::new(3);
    let file = InputFile::open(CountingReader::new(
        beauty_frame(false, IndexMode::Absent),
        "pipe:0",
    ))
    .unwrap();

    assert!(pool.find_or_build(&file).unwrap().is_none());
    assert!(pool.is_empty());
}

// =============================================================================
// Capacity
// =============================================================================

#[test]
fn test_pool_never_exceeds_capacity() {
    let mut pool = CachePool::new(3);

    for frame in 0..10u64 {
        let path = format!("/shots/beauty.{frame:04}.vrimg");
        let (file, _) = open_frame(&path, frame_time(frame));
        pool.find_or_build(&file).unwrap().unwrap();
        assert!(pool.len() <= 3);
    }

    assert_eq!(pool.len(), 3);
    assert_eq!(pool.stats().builds, 10);
    assert_eq!(pool.stats().evictions, 7);
}

#[test]
fn test_configure_zero_frees_every_cache() {
    let mut pool = CachePool::new(3);
    let mut held: Vec<Weak<ChannelCache>> = Vec::new();

    for frame in 0..3u64 {
        let path = format!("/shots/beauty.{frame:04}.vrimg");
        let (file, _) = open_frame(&path, frame_time(frame));
        let cache = pool.find_or_build(&file).unwrap().unwrap();
        held.push(Arc::downgrade(&cache));
    }
    assert!(pool.memory_size() > 0);

    pool.configure(0);
    assert!(pool.is_empty());
    assert!(held.iter().all(|weak| weak.upgrade().is_none()));

    // Disabled pool builds nothing
    let (file, _) = open_frame("/shots/beauty.0099.vrimg", frame_time(99));
    assert!(pool.find_or_build(&file).unwrap().is_none());
    assert!(pool.is_empty());
}

#[test]
fn test_evicted_cache_outlives_pool_entry_while_attached() {
    let mut pool = CachePool::new(1);

    let (mut file, _) = open_frame("/shots/beauty.0001.vrimg", frame_time(1));
    let cache = pool.find_or_build(&file).unwrap().unwrap();
    file.attach_cache(cache);

    let (other, _) = open_frame("/shots/beauty.0002.vrimg", frame_time(2));
    pool.find_or_build(&other).unwrap().unwrap();
    assert_eq!(pool.stats().evictions, 1);

    let mut out = vec![0u8; 8 * 4 * 4];
    assert!(file.copy_layer_to_buffer("Render ID", &mut out, 32).unwrap());
    assert_eq!(out, beauty_ids());
}

// =============================================================================
// Idle Eviction
// =============================================================================

#[test]
fn test_idle_tick_evicts_one_stale_cache() {
    let mut pool = CachePool::new(3);
    for frame in 0..2u64 {
        let path = format!("/shots/beauty.{frame:04}.vrimg");
        let (file, _) = open_frame(&path, frame_time(frame));
        pool.find_or_build(&file).unwrap().unwrap();
    }

    // Long timeout: nothing is stale yet
    assert!(!pool.delete_stale_caches(Duration::from_secs(3600)));
    assert_eq!(pool.len(), 2);

    thread::sleep(Duration::from_millis(20));

    assert!(pool.on_idle(Duration::from_millis(5)));
    assert_eq!(pool.len(), 1);
    assert!(pool.on_idle(Duration::from_millis(5)));
    assert!(pool.is_empty());
    assert!(!pool.on_idle(Duration::from_millis(5)));
}

#[test]
fn test_zero_timeout_disables_idle_sweep() {
    let mut pool = CachePool::new(3);
    let (file, _) = open_frame("/shots/beauty.0001.vrimg", frame_time(1));
    pool.find_or_build(&file).unwrap().unwrap();

    thread::sleep(Duration::from_millis(5));
    assert!(!pool.on_idle(Duration::ZERO));
    assert_eq!(pool.len(), 1);
}

#[test]
fn test_cancelled_build_is_surfaced() {
    let mut pool = CachePool::new(2);
    let (file, _) = open_frame("/shots/beauty.0001.vrimg", frame_time(1));
    let file = file.with_interrupt(Arc::new(|| true));

    assert!(pool.find_or_build(&file).is_err());
    assert!(pool.is_empty());
}
