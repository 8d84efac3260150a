//! Tile decoding integration tests.
//!
//! Tests verify:
//! - Uncompressed and zlib-compressed frames decode to the same pixels
//! - Streaming extraction matches a full load
//! - Lookup results do not depend on the presence or health of the index
//! - Truncated and corrupt frames decode partially
//! - Cancellation is reported as its own outcome

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;

use vrimg_reader::error::DecodeError;
use vrimg_reader::format::vrimg::channel_layout;
use vrimg_reader::io::MemoryReader;
use vrimg_reader::{open_path, BufferMap, InputFile, PixelType};

use super::test_utils::{
    beauty_frame, beauty_ids, beauty_rgb, depth_frame, le_f32s, ne_f32s, write_temp, FileBuilder,
    IndexMode,
};

fn open(data: Vec<u8>) -> InputFile<MemoryReader> {
    InputFile::open(MemoryReader::new(data, "mem://frame")).unwrap()
}

fn extract(file: &InputFile<MemoryReader>, name: &str) -> Vec<u8> {
    let header = file.header();
    let layer = header.find_layer(name).unwrap();
    let row_bytes = layer.row_bytes(header.width());
    let mut out = vec![0u8; row_bytes * header.height() as usize];
    assert!(file.copy_layer_to_buffer(name, &mut out, row_bytes).unwrap());
    out
}

// =============================================================================
// Single-layer Frames
// =============================================================================

#[test]
fn test_uncompressed_depth_frame() {
    let (data, values) = depth_frame(false);
    let file = open(data);

    let layer = file.header().find_layer("Z").unwrap();
    assert_eq!(layer.pixel_type, PixelType::Float);
    assert_eq!(layer.dimensions, 1);

    assert_eq!(extract(&file, "Z"), ne_f32s(&values));
}

#[test]
fn test_compressed_depth_frame_matches_uncompressed() {
    let (plain, _) = depth_frame(false);
    let (packed, values) = depth_frame(true);
    assert_ne!(plain.len(), packed.len());

    let file = open(packed);
    assert!(file.header().is_compressed());

    let decoded = extract(&file, "Z");
    assert_eq!(decoded, extract(&open(plain), "Z"));
    assert_eq!(decoded, ne_f32s(&values));
}

#[test]
fn test_repeated_extraction_is_identical() {
    let file = open(beauty_frame(true, IndexMode::Valid));
    let first = extract(&file, "RGB color");
    let second = extract(&file, "RGB color");
    assert_eq!(first, second);
    assert_eq!(first, beauty_rgb());
}

// =============================================================================
// Multi-layer Frames
// =============================================================================

#[test]
fn test_full_load_then_copy_matches_streaming() {
    let data = beauty_frame(false, IndexMode::Absent);
    let streamed = open(data.clone());

    let mut loaded = open(data);
    let report = loaded.load_from_file(None).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.tiles_decoded, 6);
    assert!(loaded.is_resident("UV"));

    for name in ["RGB color", "Render ID", "UV"] {
        assert_eq!(extract(&loaded, name), extract(&streamed, name), "{name}");
    }
    assert_eq!(extract(&loaded, "Render ID"), beauty_ids());
}

#[test]
fn test_load_into_caller_buffers() {
    let mut file = open(beauty_frame(true, IndexMode::Absent));
    let mut buffers = BufferMap::new();
    for (name, layer) in file.header().layers() {
        buffers.insert(name.clone(), vec![0u8; layer.buffer_len(8, 4).unwrap()]);
    }

    let report = file.load_from_file(Some(&mut buffers)).unwrap();
    assert_eq!(report.tiles_decoded, 6);
    assert_eq!(buffers["Render ID"], beauty_ids());
    assert_eq!(buffers["RGB color"], beauty_rgb());
    assert!(!file.is_resident("Render ID"));
}

#[test]
fn test_padded_destination_rows() {
    let file = open(beauty_frame(false, IndexMode::Absent));
    let row_bytes = 8 * 4;
    let stride = row_bytes + 16;
    let mut out = vec![0xABu8; stride * 4];

    assert!(file
        .copy_layer_to_buffer("Render ID", &mut out, stride)
        .unwrap());

    let expected = beauty_ids();
    for y in 0..4 {
        let row = &out[y * stride..y * stride + row_bytes];
        assert_eq!(row, &expected[y * row_bytes..(y + 1) * row_bytes]);
        assert!(out[y * stride + row_bytes..(y + 1) * stride]
            .iter()
            .all(|&b| b == 0xAB));
    }
}

#[test]
fn test_unknown_layer_name_is_not_an_error() {
    let file = open(beauty_frame(false, IndexMode::Absent));
    let mut out = vec![0u8; 16];
    assert!(!file.copy_layer_to_buffer("Alpha", &mut out, 4).unwrap());
}

// =============================================================================
// Damaged Frames
// =============================================================================

#[test]
fn test_truncated_frame_decodes_leading_tiles() {
    let mut data = beauty_frame(false, IndexMode::Absent);
    data.truncate(data.len() - 8);

    let mut file = open(data);
    let report = file.load_from_file(None).unwrap();
    assert_eq!(report.tiles_decoded, 5);
    assert_eq!(report.tiles_failed, 1);
    assert!(!report.is_complete());

    // The first ID tile landed; the damaged UV tile left zeros behind
    let ids = extract(&file, "Render ID");
    assert_eq!(ids, beauty_ids());
}

#[test]
fn test_corrupt_compressed_tile_is_skipped() {
    let good: Vec<f32> = (0..16).map(|i| i as f32).collect();
    let data = FileBuilder::new(8, 2)
        .compressed(true)
        .channel(0, 1, "Z")
        .tile(0, 0, 0, 4, 2, &le_f32s(&good[..8]))
        .build();

    // Append a second tile whose payload is not a zlib stream
    let mut data = data;
    let bogus = b"not zlib at all";
    for w in [0x104u32, 40 + bogus.len() as u32, 0, 4, 0, 4, 2, 0, 0, 0] {
        data.extend_from_slice(&w.to_le_bytes());
    }
    data.extend_from_slice(bogus);

    let mut file = open(data);
    let report = file.load_from_file(None).unwrap();
    assert_eq!(report.tiles_decoded, 1);
    assert_eq!(report.tiles_failed, 1);

    let z = extract(&file, "Z");
    let row = 8 * 4;
    assert_eq!(&z[0..16], &ne_f32s(&good[0..4])[..]);
    assert!(z[16..row].iter().all(|&b| b == 0));
}

#[test]
fn test_tile_for_undeclared_layer_fails_load() {
    let data = FileBuilder::new(2, 1)
        .channel(0, 1, "Z")
        .tile(7, 0, 0, 2, 1, &le_f32s(&[1.0, 2.0]))
        .build();

    let mut file = open(data);
    assert!(matches!(
        file.load_from_file(None),
        Err(DecodeError::Format(_))
    ));
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn test_interrupt_cancels_load() {
    let file = open(beauty_frame(false, IndexMode::Absent));
    let mut file = file.with_interrupt(Arc::new(|| true));

    let err = file.load_from_file(None).unwrap_err();
    assert!(err.is_cancelled());
    assert!(!file.is_resident("RGB color"));
}

#[test]
fn test_interrupt_is_polled_during_load() {
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&polls);
    let file = open(beauty_frame(false, IndexMode::Absent))
        .with_interrupt(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            false
        }));
    let mut file = file;

    let report = file.load_from_file(None).unwrap();
    assert!(report.is_complete());
    assert!(polls.load(Ordering::SeqCst) > 0);
}

// =============================================================================
// On-disk Files
// =============================================================================

#[test]
fn test_open_path_reads_from_disk() {
    let temp = write_temp(&beauty_frame(true, IndexMode::Valid));
    let file = open_path(temp.path()).unwrap();

    assert!(file.identity().is_some());
    let mut out = vec![0u8; 8 * 4 * 4];
    assert!(file.copy_layer_to_buffer("Render ID", &mut out, 32).unwrap());
    assert_eq!(out, beauty_ids());
}

#[test]
fn test_open_path_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(open_path(dir.path().join("absent.vrimg")).is_err());
}

// =============================================================================
// Properties
// =============================================================================

fn index_mode() -> impl Strategy<Value = IndexMode> {
    prop_oneof![
        Just(IndexMode::Absent),
        Just(IndexMode::Valid),
        Just(IndexMode::Stale),
        Just(IndexMode::Truncated),
        (32u64..4096).prop_map(IndexMode::Bogus),
        Just(IndexMode::Bogus(u64::MAX - 8)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_index_does_not_change_results(mode in index_mode(), compressed in any::<bool>()) {
        let reference = open(beauty_frame(compressed, IndexMode::Absent));
        let file = open(beauty_frame(compressed, mode));

        prop_assert_eq!(file.header().width(), 8);
        prop_assert_eq!(file.header().height(), 4);
        prop_assert_eq!(
            file.header().layers().keys().collect::<Vec<_>>(),
            reference.header().layers().keys().collect::<Vec<_>>()
        );
        for name in ["RGB color", "Render ID", "UV"] {
            prop_assert_eq!(extract(&file, name), extract(&reference, name));
        }
    }

    #[test]
    fn prop_type_code_sets_dimensions(code in 0u32..16) {
        let data = FileBuilder::new(2, 2).channel(0, code, "L").build();
        let file = open(data);
        let layer = file.header().find_layer("L").unwrap();

        let expected = match code {
            2 | 5 => 3,
            3 => 2,
            _ => 1,
        };
        prop_assert_eq!(layer.dimensions, expected);
        prop_assert_eq!(layer.pixel_type == PixelType::Int, code == 4);
        prop_assert_eq!((layer.pixel_type, layer.dimensions), channel_layout(code));
    }
}
