//! Container parsing integration tests.
//!
//! Tests verify:
//! - Probing on-disk files by magic
//! - Header errors for damaged preambles and missing required tags
//! - Metadata description, both as text and as JSON

use vrimg_reader::error::FormatError;
use vrimg_reader::format::vrimg::locate_tag;
use vrimg_reader::io::{FileRangeReader, MemoryReader};
use vrimg_reader::{probe, Header, InputFile, TagId};

use super::test_utils::{
    beauty_frame, is_vrimg_magic, write_temp, CountingReader, FileBuilder, IndexMode,
};

// =============================================================================
// Probing
// =============================================================================

#[test]
fn test_probe_files_on_disk() {
    let frame = beauty_frame(false, IndexMode::Absent);
    assert!(is_vrimg_magic(&frame));

    let vrimg = write_temp(&frame);
    let exr = write_temp(&[0x76, 0x2F, 0x31, 0x01, 2, 0, 0, 0]);
    let tiny = write_temp(b"VR");

    assert!(probe(&FileRangeReader::open(vrimg.path()).unwrap()).unwrap());
    assert!(!probe(&FileRangeReader::open(exr.path()).unwrap()).unwrap());
    assert!(!probe(&FileRangeReader::open(tiny.path()).unwrap()).unwrap());
}

// =============================================================================
// Header Errors
// =============================================================================

#[test]
fn test_bad_magic() {
    let mut data = beauty_frame(false, IndexMode::Absent);
    data[0..4].copy_from_slice(b"\x89PNG");

    let result = Header::read_from(&MemoryReader::new(data, "mem://png"));
    assert!(matches!(result, Err(FormatError::BadMagic(_))));
}

#[test]
fn test_file_shorter_than_preamble() {
    let data = beauty_frame(false, IndexMode::Absent)[..20].to_vec();
    let result = Header::read_from(&MemoryReader::new(data, "mem://short"));
    assert!(matches!(result, Err(FormatError::FileTooSmall { .. })));
}

#[test]
fn test_preamble_only_is_missing_resolution() {
    let data = beauty_frame(false, IndexMode::Absent)[..32].to_vec();
    let result = InputFile::open(MemoryReader::new(data, "mem://preamble"));
    assert!(matches!(result, Err(FormatError::MissingTag("resolution"))));
}

#[test]
fn test_header_found_through_index_and_scan_agree() {
    let indexed = Header::read_from(&MemoryReader::new(
        beauty_frame(true, IndexMode::Valid),
        "mem://indexed",
    ))
    .unwrap();
    let scanned = Header::read_from(&MemoryReader::new(
        beauty_frame(true, IndexMode::Absent),
        "mem://scanned",
    ))
    .unwrap();

    assert!(indexed.index_offset().is_some());
    assert!(scanned.index_offset().is_none());
    assert_eq!(indexed.layers(), scanned.layers());
    assert_eq!(indexed.width(), scanned.width());
}

/// 32 single-row tiles followed by a scene tag.
fn long_frame(index: IndexMode) -> Vec<u8> {
    let mut builder = FileBuilder::new(4, 32).channel(0, 1, "Z");
    for y in 0..32 {
        builder = builder.tile(0, 0, y, 4, 1, &[0u8; 16]);
    }
    builder.scene(7, "shot_020").with_index(index).build()
}

#[test]
fn test_indexed_lookup_skips_tag_walk() {
    let indexed = CountingReader::new(long_frame(IndexMode::Valid), "mem://indexed");
    let index_offset = Header::read_from(&indexed).unwrap().index_offset();
    assert!(index_offset.is_some());

    indexed.reset();
    let via_index = locate_tag(&indexed, index_offset, TagId::SceneInfo, false)
        .unwrap()
        .unwrap();
    let index_reads = indexed.read_count();

    indexed.reset();
    let via_scan = locate_tag(&indexed, index_offset, TagId::SceneInfo, true)
        .unwrap()
        .unwrap();
    let scan_reads = indexed.read_count();

    assert_eq!(via_index, via_scan);
    // Index tag, entry table and the verified target
    assert_eq!(index_reads, 3);
    assert!(scan_reads > 32);
}

#[test]
fn test_unusable_index_costs_a_full_walk() {
    for mode in [IndexMode::Stale, IndexMode::Bogus(40)] {
        let reader = CountingReader::new(long_frame(mode), "mem://unusable");
        let index_offset = Header::read_from(&reader).unwrap().index_offset();

        reader.reset();
        let found = locate_tag(&reader, index_offset, TagId::SceneInfo, false)
            .unwrap()
            .unwrap();
        assert_eq!(found.tag.id, TagId::SceneInfo.as_u32());
        assert!(reader.read_count() > 32, "{:?}", mode);
    }
}

// =============================================================================
// Description
// =============================================================================

fn described_frame() -> Vec<u8> {
    FileBuilder::new(16, 9)
        .with_version(2, 1)
        .with_aspect(1.5)
        .compressed(true)
        .channel(0, 2, "RGB color")
        .channel(3, 1, "Z")
        .tile(3, 0, 0, 16, 9, &vec![0u8; 16 * 9 * 4])
        .render_region(2, 3, 10, 4)
        .scene(42, "shot_010")
        .note("first")
        .note("second")
        .with_index(IndexMode::Valid)
        .build()
}

#[test]
fn test_describe_collects_metadata() {
    let file = InputFile::open(MemoryReader::new(described_frame(), "mem://described")).unwrap();
    let description = file.describe().unwrap();

    assert_eq!(description.version, (2, 1));
    assert!(description.compressed);
    assert_eq!((description.width, description.height), (16, 9));
    assert_eq!(description.pixel_aspect_ratio, Some(1.5));
    assert_eq!(description.notes, vec!["first", "second"]);

    let scene = description.scene.as_ref().unwrap();
    assert_eq!(scene.render_time, 42);
    assert_eq!(scene.name, "shot_010");

    let region = description.render_region.unwrap();
    assert!(region.enabled);
    assert_eq!((region.xmin, region.ymin, region.width, region.height), (2, 3, 10, 4));

    let z = description.channels.iter().find(|c| c.name == "Z").unwrap();
    assert_eq!(z.type_label, "float");
    assert_eq!(z.tiles, 1);
    let rgb = description
        .channels
        .iter()
        .find(|c| c.name == "RGB color")
        .unwrap();
    assert_eq!(rgb.type_label, "float3");
    assert_eq!(rgb.tiles, 0);
}

#[test]
fn test_describe_as_json() {
    let file = InputFile::open(MemoryReader::new(described_frame(), "mem://json")).unwrap();
    let json = serde_json::to_value(file.describe().unwrap()).unwrap();

    assert_eq!(json["width"], 16);
    assert_eq!(json["scene"]["name"], "shot_010");
    assert_eq!(json["notes"][1], "second");
    assert!(json.get("camera").is_none());

    let channels = json["channels"].as_array().unwrap();
    assert_eq!(channels.len(), 2);
    assert!(channels
        .iter()
        .any(|c| c["name"] == "Z" && c["type"] == "float"));
}

#[test]
fn test_describe_text_mentions_channels() {
    let file = InputFile::open(MemoryReader::new(described_frame(), "mem://text")).unwrap();
    let text = file.describe().unwrap().to_string();

    assert!(text.contains("RGB color"));
    assert!(text.contains("shot_010"));
    assert!(text.contains("second"));
}

#[test]
fn test_truncated_metadata_is_skipped() {
    let mut data = FileBuilder::new(4, 4)
        .channel(0, 1, "Z")
        .render_region(0, 0, 4, 4)
        .build();
    data.truncate(data.len() - 6);

    let file = InputFile::open(MemoryReader::new(data, "mem://cut")).unwrap();
    let description = file.describe().unwrap();
    assert!(description.render_region.is_none());
    assert_eq!(description.channels.len(), 1);
}
