//! Human-readable description of a VRimg file's metadata tags.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::byte_order::FILE_BYTE_ORDER;
use super::header::{nul_terminated, Header};
use super::tags::{LocatedTag, TagCursor, TagId};
use crate::error::IoError;
use crate::io::RangeReader;

const RENDER_REGION_LEN: usize = 5 * 4;
const CAMERA_INFO_LEN: usize = 26 * 4;

/// Everything the file says about itself, in file order where it matters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileDescription {
    pub version: (u32, u32),
    pub compressed: bool,
    pub width: u32,
    pub height: u32,

    /// Raw aspect from the resolution tag, absent when the tag stores 0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixel_aspect_ratio: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub regions: Option<RegionsInfo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_region: Option<RenderRegion>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<CameraInfo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene: Option<SceneInfo>,

    pub notes: Vec<String>,
    pub channels: Vec<ChannelDescription>,

    /// Tags visited by the scan
    pub tag_count: usize,
}

/// How the regions-info width/height should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionMeasure {
    /// Maximum region size in pixels
    MaxSize,
    /// Number of regions across and down
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionsInfo {
    pub width: u32,
    pub height: u32,
    pub measure: RegionMeasure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RenderRegion {
    pub enabled: bool,
    pub xmin: i32,
    pub ymin: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    Perspective,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraInfo {
    pub transform: [[f32; 4]; 4],
    pub projection: Projection,
    pub aperture: f32,
    pub fov: f32,
    pub target_distance: f32,
    pub near_range: f32,
    pub far_range: f32,
    pub near_clip: f32,
    pub far_clip: f32,
    pub focal_length: f32,
    pub f_number: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneInfo {
    pub render_time: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelDescription {
    pub name: String,
    pub index: u32,

    #[serde(rename = "type")]
    pub type_label: &'static str,

    /// Tile tags addressed to this channel
    pub tiles: usize,
}

/// Scan every tag of the file and collect its metadata.
///
/// Metadata tags whose payload is truncated are skipped. Later camera, scene,
/// region and render-region tags replace earlier ones; notes accumulate.
pub fn describe<R: RangeReader + ?Sized>(
    reader: &R,
    header: &Header,
) -> Result<FileDescription, IoError> {
    let mut description = FileDescription {
        version: header.version(),
        compressed: header.is_compressed(),
        width: header.width(),
        height: header.height(),
        pixel_aspect_ratio: None,
        regions: None,
        render_region: None,
        camera: None,
        scene: None,
        notes: Vec::new(),
        channels: Vec::new(),
        tag_count: 0,
    };
    let mut tiles_per_layer: BTreeMap<u32, usize> = BTreeMap::new();

    for entry in TagCursor::new(reader) {
        let entry = entry?;
        description.tag_count += 1;

        let Some(kind) = entry.tag.kind() else {
            continue;
        };

        match kind {
            TagId::Resolution => {
                let bits = entry.tag.params[2];
                description.pixel_aspect_ratio = (bits != 0).then(|| f32::from_bits(bits));
            }
            TagId::RegionsInfo => {
                let p = &entry.tag.params;
                description.regions = Some(RegionsInfo {
                    width: p[0],
                    height: p[1],
                    measure: if p[2] != 0 {
                        RegionMeasure::Number
                    } else {
                        RegionMeasure::MaxSize
                    },
                });
            }
            TagId::RenderRegion => {
                if let Some(words) = payload_words(reader, &entry, RENDER_REGION_LEN)? {
                    description.render_region = Some(RenderRegion {
                        enabled: words[0] != 0,
                        xmin: words[1] as i32,
                        ymin: words[2] as i32,
                        width: words[3] as i32,
                        height: words[4] as i32,
                    });
                }
            }
            TagId::CameraInfo => {
                if let Some(words) = payload_words(reader, &entry, CAMERA_INFO_LEN)? {
                    description.camera = Some(parse_camera(&words));
                }
            }
            TagId::SceneInfo => {
                let payload = read_payload(reader, &entry)?;
                if payload.len() >= 4 {
                    description.scene = Some(SceneInfo {
                        render_time: FILE_BYTE_ORDER.read_u32(&payload[0..4]) as i32,
                        name: nul_terminated(&payload[4..]),
                    });
                }
            }
            TagId::Note => {
                let payload = read_payload(reader, &entry)?;
                description.notes.push(nul_terminated(&payload));
            }
            kind if kind.is_tile() => {
                *tiles_per_layer.entry(entry.tag.layer_index()).or_default() += 1;
            }
            _ => {}
        }
    }

    description.channels = header
        .layers()
        .values()
        .map(|layer| ChannelDescription {
            name: layer.name.clone(),
            index: layer.index,
            type_label: layer.type_label(),
            tiles: tiles_per_layer.get(&layer.index).copied().unwrap_or(0),
        })
        .collect();

    Ok(description)
}

/// Read the part of a tag's payload that lies inside the file.
fn read_payload<R: RangeReader + ?Sized>(
    reader: &R,
    entry: &LocatedTag,
) -> Result<bytes::Bytes, IoError> {
    let in_file = reader.size().saturating_sub(entry.payload_offset());
    let len = (entry.tag.payload_len() as u64).min(in_file) as usize;
    reader.read_exact_at(entry.payload_offset(), len)
}

/// Read a fixed-size payload as 32-bit words, or `None` if it is short.
fn payload_words<R: RangeReader + ?Sized>(
    reader: &R,
    entry: &LocatedTag,
    len: usize,
) -> Result<Option<Vec<u32>>, IoError> {
    let payload = read_payload(reader, entry)?;
    if payload.len() < len {
        return Ok(None);
    }
    Ok(Some(
        payload[..len]
            .chunks_exact(4)
            .map(|w| FILE_BYTE_ORDER.read_u32(w))
            .collect(),
    ))
}

fn parse_camera(words: &[u32]) -> CameraInfo {
    let f = |i: usize| f32::from_bits(words[i]);

    let mut transform = [[0.0f32; 4]; 4];
    for (y, row) in transform.iter_mut().enumerate() {
        for (x, value) in row.iter_mut().enumerate() {
            *value = f(y * 4 + x);
        }
    }

    CameraInfo {
        transform,
        projection: if words[16] != 0 {
            Projection::Parallel
        } else {
            Projection::Perspective
        },
        aperture: f(17),
        fov: f(18),
        target_distance: f(19),
        near_range: f(20),
        far_range: f(21),
        near_clip: f(22),
        far_clip: f(23),
        focal_length: f(24),
        f_number: f(25),
    }
}

impl fmt::Display for FileDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Version: {}.{}", self.version.0, self.version.1)?;
        writeln!(f, "Compressed: {}", self.compressed)?;

        write!(f, "Resolution {{ width: {}  height: {}", self.width, self.height)?;
        if let Some(aspect) = self.pixel_aspect_ratio {
            write!(f, "  pixelAspectRatio: {}", aspect)?;
        }
        writeln!(f, " }}")?;

        if let Some(r) = &self.regions {
            let measure = match r.measure {
                RegionMeasure::Number => "Number",
                RegionMeasure::MaxSize => "MaxSize",
            };
            writeln!(
                f,
                "Regions Info {{ regWidth: {}  regHeight: {}  whatsXY: {} }}",
                r.width, r.height, measure
            )?;
        }

        if let Some(r) = &self.render_region {
            writeln!(
                f,
                "Render Region {{ renderRegion: {}  xmin: {}  ymin: {}  width: {}  height: {} }}",
                r.enabled, r.xmin, r.ymin, r.width, r.height
            )?;
        }

        if let Some(c) = &self.camera {
            let projection = match c.projection {
                Projection::Perspective => "perspective",
                Projection::Parallel => "parallel",
            };
            writeln!(
                f,
                "Camera Info {{ projection: {}  aperture: {}  fov: {}  targetDistance: {}  \
                 nearRange: {}  farRange: {}  nearClip: {}  farClip: {}  focalLength: {}  fNumber: {} }}",
                projection,
                c.aperture,
                c.fov,
                c.target_distance,
                c.near_range,
                c.far_range,
                c.near_clip,
                c.far_clip,
                c.focal_length,
                c.f_number
            )?;
        }

        if let Some(s) = &self.scene {
            writeln!(
                f,
                "Scene {{ renderTime: {}  name: \"{}\" }}",
                s.render_time, s.name
            )?;
        }

        for note in &self.notes {
            writeln!(f, "Note: \"{}\"", note)?;
        }

        writeln!(f, "Channels:")?;
        for c in &self.channels {
            writeln!(f, "  {} ({}) [{} tiles]", c.name, c.type_label, c.tiles)?;
        }

        Ok(())
    }
}
