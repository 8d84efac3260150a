//! Format parsing for VRimg files.
//!
//! Use [`detect::probe`] to check whether a byte source is a VRimg file and
//! [`vrimg::Header::read_from`] to parse it.

pub mod detect;
pub mod vrimg;

pub use detect::{is_vrimg_magic, probe, PROBE_LEN};
pub use vrimg::{Header, Layer, LayerMap, PixelType, TagId};
