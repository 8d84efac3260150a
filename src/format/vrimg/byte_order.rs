use crate::io::{read_u32_be, read_u32_le, read_u64_le};

/// Byte order of 32-bit words.
///
/// VRimg files are always written little-endian. Pixel data is converted to
/// the host's order when it is copied into a layer buffer, so on little-endian
/// hosts the conversion is the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian (Intel)
    LittleEndian,
    /// Big-endian (Motorola)
    BigEndian,
}

/// Byte order of every word stored in a VRimg file.
pub const FILE_BYTE_ORDER: ByteOrder = ByteOrder::LittleEndian;

impl ByteOrder {
    /// Byte order of the host.
    pub const NATIVE: ByteOrder = if cfg!(target_endian = "big") {
        ByteOrder::BigEndian
    } else {
        ByteOrder::LittleEndian
    };

    /// Read a u32 from a byte slice using this byte order.
    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            ByteOrder::LittleEndian => read_u32_le(bytes),
            ByteOrder::BigEndian => read_u32_be(bytes),
        }
    }

    /// Read a u64 from a byte slice using this byte order.
    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => read_u64_le(bytes),
            ByteOrder::BigEndian => {
                (read_u32_be(&bytes[0..4]) as u64) << 32 | read_u32_be(&bytes[4..8]) as u64
            }
        }
    }

    /// Whether words in this order need swapping to be read natively.
    #[inline]
    pub fn needs_swap(self) -> bool {
        self != Self::NATIVE
    }

    /// Convert 32-bit words stored in this byte order to host order, in place.
    ///
    /// A trailing partial word is left as it is.
    pub fn words_to_native(self, bytes: &mut [u8]) {
        if !self.needs_swap() {
            return;
        }
        for word in bytes.chunks_exact_mut(4) {
            word.reverse();
        }
    }

    /// Copy 32-bit words from `src` (in this byte order) into `dst` in host
    /// order.
    ///
    /// # Panics
    /// Panics if the slices differ in length.
    #[inline]
    pub fn copy_words_to_native(self, src: &[u8], dst: &mut [u8]) {
        dst.copy_from_slice(src);
        self.words_to_native(dst);
    }
}
