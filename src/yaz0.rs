//! Yaz0 wrapper detection and the codec seam.
//!
//! The compressor itself lives outside this crate. Callers that need to read
//! `.s*` archives or write compressed output provide a [`Yaz0Codec`].
use std::fmt::Debug;
use std::io;

pub const YAZ0_MAGIC: &[u8; 4] = b"Yaz0";

/// A Yaz0 (de)compressor.
pub trait Yaz0Codec: Debug {
    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    /// Compresses `data`, storing `alignment` in the Yaz0 header so the game
    /// allocates a suitably aligned buffer for the decompressed archive.
    fn compress(&self, data: &[u8], alignment: u32) -> io::Result<Vec<u8>>;
}

/// Returns true if `data` starts with the Yaz0 magic.
pub fn is_yaz0(data: &[u8]) -> bool {
    data.len() >= 4 && &data[0..4] == YAZ0_MAGIC
}

/// Returns true if `data` is a Yaz0 stream whose first data group begins with
/// a SARC magic. The first group always starts with literal bytes, so the
/// fourcc can be checked without decompressing.
pub fn is_yaz0_sarc(data: &[u8]) -> bool {
    is_yaz0(data) && data.len() >= 0x15 && &data[0x11..0x15] == b"SARC"
}
