//! Reading and writing of Nintendo SARC archives.
//!
//! [`Sarc`] parses an archive in memory and gives access to its files by name.
//! [`SarcWriter`] builds archives that are byte-identical to the ones produced
//! by Nintendo's own tooling, including the per-file alignment rules that the
//! game's resource system expects.
//!
//! Yaz0 compression is not implemented here; plug a codec in through
//! [`Yaz0Codec`] when compressed archives need to be read or written.
use binread::BinRead;
use binwrite::BinWrite;
pub mod align;
mod parse;
pub mod repack;
mod writer;
pub mod yaz0;
pub use align::{EnvFileInfo, ResourceInfo};
pub use parse::{File, Sarc, SarcError};
pub use repack::{test_repack, RepackReport};
pub use writer::{FileLayout, Layout, SarcWriteError, SarcWriter};
pub use yaz0::Yaz0Codec;

const SARC_MAGIC: [u8; 4] = *b"SARC";
const SFAT_MAGIC: [u8; 4] = *b"SFAT";
const SFNT_MAGIC: [u8; 4] = *b"SFNT";

const SARC_VERSION: u16 = 0x0100;
/// The BOM value as written in the archive's own byte order.
const BOM: u16 = 0xFEFF;
const SFAT_NODE_SIZE: usize = 0x10;

/// Multiplier used by every known official archive.
pub const DEFAULT_HASH_MULTIPLIER: u32 = 0x65;

/// Hashes a file name the way the SFAT node table expects.
///
/// Bytes are added as *signed* chars, so names containing bytes >= 0x80 hash
/// differently than a naive unsigned implementation would.
pub fn hash_name(multiplier: u32, name: &str) -> u32 {
    name.bytes().fold(0, |hash, b| {
        hash.wrapping_mul(multiplier).wrapping_add(b as i8 as u32)
    })
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    /// Interprets the two raw BOM bytes found at offset 6 of the header.
    fn from_bom(bom: [u8; 2]) -> Option<Endian> {
        match bom {
            [0xFE, 0xFF] => Some(Endian::Big),
            [0xFF, 0xFE] => Some(Endian::Little),
            _ => None,
        }
    }

    fn writer_options(self) -> binwrite::WriterOption {
        let mut opts = binwrite::WriterOption::default();
        opts.endian = match self {
            Endian::Big => binwrite::Endian::Big,
            Endian::Little => binwrite::Endian::Little,
        };
        opts
    }
}

/// Size = 0x14
#[derive(Debug, Eq, PartialEq, Copy, Clone, BinRead, BinWrite)]
struct ResHeader {
    magic: [u8; 4],
    header_size: u16,
    bom: u16,
    file_size: u32,
    data_offset: u32,
    version: u16,
    reserved: u16,
}

/// Size = 0x0C
#[derive(Debug, Copy, Clone, Eq, PartialEq, BinRead, BinWrite)]
struct ResFatHeader {
    magic: [u8; 4],
    header_size: u16,
    num_files: u16,
    hash_multiplier: u32,
}

/// Size = 0x10
#[derive(Debug, PartialEq, Eq, Copy, Clone, BinRead, BinWrite)]
struct ResFatEntry {
    name_hash: u32,
    rel_name_opt_offset: u32,
    data_begin: u32,
    data_end: u32,
}

/// Size = 0x8
#[derive(Debug, PartialEq, Eq, Copy, Clone, BinRead, BinWrite)]
struct ResFntHeader {
    magic: [u8; 4],
    header_size: u16,
    reserved: u16,
}

fn is_valid_alignment(alignment: u32) -> bool {
    alignment != 0 && (alignment & (alignment - 1)) == 0
}

/// Rounds `pos` up with two's complement masking, which is also what the
/// official tools do for the odd non power of two value found in bflim footers.
fn align(pos: usize, alignment: u32) -> usize {
    ((pos as i64 + alignment as i64 - 1) & (0 - alignment as i64)) as usize
}
