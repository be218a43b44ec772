use crate::yaz0::{self, Yaz0Codec};
use crate::*;
use binread::{BinRead, BinReaderExt};
use derivative::*;
use indexmap::IndexMap;
use log::debug;
use std::{borrow::Cow, io::Cursor};
use thiserror::Error;

#[derive(Error, Debug)]
/// An enum representing all possible errors when reading a SARC archive
pub enum SarcError {
    #[error("Invalid {0} value: \"{1}\"")]
    InvalidData(String, String),
    #[error("A string in the name table was not terminated before the file data")]
    UnterminatedStringError,
    #[error("Invalid UTF file name")]
    InvalidFileName(#[from] std::str::Utf8Error),
    #[error("File not found in archive: {0}")]
    FileNotFound(String),
    #[error("Archive is Yaz0 compressed but no Yaz0 codec was provided")]
    MissingYaz0Codec,
    #[error("Failed to decompress archive: {0}")]
    Decompress(std::io::Error),
    #[error(transparent)]
    ParseError(#[from] binread::Error),
}

pub type Result<T> = core::result::Result<T, SarcError>;

fn find_null(data: &[u8]) -> Result<usize> {
    data.iter()
        .position(|b| b == &0u8)
        .ok_or(SarcError::UnterminatedStringError)
}

fn read<T: BinRead>(endian: Endian, reader: &mut Cursor<&[u8]>) -> Result<T> {
    Ok(match endian {
        Endian::Big => reader.read_be()?,
        Endian::Little => reader.read_le()?,
    })
}

fn invalid(field: &str, value: impl ToString) -> SarcError {
    SarcError::InvalidData(field.to_owned(), value.to_string())
}

/// A file stored in an archive
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct File<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
}

#[derive(Derivative)]
#[derivative(Debug)]
/// A simple SARC archive reader
pub struct Sarc<'a> {
    hash_multiplier: u32,
    data_offset: u32,
    names_offset: u32,
    endian: Endian,
    /// Name -> (begin, end) relative to the data offset, in node table order
    nodes: IndexMap<String, (u32, u32)>,
    #[derivative(Debug = "ignore")]
    data: Cow<'a, [u8]>,
}

impl PartialEq for Sarc<'_> {
    /// Returns true if and only if the raw archive data is identical
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<'a> Sarc<'a> {
    /// Parses a SARC archive from binary data. The data must already be
    /// decompressed; see [`Sarc::open`] for Yaz0 input.
    pub fn new<T>(data: T) -> Result<Sarc<'a>>
    where
        T: Into<Cow<'a, [u8]>>,
    {
        let data = data.into();
        if data.len() < 8 || data[0..4] != SARC_MAGIC {
            return Err(invalid(
                "SARC magic",
                String::from_utf8_lossy(&data[..data.len().min(4)]),
            ));
        }
        let endian = Endian::from_bom([data[6], data[7]])
            .ok_or_else(|| invalid("SARC BOM", format!("{:02X}{:02X}", data[6], data[7])))?;

        let mut reader = Cursor::new(data.as_ref());
        let header: ResHeader = read(endian, &mut reader)?;
        if header.header_size as usize != 0x14 {
            return Err(invalid("SARC header size", header.header_size));
        }
        if header.version != SARC_VERSION {
            return Err(invalid("SARC version", header.version));
        }

        reader.set_position(header.header_size as u64);
        let fat_header: ResFatHeader = read(endian, &mut reader)?;
        if fat_header.magic != SFAT_MAGIC {
            return Err(invalid(
                "SFAT magic",
                String::from_utf8_lossy(&fat_header.magic),
            ));
        }
        if fat_header.header_size as usize != 0x0C {
            return Err(invalid("SFAT header size", fat_header.header_size));
        }
        if (fat_header.num_files >> 0xE) != 0 {
            return Err(invalid("SFAT file count", fat_header.num_files));
        }

        let num_files = fat_header.num_files as usize;
        let entries_offset = header.header_size as u64 + fat_header.header_size as u64;
        let mut entries: Vec<ResFatEntry> = Vec::with_capacity(num_files);
        reader.set_position(entries_offset);
        for _ in 0..num_files {
            entries.push(read(endian, &mut reader)?);
        }

        let fnt_header: ResFntHeader = read(endian, &mut reader)?;
        if fnt_header.magic != SFNT_MAGIC {
            return Err(invalid(
                "SFNT magic",
                String::from_utf8_lossy(&fnt_header.magic),
            ));
        }
        if fnt_header.header_size as usize != 0x08 {
            return Err(invalid("SFNT header size", fnt_header.header_size));
        }

        let names_offset = reader.position() as u32;
        let data_offset = header.data_offset;
        if data_offset < names_offset {
            return Err(invalid("name table offset", names_offset));
        }

        let mut nodes = IndexMap::with_capacity(num_files);
        for entry in entries {
            if entry.rel_name_opt_offset == 0 {
                return Err(invalid(
                    "file name (unnamed files are not supported)",
                    format!("{:#010x}", entry.name_hash),
                ));
            }
            let name_offset =
                names_offset as usize + (entry.rel_name_opt_offset & 0xFFFFFF) as usize * 4;
            if name_offset > data_offset as usize {
                return Err(invalid(
                    "name offset",
                    format!("{:#x} for {:#010x}", name_offset, entry.name_hash),
                ));
            }
            let name_region = data
                .get(name_offset..data_offset as usize)
                .ok_or(SarcError::UnterminatedStringError)?;
            let term_pos = find_null(name_region)?;
            let name = std::str::from_utf8(&name_region[..term_pos])?;

            let begin = data_offset as usize + entry.data_begin as usize;
            let end = data_offset as usize + entry.data_end as usize;
            if begin > end || end > data.len() {
                return Err(invalid(
                    "file data range",
                    format!("{:#x}..{:#x} for {}", begin, end, name),
                ));
            }
            nodes.insert(name.to_owned(), (entry.data_begin, entry.data_end));
        }

        debug!(
            "Parsed SARC: {:?} endian, {} files, data offset {:#x}",
            endian,
            nodes.len(),
            data_offset
        );
        Ok(Sarc {
            data,
            data_offset,
            endian,
            hash_multiplier: fat_header.hash_multiplier,
            names_offset,
            nodes,
        })
    }

    /// Parses `data` if it is a SARC archive or a Yaz0-compressed SARC archive.
    ///
    /// Returns `Ok(None)` when the data is neither, so callers can probe
    /// arbitrary files without handling parse errors for unrelated formats.
    pub fn open(data: &'a [u8], codec: Option<&dyn Yaz0Codec>) -> Result<Option<Sarc<'a>>> {
        if data.len() >= 4 && data[0..4] == SARC_MAGIC {
            return Sarc::new(data).map(Some);
        }
        if !yaz0::is_yaz0_sarc(data) {
            return Ok(None);
        }
        let codec = codec.ok_or(SarcError::MissingYaz0Codec)?;
        let decompressed = codec.decompress(data).map_err(SarcError::Decompress)?;
        Sarc::new(decompressed).map(Some)
    }

    /// Get the number of files that are stored in the archive
    pub fn file_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get the offset to the beginning of file data
    pub fn data_offset(&self) -> usize {
        self.data_offset as usize
    }

    /// Get the offset to the beginning of the name table
    pub fn names_offset(&self) -> usize {
        self.names_offset as usize
    }

    /// Get the archive endianness
    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn hash_multiplier(&self) -> u32 {
        self.hash_multiplier
    }

    /// The raw archive bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Names of all files, in node table order
    pub fn list_files(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|name| name.as_str())
    }

    fn node(&self, name: &str) -> Result<(u32, u32)> {
        self.nodes
            .get(name)
            .copied()
            .ok_or_else(|| SarcError::FileNotFound(name.to_owned()))
    }

    fn slice(&self, (begin, end): (u32, u32)) -> &[u8] {
        let data_offset = self.data_offset as usize;
        &self.data[data_offset + begin as usize..data_offset + end as usize]
    }

    /// Get the data of a file by exact name
    pub fn get_file_data(&self, name: &str) -> Result<&[u8]> {
        Ok(self.slice(self.node(name)?))
    }

    pub fn get_file_size(&self, name: &str) -> Result<usize> {
        let (begin, end) = self.node(name)?;
        Ok((end - begin) as usize)
    }

    /// Get the offset of a file's data, relative to the data offset
    pub fn get_file_data_offset(&self, name: &str) -> Result<u32> {
        Ok(self.node(name)?.0)
    }

    /// Get a file by name, if present
    pub fn get_file(&self, name: &str) -> Option<File<'_>> {
        self.nodes.get_key_value(name).map(|(name, node)| File {
            name: name.as_str(),
            data: self.slice(*node),
        })
    }

    /// Returns an iterator over the contained files
    pub fn files(&self) -> impl Iterator<Item = File<'_>> {
        self.nodes.iter().map(move |(name, node)| File {
            name: name.as_str(),
            data: self.slice(*node),
        })
    }

    /// Returns true if the named file is itself a SARC archive, either plain
    /// or Yaz0 compressed
    pub fn is_archive(&self, name: &str) -> Result<bool> {
        let data = self.get_file_data(name)?;
        Ok((data.len() >= 4 && data[0..4] == SARC_MAGIC) || yaz0::is_yaz0_sarc(data))
    }

    /// Guess the default data alignment that was used to create the archive
    pub fn guess_default_alignment(&self) -> u32 {
        const MIN_ALIGNMENT: u32 = 4;
        if self.nodes.len() <= 2 {
            return MIN_ALIGNMENT;
        }
        let gcd = self.nodes.values().fold(0u32, |gcd, (begin, _)| {
            num::integer::gcd(gcd, self.data_offset + begin)
        });

        if !is_valid_alignment(gcd) {
            // Not a power of 2, so the files are most likely not aligned.
            return MIN_ALIGNMENT;
        }
        gcd
    }

    /// File names with their data offsets, sorted by offset
    pub fn get_file_offsets(&self) -> Vec<(&str, u32)> {
        let mut offsets: Vec<(&str, u32)> = self
            .nodes
            .iter()
            .map(|(name, (begin, _))| (name.as_str(), *begin))
            .collect();
        offsets.sort_by_key(|(_, offset)| *offset);
        offsets
    }

    /// Returns true is each archive contains the same files
    pub fn are_files_equal(sarc1: &Sarc, sarc2: &Sarc) -> bool {
        if sarc1.file_count() != sarc2.file_count() {
            return false;
        }
        sarc1
            .files()
            .all(|file| sarc2.get_file(file.name).map_or(false, |other| other == file))
    }
}
