use crate::align::{self, ResourceInfo};
use crate::parse::SarcError;
use crate::yaz0::{self, Yaz0Codec};
use crate::*;
use binwrite::BinWrite;
use derivative::*;
use log::{debug, trace, warn};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;

type Result<T> = core::result::Result<T, SarcWriteError>;

const NESTED_SARC_ALIGNMENT: u32 = 0x2000;
/// The top two bits of the SFAT file count are reserved.
const MAX_FILE_COUNT: usize = 0x3FFF;

#[derive(Debug, Error)]
pub enum SarcWriteError {
    #[error("{0} is not a valid alignment")]
    InvalidAlignment(u32),
    #[error("\"{0}\" is not a valid file extension")]
    InvalidExtension(String),
    #[error("File not found in writer: {0}")]
    FileNotFound(String),
    #[error("Too many files for one archive: {0}")]
    TooManyFiles(usize),
    #[error("Invalid resource info: {0}")]
    InvalidResourceInfo(#[from] serde_json::Error),
    #[error(transparent)]
    Read(#[from] SarcError),
    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, PartialEq, Eq, Clone)]
struct FileEntry {
    name: String,
    data: Vec<u8>,
}

/// Placement of one file, as it will be written.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct FileLayout<'a> {
    pub name: &'a str,
    pub hash: u32,
    pub alignment: u32,
    /// Offset into the name table
    pub name_offset: usize,
    /// Data range, relative to the data offset
    pub data_begin: usize,
    pub data_end: usize,
}

/// Placement of every file in hash order, plus the alignment of the data
/// region as a whole.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Layout<'a> {
    pub files: Vec<FileLayout<'a>>,
    pub data_alignment: u32,
    pub names_size: usize,
    pub data_size: usize,
}

impl Layout<'_> {
    fn names_offset(&self) -> usize {
        0x14 + 0x0C + SFAT_NODE_SIZE * self.files.len() + 0x08
    }

    /// Absolute offset of the data region
    pub fn data_offset(&self) -> usize {
        align(self.names_offset() + self.names_size, self.data_alignment)
    }

    pub fn file_size(&self) -> usize {
        self.data_offset() + self.data_size
    }
}

#[derive(Derivative, Clone)]
#[derivative(Debug, PartialEq)]
/// Builds SARC archives.
///
/// Files are keyed by name hash and always written in ascending hash order.
/// Adding a file whose name hashes like an existing one replaces it, even if
/// the names differ.
pub struct SarcWriter {
    endian: Endian,
    has_proper_resource_system: bool,
    hash_multiplier: u32,
    default_alignment: u32,
    alignment_overrides: HashMap<String, u32>,
    #[derivative(Debug = "ignore")]
    files: BTreeMap<u32, FileEntry>,
    resource_info: Arc<ResourceInfo>,
    #[derivative(PartialEq = "ignore")]
    yaz0: Option<Arc<dyn Yaz0Codec>>,
}

impl SarcWriter {
    pub fn new(endian: Endian) -> SarcWriter {
        SarcWriter {
            endian,
            has_proper_resource_system: true,
            hash_multiplier: DEFAULT_HASH_MULTIPLIER,
            default_alignment: 4,
            alignment_overrides: HashMap::new(),
            files: BTreeMap::new(),
            resource_info: ResourceInfo::empty(),
            yaz0: None,
        }
    }

    /// Creates a writer holding every file of `sarc`, set up so that writing
    /// it reproduces the original archive.
    pub fn from_sarc(sarc: &Sarc) -> SarcWriter {
        Self::from_sarc_filtered(sarc, |_| true)
    }

    /// Like [`SarcWriter::from_sarc`], only copying files accepted by `filter`.
    pub fn from_sarc_filtered<F>(sarc: &Sarc, filter: F) -> SarcWriter
    where
        F: Fn(&str) -> bool,
    {
        let mut writer = SarcWriter::new(sarc.endian());
        writer.hash_multiplier = sarc.hash_multiplier();
        writer.default_alignment = sarc.guess_default_alignment();
        for file in sarc.files().filter(|file| filter(file.name)) {
            writer.add_file(file.name, file.data);
        }
        writer
    }

    pub fn with_resource_info(mut self, info: Arc<ResourceInfo>) -> SarcWriter {
        self.resource_info = info;
        self
    }

    pub fn set_resource_info(&mut self, info: Arc<ResourceInfo>) {
        self.resource_info = info;
    }

    /// Sets the codec used to look inside Yaz0 compressed nested archives.
    pub fn set_yaz0_codec(&mut self, codec: Arc<dyn Yaz0Codec>) {
        self.yaz0 = Some(codec);
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn hash_multiplier(&self) -> u32 {
        self.hash_multiplier
    }

    /// Changes the name hash multiplier and rehashes the pending files.
    pub fn set_hash_multiplier(&mut self, multiplier: u32) {
        self.hash_multiplier = multiplier;
        let files = std::mem::take(&mut self.files);
        for (_, file) in files {
            self.insert(file);
        }
    }

    pub fn default_alignment(&self) -> u32 {
        self.default_alignment
    }

    /// Sets the alignment used for files without a known requirement.
    pub fn set_default_alignment(&mut self, alignment: u32) -> Result<()> {
        if !is_valid_alignment(alignment) {
            return Err(SarcWriteError::InvalidAlignment(alignment));
        }
        self.default_alignment = alignment;
        Ok(())
    }

    /// When false, nested archives and binary files are probed for extra
    /// alignment requirements that a proper resource system would otherwise
    /// take care of.
    pub fn set_has_proper_resource_system(&mut self, value: bool) {
        self.has_proper_resource_system = value;
    }

    pub fn set_align_for_nested_sarc(&mut self, enable: bool) {
        self.has_proper_resource_system = !enable;
    }

    /// Requires files with extension `ext` (without the dot) to be aligned
    /// to `alignment`. Takes precedence over every built-in requirement.
    pub fn add_alignment_requirement(
        &mut self,
        ext: impl Into<String>,
        alignment: u32,
    ) -> Result<()> {
        let ext = ext.into();
        if ext.starts_with('.') || ext.contains(|c: char| c == '/' || c == '\0') {
            return Err(SarcWriteError::InvalidExtension(ext));
        }
        if !is_valid_alignment(alignment) {
            return Err(SarcWriteError::InvalidAlignment(alignment));
        }
        self.alignment_overrides.insert(ext, alignment);
        Ok(())
    }

    fn insert(&mut self, file: FileEntry) {
        let hash = hash_name(self.hash_multiplier, &file.name);
        if let Some(old) = self.files.insert(hash, file) {
            if old.name != self.files[&hash].name {
                warn!(
                    "{} replaces {}: both names hash to {:#010x}",
                    self.files[&hash].name, old.name, hash
                );
            }
        }
    }

    /// Adds a file, replacing any file whose name has the same hash.
    pub fn add_file(&mut self, name: &str, data: impl Into<Vec<u8>>) {
        self.insert(FileEntry {
            name: name.to_owned(),
            data: data.into(),
        });
    }

    /// Removes a file and returns its data.
    pub fn delete_file(&mut self, name: &str) -> Result<Vec<u8>> {
        self.files
            .remove(&hash_name(self.hash_multiplier, name))
            .map(|file| file.data)
            .ok_or_else(|| SarcWriteError::FileNotFound(name.to_owned()))
    }

    pub fn has_file(&self, name: &str) -> bool {
        self.files
            .get(&hash_name(self.hash_multiplier, name))
            .map_or(false, |file| file.name == name)
    }

    pub fn get_file(&self, name: &str) -> Option<&[u8]> {
        self.files
            .get(&hash_name(self.hash_multiplier, name))
            .filter(|file| file.name == name)
            .map(|file| file.data.as_slice())
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Pending file names, in hash order
    pub fn list_files(&self) -> impl Iterator<Item = &str> {
        self.files.values().map(|file| file.name.as_str())
    }

    fn alignment_for_nested_sarc(&self, data: &[u8]) -> u32 {
        if self.has_proper_resource_system || data.len() <= 4 {
            return 0;
        }
        let is_sarc = if yaz0::is_yaz0_sarc(data) {
            match &self.yaz0 {
                Some(codec) => match codec.decompress(data) {
                    Ok(decompressed) => decompressed.starts_with(&SARC_MAGIC),
                    Err(e) => {
                        warn!("Could not decompress nested archive: {}", e);
                        true
                    }
                },
                None => true,
            }
        } else {
            data[0..4] == SARC_MAGIC
        };
        if is_sarc {
            NESTED_SARC_ALIGNMENT
        } else {
            0
        }
    }

    fn alignment_for_file(&self, table: &HashMap<String, u32>, name: &str, data: &[u8]) -> u32 {
        let ext = align::extension(name);
        let mut alignment = table.get(ext).copied().unwrap_or(self.default_alignment);
        alignment = alignment.max(self.alignment_for_nested_sarc(data));
        if !self.has_proper_resource_system || !self.resource_info.has_factory(ext) {
            alignment = alignment.max(align::alignment_for_new_binary_file(data));
            if let Endian::Big = self.endian {
                alignment = alignment.max(align::alignment_for_cafe_bflim(data));
            }
        }
        trace!("{}: alignment {:#x}", name, alignment);
        alignment
    }

    /// Computes where every file will be placed without writing anything.
    pub fn compute_layout(&self) -> Layout<'_> {
        let table = align::build_alignment_table(
            &self.resource_info,
            self.endian,
            self.list_files(),
            &self.alignment_overrides,
        );
        let layout = Layout {
            files: Vec::with_capacity(self.files.len()),
            data_alignment: 1,
            names_size: 0,
            data_size: 0,
        };
        self.files.iter().fold(layout, |mut layout, (hash, file)| {
            let alignment = self.alignment_for_file(&table, &file.name, &file.data);
            let data_begin = align(layout.data_size, alignment);
            let data_end = data_begin + file.data.len();
            layout.files.push(FileLayout {
                name: &file.name,
                hash: *hash,
                alignment,
                name_offset: layout.names_size,
                data_begin,
                data_end,
            });
            layout.data_alignment = layout.data_alignment.max(alignment);
            layout.names_size += align(file.name.len() + 1, 4);
            layout.data_size = data_end;
            layout
        })
    }

    /// File names with the data offsets they would be written at
    pub fn get_file_offsets(&self) -> Vec<(&str, u32)> {
        self.compute_layout()
            .files
            .iter()
            .map(|file| (file.name, file.data_begin as u32))
            .collect()
    }

    /// Writes the archive and returns the alignment of its data region, which
    /// is what a Yaz0 header for this archive should store.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<u32> {
        self.write_layout(writer, &self.compute_layout())
    }

    fn write_layout<W: Write>(&self, writer: &mut W, layout: &Layout<'_>) -> Result<u32> {
        if layout.files.len() > MAX_FILE_COUNT {
            return Err(SarcWriteError::TooManyFiles(layout.files.len()));
        }
        let opts = self.endian.writer_options();
        let data_offset = layout.data_offset();
        debug!(
            "Writing SARC: {} files, data offset {:#x}, data alignment {:#x}",
            layout.files.len(),
            data_offset,
            layout.data_alignment
        );

        ResHeader {
            magic: SARC_MAGIC,
            header_size: 0x14,
            bom: BOM,
            file_size: layout.file_size() as u32,
            data_offset: data_offset as u32,
            version: SARC_VERSION,
            reserved: 0,
        }
        .write_options(writer, &opts)?;
        ResFatHeader {
            magic: SFAT_MAGIC,
            header_size: 0x0C,
            num_files: layout.files.len() as u16,
            hash_multiplier: self.hash_multiplier,
        }
        .write_options(writer, &opts)?;
        for file in &layout.files {
            ResFatEntry {
                name_hash: file.hash,
                rel_name_opt_offset: 1 << 24 | (file.name_offset / 4) as u32,
                data_begin: file.data_begin as u32,
                data_end: file.data_end as u32,
            }
            .write_options(writer, &opts)?;
        }

        ResFntHeader {
            magic: SFNT_MAGIC,
            header_size: 0x8,
            reserved: 0,
        }
        .write_options(writer, &opts)?;
        let mut pos = layout.names_offset();
        for file in &layout.files {
            writer.write_all(file.name.as_bytes())?;
            writer.write_all(&[0])?;
            pos += file.name.len() + 1;
            let name_end = align(pos, 4);
            pad(writer, &mut pos, name_end)?;
        }

        pad(writer, &mut pos, data_offset)?;
        for (file, entry) in layout.files.iter().zip(self.files.values()) {
            pad(writer, &mut pos, data_offset + file.data_begin)?;
            writer.write_all(&entry.data)?;
            pos += entry.data.len();
        }
        Ok(layout.data_alignment)
    }

    pub fn write_to_bytes(&self) -> Result<Vec<u8>> {
        let layout = self.compute_layout();
        let mut buf: Vec<u8> = Vec::with_capacity(layout.file_size());
        self.write_layout(&mut buf, &layout)?;
        Ok(buf)
    }

    /// Writes the archive and compresses it, passing the data alignment on
    /// to the compressor.
    pub fn write_to_yaz0(&self, codec: &dyn Yaz0Codec) -> Result<Vec<u8>> {
        let mut buf: Vec<u8> = Vec::new();
        let alignment = self.write(&mut buf)?;
        Ok(codec.compress(&buf, alignment)?)
    }
}

fn pad<W: Write>(writer: &mut W, pos: &mut usize, target: usize) -> std::io::Result<()> {
    const ZEROES: [u8; 0x100] = [0; 0x100];
    while *pos < target {
        let len = (target - *pos).min(ZEROES.len());
        writer.write_all(&ZEROES[..len])?;
        *pos += len;
    }
    Ok(())
}
