//! Alignment requirements for file data.
//!
//! The game's resource system expects some files to be stored at specific
//! boundaries. Most requirements come from the external `aglenv_file_info.json`
//! table and a handful of known overrides; binary files with a modern
//! `nn::util::BinaryFileHeader` or a legacy bflim footer announce their own.
use crate::writer::SarcWriteError;
use crate::{is_valid_alignment, Endian};
use binread::BinReaderExt;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

type Result<T> = core::result::Result<T, SarcWriteError>;

lazy_static! {
    static ref EMPTY_RESOURCE_INFO: Arc<ResourceInfo> = Arc::new(ResourceInfo::default());
}

/// One entry of the AGL environment file info table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnvFileInfo {
    pub ext: String,
    pub bext: String,
    pub align: i32,
}

/// The external resource tables consulted when computing alignments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceInfo {
    env_file_info: Vec<EnvFileInfo>,
    factory_extensions: HashSet<String>,
}

impl ResourceInfo {
    pub fn new<I, S>(env_file_info: Vec<EnvFileInfo>, factory_extensions: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for entry in &env_file_info {
            let alignment = entry.align.unsigned_abs();
            if !is_valid_alignment(alignment) {
                return Err(SarcWriteError::InvalidAlignment(alignment));
            }
        }
        Ok(ResourceInfo {
            env_file_info,
            factory_extensions: factory_extensions.into_iter().map(Into::into).collect(),
        })
    }

    /// Shared empty tables: no extension has a known requirement and no file
    /// type is handled by a resource factory.
    pub fn empty() -> Arc<ResourceInfo> {
        EMPTY_RESOURCE_INFO.clone()
    }

    /// Parses the AGL environment table. Unknown fields are ignored.
    pub fn parse_env_file_info(json: &str) -> Result<Vec<EnvFileInfo>> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parses the resource factory table: one factory per line, extension in
    /// the first tab separated column.
    pub fn parse_factory_info(tsv: &str) -> HashSet<String> {
        tsv.lines()
            .filter_map(|line| line.split('\t').next())
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn from_sources(env_json: &str, factory_tsv: &str) -> Result<Self> {
        Self::new(
            Self::parse_env_file_info(env_json)?,
            Self::parse_factory_info(factory_tsv),
        )
    }

    /// Loads both tables from disk.
    pub fn load(env_json: impl AsRef<Path>, factory_tsv: impl AsRef<Path>) -> Result<Self> {
        Self::from_sources(
            &std::fs::read_to_string(env_json)?,
            &std::fs::read_to_string(factory_tsv)?,
        )
    }

    pub fn env_file_info(&self) -> &[EnvFileInfo] {
        &self.env_file_info
    }

    /// Returns true if the game has a dedicated resource factory for `ext`.
    pub fn has_factory(&self, ext: &str) -> bool {
        self.factory_extensions.contains(ext)
    }
}

/// Returns true if every name looks like `EventFlow/*.bfevfl`.
fn has_only_event_flows<'a>(mut names: impl Iterator<Item = &'a str>) -> bool {
    names.all(|name| name.starts_with("EventFlow/") && name.ends_with(".bfevfl"))
}

/// Builds the extension -> alignment table for one write pass.
///
/// `names` is the complete set of files about to be written since the
/// `bfevfl` rule depends on the whole archive. Caller overrides are applied
/// last and win over everything else.
pub(crate) fn build_alignment_table<'a>(
    info: &ResourceInfo,
    endian: Endian,
    names: impl Iterator<Item = &'a str>,
    overrides: &HashMap<String, u32>,
) -> HashMap<String, u32> {
    let mut table: HashMap<String, u32> = HashMap::new();
    for entry in &info.env_file_info {
        let alignment = entry.align.unsigned_abs();
        table.insert(entry.ext.clone(), alignment);
        table.insert(entry.bext.clone(), alignment);
    }
    // Pack/Bootup.pack/Env/env.sgenvb/postfx/*.bksky (AAMP)
    table.insert("ksky".to_owned(), 8);
    table.insert("bksky".to_owned(), 8);
    // Pack/TitleBG.pack/Terrain/System/tera_resource.Nin_NX_NVN.release.ssarc
    table.insert("gtx".to_owned(), 0x2000);
    table.insert("sharcb".to_owned(), 0x1000);
    table.insert("sharc".to_owned(), 0x1000);
    // Pack/Bootup.pack/Layout/MultiFilter.ssarc/*.baglmf (AAMP)
    table.insert("baglmf".to_owned(), 0x80);
    // Event flows are only aligned inside beventpacks.
    if has_only_event_flows(names) {
        table.insert("bfevfl".to_owned(), 0x100);
    }
    table.insert(
        "bffnt".to_owned(),
        match endian {
            Endian::Big => 0x2000,
            Endian::Little => 0x1000,
        },
    );
    table.extend(overrides.iter().map(|(ext, alignment)| (ext.clone(), *alignment)));
    table
}

/// Extension of the last path component without the dot. Leading dots of
/// the file name do not start an extension.
pub(crate) fn extension(name: &str) -> &str {
    let file_name = &name[name.rfind('/').map_or(0, |idx| idx + 1)..];
    let stem_start = file_name.len() - file_name.trim_start_matches('.').len();
    match file_name[stem_start..].rfind('.') {
        Some(idx) => &file_name[stem_start + idx + 1..],
        None => "",
    }
}

/// Alignment announced by a new style binary file header, or 0.
///
/// The header stores a BOM at 0xC, the alignment as a power of two at 0xE and
/// the file size at 0x1C. The size must match to rule out false positives.
pub(crate) fn alignment_for_new_binary_file(data: &[u8]) -> u32 {
    if data.len() <= 0x20 {
        return 0;
    }
    let endian = match Endian::from_bom([data[0xC], data[0xD]]) {
        Some(endian) => endian,
        None => return 0,
    };
    let mut reader = Cursor::new(&data[0x1C..0x20]);
    let file_size: u32 = match endian {
        Endian::Big => reader.read_be::<u32>(),
        Endian::Little => reader.read_le::<u32>(),
    }
    .unwrap_or(0);
    if file_size as usize != data.len() {
        return 0;
    }
    1u32.checked_shl(data[0xE] as u32).unwrap_or(0)
}

/// Alignment stored in the footer of a Wii U bflim texture, or 0.
pub(crate) fn alignment_for_cafe_bflim(data: &[u8]) -> u32 {
    if data.len() <= 0x28 || &data[data.len() - 0x28..data.len() - 0x24] != b"FLIM" {
        return 0;
    }
    let footer = &data[data.len() - 0x8..data.len() - 0x6];
    u16::from_be_bytes([footer[0], footer[1]]) as u32
}
