//! Checks that an archive survives a read and rewrite unchanged.
use crate::{Sarc, SarcWriteError, SarcWriter};
use log::{debug, warn};

/// A file whose data offset moved when the archive was rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetMismatch {
    pub name: String,
    pub original: Option<u32>,
    pub repacked: Option<u32>,
}

/// Differences found by [`test_repack`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepackReport {
    pub offset_mismatches: Vec<OffsetMismatch>,
    /// First byte that differs, or the shorter length if one output is a
    /// prefix of the other
    pub first_difference: Option<usize>,
    pub original_size: usize,
    pub repacked_size: usize,
}

impl RepackReport {
    pub fn is_identical(&self) -> bool {
        self.offset_mismatches.is_empty() && self.first_difference.is_none()
    }
}

/// Rebuilds `sarc` with a writer derived from it and compares the file offsets
/// and then the bytes against the original.
pub fn test_repack(sarc: &Sarc) -> Result<RepackReport, SarcWriteError> {
    let writer = SarcWriter::from_sarc(sarc);
    let original_offsets = sarc.get_file_offsets();
    let repacked_offsets = writer.get_file_offsets();

    let mut report = RepackReport::default();
    if original_offsets != repacked_offsets {
        let longest = original_offsets.len().max(repacked_offsets.len());
        for i in 0..longest {
            let original = original_offsets.get(i);
            let repacked = repacked_offsets.get(i);
            if original == repacked {
                continue;
            }
            let name = original.or(repacked).map_or("", |(name, _)| *name);
            report.offset_mismatches.push(OffsetMismatch {
                name: name.to_owned(),
                original: original.map(|(_, offset)| *offset),
                repacked: repacked.map(|(_, offset)| *offset),
            });
        }
        warn!(
            "{} files would move when repacking",
            report.offset_mismatches.len()
        );
    }

    let original = sarc.as_bytes();
    let repacked = writer.write_to_bytes()?;
    report.original_size = original.len();
    report.repacked_size = repacked.len();
    report.first_difference = original
        .iter()
        .zip(repacked.iter())
        .position(|(a, b)| a != b)
        .or_else(|| {
            if original.len() != repacked.len() {
                Some(original.len().min(repacked.len()))
            } else {
                None
            }
        });
    debug!(
        "Repacked {} files: {}",
        sarc.file_count(),
        if report.is_identical() {
            "identical"
        } else {
            "mismatch"
        }
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Endian;

    #[test]
    fn fixtures_repack_identically() {
        for file in glob::glob("test/*.sarc").unwrap().filter_map(|f| f.ok()) {
            let data = std::fs::read(&file).unwrap();
            let sarc = Sarc::new(&data).unwrap();
            let report = test_repack(&sarc).unwrap();
            assert!(report.is_identical(), "{:?}: {:?}", file, report);
            assert_eq!(report.original_size, data.len());
        }
    }

    #[test]
    fn reports_moved_files() {
        // Written with nested SARC alignment, which a default writer does not
        // reproduce.
        let mut inner = SarcWriter::new(Endian::Little);
        inner.add_file("x.txt", b"x".to_vec());
        let mut writer = SarcWriter::new(Endian::Little);
        writer.set_align_for_nested_sarc(true);
        writer.add_file("Pack/inner.sarc", inner.write_to_bytes().unwrap());
        writer.add_file("a.txt", b"abc".to_vec());
        let data = writer.write_to_bytes().unwrap();

        let sarc = Sarc::new(&data).unwrap();
        let report = test_repack(&sarc).unwrap();
        assert!(!report.is_identical());
        assert!(report.first_difference.is_some());
        assert!(report.repacked_size < report.original_size);
        assert!(!report.offset_mismatches.is_empty());
    }
}
