//! Consistency check between the record log and the artifact tree, and the
//! annotations export built on top of the same pairing.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Serialize;

use crate::acquire::media_path;
use crate::error::AppError;
use crate::store::{ArtifactStore, count_files, read_log};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub records: usize,
    /// Records whose `note_<index>` directory does not exist.
    pub missing_dirs: Vec<u64>,
    /// `(index, media_count, files_on_disk)` where the two disagree.
    pub count_mismatches: Vec<(u64, usize, usize)>,
    /// Directories with no record.
    pub orphan_dirs: Vec<u64>,
    /// Indices that appear on more than one row.
    pub duplicate_indices: Vec<u64>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_dirs.is_empty()
            && self.count_mismatches.is_empty()
            && self.orphan_dirs.is_empty()
            && self.duplicate_indices.is_empty()
    }
}

pub fn audit(log_path: &Path, artifacts: &ArtifactStore) -> Result<AuditReport, AppError> {
    let records = read_log(log_path)?;
    let dirs: HashMap<u64, _> = artifacts.list()?.into_iter().collect();

    let mut report = AuditReport {
        records: records.len(),
        ..AuditReport::default()
    };

    let mut occurrences: BTreeMap<u64, usize> = BTreeMap::new();
    for record in &records {
        *occurrences.entry(record.sequence_index).or_default() += 1;

        match dirs.get(&record.sequence_index) {
            None => report.missing_dirs.push(record.sequence_index),
            Some(dir) => {
                let found = count_files(dir)?;
                if found != record.media_count {
                    report
                        .count_mismatches
                        .push((record.sequence_index, record.media_count, found));
                }
            }
        }
    }

    report.duplicate_indices = occurrences
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(i, _)| i)
        .collect();

    let mut orphans: Vec<u64> = dirs
        .keys()
        .filter(|i| !records.iter().any(|r| r.sequence_index == **i))
        .copied()
        .collect();
    orphans.sort_unstable();
    report.orphan_dirs = orphans;

    Ok(report)
}

/// One media file in the annotations export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    pub relative_path: String,
    pub title: String,
    pub text_annotation: String,
    pub original_note_url: String,
}

/// Map every media file that exists on disk to its record's text.
///
/// Keys are `note_<index>_<n>.jpg`; files named by the record but absent
/// from disk are skipped.
pub fn export_annotations(
    log_path: &Path,
    artifacts: &ArtifactStore,
) -> Result<BTreeMap<String, Annotation>, AppError> {
    let mut out = BTreeMap::new();
    for record in read_log(log_path)? {
        let dir = artifacts.dir_for(record.sequence_index);
        for n in 1..=record.media_count {
            let path = media_path(&dir, n);
            if !path.exists() {
                continue;
            }
            let (Some(dir_name), Some(file_name)) = (
                dir.file_name().and_then(|s| s.to_str()),
                path.file_name().and_then(|s| s.to_str()),
            ) else {
                continue;
            };
            out.insert(
                format!("{dir_name}_{file_name}"),
                Annotation {
                    relative_path: path.display().to_string(),
                    title: record.title.clone(),
                    text_annotation: record.body.clone(),
                    original_note_url: record.source_identifier.clone(),
                },
            );
        }
    }
    Ok(out)
}
