//! Durable outputs: the CSV record log and the per-record artifact directories.
//!
//! A record row is appended (and fsynced) only after its media landed on
//! disk; an artifact directory whose candidate yielded nothing is removed.
//! Together these keep every `note_<index>` directory paired with exactly
//! one log row.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use csv::{ByteRecord, StringRecord, Terminator, WriterBuilder};

use crate::error::AppError;
use crate::models::AcquisitionRecord;
use crate::traits::RecordStore;

pub const LOG_HEADER: [&str; 5] = [
    "sequence_index",
    "title",
    "body",
    "source_identifier",
    "media_count",
];

const DIR_PREFIX: &str = "note_";

fn persist_err(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::PersistenceError(format!("{context}: {e}"))
}

/// Append-only CSV log of acquisition records.
///
/// Rows are encoded in memory and written to the file in one piece; nothing
/// is buffered between commits.
pub struct CsvRecordLog {
    path: PathBuf,
    file: File,
    next_index: u64,
}

impl CsvRecordLog {
    /// Open (or create) the log at `path`.
    ///
    /// A trailing row cut short by a crash is removed first. The header row
    /// is written only when the file is new or empty. Numbering continues
    /// after the highest index already in the file, so re-running against an
    /// existing log never reuses an index.
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| persist_err(&format!("create {}", parent.display()), e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)
            .map_err(|e| persist_err(&format!("open {}", path.display()), e))?;

        let len = repair_torn_tail(&mut file, path)?;

        let next_index = if len > 0 {
            let rows = read_rows(path)?;
            let max_index = rows.iter().filter_map(row_index).max().unwrap_or(0);
            max_index.max(rows.len() as u64) + 1
        } else {
            1
        };

        let mut log = Self {
            path: path.to_path_buf(),
            file,
            next_index,
        };

        if len == 0 {
            log.append(&encode_row(LOG_HEADER)?)?;
        }

        tracing::debug!(path = %log.path.display(), next_index, "Record log opened");
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `row` and sync it. On failure the file is cut back to its prior
    /// length so no partial row survives.
    fn append(&mut self, row: &[u8]) -> Result<(), AppError> {
        let prev_len = self
            .file
            .metadata()
            .map_err(|e| persist_err("stat record log", e))?
            .len();

        let written = self
            .file
            .write_all(row)
            .and_then(|()| self.file.sync_data());

        if let Err(e) = written {
            if let Err(undo) = self.file.set_len(prev_len) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %undo,
                    "Could not truncate partial row from record log"
                );
            }
            return Err(persist_err("append to record log", e));
        }
        Ok(())
    }
}

impl RecordStore for CsvRecordLog {
    fn next_index(&self) -> u64 {
        self.next_index
    }

    fn commit(&mut self, record: &AcquisitionRecord) -> Result<(), AppError> {
        if record.media_count == 0 {
            return Err(AppError::Generic(format!(
                "record {} has no media and cannot be committed",
                record.sequence_index
            )));
        }
        if record.sequence_index != self.next_index {
            return Err(AppError::Generic(format!(
                "record index {} out of sequence (expected {})",
                record.sequence_index, self.next_index
            )));
        }

        let row = encode_row([
            record.sequence_index.to_string().as_str(),
            record.title.as_str(),
            record.body.as_str(),
            record.source_identifier.as_str(),
            record.media_count.to_string().as_str(),
        ])?;
        self.append(&row)?;
        self.next_index += 1;
        Ok(())
    }
}

fn encode_row<I, T>(fields: I) -> Result<Vec<u8>, AppError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|e| persist_err("encode row", e))
}

/// Drop whatever follows the last complete row and return the new length.
///
/// A row is complete when it has every column. A crash mid-append can leave
/// a short row, possibly inside an open quoted field that would otherwise
/// swallow the next committed row. A complete last row that only lacks its
/// terminator gets one.
fn repair_torn_tail(file: &mut File, path: &Path) -> Result<u64, AppError> {
    let len = file
        .metadata()
        .map_err(|e| persist_err("stat record log", e))?
        .len();
    if len == 0 {
        return Ok(0);
    }

    file.seek(SeekFrom::Start(0))
        .map_err(|e| persist_err("rewind record log", e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(&mut *file);
    let mut row = ByteRecord::new();
    let mut complete_end = 0;
    while reader.read_byte_record(&mut row)? {
        if row.len() >= LOG_HEADER.len() {
            complete_end = reader.position().byte();
        }
    }
    drop(reader);

    if complete_end < len && !tail_is_blank(file, complete_end)? {
        tracing::warn!(
            path = %path.display(),
            dropped_bytes = len - complete_end,
            "Record log ends mid-row, truncating it"
        );
        file.set_len(complete_end)
            .and_then(|()| file.sync_data())
            .map_err(|e| persist_err("truncate torn row", e))?;
        return Ok(complete_end);
    }

    if !ends_with_newline(file)? {
        tracing::warn!(path = %path.display(), "Record log lacks a final newline, adding it");
        file.write_all(b"\n")
            .and_then(|()| file.sync_data())
            .map_err(|e| persist_err("terminate last row", e))?;
        return Ok(len + 1);
    }
    Ok(len)
}

fn tail_is_blank(file: &mut File, from: u64) -> Result<bool, AppError> {
    let mut tail = Vec::new();
    file.seek(SeekFrom::Start(from))
        .and_then(|_| file.read_to_end(&mut tail))
        .map_err(|e| persist_err("inspect record log", e))?;
    Ok(tail.iter().all(|b| matches!(b, b'\r' | b'\n')))
}

fn ends_with_newline(file: &mut File) -> Result<bool, AppError> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|e| persist_err("inspect record log", e))?;
    Ok(last[0] == b'\n')
}

fn read_rows(path: &Path) -> Result<Vec<StringRecord>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.records() {
        rows.push(row?);
    }
    Ok(rows)
}

fn row_index(row: &StringRecord) -> Option<u64> {
    row.get(0)?.trim().parse().ok()
}

/// Parse one log row by position. Rows with a non-numeric index or count are skipped.
fn parse_row(row: &StringRecord) -> Option<AcquisitionRecord> {
    Some(AcquisitionRecord {
        sequence_index: row_index(row)?,
        title: row.get(1)?.to_string(),
        body: row.get(2)?.to_string(),
        source_identifier: row.get(3)?.to_string(),
        media_count: row.get(4)?.trim().parse().ok()?,
    })
}

/// Read every well-formed record from a log file.
///
/// Columns are matched by position, so logs written with a localised header
/// row read the same way.
pub fn read_log(path: &Path) -> Result<Vec<AcquisitionRecord>, AppError> {
    let rows = read_rows(path)?;
    let total = rows.len();
    let records: Vec<_> = rows.iter().filter_map(parse_row).collect();
    if records.len() < total {
        tracing::warn!(
            skipped = total - records.len(),
            "Skipped malformed record log rows"
        );
    }
    Ok(records)
}

/// Root directory holding one `note_<index>` directory per record.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir_for(&self, index: u64) -> PathBuf {
        self.root.join(format!("{DIR_PREFIX}{index}"))
    }

    /// Create an empty directory for `index`, clearing any stale one first.
    pub fn prepare(&self, index: u64) -> Result<PathBuf, AppError> {
        let dir = self.dir_for(index);
        if dir.exists() {
            tracing::warn!(dir = %dir.display(), "Removing stale artifact directory");
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Remove a directory created by [`prepare`](Self::prepare). Missing is fine.
    pub fn rollback(&self, dir: &Path) -> Result<(), AppError> {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// `(index, path)` for every `note_<index>` directory, sorted by index.
    pub fn list(&self) -> Result<Vec<(u64, PathBuf)>, AppError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let index = name
                .to_str()
                .and_then(|n| n.strip_prefix(DIR_PREFIX))
                .and_then(|n| n.parse::<u64>().ok());
            if let Some(index) = index {
                dirs.push((index, entry.path()));
            }
        }
        dirs.sort_by_key(|(i, _)| *i);
        Ok(dirs)
    }

    /// Delete the directory for `next_index` if one exists.
    ///
    /// Acceptance is serial, so a process that died between creating a
    /// directory and committing its record leaves at most this one behind.
    /// Any other directory is left alone.
    pub fn sweep_interrupted(&self, next_index: u64) -> Result<Option<u64>, AppError> {
        let dir = self.dir_for(next_index);
        if !dir.is_dir() {
            return Ok(None);
        }
        std::fs::remove_dir_all(&dir)?;
        Ok(Some(next_index))
    }
}

/// Number of regular files in `dir`.
pub fn count_files(dir: &Path) -> Result<usize, AppError> {
    let mut n = 0;
    for entry in std::fs::read_dir(dir)? {
        if entry?.file_type()?.is_file() {
            n += 1;
        }
    }
    Ok(n)
}
