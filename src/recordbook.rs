//! Mutable in-memory set of [`Record`]s, backed by an on-disk text file and
//! a sibling checksum sidecar. Exactly two physical copies of this type
//! exist at any time — the home copy and a device copy — and bringing them
//! into agreement is [`crate::reconciler::Reconciler`]'s job, not this
//! module's.

use std::io::Write;
use std::path::Path;
use thiserror::Error;

use crate::digest::{Digest, DigestError};
use crate::record::{self, Record, RecordError};

#[derive(Error, Debug)]
pub enum RecordbookError {
    #[error(transparent)]
    Parse(#[from] RecordError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error("checksum {checksum} is already archived")]
    DuplicateChecksum { checksum: String },

    #[error("file name {file_name} is already used on device {destination_uuid}")]
    NameCollision {
        file_name: String,
        destination_uuid: String,
    },
}

/// On-disk validity of a recordbook/checksum pair, as judged independently
/// for the home and device copies before any pipeline proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordbookStatus {
    Valid,
    NoChecksumFile,
    ChecksumMismatch,
    DoesNotExist,
}

#[derive(Debug, Clone, Default)]
pub struct Recordbook {
    records: Vec<Record>,
}

impl Recordbook {
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn load(path: &Path) -> Result<Recordbook, RecordbookError> {
        let text = std::fs::read_to_string(path)?;
        let records = record::parse_all(&text)?;
        Ok(Recordbook { records })
    }

    /// Independently judges a recordbook/checksum pair's validity; does
    /// not consult the in-memory state of `self`.
    pub fn validate_checksum(
        recordbook_path: &Path,
        checksum_path: &Path,
        digest: &dyn Digest,
    ) -> Result<RecordbookStatus, RecordbookError> {
        if !recordbook_path.exists() {
            return Ok(RecordbookStatus::DoesNotExist);
        }
        if !checksum_path.exists() {
            return Ok(RecordbookStatus::NoChecksumFile);
        }
        let sidecar = std::fs::read_to_string(checksum_path)?;
        let expected = sidecar
            .split_whitespace()
            .next()
            .unwrap_or_default();
        let matches = digest.verify(recordbook_path, expected)?;
        Ok(if matches {
            RecordbookStatus::Valid
        } else {
            RecordbookStatus::ChecksumMismatch
        })
    }

    /// Find a non-deleted record with this checksum, if any.
    pub fn find_by_checksum(&self, checksum: &str) -> Option<&Record> {
        self.records
            .iter()
            .find(|r| !r.deleted && r.checksum.eq_ignore_ascii_case(checksum))
    }

    /// Find a non-deleted record with this file name and destination, if
    /// any.
    pub fn find_by_name(&self, file_name: &str, destination_uuid: &str) -> Option<&Record> {
        self.records.iter().find(|r| {
            !r.deleted && r.file_name == file_name && r.destination_uuid == destination_uuid
        })
    }

    /// RestorePipeline's notion of a "match": a record found by checksum
    /// is a strong, `valid` match (the bytes on hand are exactly what the
    /// book recorded); one found only by file name is a weaker candidate
    /// (the name lines up but the bytes have since diverged).
    pub fn match_for_restore(&self, checksum: &str, file_name: &str) -> Option<(&Record, bool)> {
        if let Some(r) = self.find_by_checksum(checksum) {
            return Some((r, true));
        }
        self.records
            .iter()
            .find(|r| !r.deleted && r.file_name == file_name)
            .map(|r| (r, false))
    }

    /// Enforce §3's uniqueness invariants and append `r`.
    ///
    /// `prior_file_exists` answers, for an existing record with the same
    /// checksum, whether its archived data file is still present on its
    /// device — if not, that prior record is stale and gets tombstoned to
    /// make room for `r` rather than rejecting the insert.
    pub fn insert(
        &mut self,
        r: Record,
        prior_file_exists: impl Fn(&Record) -> bool,
    ) -> Result<(), RecordbookError> {
        if let Some(existing) = self.find_by_name(&r.file_name, &r.destination_uuid) {
            return Err(RecordbookError::NameCollision {
                file_name: existing.file_name.clone(),
                destination_uuid: existing.destination_uuid.clone(),
            });
        }

        if let Some(index) = self.records.iter().position(|existing| {
            !existing.deleted && existing.checksum.eq_ignore_ascii_case(&r.checksum)
        }) {
            if prior_file_exists(&self.records[index]) {
                return Err(RecordbookError::DuplicateChecksum { checksum: r.checksum });
            }
            self.tombstone(index);
        }

        self.records.push(r);
        Ok(())
    }

    /// Rewrite `self.records[index]` with `deleted = true` in place.
    pub fn tombstone(&mut self, index: usize) {
        self.records[index] = self.records[index].tombstoned();
    }

    /// Fold every record from `other` into `self` that `self` does not
    /// already have (by identity of all fields) — used to bring the
    /// device book up to a superset of home after a successful store, and
    /// vice versa during refresh.
    pub fn merge(&mut self, other: &Recordbook) {
        for record in &other.records {
            if !self.records.contains(record) {
                self.records.push(record.clone());
            }
        }
    }

    /// Write the recordbook text file, then its checksum sidecar in
    /// `md5sum`-compatible form, each via a temp-file-then-rename so a
    /// reader never observes a half-written file.
    pub fn write(
        &self,
        recordbook_path: &Path,
        checksum_path: &Path,
        digest: &dyn Digest,
    ) -> Result<(), RecordbookError> {
        let mut text = String::new();
        for record in &self.records {
            text.push_str(&record.serialize());
        }

        write_atomic(recordbook_path, text.as_bytes())?;

        let hex = digest.hash_file(recordbook_path)?;
        let line = format!("{}  {}\n", hex, recordbook_path.display());
        write_atomic(checksum_path, line.as_bytes())?;

        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        f.write_all(contents)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
