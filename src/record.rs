//! A single catalog entry: parse, serialize, validate.
//!
//! The on-disk form is line-oriented and human-readable — an `Item` header
//! followed by fixed `Key: value` lines. The parser tolerates any order
//! among those lines but rejects keys it doesn't recognize; the serializer
//! always writes them back out in the fixed order below so a diff between
//! two recordbook snapshots stays meaningful.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use thiserror::Error;
use std::path::PathBuf;

/// `datetime.now().isoformat()`-compatible format: naive (no UTC offset),
/// matching the Python original rather than a timezone-aware timestamp.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("line {line}: unknown key {key:?}")]
    UnknownKey { line: usize, key: String },

    #[error("line {line}: missing field {field:?}")]
    MissingField { line: usize, field: &'static str },

    #[error("line {line}: invalid value for {field:?}: {value:?}")]
    InvalidValue {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: expected 'Item' header")]
    ExpectedItemHeader { line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub version: u32,
    pub deleted: bool,
    pub file_name: String,
    pub source: PathBuf,
    pub destination_uuid: String,
    pub timestamp: NaiveDateTime,
    pub chunk_size: u16,
    pub ecc_size: u8,
    pub checksum_algorithm: String,
    pub checksum: String,
    pub ecc_checksum: String,
}

const CURRENT_VERSION: u32 = 1;

impl Record {
    /// Build a fresh (non-deleted) record as StorePipeline does at the end
    /// of a successful store, stamping `timestamp` as now.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_name: String,
        source: PathBuf,
        destination_uuid: String,
        chunk_size: u16,
        ecc_size: u8,
        checksum: String,
        ecc_checksum: String,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            version: CURRENT_VERSION,
            deleted: false,
            file_name,
            source,
            destination_uuid,
            timestamp,
            chunk_size,
            ecc_size,
            checksum_algorithm: "md5".to_string(),
            checksum,
            ecc_checksum,
        }
    }

    pub fn tombstoned(&self) -> Self {
        let mut r = self.clone();
        r.deleted = true;
        r
    }

    pub fn serialize(&self) -> String {
        format!(
            "Item\n\
             Version: {}\n\
             Deleted: {}\n\
             File-Name: {}\n\
             Source: {}\n\
             Destination: {}\n\
             Bytes-per-chunk: {}\n\
             EC-bytes-per-chunk: {}\n\
             Timestamp: {}\n\
             Checksum-Algorithm: {}\n\
             Checksum: {}\n\
             ECC-Checksum: {}\n",
            self.version,
            self.deleted,
            self.file_name,
            self.source.display(),
            self.destination_uuid,
            self.chunk_size,
            self.ecc_size,
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.checksum_algorithm,
            self.checksum,
            self.ecc_checksum,
        )
    }

    /// Parse one `Item` block starting at `lines[0]` (which must be the
    /// literal `Item` header). Returns the record and the number of lines
    /// consumed. `start_line` is the 1-based line number of `lines[0]`,
    /// used to produce accurate error locations.
    fn parse_item(lines: &[&str], start_line: usize) -> Result<(Record, usize), RecordError> {
        if lines.is_empty() || lines[0].trim() != "Item" {
            return Err(RecordError::ExpectedItemHeader { line: start_line });
        }

        let mut fields: HashMap<&str, String> = HashMap::new();
        let mut consumed = 1;

        for (offset, line) in lines[1..].iter().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }
            if trimmed == "Item" {
                break;
            }
            let line_no = start_line + offset + 1;
            let (key, value) = trimmed.split_once(':').ok_or(RecordError::InvalidValue {
                line: line_no,
                field: "(line)",
                value: trimmed.to_string(),
            })?;
            let key = key.trim();
            let value = value.trim().to_string();
            if !KNOWN_KEYS.contains(&key) {
                return Err(RecordError::UnknownKey {
                    line: line_no,
                    key: key.to_string(),
                });
            }
            fields.insert(key, value);
            consumed = offset + 2;
        }

        let field = |key: &'static str| -> Result<&String, RecordError> {
            fields.get(key).ok_or(RecordError::MissingField {
                line: start_line,
                field: key,
            })
        };

        let version: u32 = field("Version")?
            .parse()
            .map_err(|_| RecordError::InvalidValue {
                line: start_line,
                field: "Version",
                value: field("Version").unwrap().clone(),
            })?;
        let deleted: bool = field("Deleted")?
            .parse()
            .map_err(|_| RecordError::InvalidValue {
                line: start_line,
                field: "Deleted",
                value: field("Deleted").unwrap().clone(),
            })?;
        let file_name = field("File-Name")?.clone();
        let source = PathBuf::from(field("Source")?);
        let destination_uuid = field("Destination")?.clone();
        let chunk_size: u16 =
            field("Bytes-per-chunk")?
                .parse()
                .map_err(|_| RecordError::InvalidValue {
                    line: start_line,
                    field: "Bytes-per-chunk",
                    value: field("Bytes-per-chunk").unwrap().clone(),
                })?;
        let ecc_size: u8 =
            field("EC-bytes-per-chunk")?
                .parse()
                .map_err(|_| RecordError::InvalidValue {
                    line: start_line,
                    field: "EC-bytes-per-chunk",
                    value: field("EC-bytes-per-chunk").unwrap().clone(),
                })?;
        let timestamp_raw = field("Timestamp")?.clone();
        let timestamp = NaiveDateTime::parse_from_str(&timestamp_raw, TIMESTAMP_FORMAT)
            .map_err(|_| RecordError::InvalidValue {
                line: start_line,
                field: "Timestamp",
                value: timestamp_raw,
            })?;
        let checksum_algorithm = field("Checksum-Algorithm")?.clone();
        let checksum = field("Checksum")?.clone();
        let ecc_checksum = field("ECC-Checksum")?.clone();

        Ok((
            Record {
                version,
                deleted,
                file_name,
                source,
                destination_uuid,
                timestamp,
                chunk_size,
                ecc_size,
                checksum_algorithm,
                checksum,
                ecc_checksum,
            },
            consumed,
        ))
    }
}

const KNOWN_KEYS: &[&str] = &[
    "Version",
    "Deleted",
    "File-Name",
    "Source",
    "Destination",
    "Bytes-per-chunk",
    "EC-bytes-per-chunk",
    "Timestamp",
    "Checksum-Algorithm",
    "Checksum",
    "ECC-Checksum",
];

/// Parse every `Item` block in a whole recordbook file's text, tolerating
/// blank lines between (but not within) items.
pub fn parse_all(text: &str) -> Result<Vec<Record>, RecordError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut records = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if lines[i].trim().is_empty() {
            i += 1;
            continue;
        }
        let (record, consumed) = Record::parse_item(&lines[i..], i + 1)?;
        records.push(record);
        i += consumed;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample() -> Record {
        Record::new(
            "photo.jpg".to_string(),
            PathBuf::from("/home/user/photo.jpg"),
            "AAAA-1111".to_string(),
            239,
            16,
            "5eb63bbbe01eeed093cb22bb8f5acdc3".to_string(),
            "deadbeef".to_string(),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap().and_hms_opt(12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn round_trips_through_serialize_and_parse() {
        let record = sample();
        let text = record.serialize();
        let parsed = parse_all(&text).unwrap();
        assert_eq!(parsed, vec![record]);
    }

    #[test]
    fn tolerates_reordered_keys() {
        let text = "Item\n\
                     Deleted: false\n\
                     Version: 1\n\
                     File-Name: a.txt\n\
                     Source: /tmp/a.txt\n\
                     Destination: AAAA\n\
                     Bytes-per-chunk: 239\n\
                     EC-bytes-per-chunk: 16\n\
                     Timestamp: 2026-01-01T12:00:00\n\
                     Checksum-Algorithm: md5\n\
                     Checksum: abc\n\
                     ECC-Checksum: def\n";
        let parsed = parse_all(text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].file_name, "a.txt");
    }

    #[test]
    fn rejects_unknown_key() {
        let text = "Item\nVersion: 1\nBogus-Key: x\n";
        let err = parse_all(text).unwrap_err();
        assert!(matches!(err, RecordError::UnknownKey { .. }));
    }

    #[test]
    fn tolerates_blank_lines_between_items() {
        let record = sample();
        let text = format!("{}\n\n{}", record.serialize(), record.serialize());
        let parsed = parse_all(&text).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn multiple_items_concatenated_with_no_separator() {
        let record = sample();
        let text = format!("{}{}", record.serialize(), record.serialize());
        let parsed = parse_all(&text).unwrap();
        assert_eq!(parsed.len(), 2);
    }
}
