//! Top-level error aggregation.
//!
//! Every module defines its own narrow error enum (`DigestError`,
//! `DeviceError`, `EccError`, `RecordError`, `RecordbookError`,
//! `ReconcileError`); pipelines collect them into `LtaError` via `#[from]`
//! so `main` has exactly one type to translate into an exit code.

use std::path::PathBuf;
use thiserror::Error;

use crate::device::DeviceError;
use crate::digest::DigestError;
use crate::ecc::EccError;
use crate::reconciler::ReconcileError;
use crate::record::RecordError;
use crate::recordbook::RecordbookError;

#[derive(Error, Debug)]
pub enum LtaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Ecc(#[from] EccError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Recordbook(#[from] RecordbookError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("no recordbook found on either side and this is not a first store")]
    NoRecordbook,

    #[error("a file with checksum {checksum} is already archived at {path}")]
    AlreadyArchived { checksum: String, path: PathBuf },

    #[error("file name {name} is already used by a different file on this device")]
    NameCollision { name: String },

    #[error("{path} exists on the device but is not tracked by any record")]
    UnmanagedConflict { path: PathBuf },

    #[error("{path} was not found in either recordbook")]
    NotInRecordbook { path: PathBuf },

    #[error("too many errors to correct in chunk {chunk_index} of {path}")]
    TooManyErrors { path: PathBuf, chunk_index: usize },

    #[error("only the ecc differs for {path}; rerun restore to repair it")]
    EccOnlyDamage { path: PathBuf },

    #[error("user aborted at: {context}")]
    UserAborted { context: String },

    #[error("source and destination must differ: {path}")]
    SourceEqualsDestination { path: PathBuf },

    #[error("{path} is not a regular, readable file")]
    InvalidSource { path: PathBuf },

    #[error("{path} is not a writable directory")]
    InvalidDestination { path: PathBuf },
}

impl LtaError {
    /// Process exit code for the `store` and `check-and-restore` CLI
    /// surfaces. Every core failure is a refusal to proceed, so the exit
    /// code is uniformly 1; `refresh` never consults this — it always
    /// exits 0 and logs per-record failures instead.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
