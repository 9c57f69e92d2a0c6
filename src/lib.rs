//! # ltarchiver — cold-storage file archiver
//!
//! Archives files onto removable media with an external Reed-Solomon ECC
//! sidecar protecting each one against bit rot, and indexes every archive
//! in a replicated, line-oriented catalog (the "recordbook") kept in sync
//! between the user's home directory and each device.
//!
//! Three operations sit on top of the modules below: `store` (archive a
//! file), `check-and-restore` (verify and, if needed, recover a backup),
//! and `refresh` (re-verify every record on a device in place). See
//! [`pipeline`] for all three.

pub mod confirm;
pub mod config;
pub mod device;
pub mod digest;
pub mod ecc;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod recordbook;
pub mod reconciler;

pub use config::Config;
pub use error::LtaError;
pub use pipeline::{RefreshPipeline, RefreshReport, RestoreOutcome, RestorePipeline, StorePipeline};
pub use record::Record;
pub use recordbook::{Recordbook, RecordbookStatus};
