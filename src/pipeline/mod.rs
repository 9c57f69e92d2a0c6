//! The three user-level operations, each an ordered sequence of steps over
//! the lower-level modules. Every pipeline borrows its collaborators
//! (`Config`, `DeviceLocator`, `Digest`, `UserConfirm`) rather than owning
//! or constructing them, so `main` wires up the real implementations once
//! and tests wire up fakes.

pub mod restore;
pub mod store;
pub mod refresh;

pub use restore::{RestoreOutcome, RestorePipeline};
pub use store::StorePipeline;
pub use refresh::{RefreshPipeline, RefreshReport};

use crate::digest::Digest;
use crate::recordbook::Recordbook;
use std::path::Path;

pub(crate) fn load_or_empty(path: &Path) -> Result<Recordbook, crate::recordbook::RecordbookError> {
    if path.exists() {
        Recordbook::load(path)
    } else {
        Ok(Recordbook::new())
    }
}

/// Whether the home and device recordbook files already hold identical
/// bytes — the only case `Reconciler::plan`'s `(Valid, Valid)` row should
/// treat as a silent `NoOp` rather than prompting. Missing either file
/// counts as "not equal"; `plan` never consults this unless both sides are
/// independently `Valid`, which already implies both files exist.
pub(crate) fn recordbooks_equal(
    home_rb_path: &Path,
    device_rb_path: &Path,
    digest: &dyn Digest,
) -> Result<bool, crate::recordbook::RecordbookError> {
    if !home_rb_path.exists() || !device_rb_path.exists() {
        return Ok(false);
    }
    Ok(digest.hash_file(home_rb_path)? == digest.hash_file(device_rb_path)?)
}
