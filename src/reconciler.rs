//! Two-way recordbook repair protocol between the home and device copies.
//!
//! Modeled as the source suggests for the home/device relationship: a pure
//! decision function, [`Reconciler::plan`], that never touches disk, and a
//! separate [`Reconciler::execute`] that carries out the chosen action.
//! Keeping them apart is what makes the §4.6 decision table directly
//! testable without a filesystem.

use std::path::Path;
use thiserror::Error;

use crate::confirm::{ConfirmAnswer, UserConfirm};
use crate::digest::{Digest, DigestError};
use crate::recordbook::RecordbookStatus;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("no recordbook found on either side and this is not a first store")]
    NoRecordbook,

    #[error("user aborted reconciliation")]
    UserAborted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Digest(#[from] DigestError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Home,
    Device,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    NoOp,
    /// Neither side had a recordbook yet, but this is a first store: the
    /// pipeline proceeds with empty in-memory books.
    ProceedEmpty,
    CopyHomeToDevice,
    CopyDeviceToHome,
    /// Both valid but their contents differ; the user picks a winner.
    PromptDiff,
    /// One side is valid, the other has no checksum sidecar; recompute it
    /// from the existing file on that side.
    PromptRecomputeChecksum(Side),
    /// One side is valid, the other's checksum mismatches its file;
    /// overwrite that side from the valid one.
    PromptOverwrite(Side),
    /// Neither side is valid. No silent recovery permitted.
    PromptBothInvalid,
    Fail(ReconcileErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileErrorKind {
    NoRecordbook,
}

pub struct RecordbookLocation<'a> {
    pub recordbook_path: &'a Path,
    pub checksum_path: &'a Path,
}

pub struct Reconciler;

impl Reconciler {
    /// Pure decision function implementing the §4.6 table. `contents_equal`
    /// is only consulted when both sides are `Valid`; callers should pass
    /// `false` (never `true`) when they haven't actually compared the two
    /// files, since that only ever narrows the action taken.
    pub fn plan(home: RecordbookStatus, device: RecordbookStatus, contents_equal: bool, first_time_ok: bool) -> Action {
        use RecordbookStatus::*;
        match (home, device) {
            (Valid, Valid) => {
                if contents_equal {
                    Action::NoOp
                } else {
                    Action::PromptDiff
                }
            }
            (Valid, DoesNotExist) => Action::CopyHomeToDevice,
            (Valid, NoChecksumFile) => Action::PromptRecomputeChecksum(Side::Device),
            (Valid, ChecksumMismatch) => Action::PromptOverwrite(Side::Device),
            (DoesNotExist, Valid) => Action::CopyDeviceToHome,
            (DoesNotExist, DoesNotExist) => {
                if first_time_ok {
                    Action::ProceedEmpty
                } else {
                    Action::Fail(ReconcileErrorKind::NoRecordbook)
                }
            }
            (NoChecksumFile, Valid) => Action::PromptRecomputeChecksum(Side::Home),
            (ChecksumMismatch, Valid) => Action::PromptOverwrite(Side::Home),
            _ => Action::PromptBothInvalid,
        }
    }

    /// Carry out a previously planned `Action`, prompting through
    /// `confirm` where the table calls for it.
    pub fn execute(
        action: Action,
        home: RecordbookLocation,
        device: RecordbookLocation,
        digest: &dyn Digest,
        confirm: &dyn UserConfirm,
    ) -> Result<(), ReconcileError> {
        match action {
            Action::NoOp | Action::ProceedEmpty => Ok(()),
            Action::Fail(ReconcileErrorKind::NoRecordbook) => Err(ReconcileError::NoRecordbook),
            Action::CopyHomeToDevice => copy_pair(&home, &device),
            Action::CopyDeviceToHome => copy_pair(&device, &home),
            Action::PromptRecomputeChecksum(side) => {
                let answer = confirm.confirm("recompute checksum from the existing recordbook file?");
                if answer != ConfirmAnswer::Yes {
                    return Err(ReconcileError::UserAborted);
                }
                let loc = match side {
                    Side::Home => &home,
                    Side::Device => &device,
                };
                recompute_checksum(loc, digest)
            }
            Action::PromptOverwrite(side) => {
                let answer = confirm.confirm("overwrite the mismatched copy with the valid one?");
                if answer != ConfirmAnswer::Yes {
                    return Err(ReconcileError::UserAborted);
                }
                match side {
                    Side::Home => copy_pair(&device, &home),
                    Side::Device => copy_pair(&home, &device),
                }
            }
            Action::PromptDiff => {
                let choice = confirm.menu(
                    "home and device recordbooks differ",
                    &[("home", "Keep home, overwrite device"), ("device", "Keep device, overwrite home")],
                );
                match choice.as_str() {
                    "home" => copy_pair(&home, &device),
                    "device" => copy_pair(&device, &home),
                    _ => Err(ReconcileError::UserAborted),
                }
            }
            Action::PromptBothInvalid => {
                let choice = confirm.menu(
                    "neither recordbook is valid",
                    &[
                        ("show-home", "Show home contents"),
                        ("show-device", "Show device contents"),
                        ("overwrite-both-checksums", "Recompute both checksums in place"),
                        ("abort", "Abort"),
                    ],
                );
                match choice.as_str() {
                    "overwrite-both-checksums" => {
                        recompute_checksum(&home, digest)?;
                        recompute_checksum(&device, digest)
                    }
                    "show-home" | "show-device" => Ok(()),
                    _ => Err(ReconcileError::UserAborted),
                }
            }
        }
    }
}

fn copy_pair(src: &RecordbookLocation, dst: &RecordbookLocation) -> Result<(), ReconcileError> {
    if let Some(parent) = dst.recordbook_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src.recordbook_path, dst.recordbook_path)?;
    std::fs::copy(src.checksum_path, dst.checksum_path)?;
    Ok(())
}

fn recompute_checksum(loc: &RecordbookLocation, digest: &dyn Digest) -> Result<(), ReconcileError> {
    let hex = digest.hash_file(loc.recordbook_path)?;
    let line = format!("{}  {}\n", hex, loc.recordbook_path.display());
    std::fs::write(loc.checksum_path, line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recordbook::RecordbookStatus::*;

    #[test]
    fn both_valid_equal_is_noop() {
        assert_eq!(Reconciler::plan(Valid, Valid, true, false), Action::NoOp);
    }

    #[test]
    fn both_valid_differ_prompts_diff() {
        assert_eq!(Reconciler::plan(Valid, Valid, false, false), Action::PromptDiff);
    }

    #[test]
    fn valid_home_missing_device_copies_home_to_device() {
        assert_eq!(Reconciler::plan(Valid, DoesNotExist, false, false), Action::CopyHomeToDevice);
    }

    #[test]
    fn valid_home_no_checksum_device_prompts_recompute() {
        assert_eq!(
            Reconciler::plan(Valid, NoChecksumFile, false, false),
            Action::PromptRecomputeChecksum(Side::Device)
        );
    }

    #[test]
    fn valid_home_mismatch_device_prompts_overwrite() {
        assert_eq!(
            Reconciler::plan(Valid, ChecksumMismatch, false, false),
            Action::PromptOverwrite(Side::Device)
        );
    }

    #[test]
    fn missing_home_valid_device_copies_device_to_home() {
        assert_eq!(Reconciler::plan(DoesNotExist, Valid, false, false), Action::CopyDeviceToHome);
    }

    #[test]
    fn both_missing_first_time_proceeds_empty() {
        assert_eq!(Reconciler::plan(DoesNotExist, DoesNotExist, false, true), Action::ProceedEmpty);
    }

    #[test]
    fn both_missing_not_first_time_fails() {
        assert_eq!(
            Reconciler::plan(DoesNotExist, DoesNotExist, false, false),
            Action::Fail(ReconcileErrorKind::NoRecordbook)
        );
    }

    #[test]
    fn no_checksum_home_valid_device_is_symmetric() {
        assert_eq!(
            Reconciler::plan(NoChecksumFile, Valid, false, false),
            Action::PromptRecomputeChecksum(Side::Home)
        );
    }

    #[test]
    fn mismatch_home_valid_device_is_symmetric() {
        assert_eq!(
            Reconciler::plan(ChecksumMismatch, Valid, false, false),
            Action::PromptOverwrite(Side::Home)
        );
    }

    #[test]
    fn neither_valid_prompts_both_invalid() {
        assert_eq!(Reconciler::plan(NoChecksumFile, ChecksumMismatch, false, false), Action::PromptBothInvalid);
        assert_eq!(Reconciler::plan(DoesNotExist, ChecksumMismatch, false, false), Action::PromptBothInvalid);
    }

    #[test]
    fn execute_copy_home_to_device_copies_both_files() {
        use crate::confirm::ScriptedConfirm;
        use crate::digest::Md5Digest;

        let dir = tempfile::tempdir().unwrap();
        let home_rb = dir.path().join("home_recordbook.txt");
        let home_sum = dir.path().join("home_checksum.txt");
        let dev_rb = dir.path().join("dev_recordbook.txt");
        let dev_sum = dir.path().join("dev_checksum.txt");

        std::fs::write(&home_rb, "Item\n").unwrap();
        std::fs::write(&home_sum, "deadbeef  home_recordbook.txt\n").unwrap();

        let confirm = ScriptedConfirm::new(vec![], vec![]);
        Reconciler::execute(
            Action::CopyHomeToDevice,
            RecordbookLocation { recordbook_path: &home_rb, checksum_path: &home_sum },
            RecordbookLocation { recordbook_path: &dev_rb, checksum_path: &dev_sum },
            &Md5Digest,
            &confirm,
        )
        .unwrap();

        assert_eq!(std::fs::read_to_string(&dev_rb).unwrap(), "Item\n");
    }
}
