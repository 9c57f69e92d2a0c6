use std::fs;
use std::path::Path;

use super::{load_or_empty, recordbooks_equal};
use crate::config::Config;
use crate::confirm::UserConfirm;
use crate::device::{DeviceLocator, MountTable, UuidTable};
use crate::digest::Digest;
use crate::error::LtaError;
use crate::reconciler::{Reconciler, RecordbookLocation};

use super::restore::RestoreOutcome;

#[derive(Debug, Default)]
pub struct RefreshReport {
    pub verified: usize,
    pub recovered: usize,
    pub failures: Vec<(String, String)>,
}

/// Re-verifies (and, where needed, recovers) every record belonging to a
/// device, continuing past per-record failures rather than aborting the
/// whole pass — the one pipeline that always exits 0.
pub struct RefreshPipeline<'a, M: MountTable, U: UuidTable> {
    pub config: &'a Config,
    pub locator: &'a DeviceLocator<M, U>,
    pub digest: &'a dyn Digest,
    pub confirm: &'a dyn UserConfirm,
}

impl<'a, M: MountTable, U: UuidTable> RefreshPipeline<'a, M, U> {
    pub fn run(&self, device_path: &Path) -> Result<RefreshReport, LtaError> {
        let (uuid, root) = self.locator.resolve(device_path)?;

        let home_rb_path = self.config.home_recordbook_path();
        let home_sum_path = self.config.home_checksum_path();
        let device_rb_path = self.config.device_recordbook_path(&root);
        let device_sum_path = self.config.device_checksum_path(&root);

        let home_status = crate::recordbook::Recordbook::validate_checksum(&home_rb_path, &home_sum_path, self.digest)?;
        let device_status = crate::recordbook::Recordbook::validate_checksum(&device_rb_path, &device_sum_path, self.digest)?;
        let contents_equal = recordbooks_equal(&home_rb_path, &device_rb_path, self.digest)?;
        let action = Reconciler::plan(home_status, device_status, contents_equal, false);
        Reconciler::execute(
            action,
            RecordbookLocation { recordbook_path: &home_rb_path, checksum_path: &home_sum_path },
            RecordbookLocation { recordbook_path: &device_rb_path, checksum_path: &device_sum_path },
            self.digest,
            self.confirm,
        )?;

        let mut home_book = load_or_empty(&home_rb_path)?;
        let device_book = load_or_empty(&device_rb_path)?;
        home_book.merge(&device_book);
        home_book.write(&home_rb_path, &home_sum_path, self.digest)?;

        let mut report = RefreshReport::default();

        let targets: Vec<_> = home_book
            .records()
            .iter()
            .filter(|r| !r.deleted && r.destination_uuid == uuid)
            .cloned()
            .collect();

        for record in targets {
            let backup = root.join(&record.file_name);
            match self.refresh_one(&backup, &root, &record) {
                Ok(RestoreOutcome::Restored) => report.verified += 1,
                Ok(RestoreOutcome::Recovered) => report.recovered += 1,
                Ok(RestoreOutcome::EccOnlyDamage) => {
                    if let Err(e) = self.repair_ecc_only(&root, &record) {
                        report.failures.push((record.file_name.clone(), e.to_string()));
                    } else {
                        report.verified += 1;
                    }
                }
                Err(e) => report.failures.push((record.file_name.clone(), e.to_string())),
            }
        }

        Ok(report)
    }

    /// Equivalent to one §4.8 recovery step, writing to a `.rec` temp file
    /// and atomically renaming it over the original rather than touching
    /// it directly.
    fn refresh_one(
        &self,
        backup: &Path,
        root: &Path,
        record: &crate::record::Record,
    ) -> Result<RestoreOutcome, LtaError> {
        use crate::ecc::{EccCodec, EccParams};

        if !backup.exists() {
            return Err(LtaError::NotInRecordbook { path: backup.to_path_buf() });
        }

        let ecc_path = self.config.device_ecc_path(root, &record.checksum);
        let backup_checksum = self.digest.hash_file(backup)?;

        if backup_checksum == record.checksum {
            let ecc_checksum_on_disk = self.digest.hash_file(&ecc_path)?;
            if ecc_checksum_on_disk == record.ecc_checksum {
                return Ok(RestoreOutcome::Restored);
            }
            return Ok(RestoreOutcome::EccOnlyDamage);
        }

        let params = EccParams { chunk_size: record.chunk_size, ecc_size: record.ecc_size };
        let codec = EccCodec::new(params)?;

        let tmp_dest = tmp_path(backup);
        let tmp_ecc = tmp_path(&ecc_path);
        {
            let source = fs::File::open(backup)?;
            let ecc_source = fs::File::open(&ecc_path)?;
            let data_out = fs::File::create(&tmp_dest)?;
            let ecc_out = fs::File::create(&tmp_ecc)?;
            let result = codec.repair_stream(source, ecc_source, data_out, Some(ecc_out));
            if result.is_err() {
                let _ = fs::remove_file(&tmp_dest);
                let _ = fs::remove_file(&tmp_ecc);
                result?;
            }
        }

        let recovered_checksum = self.digest.hash_file(&tmp_dest)?;
        let recovered_ecc_checksum = self.digest.hash_file(&tmp_ecc)?;
        if recovered_checksum != record.checksum || recovered_ecc_checksum != record.ecc_checksum {
            let _ = fs::remove_file(&tmp_dest);
            let _ = fs::remove_file(&tmp_ecc);
            return Err(LtaError::TooManyErrors { path: backup.to_path_buf(), chunk_index: 0 });
        }

        fs::rename(&tmp_dest, backup)?;
        fs::rename(&tmp_ecc, &ecc_path)?;
        Ok(RestoreOutcome::Recovered)
    }

    fn repair_ecc_only(&self, root: &Path, record: &crate::record::Record) -> Result<(), LtaError> {
        use crate::ecc::{EccCodec, EccParams};

        let backup = root.join(&record.file_name);
        let ecc_path = self.config.device_ecc_path(root, &record.checksum);
        let params = EccParams { chunk_size: record.chunk_size, ecc_size: record.ecc_size };
        let codec = EccCodec::new(params)?;

        let tmp_ecc = tmp_path(&ecc_path);
        {
            let source = fs::File::open(&backup)?;
            let mut sink = std::io::sink();
            let mut ecc_out = fs::File::create(&tmp_ecc)?;
            codec.encode_stream(source, &mut sink, &mut ecc_out, self.digest)?;
        }
        fs::rename(&tmp_ecc, &ecc_path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".rec");
    path.with_file_name(name)
}
