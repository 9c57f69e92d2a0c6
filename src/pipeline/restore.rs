use std::fs::{self, File};
use std::path::{Path, PathBuf};

use super::load_or_empty;
use crate::config::Config;
use crate::confirm::{ConfirmAnswer, UserConfirm};
use crate::device::{DeviceLocator, MountTable, UuidTable};
use crate::digest::Digest;
use crate::ecc::{EccCodec, EccParams};
use crate::error::LtaError;
use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Backup bytes matched the record and its sidecar was intact.
    Restored,
    /// Backup bytes matched the record but the on-device ECC sidecar
    /// didn't; the sidecar was regenerated from the good backup, but the
    /// destination was not written on this call. Rerun restore to copy it
    /// now that the sidecar is clean.
    EccOnlyDamage,
    /// Backup bytes were corrupted; ECC decode recovered them and
    /// repaired the sidecar in place.
    Recovered,
}

pub struct RestorePipeline<'a, M: MountTable, U: UuidTable> {
    pub config: &'a Config,
    pub locator: &'a DeviceLocator<M, U>,
    pub digest: &'a dyn Digest,
    pub confirm: &'a dyn UserConfirm,
}

impl<'a, M: MountTable, U: UuidTable> RestorePipeline<'a, M, U> {
    pub fn run(&self, backup: &Path, destination: &Path) -> Result<RestoreOutcome, LtaError> {
        if !backup.exists() {
            return Err(LtaError::InvalidSource { path: backup.to_path_buf() });
        }
        if destination == backup {
            return Err(LtaError::SourceEqualsDestination { path: backup.to_path_buf() });
        }

        let (_uuid, root) = self.locator.resolve(backup)?;
        let file_name = backup
            .file_name()
            .ok_or_else(|| LtaError::InvalidSource { path: backup.to_path_buf() })?
            .to_string_lossy()
            .into_owned();

        let home_book = load_or_empty(&self.config.home_recordbook_path())?;
        let device_book = load_or_empty(&self.config.device_recordbook_path(&root))?;

        let backup_checksum = self.digest.hash_file(backup)?;

        let home_match = home_book.match_for_restore(&backup_checksum, &file_name);
        let device_match = device_book.match_for_restore(&backup_checksum, &file_name);

        let record = self.decide(backup, home_match, device_match)?.clone();

        let destination = if destination.is_dir() {
            destination.join(&record.file_name)
        } else {
            destination.to_path_buf()
        };

        let ecc_path = self.config.device_ecc_path(&root, &record.checksum);

        if backup_checksum == record.checksum {
            let ecc_checksum_on_disk = self.digest.hash_file(&ecc_path)?;
            if ecc_checksum_on_disk == record.ecc_checksum {
                fs::copy(backup, &destination)?;
                return Ok(RestoreOutcome::Restored);
            }
            self.repair_ecc_only(backup, &ecc_path, &record)?;
            return Ok(RestoreOutcome::EccOnlyDamage);
        }

        self.recover(backup, &ecc_path, &destination, &record)
    }

    /// Regenerate a clean ECC sidecar from an already-valid backup, the
    /// same remedy `RefreshPipeline::repair_ecc_only` applies for this
    /// situation — the backup is good, only its parity sidecar rotted.
    fn repair_ecc_only(&self, backup: &Path, ecc_path: &Path, record: &Record) -> Result<(), LtaError> {
        let params = EccParams { chunk_size: record.chunk_size, ecc_size: record.ecc_size };
        let codec = EccCodec::new(params)?;

        let tmp_ecc = tmp_path(ecc_path);
        {
            let source = File::open(backup)?;
            let mut sink = std::io::sink();
            let mut ecc_out = File::create(&tmp_ecc)?;
            codec.encode_stream(source, &mut sink, &mut ecc_out, self.digest)?;
        }
        fs::rename(&tmp_ecc, ecc_path)?;
        Ok(())
    }

    /// Decode the corrupted backup against its sidecar, verify both
    /// recovered halves against the record, and on success repair the
    /// on-device sidecar while leaving the destination file written.
    fn recover(
        &self,
        backup: &Path,
        ecc_path: &Path,
        destination: &Path,
        record: &Record,
    ) -> Result<RestoreOutcome, LtaError> {
        let params = EccParams { chunk_size: record.chunk_size, ecc_size: record.ecc_size };
        let codec = EccCodec::new(params)?;

        let tmp_dest = tmp_path(destination);
        let tmp_ecc = tmp_path(ecc_path);

        {
            let source = File::open(backup)?;
            let ecc_source = File::open(ecc_path)?;
            let data_out = File::create(&tmp_dest)?;
            let ecc_out = File::create(&tmp_ecc)?;
            let result = codec.repair_stream(source, ecc_source, data_out, Some(ecc_out));
            if result.is_err() {
                let _ = fs::remove_file(&tmp_dest);
                let _ = fs::remove_file(&tmp_ecc);
            }
            result?;
        }

        let recovered_checksum = self.digest.hash_file(&tmp_dest)?;
        let recovered_ecc_checksum = self.digest.hash_file(&tmp_ecc)?;

        if recovered_checksum != record.checksum || recovered_ecc_checksum != record.ecc_checksum {
            let _ = fs::remove_file(&tmp_dest);
            let _ = fs::remove_file(&tmp_ecc);
            return Err(LtaError::TooManyErrors { path: destination.to_path_buf(), chunk_index: 0 });
        }

        fs::rename(&tmp_dest, destination)?;
        fs::rename(&tmp_ecc, ecc_path)?;

        Ok(RestoreOutcome::Recovered)
    }

    /// Apply the §4.8 truth table: decide the authoritative record from
    /// the home/device matches, prompting when the two disagree.
    fn decide<'r>(
        &self,
        backup: &Path,
        home_match: Option<(&'r Record, bool)>,
        device_match: Option<(&'r Record, bool)>,
    ) -> Result<&'r Record, LtaError> {
        let ask = |context: &str| -> Result<(), LtaError> {
            if self.confirm.confirm(context) == ConfirmAnswer::Yes {
                Ok(())
            } else {
                Err(LtaError::UserAborted { context: context.to_string() })
            }
        };

        match (home_match, device_match) {
            (Some((l, true)), _) => Ok(l),
            (Some((l, false)), Some((b, true))) => Ok(b),
            (Some((l, false)), Some((_, false))) => {
                ask("home and device both disagree with the backup on disk; continue with the home record?")?;
                Ok(l)
            }
            (Some((l, false)), None) => {
                ask("backup only loosely matches the home record; continue anyway?")?;
                Ok(l)
            }
            (None, Some((b, true))) => Ok(b),
            (None, Some((b, false))) => {
                ask("backup only loosely matches the device record; continue anyway?")?;
                Ok(b)
            }
            (None, None) => Err(LtaError::NotInRecordbook { path: backup.to_path_buf() }),
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".rec");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::ScriptedConfirm;
    use crate::device::{MountEntry, MountTable, UuidTable};
    use crate::digest::Md5Digest;
    use crate::pipeline::store::StorePipeline;
    use std::collections::HashMap;

    struct FakeMounts(Vec<MountEntry>);
    impl MountTable for FakeMounts {
        fn mounts(&self) -> Result<Vec<MountEntry>, crate::device::DeviceError> {
            Ok(self.0.clone())
        }
    }

    struct FakeUuids(HashMap<String, PathBuf>);
    impl UuidTable for FakeUuids {
        fn uuid_for_device(&self, device: &Path) -> Result<Option<String>, crate::device::DeviceError> {
            Ok(self.0.iter().find(|(_, d)| d.as_path() == device).map(|(u, _)| u.clone()))
        }
        fn device_for_uuid(&self, uuid: &str) -> Result<Option<PathBuf>, crate::device::DeviceError> {
            Ok(self.0.get(uuid).cloned())
        }
    }

    fn fixture(device_root: &Path) -> DeviceLocator<FakeMounts, FakeUuids> {
        let mounts = FakeMounts(vec![MountEntry {
            device: PathBuf::from("/dev/fake1"),
            mount_point: device_root.to_path_buf(),
            fs_type: "ext4".into(),
        }]);
        let mut uuids = HashMap::new();
        uuids.insert("FAKE-UUID".to_string(), PathBuf::from("/dev/fake1"));
        DeviceLocator::new(mounts, FakeUuids(uuids))
    }

    fn store_one(config: &Config, locator: &DeviceLocator<FakeMounts, FakeUuids>, device_dir: &Path, contents: &[u8]) -> (PathBuf, PathBuf) {
        let src_dir = tempfile::tempdir().unwrap();
        let source_path = src_dir.path().join("a.bin");
        fs::write(&source_path, contents).unwrap();
        let confirm = ScriptedConfirm::new(vec![], vec![]);
        let store = StorePipeline { config, locator, digest: &Md5Digest, confirm: &confirm };
        store.run(&source_path, device_dir).unwrap();
        (device_dir.join("a.bin"), config.device_ecc_path(device_dir, &Md5Digest.hash_bytes(contents)))
    }

    #[test]
    fn restores_undamaged_backup() {
        let home_dir = tempfile::tempdir().unwrap();
        let device_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();

        let config = Config::at_root(home_dir.path().join(".ltarchiver"));
        let locator = fixture(device_dir.path());
        let (backup, _ecc) = store_one(&config, &locator, device_dir.path(), b"hello world");

        let confirm = ScriptedConfirm::new(vec![], vec![]);
        let restore = RestorePipeline { config: &config, locator: &locator, digest: &Md5Digest, confirm: &confirm };
        let outcome = restore.run(&backup, dest_dir.path()).unwrap();
        assert_eq!(outcome, RestoreOutcome::Restored);
        assert_eq!(fs::read(dest_dir.path().join("a.bin")).unwrap(), b"hello world");
    }

    #[test]
    fn recovers_corrupted_backup_within_capacity() {
        let home_dir = tempfile::tempdir().unwrap();
        let device_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();

        let config = Config::at_root(home_dir.path().join(".ltarchiver"));
        let locator = fixture(device_dir.path());
        let (backup, _ecc) = store_one(&config, &locator, device_dir.path(), &vec![0x11u8; 64]);

        let mut bytes = fs::read(&backup).unwrap();
        for b in bytes.iter_mut().take(8) {
            *b ^= 0xFF;
        }
        fs::write(&backup, &bytes).unwrap();

        let confirm = ScriptedConfirm::new(vec![], vec![]);
        let restore = RestorePipeline { config: &config, locator: &locator, digest: &Md5Digest, confirm: &confirm };
        let outcome = restore.run(&backup, dest_dir.path()).unwrap();
        assert_eq!(outcome, RestoreOutcome::Recovered);
        assert_eq!(fs::read(dest_dir.path().join("a.bin")).unwrap(), vec![0x11u8; 64]);
    }

    #[test]
    fn signals_ecc_only_damage_then_self_heals_on_rerun() {
        let home_dir = tempfile::tempdir().unwrap();
        let device_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();

        let config = Config::at_root(home_dir.path().join(".ltarchiver"));
        let locator = fixture(device_dir.path());
        let (backup, ecc_path) = store_one(&config, &locator, device_dir.path(), b"hello world");

        let mut ecc_bytes = fs::read(&ecc_path).unwrap();
        ecc_bytes[0] ^= 0xFF;
        fs::write(&ecc_path, &ecc_bytes).unwrap();

        let confirm = ScriptedConfirm::new(vec![], vec![]);
        let restore = RestorePipeline { config: &config, locator: &locator, digest: &Md5Digest, confirm: &confirm };
        let first = restore.run(&backup, dest_dir.path()).unwrap();
        assert_eq!(first, RestoreOutcome::EccOnlyDamage);

        let second = restore.run(&backup, dest_dir.path()).unwrap();
        assert_eq!(second, RestoreOutcome::Restored);
        assert_eq!(fs::read(dest_dir.path().join("a.bin")).unwrap(), b"hello world");
    }

    #[test]
    fn unknown_backup_is_not_in_recordbook() {
        let home_dir = tempfile::tempdir().unwrap();
        let device_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();

        fs::create_dir_all(device_dir.path()).unwrap();
        let stray = device_dir.path().join("stray.bin");
        fs::write(&stray, b"nobody stored this").unwrap();

        let config = Config::at_root(home_dir.path().join(".ltarchiver"));
        let locator = fixture(device_dir.path());
        let confirm = ScriptedConfirm::new(vec![], vec![]);
        let restore = RestorePipeline { config: &config, locator: &locator, digest: &Md5Digest, confirm: &confirm };
        let err = restore.run(&stray, dest_dir.path()).unwrap_err();
        assert!(matches!(err, LtaError::NotInRecordbook { .. }));
    }
}
