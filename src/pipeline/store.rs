use std::fs::{self, File};
use std::path::Path;

use super::{load_or_empty, recordbooks_equal};
use crate::config::Config;
use crate::confirm::UserConfirm;
use crate::device::{DeviceLocator, MountTable, UuidTable};
use crate::digest::Digest;
use crate::ecc::{EccCodec, EccParams};
use crate::error::LtaError;
use crate::reconciler::{Reconciler, RecordbookLocation};
use crate::record::Record;

/// Archives one source file to a device. Any failure aborts, leaving no
/// partial state beyond the ECC sidecar, which is cheaply regeneratable
/// by a subsequent run.
pub struct StorePipeline<'a, M: MountTable, U: UuidTable> {
    pub config: &'a Config,
    pub locator: &'a DeviceLocator<M, U>,
    pub digest: &'a dyn Digest,
    pub confirm: &'a dyn UserConfirm,
}

impl<'a, M: MountTable, U: UuidTable> StorePipeline<'a, M, U> {
    pub fn run(&self, source: &Path, destination_dir: &Path) -> Result<Record, LtaError> {
        let metadata = fs::metadata(source)
            .map_err(|_| LtaError::InvalidSource { path: source.to_path_buf() })?;
        if !metadata.is_file() {
            return Err(LtaError::InvalidSource { path: source.to_path_buf() });
        }
        if !destination_dir.is_dir() {
            return Err(LtaError::InvalidDestination { path: destination_dir.to_path_buf() });
        }
        let (uuid, root) = self.locator.resolve(destination_dir)?;

        let file_name = source
            .file_name()
            .ok_or_else(|| LtaError::InvalidSource { path: source.to_path_buf() })?
            .to_string_lossy()
            .into_owned();

        let home_rb_path = self.config.home_recordbook_path();
        let home_sum_path = self.config.home_checksum_path();
        let device_rb_path = self.config.device_recordbook_path(&root);
        let device_sum_path = self.config.device_checksum_path(&root);

        let home_status = crate::recordbook::Recordbook::validate_checksum(
            &home_rb_path,
            &home_sum_path,
            self.digest,
        )?;
        let device_status = crate::recordbook::Recordbook::validate_checksum(
            &device_rb_path,
            &device_sum_path,
            self.digest,
        )?;
        let contents_equal = recordbooks_equal(&home_rb_path, &device_rb_path, self.digest)?;
        let action = Reconciler::plan(home_status, device_status, contents_equal, true);
        Reconciler::execute(
            action,
            RecordbookLocation { recordbook_path: &home_rb_path, checksum_path: &home_sum_path },
            RecordbookLocation { recordbook_path: &device_rb_path, checksum_path: &device_sum_path },
            self.digest,
            self.confirm,
        )?;

        let mut home_book = load_or_empty(&home_rb_path)?;
        let mut device_book = load_or_empty(&device_rb_path)?;

        let checksum = self.digest.hash_file(source)?;

        if let Some(existing) = home_book.find_by_checksum(&checksum) {
            let existing_path = self
                .locator
                .root_of(&existing.destination_uuid)
                .map(|r| r.join(&existing.file_name))
                .ok();
            let still_exists = existing_path.as_ref().is_some_and(|p| p.exists());
            if still_exists {
                return Err(LtaError::AlreadyArchived {
                    checksum,
                    path: existing_path.unwrap(),
                });
            }
        }
        if let Some(existing) = home_book.find_by_name(&file_name, &uuid) {
            if existing.checksum != checksum {
                return Err(LtaError::NameCollision { name: file_name });
            }
        }

        let dest_file_path = root.join(&file_name);
        let claimed = home_book.find_by_checksum(&checksum).is_some()
            || home_book.find_by_name(&file_name, &uuid).is_some();
        if dest_file_path.exists() && !claimed {
            return Err(LtaError::UnmanagedConflict { path: dest_file_path });
        }

        let ecc_dir = self.config.device_ecc_dir(&root);
        fs::create_dir_all(&ecc_dir)?;

        let params = EccParams {
            chunk_size: self.config.default_chunk_size,
            ecc_size: self.config.default_ecc_size,
        };
        let codec = EccCodec::new(params)?;
        let ecc_path = self.config.device_ecc_path(&root, &checksum);

        let source_reader = File::open(source)?;
        let mut data_out = File::create(&dest_file_path)?;
        let mut ecc_out = File::create(&ecc_path)?;
        codec.encode_stream(source_reader, &mut data_out, &mut ecc_out, self.digest)?;

        data_out.sync_all()?;
        ecc_out.sync_all()?;
        drop(data_out);
        drop(ecc_out);

        let ecc_checksum = self.digest.hash_file(&ecc_path)?;

        let record = Record::new(
            file_name,
            source.to_path_buf(),
            uuid,
            params.chunk_size,
            params.ecc_size,
            checksum,
            ecc_checksum,
            chrono::Local::now().naive_local(),
        );

        let locator = self.locator;
        home_book.insert(record.clone(), |prior| {
            locator
                .root_of(&prior.destination_uuid)
                .map(|r| r.join(&prior.file_name).exists())
                .unwrap_or(false)
        })?;
        device_book.merge(&home_book);

        home_book.write(&home_rb_path, &home_sum_path, self.digest)?;
        device_book.write(&device_rb_path, &device_sum_path, self.digest)?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::ScriptedConfirm;
    use crate::device::{MountEntry, MountTable, UuidTable};
    use crate::digest::Md5Digest;
    use std::collections::HashMap;
    use std::path::PathBuf;

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

    #[test]
    fn stores_a_small_file_and_writes_both_recordbooks() {
        let home_dir = tempfile::tempdir().unwrap();
        let device_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();

        let source_path = src_dir.path().join("hello.txt");
        fs::write(&source_path, b"hello world").unwrap();

        let config = Config::at_root(home_dir.path().join(".ltarchiver"));
        let locator = fixture(device_dir.path());
        let confirm = ScriptedConfirm::new(vec![], vec![]);

        let pipeline = StorePipeline {
            config: &config,
            locator: &locator,
            digest: &Md5Digest,
            confirm: &confirm,
        };

        let record = pipeline.run(&source_path, device_dir.path()).unwrap();
        assert_eq!(record.checksum, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert!(device_dir.path().join("hello.txt").exists());
        assert!(config.home_recordbook_path().exists());
        assert!(config.device_recordbook_path(device_dir.path()).exists());
    }

    #[test]
    fn rejects_already_archived_bytes() {
        let home_dir = tempfile::tempdir().unwrap();
        let device_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();

        let source_path = src_dir.path().join("hello.txt");
        fs::write(&source_path, b"hello world").unwrap();

        let config = Config::at_root(home_dir.path().join(".ltarchiver"));
        let locator = fixture(device_dir.path());
        let confirm = ScriptedConfirm::new(vec![], vec![]);
        let pipeline = StorePipeline { config: &config, locator: &locator, digest: &Md5Digest, confirm: &confirm };

        pipeline.run(&source_path, device_dir.path()).unwrap();
        let err = pipeline.run(&source_path, device_dir.path()).unwrap_err();
        assert!(matches!(err, LtaError::AlreadyArchived { .. }));
    }

    #[test]
    fn restoring_after_manual_deletion_tombstones_and_reinserts() {
        let home_dir = tempfile::tempdir().unwrap();
        let device_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();

        let source_path = src_dir.path().join("hello.txt");
        fs::write(&source_path, b"hello world").unwrap();

        let config = Config::at_root(home_dir.path().join(".ltarchiver"));
        let locator = fixture(device_dir.path());
        let confirm = ScriptedConfirm::new(vec![], vec![]);
        let pipeline = StorePipeline { config: &config, locator: &locator, digest: &Md5Digest, confirm: &confirm };

        pipeline.run(&source_path, device_dir.path()).unwrap();
        fs::remove_file(device_dir.path().join("hello.txt")).unwrap();

        pipeline.run(&source_path, device_dir.path()).unwrap();

        let book = crate::recordbook::Recordbook::load(&config.home_recordbook_path()).unwrap();
        let non_deleted: Vec<_> = book.records().iter().filter(|r| !r.deleted).collect();
        assert_eq!(non_deleted.len(), 1);
        assert_eq!(book.records().iter().filter(|r| r.deleted).count(), 1);
    }
}
