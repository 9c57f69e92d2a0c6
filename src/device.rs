//! Device identity layer — resolves a filesystem path to a stable device
//! UUID and mount root, and back, so catalog entries survive remount or
//! relabel.
//!
//! Linux-specific by construction: [`MountTable`] abstracts `/proc/mounts`
//! and [`UuidTable`] abstracts the `/dev/disk/by-uuid/` symlink farm, the
//! same split `sysinfo`'s Linux disk backend makes between parsing the
//! mount table and resolving block-device metadata. Tests inject literal
//! in-memory tables instead of touching `/proc` or `/dev`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device with UUID {0} is not present (no /dev/disk/by-uuid symlink)")]
    DeviceNotFound(String),
    #[error("device {0} is not currently mounted")]
    NotMounted(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: PathBuf,
    pub mount_point: PathBuf,
    pub fs_type: String,
}

pub trait MountTable {
    fn mounts(&self) -> Result<Vec<MountEntry>, DeviceError>;
}

pub trait UuidTable {
    fn uuid_for_device(&self, device: &Path) -> Result<Option<String>, DeviceError>;
    fn device_for_uuid(&self, uuid: &str) -> Result<Option<PathBuf>, DeviceError>;
}

/// Parses `/proc/mounts`, one `device mount_point fs_type ...` line per
/// mount, ignoring fields beyond the third (options, dump, pass).
pub struct LinuxMountTable {
    path: PathBuf,
}

impl LinuxMountTable {
    pub fn new() -> Self {
        Self { path: PathBuf::from("/proc/mounts") }
    }
}

impl Default for LinuxMountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable for LinuxMountTable {
    fn mounts(&self) -> Result<Vec<MountEntry>, DeviceError> {
        let content = fs::read_to_string(&self.path)?;
        Ok(parse_proc_mounts(&content))
    }
}

fn parse_proc_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountEntry {
                device: PathBuf::from(unescape_octal(device)),
                mount_point: PathBuf::from(unescape_octal(mount_point)),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

/// `/proc/mounts` escapes spaces, tabs, and backslashes in paths as octal
/// `\NNN` sequences; undo that so mount points with spaces compare equal
/// to the real filesystem path.
fn unescape_octal(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            if let Ok(value) = u8::from_str_radix(&s[i + 1..i + 4], 8) {
                out.push(value as char);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

/// Resolves UUIDs via `/dev/disk/by-uuid/<uuid>` symlinks, each pointing
/// (relatively) at the real block device node under `/dev`.
pub struct LinuxUuidTable {
    by_uuid_dir: PathBuf,
}

impl LinuxUuidTable {
    pub fn new() -> Self {
        Self { by_uuid_dir: PathBuf::from("/dev/disk/by-uuid") }
    }

    fn entries(&self) -> Result<HashMap<String, PathBuf>, DeviceError> {
        let mut map = HashMap::new();
        let dir = match fs::read_dir(&self.by_uuid_dir) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(map),
            Err(e) => return Err(e.into()),
        };
        for entry in dir {
            let entry = entry?;
            let uuid = entry.file_name().to_string_lossy().into_owned();
            let target = fs::read_link(entry.path())?;
            let resolved = if target.is_absolute() {
                target
            } else {
                self.by_uuid_dir.join(target)
            };
            let canonical = fs::canonicalize(&resolved).unwrap_or(resolved);
            map.insert(uuid, canonical);
        }
        Ok(map)
    }
}

impl Default for LinuxUuidTable {
    fn default() -> Self {
        Self::new()
    }
}

impl UuidTable for LinuxUuidTable {
    fn uuid_for_device(&self, device: &Path) -> Result<Option<String>, DeviceError> {
        let canonical_target = fs::canonicalize(device).unwrap_or_else(|_| device.to_path_buf());
        let entries = self.entries()?;
        Ok(entries
            .into_iter()
            .find(|(_, dev)| dev == &canonical_target)
            .map(|(uuid, _)| uuid))
    }

    fn device_for_uuid(&self, uuid: &str) -> Result<Option<PathBuf>, DeviceError> {
        Ok(self.entries()?.remove(uuid))
    }
}

/// Maps a filesystem path to `(device_uuid, mount_root)` and back.
pub struct DeviceLocator<M: MountTable, U: UuidTable> {
    mount_table: M,
    uuid_table: U,
}

impl<M: MountTable, U: UuidTable> DeviceLocator<M, U> {
    pub fn new(mount_table: M, uuid_table: U) -> Self {
        Self { mount_table, uuid_table }
    }

    /// Walks from `path`'s absolute, canonical form toward the filesystem
    /// root, returning the UUID and mount root of the most specific mount
    /// entry that contains it.
    pub fn resolve(&self, path: &Path) -> Result<(String, PathBuf), DeviceError> {
        let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mounts = self.mount_table.mounts()?;

        let best = mounts
            .iter()
            .filter(|m| absolute.starts_with(&m.mount_point))
            .max_by_key(|m| m.mount_point.as_os_str().len())
            .ok_or_else(|| DeviceError::NotMounted(absolute.display().to_string()))?;

        let uuid = self
            .uuid_table
            .uuid_for_device(&best.device)?
            .ok_or_else(|| DeviceError::DeviceNotFound(best.device.display().to_string()))?;

        Ok((uuid, best.mount_point.clone()))
    }

    /// Inverse of `resolve`: find the current mount root of a device UUID.
    pub fn root_of(&self, uuid: &str) -> Result<PathBuf, DeviceError> {
        let device = self
            .uuid_table
            .device_for_uuid(uuid)?
            .ok_or_else(|| DeviceError::DeviceNotFound(uuid.to_string()))?;

        let mounts = self.mount_table.mounts()?;
        mounts
            .into_iter()
            .find(|m| m.device == device)
            .map(|m| m.mount_point)
            .ok_or_else(|| DeviceError::NotMounted(uuid.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeMounts(Vec<MountEntry>);
    impl MountTable for FakeMounts {
        fn mounts(&self) -> Result<Vec<MountEntry>, DeviceError> {
            Ok(self.0.clone())
        }
    }

    struct FakeUuids(HashMap<String, PathBuf>);
    impl UuidTable for FakeUuids {
        fn uuid_for_device(&self, device: &Path) -> Result<Option<String>, DeviceError> {
            Ok(self.0.iter().find(|(_, d)| d.as_path() == device).map(|(u, _)| u.clone()))
        }
        fn device_for_uuid(&self, uuid: &str) -> Result<Option<PathBuf>, DeviceError> {
            Ok(self.0.get(uuid).cloned())
        }
    }

    fn fixture() -> DeviceLocator<FakeMounts, FakeUuids> {
        let mounts = FakeMounts(vec![
            MountEntry { device: PathBuf::from("/dev/sda1"), mount_point: PathBuf::from("/"), fs_type: "ext4".into() },
            MountEntry { device: PathBuf::from("/dev/sdb1"), mount_point: PathBuf::from("/mnt/backup"), fs_type: "ext4".into() },
        ]);
        let mut uuids = HashMap::new();
        uuids.insert("AAAA-1111".to_string(), PathBuf::from("/dev/sda1"));
        uuids.insert("BBBB-2222".to_string(), PathBuf::from("/dev/sdb1"));
        DeviceLocator::new(mounts, FakeUuids(uuids))
    }

    #[test]
    fn resolve_picks_most_specific_mount() {
        let locator = fixture();
        let (uuid, root) = locator.resolve(Path::new("/mnt/backup/photos/a.jpg")).unwrap();
        assert_eq!(uuid, "BBBB-2222");
        assert_eq!(root, PathBuf::from("/mnt/backup"));
    }

    #[test]
    fn resolve_falls_back_to_root_mount() {
        let locator = fixture();
        let (uuid, root) = locator.resolve(Path::new("/home/user/file.txt")).unwrap();
        assert_eq!(uuid, "AAAA-1111");
        assert_eq!(root, PathBuf::from("/"));
    }

    #[test]
    fn root_of_is_inverse_of_resolve() {
        let locator = fixture();
        assert_eq!(locator.root_of("BBBB-2222").unwrap(), PathBuf::from("/mnt/backup"));
    }

    #[test]
    fn root_of_unknown_uuid_is_device_not_found() {
        let locator = fixture();
        assert!(matches!(locator.root_of("CCCC-3333"), Err(DeviceError::DeviceNotFound(_))));
    }

    #[test]
    fn unescape_octal_handles_space() {
        assert_eq!(unescape_octal("/mnt/my\\040drive"), "/mnt/my drive");
    }
}
