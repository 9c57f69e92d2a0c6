//! Process-wide configuration, gathered once in `main` instead of read from
//! module-load-time globals. Every pipeline and recordbook operation takes
//! `&Config` explicitly, which makes test isolation a matter of pointing
//! `home_metadata_dir` at a fresh [`tempfile::TempDir`] rather than mutating
//! process environment.

use std::path::PathBuf;

/// Fixed directory name used both under the home directory and under every
/// archival device's mount root.
pub const METADATA_DIR_NAME: &str = ".ltarchiver";
pub const RECORDBOOK_FILE_NAME: &str = "recordbook.txt";
pub const CHECKSUM_FILE_NAME: &str = "checksum.txt";
pub const ECC_DIR_NAME: &str = "ecc";

/// Largest codeword the Reed-Solomon codec can form over GF(256):
/// `chunk_size + ecc_size` must never exceed this.
pub const MAX_CODEWORD_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the home recordbook: `~/.ltarchiver`, or
    /// `./test_data/.ltarchiver` when `debug_mode` is set.
    pub home_metadata_dir: PathBuf,
    /// Data bytes protected per Reed-Solomon codeword.
    pub default_chunk_size: u16,
    /// Parity bytes per Reed-Solomon codeword.
    pub default_ecc_size: u8,
    /// Set from `DEBUG=1`. Redirects the home metadata root under the
    /// current directory and suppresses interactive "press ENTER" gates.
    pub debug_mode: bool,
}

impl Config {
    /// Build configuration from the environment, matching the `DEBUG=1`
    /// contract: it relocates the home recordbook root and quiets
    /// interactive confirmation gates, and is the only environment
    /// variable the core consults.
    pub fn from_env() -> Self {
        let debug_mode = std::env::var("DEBUG").map(|v| v == "1").unwrap_or(false);
        let home_metadata_dir = if debug_mode {
            PathBuf::from("./test_data").join(METADATA_DIR_NAME)
        } else {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(METADATA_DIR_NAME)
        };
        Self {
            home_metadata_dir,
            default_chunk_size: 239,
            default_ecc_size: 16,
            debug_mode,
        }
    }

    /// Build a `Config` rooted at an arbitrary directory, bypassing the
    /// environment entirely. Used by tests to get a fresh, isolated home
    /// recordbook per test.
    pub fn at_root(home_metadata_dir: PathBuf) -> Self {
        Self {
            home_metadata_dir,
            default_chunk_size: 239,
            default_ecc_size: 16,
            debug_mode: true,
        }
    }

    pub fn home_recordbook_path(&self) -> PathBuf {
        self.home_metadata_dir.join(RECORDBOOK_FILE_NAME)
    }

    pub fn home_checksum_path(&self) -> PathBuf {
        self.home_metadata_dir.join(CHECKSUM_FILE_NAME)
    }

    /// Device-side metadata directory for a device mounted at `root`.
    pub fn device_metadata_dir(&self, device_root: &std::path::Path) -> PathBuf {
        device_root.join(METADATA_DIR_NAME)
    }

    pub fn device_recordbook_path(&self, device_root: &std::path::Path) -> PathBuf {
        self.device_metadata_dir(device_root).join(RECORDBOOK_FILE_NAME)
    }

    pub fn device_checksum_path(&self, device_root: &std::path::Path) -> PathBuf {
        self.device_metadata_dir(device_root).join(CHECKSUM_FILE_NAME)
    }

    pub fn device_ecc_dir(&self, device_root: &std::path::Path) -> PathBuf {
        self.device_metadata_dir(device_root).join(ECC_DIR_NAME)
    }

    pub fn device_ecc_path(&self, device_root: &std::path::Path, checksum: &str) -> PathBuf {
        self.device_ecc_dir(device_root).join(checksum)
    }
}
