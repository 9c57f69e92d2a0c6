use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use ltarchiver::confirm::{NonInteractiveConfirm, TerminalConfirm, UserConfirm};
use ltarchiver::device::{DeviceLocator, LinuxMountTable, LinuxUuidTable};
use ltarchiver::digest::Md5Digest;
use ltarchiver::pipeline::{RefreshPipeline, RestoreOutcome, RestorePipeline, StorePipeline};
use ltarchiver::Config;

#[derive(Parser)]
#[command(name = "ltarc", version = "1.0.0", about = "Cold-storage file archiver with Reed-Solomon ECC sidecars")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive one or more files to a device
    Store {
        /// Skip interactive reconciliation prompts, failing instead
        #[arg(long)]
        non_interactive: bool,
        #[arg(required = true, num_args = 1..)]
        source: Vec<PathBuf>,
        destination_dir: PathBuf,
    },
    /// Verify a backup against its record, recovering it via ECC if needed
    #[command(name = "check-and-restore")]
    CheckAndRestore {
        backup_file: PathBuf,
        destination: PathBuf,
    },
    /// Re-verify (and recover where needed) every record on a device
    Refresh {
        device_path: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let locator = DeviceLocator::new(LinuxMountTable::new(), LinuxUuidTable::new());
    let terminal_confirm = TerminalConfirm::new(config.debug_mode);
    let digest = Md5Digest;

    match cli.command {
        Commands::Store { non_interactive, source, destination_dir } => {
            let non_interactive_confirm = NonInteractiveConfirm;
            let confirm: &dyn UserConfirm =
                if non_interactive { &non_interactive_confirm } else { &terminal_confirm };
            run_store(&config, &locator, &digest, confirm, &source, &destination_dir)
        }
        Commands::CheckAndRestore { backup_file, destination } => {
            run_restore(&config, &locator, &digest, &terminal_confirm, &backup_file, &destination)
        }
        Commands::Refresh { device_path } => run_refresh(&config, &locator, &digest, &terminal_confirm, &device_path),
    }
}

fn run_store(
    config: &Config,
    locator: &DeviceLocator<LinuxMountTable, LinuxUuidTable>,
    digest: &Md5Digest,
    confirm: &dyn UserConfirm,
    sources: &[PathBuf],
    destination_dir: &PathBuf,
) -> ExitCode {
    let pipeline = StorePipeline { config, locator, digest, confirm };
    for source in sources {
        let span = tracing::info_span!("store", source = %source.display());
        let _enter = span.enter();

        let (archive_input, tar_guard) = match tar_if_directory(source) {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("ltarc: store {}: {e}", source.display());
                return ExitCode::from(1);
            }
        };

        match pipeline.run(&archive_input, destination_dir) {
            Ok(record) => {
                tracing::info!(checksum = %record.checksum, "stored {}", source.display());
                println!("stored {} -> {} ({})", source.display(), record.file_name, record.checksum);
            }
            Err(e) => {
                eprintln!("ltarc: store {}: {e}", source.display());
                return ExitCode::from(e.exit_code() as u8);
            }
        }
        drop(tar_guard);
    }
    ExitCode::SUCCESS
}

/// If `source` is a directory, tars it into a temp file next to it and
/// returns that file's path, removing the tar once the caller drops the
/// returned guard. Regular files pass through untouched. This is the
/// directory-tarring shortcut: a pre-step ahead of `StorePipeline`, never
/// part of the core pipeline types.
fn tar_if_directory(source: &std::path::Path) -> std::io::Result<(PathBuf, Option<TarGuard>)> {
    if !source.is_dir() {
        return Ok((source.to_path_buf(), None));
    }

    let dir_name = source.file_name().unwrap_or_default().to_string_lossy().into_owned();
    let tar_path = std::env::temp_dir().join(format!("{dir_name}.ltarc.tar"));
    let tar_file = std::fs::File::create(&tar_path)?;
    let mut builder = tar::Builder::new(tar_file);
    builder.append_dir_all(&dir_name, source)?;
    builder.into_inner()?.sync_all()?;

    Ok((tar_path.clone(), Some(TarGuard(tar_path))))
}

/// Removes its temp tar file on drop, regardless of how `run_store` exits.
struct TarGuard(PathBuf);

impl Drop for TarGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn run_restore(
    config: &Config,
    locator: &DeviceLocator<LinuxMountTable, LinuxUuidTable>,
    digest: &Md5Digest,
    confirm: &TerminalConfirm,
    backup_file: &PathBuf,
    destination: &PathBuf,
) -> ExitCode {
    let pipeline = RestorePipeline { config, locator, digest, confirm };
    let span = tracing::info_span!("check-and-restore", backup = %backup_file.display());
    let _enter = span.enter();

    match pipeline.run(backup_file, destination) {
        Ok(RestoreOutcome::Restored) => {
            println!("restored {} -> {}", backup_file.display(), destination.display());
            ExitCode::SUCCESS
        }
        Ok(RestoreOutcome::Recovered) => {
            println!("recovered {} -> {} (ECC correction applied)", backup_file.display(), destination.display());
            ExitCode::SUCCESS
        }
        Ok(RestoreOutcome::EccOnlyDamage) => {
            eprintln!("ltarc: only the ecc differs for {}; rerun restore to repair it", backup_file.display());
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("ltarc: check-and-restore {}: {e}", backup_file.display());
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run_refresh(
    config: &Config,
    locator: &DeviceLocator<LinuxMountTable, LinuxUuidTable>,
    digest: &Md5Digest,
    confirm: &TerminalConfirm,
    device_path: &PathBuf,
) -> ExitCode {
    let pipeline = RefreshPipeline { config, locator, digest, confirm };
    let span = tracing::info_span!("refresh", device = %device_path.display());
    let _enter = span.enter();

    match pipeline.run(device_path) {
        Ok(report) => {
            println!(
                "refreshed {}: {} verified, {} recovered, {} failed",
                device_path.display(),
                report.verified,
                report.recovered,
                report.failures.len(),
            );
            for (file_name, reason) in &report.failures {
                tracing::warn!(file = %file_name, %reason, "refresh: record failed");
                eprintln!("  failed: {file_name}: {reason}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("ltarc: refresh {}: {e}", device_path.display());
            ExitCode::from(1)
        }
    }
}
