//! Swap on a freshly carved partition.
//!
//! The partition table is dumped before anything is changed. That dump is the
//! only recovery path: a failure after the backup reports the backup file but
//! never rewrites the table automatically.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use super::disks::{device_name, device_names, device_path, disk_size_bytes};
use super::error::SwapError;
use super::free_space::{check_fits, last_partition_end};
use super::fstab::FstabPersister;
use super::prompt::Prompter;
use super::size::{GIB, SizeSpec};
use super::step::{Step, StepKind, run_step};
use super::{ProvisioningResult, SwapTarget};
use crate::common::command::{CommandRunner, CommandSpec};
use crate::common::config::CrashcapConfig;
use crate::common::shell::{fstab_swap_line, shell_quote};
use crate::ui::{Level, emit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionState {
    Idle,
    BackedUp,
    Created,
    Formatted,
    Activated,
    Persisted,
    Done,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct PartitionRequest {
    pub disk: String,
    pub size: SizeSpec,
}

impl PartitionRequest {
    pub fn new(disk: impl Into<String>, size: SizeSpec) -> Self {
        Self {
            disk: disk.into(),
            size,
        }
    }
}

/// The single device name present in `after` but not in `before`.
pub fn detect_new_partition(before: &[String], after: &[String]) -> Result<String, SwapError> {
    let candidates: Vec<String> = after
        .iter()
        .filter(|name| !before.contains(name))
        .cloned()
        .collect();
    match candidates.as_slice() {
        [only] => Ok(only.clone()),
        _ => Err(SwapError::NoNewPartitionDetected { candidates }),
    }
}

/// `/tmp/partition_table_sda_20250101_120000.backup` for `/dev/sda`.
pub fn backup_file_name(dir: &Path, disk: &str) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!(
        "partition_table_{}_{}.backup",
        device_name(disk).replace('/', "_"),
        timestamp
    ))
}

pub struct PartitionProvisioner<'a> {
    runner: &'a dyn CommandRunner,
    prompter: &'a dyn Prompter,
    fstab: FstabPersister,
    backup_dir: PathBuf,
    settle_delay: Duration,
    state: Cell<PartitionState>,
}

impl<'a> PartitionProvisioner<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        prompter: &'a dyn Prompter,
        fstab: FstabPersister,
        backup_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            prompter,
            fstab,
            backup_dir: backup_dir.into(),
            settle_delay: Duration::from_secs(1),
            state: Cell::new(PartitionState::Idle),
        }
    }

    pub fn from_config(
        runner: &'a dyn CommandRunner,
        prompter: &'a dyn Prompter,
        config: &CrashcapConfig,
    ) -> Self {
        let fstab = FstabPersister::new(config.fstab_path.clone()).with_dry_run(runner.dry_run());
        Self::new(runner, prompter, fstab, config.backup_dir.clone())
            .settle_delay(config.settle_delay())
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Where the last `provision` call stopped.
    pub fn state(&self) -> PartitionState {
        self.state.get()
    }

    fn advance(&self, next: PartitionState) {
        emit(
            Level::Debug,
            "swap.partition.state",
            &format!("{:?} -> {:?}", self.state.get(), next),
            None,
        );
        self.state.set(next);
    }

    fn abort<T>(&self, err: SwapError) -> Result<T, SwapError> {
        self.advance(PartitionState::Aborted);
        Err(err)
    }

    pub fn provision(&self, request: &PartitionRequest) -> Result<ProvisioningResult, SwapError> {
        self.state.set(PartitionState::Idle);
        let disk = device_path(&request.disk);
        let size = request.size;

        // Nothing is written, not even the backup, for a request that cannot fit
        let fit = match check_fits(self.runner, &disk, size) {
            Ok(fit) => fit,
            Err(err) => return self.abort(err),
        };
        if !fit.fits {
            return self.abort(SwapError::InsufficientSpace {
                available_mib: fit.available_mib,
            });
        }

        let backup = match self.backup(&disk) {
            Ok(path) => path,
            Err(err) => return self.abort(err.in_step("Backing up partition table", None, vec![])),
        };
        self.advance(PartitionState::BackedUp);

        let question = format!(
            "Create a {} swap partition on {}? This modifies the partition table.",
            size, disk
        );
        match self.prompter.confirm(&question, false) {
            Ok(true) => {}
            Ok(false) => return self.abort(SwapError::Aborted),
            Err(err) => return self.abort(err),
        }

        match self.create_format_activate(&disk, size, &backup) {
            Ok(device) => {
                let fstab_status = self.fstab.apply(&device);
                self.advance(PartitionState::Persisted);
                emit(
                    Level::Success,
                    "swap.partition.created",
                    &format!("Swap partition {} is active", device),
                    Some(serde_json::json!({
                        "device": device,
                        "backup_file": backup,
                    })),
                );
                self.advance(PartitionState::Done);
                Ok(ProvisioningResult {
                    target: SwapTarget::Partition {
                        device_path: device,
                    },
                    fstab_status,
                    backup_file: Some(backup),
                    retries: 0,
                })
            }
            Err(err) => self.abort(err),
        }
    }

    /// Dump the partition table with `sfdisk --dump`.
    fn backup(&self, disk: &str) -> Result<PathBuf, SwapError> {
        let path = backup_file_name(&self.backup_dir, disk);
        emit(
            Level::Info,
            "swap.partition.backup",
            &format!(
                "Backing up partition table for {} to {}",
                disk,
                path.display()
            ),
            None,
        );
        let output = self
            .runner
            .run_checked(&CommandSpec::privileged_query("sfdisk").args(["--dump", disk]))?;
        fs::write(&path, output.stdout)?;
        emit(
            Level::Success,
            "swap.partition.backup.done",
            "Backup completed",
            Some(serde_json::json!({ "backup_file": path })),
        );
        Ok(path)
    }

    /// BackedUp -> Created -> Formatted -> Activated; returns the device path.
    fn create_format_activate(
        &self,
        disk: &str,
        size: SizeSpec,
        backup: &Path,
    ) -> Result<String, SwapError> {
        let manual = |device: &str, start: f64, end: f64| {
            manual_commands(disk, device, start, end, self.fstab.path())
        };
        let fail = |step: StepKind, device: &str, start: f64, end: f64, err: SwapError| {
            err.in_step(
                step.description(),
                Some(backup.to_path_buf()),
                manual(device, start, end),
            )
        };
        let pending = "<new partition>";

        let context = |err: SwapError| fail(StepKind::CreatePartition, pending, 0.0, 0.0, err);
        let before = device_names(self.runner, disk).map_err(context)?;
        let start = last_partition_end(self.runner, disk).map_err(context)?;
        let disk_gib = disk_size_bytes(self.runner, disk).map_err(context)? as f64 / GIB as f64;
        let end = start + size.as_gib();

        if end > disk_gib {
            let available_mib = ((disk_gib - start) * 1024.0).max(0.0);
            return Err(fail(
                StepKind::CreatePartition,
                pending,
                start,
                end,
                SwapError::InsufficientSpace { available_mib },
            ));
        }

        let mkpart = Step::new(StepKind::CreatePartition, mkpart_command(disk, start, end));
        run_step(self.runner, &mkpart)
            .map_err(|f| fail(f.kind, pending, start, end, f.error))?;

        // The kernel needs a moment to publish the new device node
        thread::sleep(self.settle_delay);

        let device = if self.runner.dry_run() {
            pending.to_string()
        } else {
            let after = device_names(self.runner, disk)
                .map_err(|e| fail(StepKind::CreatePartition, pending, start, end, e))?;
            let name = detect_new_partition(&before, &after)
                .map_err(|e| fail(StepKind::CreatePartition, pending, start, end, e))?;
            device_path(&name)
        };
        self.advance(PartitionState::Created);
        emit(
            Level::Success,
            "swap.partition.new",
            &format!("Created partition {}", device),
            None,
        );

        for (kind, next, program) in [
            (StepKind::Format, PartitionState::Formatted, "mkswap"),
            (StepKind::Activate, PartitionState::Activated, "swapon"),
        ] {
            let step = Step::new(kind, CommandSpec::privileged(program).arg(&device));
            run_step(self.runner, &step)
                .map_err(|f| fail(f.kind, &device, start, end, f.error))?;
            self.advance(next);
        }

        Ok(device)
    }
}

fn gib_arg(value: f64) -> String {
    format!("{:.3}GiB", value)
}

fn mkpart_command(disk: &str, start: f64, end: f64) -> CommandSpec {
    CommandSpec::privileged("parted").args([
        "-s".to_string(),
        disk.to_string(),
        "mkpart".to_string(),
        "primary".to_string(),
        "linux-swap".to_string(),
        gib_arg(start),
        gib_arg(end),
    ])
}

fn manual_commands(disk: &str, device: &str, start: f64, end: f64, fstab: &Path) -> Vec<String> {
    vec![
        mkpart_command(disk, start, end).manual(),
        CommandSpec::privileged("mkswap").arg(device).manual(),
        CommandSpec::privileged("swapon").arg(device).manual(),
        format!(
            "echo {} | sudo tee -a {}",
            shell_quote(&fstab_swap_line(device)),
            shell_quote(&fstab.to_string_lossy())
        ),
    ]
}
