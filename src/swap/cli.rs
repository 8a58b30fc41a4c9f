use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueHint};
use colored::Colorize;
use dialoguer::{Input, Select};

use super::disks::{Disk, device_path, list_disks, list_partitions};
use super::error::SwapError;
use super::free_space::free_space_report;
use super::partition::{PartitionProvisioner, PartitionRequest};
use super::prompt::{AssumeYes, DialoguerPrompter, Prompter};
use super::size::{SizeSpec, format_bytes};
use super::status::{active_swaps, summarize};
use super::swapfile::{SwapFileProvisioner, SwapFileRequest, remove_swap_file};
use super::{FstabStatus, ProvisioningResult, SwapTarget};
use crate::common::command::{CommandRunner, DryRunRunner, SystemRunner};
use crate::common::config::CrashcapConfig;
use crate::ui::prelude::*;

#[derive(Subcommand, Debug, Clone)]
pub enum SwapCommands {
    /// Show active swap areas
    Status,
    /// Create a swap partition in unallocated disk space
    Partition(PartitionArgs),
    /// Create a swap file
    File(FileArgs),
    /// Turn off and delete a swap file
    Remove(RemoveArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PartitionArgs {
    /// Disk to partition (e.g. sda or /dev/nvme0n1); asked for when omitted
    #[arg(short, long)]
    pub disk: Option<String>,

    /// Swap size such as 512M, 2GiB or 1.5G; asked for when omitted
    #[arg(short, long)]
    pub size: Option<String>,

    /// Answer yes to every confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FileArgs {
    /// Swap file location (defaults to `swap_file_path` from the config)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub path: Option<PathBuf>,

    /// Swap size such as 512M, 2GiB or 1.5G; asked for when omitted
    #[arg(short, long)]
    pub size: Option<String>,

    /// Answer yes to every confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RemoveArgs {
    /// Swap file to remove (defaults to `swap_file_path` from the config)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub path: Option<PathBuf>,
}

pub fn system_runner(dry_run: bool) -> Box<dyn CommandRunner> {
    if dry_run {
        Box::new(DryRunRunner::new(SystemRunner::new()))
    } else {
        Box::new(SystemRunner::new())
    }
}

fn prompter(yes: bool) -> Box<dyn Prompter> {
    if yes {
        Box::new(AssumeYes)
    } else {
        Box::new(DialoguerPrompter)
    }
}

pub fn handle_swap_command(
    command: SwapCommands,
    config: &CrashcapConfig,
    dry_run: bool,
) -> Result<()> {
    let runner = system_runner(dry_run);
    match command {
        SwapCommands::Status => handle_status(runner.as_ref()),
        SwapCommands::Partition(args) => handle_partition(runner.as_ref(), config, args),
        SwapCommands::File(args) => handle_file(runner.as_ref(), config, args),
        SwapCommands::Remove(args) => {
            let path = args.path.unwrap_or_else(|| config.swap_file_path.clone());
            remove_swap_file(runner.as_ref(), &path)?;
            emit(
                Level::Success,
                "swap.file.removed",
                &format!("Removed swap file {}", path.display()),
                None,
            );
            Ok(())
        }
    }
}

pub fn handle_disks_command(dry_run: bool) -> Result<()> {
    let runner = system_runner(dry_run);
    let disks = list_disks(runner.as_ref()).context("listing disks")?;
    if disks.is_empty() {
        emit(Level::Warn, "disks.none", "No disks found on the system", None);
        return Ok(());
    }

    for disk in &disks {
        let partitions = list_partitions(runner.as_ref(), &disk.name)
            .with_context(|| format!("listing partitions of {}", disk.device_path()))?;
        let mut message = format!(
            "{} {}  Size: {}  Model: {}",
            char::from(NerdFont::HardDrive),
            disk.device_path().bold(),
            disk.size,
            disk.model
        );
        for part in &partitions {
            message.push_str(&format!("\n    - {}  Size: {}", device_path(&part.name), part.size));
            if let Some(mountpoint) = &part.mountpoint {
                message.push_str(&format!("  Mounted at: {}", mountpoint.green()));
            }
        }
        emit(
            Level::Info,
            "disks.disk",
            &message,
            Some(serde_json::json!({
                "disk": disk,
                "partitions": partitions,
            })),
        );
    }
    Ok(())
}

fn handle_status(runner: &dyn CommandRunner) -> Result<()> {
    let entries = active_swaps(runner).context("reading active swap areas")?;
    let summary = summarize(&entries);

    if entries.is_empty() {
        emit(Level::Info, "swap.status.none", "No active swap", None);
        return Ok(());
    }

    let mut message = format!(
        "{:<28} {:<10} {:>12} {:>12} {:>5}",
        "NAME", "TYPE", "SIZE", "USED", "PRIO"
    );
    for entry in &entries {
        message.push_str(&format!(
            "\n{:<28} {:<10} {:>12} {:>12} {:>5}",
            entry.name,
            entry.kind.as_str(),
            format_bytes(entry.size_bytes),
            format_bytes(entry.used_bytes),
            entry.priority
        ));
    }
    message.push_str(&format!(
        "\nTotal: {}  Used: {}  Free: {}",
        format_bytes(summary.total_bytes),
        format_bytes(summary.used_bytes),
        format_bytes(summary.free_bytes)
    ));
    emit(
        Level::Info,
        "swap.status",
        &message,
        Some(serde_json::json!({
            "swaps": entries,
            "summary": summary,
        })),
    );
    Ok(())
}

fn handle_partition(
    runner: &dyn CommandRunner,
    config: &CrashcapConfig,
    args: PartitionArgs,
) -> Result<()> {
    let disk = match args.disk {
        Some(disk) => device_path(&disk),
        None => select_disk(&list_disks(runner).context("listing disks")?)?,
    };
    let size = resolve_size(args.size.as_deref(), "Swap partition size (e.g. 2GiB, 512MiB)")?;

    let prompter = prompter(args.yes);
    let provisioner = PartitionProvisioner::from_config(runner, prompter.as_ref(), config);
    match provisioner.provision(&PartitionRequest::new(disk.clone(), size)) {
        Ok(result) => {
            render_result(&result, config);
            Ok(())
        }
        Err(err) => fail(err, Some((runner, disk.as_str()))),
    }
}

fn handle_file(runner: &dyn CommandRunner, config: &CrashcapConfig, args: FileArgs) -> Result<()> {
    let path = args.path.unwrap_or_else(|| config.swap_file_path.clone());
    let size = resolve_size(args.size.as_deref(), "Swap file size (e.g. 1G, 512M)")?;

    let prompter = prompter(args.yes);
    let provisioner = SwapFileProvisioner::from_config(runner, prompter.as_ref(), config);
    match provisioner.provision(&SwapFileRequest::new(path, size)) {
        Ok(result) => {
            render_result(&result, config);
            Ok(())
        }
        Err(err) => fail(err, None),
    }
}

fn select_disk(disks: &[Disk]) -> Result<String> {
    if disks.is_empty() {
        anyhow::bail!("No disks available to select");
    }
    let items: Vec<String> = disks
        .iter()
        .map(|d| format!("{}  {}  {}", d.device_path(), d.size, d.model))
        .collect();
    let idx = Select::new()
        .with_prompt("Select disk to create a swap partition on")
        .items(&items)
        .default(0)
        .interact()?;
    Ok(disks[idx].device_path())
}

fn resolve_size(given: Option<&str>, prompt: &str) -> Result<SizeSpec> {
    if let Some(size) = given {
        return Ok(SizeSpec::parse(size)?);
    }
    let input: String = Input::new()
        .with_prompt(prompt)
        .validate_with(|s: &String| SizeSpec::parse(s).map(|_| ()).map_err(|e| e.to_string()))
        .interact_text()?;
    Ok(SizeSpec::parse(&input)?)
}

fn render_result(result: &ProvisioningResult, config: &CrashcapConfig) {
    let mut message = match &result.target {
        SwapTarget::Partition { device_path } => {
            format!("Swap partition {} created and enabled", device_path)
        }
        SwapTarget::File { path, filesystem } => format!(
            "Swap file {} ready (filesystem: {})",
            path.display(),
            filesystem
        ),
    };
    message.push_str(&format!("\n  fstab: {}", result.fstab_status));
    if let Some(backup) = &result.backup_file {
        message.push_str(&format!("\n  Partition table backup: {}", backup.display()));
    }
    if result.retries > 0 {
        message.push_str(&format!("\n  Swap file recreated {} time(s)", result.retries));
    }
    if let FstabStatus::Failed(_) = result.fstab_status {
        message.push_str(&format!(
            "\n  Add to {} manually: {}",
            config.fstab_path.display(),
            crate::common::shell::fstab_swap_line(&result.target.fstab_target()).cyan()
        ));
    }
    message.push_str(&format!(
        "\n  Verify with: {}  Check usage: {}",
        "swapon --show".cyan(),
        "free -h".cyan()
    ));
    emit(
        Level::Success,
        "swap.provisioned",
        &message,
        serde_json::to_value(result).ok(),
    );
}

/// Print recovery hints, then hand the error to the caller.
///
/// An operator declining a confirmation is not a failure.
fn fail(err: SwapError, partition_disk: Option<(&dyn CommandRunner, &str)>) -> Result<()> {
    if matches!(err.root(), SwapError::Aborted) {
        emit(Level::Warn, "swap.aborted", "Aborted by user", None);
        return Ok(());
    }

    if let (SwapError::InsufficientSpace { .. }, Some((runner, disk))) = (err.root(), partition_disk) {
        if let Ok(table) = free_space_report(runner, disk) {
            emit(
                Level::Info,
                "swap.partition.free_space",
                &format!(
                    "Free space on {} (MiB):\n{}\nAllocate unallocated space first, or use `crashcap swap file` instead.",
                    disk, table
                ),
                Some(serde_json::json!({ "disk": disk, "table": table })),
            );
        }
    }

    if let Some(backup) = err.backup_file() {
        let disk = partition_disk.map(|(_, d)| d).unwrap_or("<disk>");
        emit(
            Level::Warn,
            "swap.partition.backup_hint",
            &format!(
                "Partition table backup: {}\nRestore it by hand with: sudo sfdisk {} < {}",
                backup.display(),
                disk,
                backup.display()
            ),
            Some(serde_json::json!({ "backup_file": backup })),
        );
    }

    let manual = err.manual_commands();
    if !manual.is_empty() {
        emit(
            Level::Info,
            "swap.manual_commands",
            &format!(
                "You can finish by hand with:\n{}",
                manual
                    .iter()
                    .map(|c| format!("  {}", c))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
            Some(serde_json::json!({ "commands": manual })),
        );
    }

    Err(err.into())
}
