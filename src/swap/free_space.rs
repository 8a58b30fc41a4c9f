//! Unallocated space on a disk, read from `parted -m ... print free`.
//!
//! Only raw device space is considered; filesystem free space is irrelevant
//! when carving a new partition.

use serde::Serialize;

use super::disks::device_path;
use super::error::SwapError;
use super::size::SizeSpec;
use crate::common::command::{CommandRunner, CommandSpec};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FreeExtent {
    pub start_gib: f64,
    pub end_gib: f64,
    pub size_gib: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitCheck {
    pub fits: bool,
    pub available_mib: f64,
}

/// One `parted -m` table row with the trailing `;` removed.
struct PartedRow<'a> {
    fields: Vec<&'a str>,
}

impl<'a> PartedRow<'a> {
    /// Partition or free-space rows; header and device rows yield `None`.
    fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim().trim_end_matches(';');
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 5 || fields[0].parse::<u32>().is_err() {
            return None;
        }
        Some(Self { fields })
    }

    fn is_free(&self) -> bool {
        self.fields[4] == "free"
    }

    fn gib(&self, idx: usize) -> Option<f64> {
        parse_gib(self.fields.get(idx)?)
    }
}

fn parse_gib(value: &str) -> Option<f64> {
    value.trim().trim_end_matches("GiB").parse().ok()
}

fn parted_print(disk: &str, unit: &str, free: bool) -> CommandSpec {
    let spec = CommandSpec::privileged_query("parted")
        .arg("-m")
        .arg(device_path(disk))
        .args(["unit", unit, "print"]);
    if free { spec.arg("free") } else { spec }
}

pub fn parse_free_extents(parted_output: &str) -> Vec<FreeExtent> {
    parted_output
        .lines()
        .filter_map(PartedRow::parse)
        .filter(PartedRow::is_free)
        .filter_map(|row| {
            Some(FreeExtent {
                start_gib: row.gib(1)?,
                end_gib: row.gib(2)?,
                size_gib: row.gib(3)?,
            })
        })
        .collect()
}

/// End of the highest allocated partition, 0.0 for an empty table.
pub fn parse_last_partition_end(parted_output: &str) -> f64 {
    parted_output
        .lines()
        .filter_map(PartedRow::parse)
        .filter(|row| !row.is_free())
        .filter_map(|row| row.gib(2))
        .fold(0.0, f64::max)
}

pub fn max_free_gib(extents: &[FreeExtent]) -> f64 {
    extents.iter().map(|e| e.size_gib).fold(0.0, f64::max)
}

/// Compare a request against the largest gap; no gaps means no fit.
pub fn evaluate_fit(extents: &[FreeExtent], size: SizeSpec) -> FitCheck {
    if extents.is_empty() {
        return FitCheck {
            fits: false,
            available_mib: 0.0,
        };
    }
    let max_gib = max_free_gib(extents);
    FitCheck {
        fits: size.as_gib() <= max_gib,
        available_mib: max_gib * 1024.0,
    }
}

pub fn free_extents(runner: &dyn CommandRunner, disk: &str) -> Result<Vec<FreeExtent>, SwapError> {
    let out = runner.stdout(&parted_print(disk, "GiB", true))?;
    Ok(parse_free_extents(&out))
}

pub fn max_free(runner: &dyn CommandRunner, disk: &str) -> Result<f64, SwapError> {
    Ok(max_free_gib(&free_extents(runner, disk)?))
}

pub fn check_fits(
    runner: &dyn CommandRunner,
    disk: &str,
    size: SizeSpec,
) -> Result<FitCheck, SwapError> {
    Ok(evaluate_fit(&free_extents(runner, disk)?, size))
}

pub fn last_partition_end(runner: &dyn CommandRunner, disk: &str) -> Result<f64, SwapError> {
    let out = runner.stdout(&parted_print(disk, "GiB", false))?;
    Ok(parse_last_partition_end(&out))
}

/// Raw MiB free-space table, shown when a request does not fit.
pub fn free_space_report(runner: &dyn CommandRunner, disk: &str) -> Result<String, SwapError> {
    Ok(runner.stdout(&parted_print(disk, "MiB", true))?)
}
