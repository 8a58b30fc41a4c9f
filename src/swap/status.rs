//! Active swap areas, from `swapon` or `/proc/swaps`.

use std::fs;
use std::path::Path;

use serde::Serialize;

use super::error::SwapError;
use super::size::parse_size_to_kib;
use crate::common::command::{CommandRunner, CommandSpec, RunOptions};
use crate::ui::{Level, emit};

pub const PROC_SWAPS: &str = "/proc/swaps";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapKind {
    Partition,
    File,
}

impl SwapKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SwapKind::Partition => "partition",
            SwapKind::File => "file",
        }
    }

    fn from_columns(kind: &str, name: &str) -> Self {
        match kind {
            "partition" => SwapKind::Partition,
            "file" => SwapKind::File,
            _ if name.starts_with("/dev/") => SwapKind::Partition,
            _ => SwapKind::File,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapEntry {
    pub name: String,
    pub kind: SwapKind,
    pub size_bytes: u64,
    pub used_bytes: u64,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SwapSummary {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

pub fn summarize(entries: &[SwapEntry]) -> SwapSummary {
    let total_bytes: u64 = entries.iter().map(|e| e.size_bytes).sum();
    let used_bytes: u64 = entries.iter().map(|e| e.used_bytes).sum();
    SwapSummary {
        total_bytes,
        used_bytes,
        free_bytes: total_bytes.saturating_sub(used_bytes),
    }
}

pub fn active_swaps(runner: &dyn CommandRunner) -> Result<Vec<SwapEntry>, SwapError> {
    active_swaps_with(runner, Path::new(PROC_SWAPS))
}

/// Like [`active_swaps`] with a custom kernel table for the fallback.
pub fn active_swaps_with(
    runner: &dyn CommandRunner,
    proc_swaps: &Path,
) -> Result<Vec<SwapEntry>, SwapError> {
    let spec = CommandSpec::new("swapon").args([
        "--show=NAME,TYPE,SIZE,USED,PRIO",
        "--noheadings",
        "--raw",
        "--bytes",
    ]);
    match runner.run(&spec, RunOptions::unchecked()) {
        Ok(output) if output.success() => Ok(parse_swapon(&output.stdout)),
        other => {
            let reason = match other {
                Ok(output) => output.stderr.trim().to_string(),
                Err(err) => err.to_string(),
            };
            emit(
                Level::Debug,
                "swap.status.fallback",
                &format!("swapon unavailable ({}), reading {}", reason, proc_swaps.display()),
                None,
            );
            let contents = fs::read_to_string(proc_swaps)?;
            Ok(parse_proc_swaps(&contents))
        }
    }
}

/// Rows of `swapon --show=NAME,TYPE,SIZE,USED,PRIO --raw --bytes`.
pub fn parse_swapon(stdout: &str) -> Vec<SwapEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let [name, kind, size, used, prio] = cols.as_slice() else {
                return None;
            };
            Some(SwapEntry {
                name: unescape_raw(name),
                kind: SwapKind::from_columns(kind, name),
                size_bytes: loose_bytes(size)?,
                used_bytes: loose_bytes(used)?,
                priority: prio.parse().unwrap_or(-1),
            })
        })
        .collect()
}

/// `/proc/swaps`: header line, then sizes in KiB.
pub fn parse_proc_swaps(contents: &str) -> Vec<SwapEntry> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let [name, kind, size, used, prio, ..] = cols.as_slice() else {
                return None;
            };
            Some(SwapEntry {
                name: unescape_raw(name),
                kind: SwapKind::from_columns(kind, name),
                size_bytes: parse_size_to_kib(size)? * 1024,
                used_bytes: parse_size_to_kib(used)? * 1024,
                priority: prio.parse().unwrap_or(-1),
            })
        })
        .collect()
}

/// Plain byte counts, or human sizes when `--bytes` was ignored.
fn loose_bytes(value: &str) -> Option<u64> {
    value
        .parse()
        .ok()
        .or_else(|| parse_size_to_kib(value).map(|kib| kib * 1024))
}

/// Raw output escapes blanks in paths as `\x20`.
fn unescape_raw(name: &str) -> String {
    name.replace("\\x20", " ").replace("\\040", " ")
}
