//! Filesystem type under a (possibly not yet existing) path.

use std::path::{Path, PathBuf};

use crate::common::command::{CommandRunner, CommandSpec};
use crate::ui::{Level, emit};

pub const UNKNOWN_FILESYSTEM: &str = "unknown";

/// Lowercased filesystem type holding `path`, or `"unknown"`.
pub fn detect_filesystem(runner: &dyn CommandRunner, path: &Path) -> String {
    let probe_path = existing_ancestor(path);
    let output = runner.probe(
        &CommandSpec::new("df")
            .arg("--output=fstype")
            .arg(probe_path.to_string_lossy()),
    );
    let detected = if output.success() {
        parse_df_fstype(&output.stdout)
    } else {
        None
    };
    let fs_type = detected.unwrap_or_else(|| UNKNOWN_FILESYSTEM.to_string());
    emit(
        Level::Debug,
        "swap.file.filesystem",
        &format!("Detected filesystem: {} for {}", fs_type, path.display()),
        None,
    );
    fs_type
}

/// Last non-header line of `df --output=fstype`.
pub fn parse_df_fstype(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_lowercase)
}

fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}
