//! Additive swap entries in the persisted mount table.
//!
//! Existing lines are never rewritten or removed.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::error::SwapError;
use crate::common::shell::{fstab_escape, fstab_swap_line};
use crate::ui::{Level, emit};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum FstabStatus {
    Added,
    AlreadyPresent,
    Failed(String),
}

impl FstabStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, FstabStatus::Failed(_))
    }
}

impl fmt::Display for FstabStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FstabStatus::Added => write!(f, "Added"),
            FstabStatus::AlreadyPresent => write!(f, "Already present"),
            FstabStatus::Failed(reason) => write!(f, "Failed ({})", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FstabPersister {
    path: PathBuf,
    dry_run: bool,
}

impl FstabPersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `<target> none swap sw 0 0` unless `target` already has an entry.
    pub fn apply(&self, target: &str) -> FstabStatus {
        match self.try_apply(target) {
            Ok(status) => status,
            Err(err) => {
                // The swap area already works; the operator finishes this by hand
                emit(
                    Level::Warn,
                    "swap.fstab.failed",
                    &format!(
                        "Could not update {}: {}\nAdd this line manually:\n  {}",
                        self.path.display(),
                        err,
                        fstab_swap_line(target)
                    ),
                    Some(serde_json::json!({
                        "fstab": self.path,
                        "line": fstab_swap_line(target),
                    })),
                );
                FstabStatus::Failed(err.to_string())
            }
        }
    }

    pub fn try_apply(&self, target: &str) -> Result<FstabStatus, SwapError> {
        let contents = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        if has_entry(&contents, target) {
            return Ok(FstabStatus::AlreadyPresent);
        }

        let line = fstab_swap_line(target);
        if self.dry_run {
            println!("[DRY RUN] append '{}' to {}", line, self.path.display());
            return Ok(FstabStatus::Added);
        }

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        let separator = if contents.is_empty() || contents.ends_with('\n') {
            ""
        } else {
            "\n"
        };
        write!(file, "{}{}\n", separator, line).map_err(|e| self.io_error(e))?;
        Ok(FstabStatus::Added)
    }

    fn io_error(&self, err: io::Error) -> SwapError {
        if err.kind() == io::ErrorKind::PermissionDenied {
            SwapError::PermissionDenied {
                path: self.path.clone(),
            }
        } else {
            SwapError::Io(err)
        }
    }
}

/// Whether a non-comment line already names `target` as its device.
///
/// The device field is stored escaped, so `target` is compared escaped too.
fn has_entry(contents: &str, target: &str) -> bool {
    let target = fstab_escape(target);
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#'))
        .filter_map(|l| l.split_whitespace().next())
        .any(|device| device == target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fstab_with(contents: &str) -> (tempfile::TempDir, FstabPersister) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        fs::write(&path, contents).unwrap();
        (dir, FstabPersister::new(path))
    }

    #[test]
    fn second_apply_is_a_no_op() {
        let (_dir, fstab) = fstab_with("UUID=abcd / ext4 defaults 0 1\n");
        assert_eq!(fstab.apply("/swapfile"), FstabStatus::Added);
        assert_eq!(fstab.apply("/swapfile"), FstabStatus::AlreadyPresent);

        let contents = fs::read_to_string(fstab.path()).unwrap();
        assert_eq!(
            contents,
            "UUID=abcd / ext4 defaults 0 1\n/swapfile none swap sw 0 0\n"
        );
        assert_eq!(contents.matches("/swapfile").count(), 1);
    }

    #[test]
    fn missing_trailing_newline_is_respected() {
        let (_dir, fstab) = fstab_with("UUID=abcd / ext4 defaults 0 1");
        assert_eq!(fstab.apply("/dev/sda3"), FstabStatus::Added);
        let contents = fs::read_to_string(fstab.path()).unwrap();
        assert_eq!(
            contents,
            "UUID=abcd / ext4 defaults 0 1\n/dev/sda3 none swap sw 0 0\n"
        );
    }

    #[test]
    fn similar_device_names_are_distinct() {
        let (_dir, fstab) = fstab_with("/dev/sda10 none swap sw 0 0\n# /dev/sda1 none swap sw 0 0\n");
        assert_eq!(fstab.apply("/dev/sda1"), FstabStatus::Added);
        assert_eq!(fstab.apply("/dev/sda10"), FstabStatus::AlreadyPresent);
    }

    #[test]
    fn paths_with_blanks_are_escaped_and_recognised() {
        let (_dir, fstab) = fstab_with("UUID=abcd / ext4 defaults 0 1\n");
        assert_eq!(fstab.apply("/srv/my swap"), FstabStatus::Added);
        assert_eq!(fstab.apply("/srv/my swap"), FstabStatus::AlreadyPresent);

        let contents = fs::read_to_string(fstab.path()).unwrap();
        assert_eq!(
            contents,
            "UUID=abcd / ext4 defaults 0 1\n/srv/my\\040swap none swap sw 0 0\n"
        );
        let entry = contents.lines().nth(1).unwrap();
        assert_eq!(entry.split_whitespace().count(), 6);
    }

    #[test]
    fn unreadable_table_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fstab = FstabPersister::new(dir.path().join("missing"));
        assert!(fstab.apply("/swapfile").is_failed());
    }

    #[test]
    fn dry_run_leaves_file_untouched() {
        let (_dir, fstab) = fstab_with("");
        let fstab = fstab.with_dry_run(true);
        assert_eq!(fstab.apply("/swapfile"), FstabStatus::Added);
        assert_eq!(fs::read_to_string(fstab.path()).unwrap(), "");
    }

    #[test]
    fn status_display() {
        assert_eq!(FstabStatus::AlreadyPresent.to_string(), "Already present");
        assert_eq!(
            FstabStatus::Failed("Permission denied writing /etc/fstab".into()).to_string(),
            "Failed (Permission denied writing /etc/fstab)"
        );
    }
}
