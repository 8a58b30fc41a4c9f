use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::common::command::CommandError;

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Invalid size format '{0}'. Use e.g. 512M, 2GiB or 1.5G")]
    InvalidSizeFormat(String),

    #[error("Swap file size too small: {requested} bytes (minimum 64 MiB)")]
    SizeTooSmall { requested: u64 },

    #[error("Not enough unallocated space: ~{available_mib:.0} MiB available")]
    InsufficientSpace { available_mib: f64 },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Failed to detect new partition ({})", describe_candidates(candidates))]
    NoNewPartitionDetected { candidates: Vec<String> },

    #[error("Permission denied writing {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("Swap activation still failing after {attempts} attempts: {last}")]
    MaxRetriesExceeded {
        attempts: u32,
        last: Box<SwapError>,
    },

    #[error("Invalid swap file path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: &'static str },

    #[error("Aborted by user")]
    Aborted,

    #[error("Unexpected output from {tool}: {detail}")]
    Parse { tool: &'static str, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A provisioning step failed after work had started.
    #[error("{step} failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<SwapError>,
        backup_file: Option<PathBuf>,
        manual_commands: Vec<String>,
    },
}

fn describe_candidates(candidates: &[String]) -> String {
    if candidates.is_empty() {
        "no new device appeared".to_string()
    } else {
        format!("ambiguous: {}", candidates.join(", "))
    }
}

impl SwapError {
    pub fn parse(tool: &'static str, detail: impl Into<String>) -> Self {
        SwapError::Parse {
            tool,
            detail: detail.into(),
        }
    }

    /// Attach step context and recovery hints to an error.
    pub fn in_step(
        self,
        step: impl Into<String>,
        backup_file: Option<PathBuf>,
        manual_commands: Vec<String>,
    ) -> Self {
        SwapError::Step {
            step: step.into(),
            source: Box::new(self),
            backup_file,
            manual_commands,
        }
    }

    /// The innermost error, skipping step wrappers.
    pub fn root(&self) -> &SwapError {
        match self {
            SwapError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), SwapError::Command(err) if err.is_timeout())
    }

    /// Whether `swapon` rejected the target as unusable swap.
    ///
    /// `swapon` exits 255 for this; the kernel reason surfaces as
    /// "Invalid argument" (holes, copy-on-write extents, bad header).
    pub fn is_unusable_swap(&self) -> bool {
        match self.root() {
            SwapError::Command(err) => {
                err.exit_code() == Some(255) || err.stderr().contains("Invalid argument")
            }
            _ => false,
        }
    }

    /// Whether the kernel refused the swap area itself (EINVAL).
    ///
    /// Narrower than [`is_unusable_swap`](Self::is_unusable_swap): busy or
    /// permission failures also exit 255 but a fresh file cannot fix them.
    pub fn is_invalid_swap_area(&self) -> bool {
        matches!(self.root(), SwapError::Command(err) if err.stderr().contains("Invalid argument"))
    }

    pub fn captured_stderr(&self) -> Option<&str> {
        match self.root() {
            SwapError::Command(err) if !err.stderr().is_empty() => Some(err.stderr()),
            _ => None,
        }
    }

    pub fn backup_file(&self) -> Option<&PathBuf> {
        match self {
            SwapError::Step { backup_file, .. } => backup_file.as_ref(),
            _ => None,
        }
    }

    pub fn manual_commands(&self) -> &[String] {
        match self {
            SwapError::Step {
                manual_commands, ..
            } => manual_commands,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn failed(code: i32, stderr: &str) -> SwapError {
        SwapError::Command(CommandError::Failed {
            cmd: "swapon /swapfile".to_string(),
            exit_code: Some(code),
            stderr: stderr.to_string(),
        })
    }

    #[test]
    fn unusable_swap_is_detected_through_step_wrappers() {
        let err = failed(255, "").in_step("Enabling swap", None, vec![]);
        assert!(err.is_unusable_swap());
        assert!(failed(1, "swapon: /swapfile: swapon failed: Invalid argument").is_unusable_swap());
        assert!(!failed(1, "Operation not permitted").is_unusable_swap());
        assert!(!SwapError::Aborted.is_unusable_swap());
    }

    #[test]
    fn only_einval_marks_an_invalid_swap_area() {
        assert!(failed(255, "swapon: /swapfile: swapon failed: Invalid argument").is_invalid_swap_area());
        assert!(!failed(255, "swapon: /swapfile: swapon failed: Device or resource busy").is_invalid_swap_area());
        assert!(!failed(255, "").is_invalid_swap_area());
        assert!(failed(255, "").is_unusable_swap());
    }

    #[test]
    fn timeout_classification() {
        let err = SwapError::Command(CommandError::Timeout {
            cmd: "fallocate".to_string(),
            after: Duration::from_secs(30),
        });
        assert!(err.is_timeout());
        assert!(!err.is_unusable_swap());
    }

    #[test]
    fn step_wrapper_keeps_recovery_hints() {
        let err = failed(1, "device busy").in_step(
            "Formatting swap",
            Some(PathBuf::from("/tmp/partition_table_sda_20250101_000000.backup")),
            vec!["sudo mkswap /dev/sda3".to_string()],
        );
        assert_eq!(
            err.to_string(),
            "Formatting swap failed: command `swapon /swapfile` failed (exit code 1): device busy"
        );
        assert_eq!(err.captured_stderr(), Some("device busy"));
        assert!(err.backup_file().is_some());
        assert_eq!(err.manual_commands().len(), 1);
    }

    #[test]
    fn no_new_partition_message() {
        let none = SwapError::NoNewPartitionDetected { candidates: vec![] };
        assert!(none.to_string().contains("no new device appeared"));
        let many = SwapError::NoNewPartitionDetected {
            candidates: vec!["sda2".into(), "sda3".into()],
        };
        assert!(many.to_string().contains("sda2, sda3"));
    }
}
