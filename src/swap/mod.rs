//! Swap provisioning.
//!
//! Both provisioners funnel every external effect through a
//! [`CommandRunner`](crate::common::command::CommandRunner) and finish by
//! recording the new swap area in the mount table.

pub mod cli;
pub mod disks;
pub mod error;
pub mod filesystem;
pub mod free_space;
pub mod fstab;
pub mod partition;
pub mod prompt;
pub mod size;
pub mod status;
pub mod step;
pub mod swapfile;

use std::path::PathBuf;

use serde::Serialize;

pub use error::SwapError;
pub use fstab::{FstabPersister, FstabStatus};
pub use partition::{PartitionProvisioner, PartitionRequest, PartitionState};
pub use size::SizeSpec;
pub use swapfile::{SwapFileProvisioner, SwapFileRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SwapTarget {
    Partition { device_path: String },
    File { path: PathBuf, filesystem: String },
}

impl SwapTarget {
    /// The string recorded in the mount table.
    pub fn fstab_target(&self) -> String {
        match self {
            SwapTarget::Partition { device_path } => device_path.clone(),
            SwapTarget::File { path, .. } => path.to_string_lossy().into_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningResult {
    pub target: SwapTarget,
    pub fstab_status: FstabStatus,
    pub backup_file: Option<PathBuf>,
    /// Swap-file recreations after a rejected activation.
    pub retries: u32,
}
