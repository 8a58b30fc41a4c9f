//! File-backed swap.
//!
//! Two strategies exist. The standard one reserves space with `fallocate`
//! (or `dd` when that fails) under a per-step timeout. The copy-on-write-safe
//! one empties the file and clears its COW attribute before allocating, which
//! filesystems like btrfs require for `swapon` to accept it.
//!
//! A timeout or an activation rejection in the standard strategy moves over
//! to the COW-safe strategy. Activations rejected there with "Invalid
//! argument" are retried from scratch up to `max_retries` times.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use super::error::SwapError;
use super::filesystem::detect_filesystem;
use super::fstab::FstabPersister;
use super::prompt::Prompter;
use super::size::SizeSpec;
use super::step::{Step, StepKind, manual_commands, run_steps};
use super::{ProvisioningResult, SwapTarget};
use crate::common::command::{CommandRunner, CommandSpec};
use crate::common::config::CrashcapConfig;
use crate::ui::{Level, emit};

/// Directories a swap file must never be created in.
pub const FORBIDDEN_DIRS: &[&str] = &[
    "/etc", "/proc", "/sys", "/dev", "/boot", "/usr", "/bin", "/sbin", "/lib", "/run",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Standard,
    CowSafe,
}

#[derive(Debug, Clone)]
pub struct SwapFileRequest {
    pub path: PathBuf,
    pub size: SizeSpec,
    /// Detected with `df` when not given.
    pub filesystem: Option<String>,
}

impl SwapFileRequest {
    pub fn new(path: impl Into<PathBuf>, size: SizeSpec) -> Self {
        Self {
            path: path.into(),
            size,
            filesystem: None,
        }
    }

    pub fn on_filesystem(mut self, filesystem: impl Into<String>) -> Self {
        self.filesystem = Some(filesystem.into());
        self
    }
}

pub fn validate_swap_path(path: &Path) -> Result<(), SwapError> {
    let invalid = |reason| SwapError::InvalidPath {
        path: path.to_path_buf(),
        reason,
    };
    if !path.is_absolute() {
        return Err(invalid("path must be absolute"));
    }
    if path.parent().is_none() {
        return Err(invalid("path must name a file"));
    }
    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(invalid("path must not contain '..'"));
    }
    if FORBIDDEN_DIRS.iter().any(|dir| path.starts_with(dir)) {
        return Err(invalid("path is inside a system directory"));
    }
    Ok(())
}

/// Turn off and delete a swap file; neither step is fatal.
pub fn remove_swap_file(runner: &dyn CommandRunner, path: &Path) -> Result<(), SwapError> {
    validate_swap_path(path)?;
    cleanup(runner, &path.to_string_lossy());
    Ok(())
}

fn cleanup(runner: &dyn CommandRunner, path: &str) {
    let swapoff = runner.probe(&CommandSpec::privileged("swapoff").arg(path));
    if !swapoff.success() {
        emit(
            Level::Debug,
            "swap.file.swapoff",
            &format!("swapoff not needed for {}: {}", path, swapoff.stderr.trim()),
            None,
        );
    }
    let rm = runner.probe(&CommandSpec::privileged("rm").args(["-f", path]));
    if !rm.success() {
        emit(
            Level::Warn,
            "swap.file.remove_failed",
            &format!("Could not remove {}: {}", path, rm.stderr.trim()),
            None,
        );
    }
}

/// Command lists for one target file.
struct SwapFilePlan {
    path: String,
    size: SizeSpec,
    timeout: Option<Duration>,
}

impl SwapFilePlan {
    fn fallocate(&self) -> CommandSpec {
        CommandSpec::privileged("fallocate")
            .arg("-l")
            .arg(self.size.bytes().to_string())
            .arg(&self.path)
    }

    fn dd(&self) -> CommandSpec {
        CommandSpec::privileged("dd").args([
            "if=/dev/zero".to_string(),
            format!("of={}", self.path),
            "bs=1M".to_string(),
            format!("count={}", self.size.whole_mib()),
        ])
    }

    fn finishing_steps(&self) -> [Step; 3] {
        [
            Step::new(
                StepKind::Permissions,
                CommandSpec::privileged("chmod").args(["0600", self.path.as_str()]),
            ),
            Step::new(StepKind::Format, CommandSpec::privileged("mkswap").arg(&self.path)),
            Step::new(StepKind::Activate, CommandSpec::privileged("swapon").arg(&self.path)),
        ]
    }

    fn standard_steps(&self) -> Vec<Step> {
        std::iter::once(Step::new(StepKind::Allocate, self.fallocate()).with_fallback(self.dd()))
            .chain(self.finishing_steps())
            .map(|step| step.with_timeout(self.timeout))
            .collect()
    }

    fn cow_safe_steps(&self) -> Vec<Step> {
        vec![
            Step::new(
                StepKind::Truncate,
                CommandSpec::privileged("truncate").args(["-s", "0", self.path.as_str()]),
            ),
            Step::new(
                StepKind::DisableCow,
                CommandSpec::privileged("chattr").args(["+C", self.path.as_str()]),
            ),
            Step::new(StepKind::Allocate, self.fallocate()),
        ]
        .into_iter()
        .chain(self.finishing_steps())
        .collect()
    }

    fn manual_commands(&self, strategy: Strategy) -> Vec<String> {
        match strategy {
            Strategy::Standard => manual_commands(&self.standard_steps()),
            Strategy::CowSafe => manual_commands(&self.cow_safe_steps()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Preparation {
    Proceed,
    KeepExisting,
}

pub struct SwapFileProvisioner<'a> {
    runner: &'a dyn CommandRunner,
    prompter: &'a dyn Prompter,
    fstab: FstabPersister,
    max_retries: u32,
    step_timeout: Option<Duration>,
    cow_filesystems: Vec<String>,
}

impl<'a> SwapFileProvisioner<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        prompter: &'a dyn Prompter,
        fstab: FstabPersister,
    ) -> Self {
        Self {
            runner,
            prompter,
            fstab,
            max_retries: CrashcapConfig::DEFAULT_MAX_RETRIES,
            step_timeout: Some(Duration::from_secs(CrashcapConfig::DEFAULT_STEP_TIMEOUT_SECS)),
            cow_filesystems: vec!["btrfs".to_string()],
        }
    }

    pub fn from_config(
        runner: &'a dyn CommandRunner,
        prompter: &'a dyn Prompter,
        config: &CrashcapConfig,
    ) -> Self {
        let fstab = FstabPersister::new(config.fstab_path.clone()).with_dry_run(runner.dry_run());
        Self::new(runner, prompter, fstab)
            .max_retries(config.max_retries)
            .step_timeout(Some(config.step_timeout()))
            .cow_filesystems(config.cow_filesystems.clone())
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn cow_filesystems(mut self, filesystems: Vec<String>) -> Self {
        self.cow_filesystems = filesystems;
        self
    }

    fn is_cow(&self, filesystem: &str) -> bool {
        self.cow_filesystems
            .iter()
            .any(|fs| fs.eq_ignore_ascii_case(filesystem.trim()))
    }

    pub fn provision(&self, request: &SwapFileRequest) -> Result<ProvisioningResult, SwapError> {
        validate_swap_path(&request.path)?;
        let size = request.size.ensure_swap_file_minimum()?;
        let filesystem = match &request.filesystem {
            Some(fs) => fs.to_lowercase(),
            None => detect_filesystem(self.runner, &request.path),
        };
        let plan = SwapFilePlan {
            path: request.path.to_string_lossy().into_owned(),
            size,
            timeout: self.step_timeout,
        };

        emit(
            Level::Info,
            "swap.file.plan",
            &format!(
                "Swap file {} ({}) on {} filesystem",
                plan.path, size, filesystem
            ),
            Some(serde_json::json!({
                "path": plan.path,
                "bytes": size.bytes(),
                "filesystem": filesystem,
            })),
        );

        if self.prepare_target(&plan)? == Preparation::KeepExisting {
            emit(
                Level::Info,
                "swap.file.kept",
                &format!("Keeping existing swap file {}", plan.path),
                None,
            );
            return Ok(self.finish(&plan, filesystem, None, 0));
        }

        let (strategy, retries) = if self.is_cow(&filesystem) {
            emit(
                Level::Info,
                "swap.file.strategy",
                &format!("Using copy-on-write-safe creation for {}", filesystem),
                None,
            );
            (Strategy::CowSafe, self.cow_safe(&plan, 0)?)
        } else {
            self.standard(&plan)?
        };

        Ok(self.finish(&plan, filesystem, Some(strategy), retries))
    }

    /// Clear whatever sits at the target path, unless it is a swap file the
    /// operator wants to keep.
    fn prepare_target(&self, plan: &SwapFilePlan) -> Result<Preparation, SwapError> {
        if !Path::new(&plan.path).exists() {
            return Ok(Preparation::Proceed);
        }

        if self.is_swap_file(&plan.path) {
            emit(
                Level::Info,
                "swap.file.exists",
                &format!("Valid swap file already exists at {}", plan.path),
                None,
            );
            if !self.prompter.confirm("Recreate swap file?", false)? {
                return Ok(Preparation::KeepExisting);
            }
        } else {
            emit(
                Level::Warn,
                "swap.file.replacing",
                &format!("{} exists but is not a valid swap file, replacing it", plan.path),
                None,
            );
        }

        cleanup(self.runner, &plan.path);
        Ok(Preparation::Proceed)
    }

    fn is_swap_file(&self, path: &str) -> bool {
        let output = self
            .runner
            .probe(&CommandSpec::privileged_query("file").arg(path));
        output.success() && output.stdout.to_lowercase().contains("swap file")
    }

    /// Returns the strategy that produced the active swap file and the
    /// COW-safe retries it took.
    fn standard(&self, plan: &SwapFilePlan) -> Result<(Strategy, u32), SwapError> {
        emit(
            Level::Info,
            "swap.file.strategy",
            "Using standard swap file creation",
            None,
        );
        match run_steps(self.runner, &plan.standard_steps()) {
            Ok(()) => Ok((Strategy::Standard, 0)),
            Err(failure) if failure.is_timeout() => {
                emit(
                    Level::Warn,
                    "swap.file.fallback",
                    &format!(
                        "{} timed out, switching to copy-on-write-safe method",
                        failure.kind
                    ),
                    None,
                );
                cleanup(self.runner, &plan.path);
                Ok((Strategy::CowSafe, self.cow_safe(plan, 0)?))
            }
            Err(failure) if failure.is_unusable_activation() => {
                emit(
                    Level::Warn,
                    "swap.file.fallback",
                    &format!(
                        "swapon rejected {}, retrying with copy-on-write-safe method",
                        plan.path
                    ),
                    None,
                );
                cleanup(self.runner, &plan.path);
                Ok((Strategy::CowSafe, self.cow_safe(plan, 0)?))
            }
            Err(failure) => Err(failure.into_error(None, plan.manual_commands(Strategy::Standard))),
        }
    }

    /// One COW-safe attempt; `retries` counts the attempts already spent.
    ///
    /// Returns the number of retries used.
    fn cow_safe(&self, plan: &SwapFilePlan, retries: u32) -> Result<u32, SwapError> {
        let failure = match run_steps(self.runner, &plan.cow_safe_steps()) {
            Ok(()) => return Ok(retries),
            Err(failure) => failure,
        };

        // Only a rejected swap area is worth recreating the file for
        if !failure.is_invalid_activation() {
            return Err(failure.into_error(None, plan.manual_commands(Strategy::CowSafe)));
        }

        if retries >= self.max_retries {
            let kind = failure.kind;
            return Err(SwapError::MaxRetriesExceeded {
                attempts: retries + 1,
                last: Box::new(failure.error),
            }
            .in_step(
                kind.description(),
                None,
                plan.manual_commands(Strategy::CowSafe),
            ));
        }

        emit(
            Level::Warn,
            "swap.file.retry",
            &format!(
                "Retrying swap creation ({}/{})",
                retries + 1,
                self.max_retries
            ),
            None,
        );
        cleanup(self.runner, &plan.path);
        self.cow_safe(plan, retries + 1)
    }

    fn finish(
        &self,
        plan: &SwapFilePlan,
        filesystem: String,
        strategy: Option<Strategy>,
        retries: u32,
    ) -> ProvisioningResult {
        let fstab_status = self.fstab.apply(&plan.path);
        if let Some(strategy) = strategy {
            emit(
                Level::Success,
                "swap.file.created",
                &format!("Swap file {} is active", plan.path),
                Some(serde_json::json!({
                    "strategy": strategy,
                    "retries": retries,
                })),
            );
        }
        ProvisioningResult {
            target: SwapTarget::File {
                path: PathBuf::from(&plan.path),
                filesystem,
            },
            fstab_status,
            backup_file: None,
            retries,
        }
    }
}
