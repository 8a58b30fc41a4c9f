//! Ordered, typed provisioning steps and the runner both workflows share.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::error::SwapError;
use crate::common::command::{CommandError, CommandOutput, CommandRunner, CommandSpec, RunOptions};
use crate::common::progress::{create_spinner, finish_spinner};
use crate::ui::{Level, emit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    CreatePartition,
    Truncate,
    DisableCow,
    Allocate,
    Permissions,
    Format,
    Activate,
}

impl StepKind {
    pub fn description(self) -> &'static str {
        match self {
            StepKind::CreatePartition => "Creating partition",
            StepKind::Truncate => "Creating empty file",
            StepKind::DisableCow => "Disabling copy-on-write",
            StepKind::Allocate => "Allocating space",
            StepKind::Permissions => "Setting permissions",
            StepKind::Format => "Formatting swap",
            StepKind::Activate => "Enabling swap",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// One command in a workflow, with an optional in-place fallback.
#[derive(Debug, Clone)]
pub struct Step {
    pub kind: StepKind,
    pub command: CommandSpec,
    pub timeout: Option<Duration>,
    /// Tried when `command` fails outright (not on timeout).
    pub fallback: Option<CommandSpec>,
}

impl Step {
    pub fn new(kind: StepKind, command: CommandSpec) -> Self {
        Self {
            kind,
            command,
            timeout: None,
            fallback: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fallback(mut self, fallback: CommandSpec) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn options(&self) -> RunOptions {
        RunOptions::checked().with_timeout(self.timeout)
    }
}

/// The step that stopped a workflow and why.
#[derive(Debug)]
pub struct StepFailure {
    pub kind: StepKind,
    pub error: SwapError,
}

impl StepFailure {
    pub fn is_timeout(&self) -> bool {
        self.error.is_timeout()
    }

    /// `swapon` refused the target.
    pub fn is_unusable_activation(&self) -> bool {
        self.kind == StepKind::Activate && self.error.is_unusable_swap()
    }

    /// `swapon` refused the target because the area itself is invalid.
    pub fn is_invalid_activation(&self) -> bool {
        self.kind == StepKind::Activate && self.error.is_invalid_swap_area()
    }

    pub fn into_error(self, backup_file: Option<std::path::PathBuf>, manual: Vec<String>) -> SwapError {
        self.error.in_step(self.kind.description(), backup_file, manual)
    }
}

pub fn run_step(runner: &dyn CommandRunner, step: &Step) -> Result<CommandOutput, StepFailure> {
    let pb = create_spinner(format!("{}...", step.kind));
    let result = run_with_fallback(runner, step);
    match &result {
        Ok(_) => finish_spinner(pb, "swap.step.done", step.kind.description()),
        Err(_) => pb.finish_and_clear(),
    }
    result.map_err(|err| StepFailure {
        kind: step.kind,
        error: err.into(),
    })
}

/// Run `steps` in order, stopping at the first failure.
pub fn run_steps(runner: &dyn CommandRunner, steps: &[Step]) -> Result<(), StepFailure> {
    for step in steps {
        run_step(runner, step)?;
    }
    Ok(())
}

fn run_with_fallback(runner: &dyn CommandRunner, step: &Step) -> Result<CommandOutput, CommandError> {
    match runner.run(&step.command, step.options()) {
        Err(err) if !err.is_timeout() => match &step.fallback {
            Some(fallback) => {
                emit(
                    Level::Warn,
                    "swap.step.fallback",
                    &format!("{} failed ({}), trying `{}`", step.kind, err, fallback),
                    None,
                );
                runner.run(fallback, step.options())
            }
            None => Err(err),
        },
        other => other,
    }
}

/// Manual equivalents of `steps`, fallbacks excluded.
pub fn manual_commands(steps: &[Step]) -> Vec<String> {
    steps.iter().map(|s| s.command.manual()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Fails every command whose program is listed, records the rest.
    struct FailingRunner {
        fail: Vec<&'static str>,
        timeout: Vec<&'static str>,
        issued: RefCell<Vec<String>>,
    }

    impl CommandRunner for FailingRunner {
        fn run(&self, spec: &CommandSpec, _opts: RunOptions) -> Result<CommandOutput, CommandError> {
            self.issued.borrow_mut().push(spec.to_string());
            if self.timeout.contains(&spec.program.as_str()) {
                return Err(CommandError::Timeout {
                    cmd: spec.to_string(),
                    after: Duration::from_secs(30),
                });
            }
            if self.fail.contains(&spec.program.as_str()) {
                return Err(CommandError::failed(
                    spec,
                    &CommandOutput {
                        stderr: "boom".into(),
                        exit_code: Some(1),
                        ..Default::default()
                    },
                ));
            }
            Ok(CommandOutput {
                exit_code: Some(0),
                ..Default::default()
            })
        }
    }

    fn allocate() -> Step {
        Step::new(
            StepKind::Allocate,
            CommandSpec::privileged("fallocate").args(["-l", "1024", "/swapfile"]),
        )
        .with_fallback(CommandSpec::privileged("dd").arg("of=/swapfile"))
    }

    #[test]
    fn fallback_runs_on_failure() {
        let runner = FailingRunner {
            fail: vec!["fallocate"],
            timeout: vec![],
            issued: RefCell::new(vec![]),
        };
        run_steps(&runner, &[allocate()]).unwrap();
        assert_eq!(
            *runner.issued.borrow(),
            ["fallocate -l 1024 /swapfile", "dd of=/swapfile"]
        );
    }

    #[test]
    fn timeout_skips_fallback() {
        let runner = FailingRunner {
            fail: vec![],
            timeout: vec!["fallocate"],
            issued: RefCell::new(vec![]),
        };
        let failure = run_steps(&runner, &[allocate()]).unwrap_err();
        assert!(failure.is_timeout());
        assert_eq!(runner.issued.borrow().len(), 1);
    }

    #[test]
    fn stops_at_first_failure() {
        let runner = FailingRunner {
            fail: vec!["mkswap"],
            timeout: vec![],
            issued: RefCell::new(vec![]),
        };
        let steps = [
            Step::new(StepKind::Format, CommandSpec::privileged("mkswap").arg("/swapfile")),
            Step::new(StepKind::Activate, CommandSpec::privileged("swapon").arg("/swapfile")),
        ];
        let failure = run_steps(&runner, &steps).unwrap_err();
        assert_eq!(failure.kind, StepKind::Format);
        assert!(!failure.is_unusable_activation());
        assert_eq!(runner.issued.borrow().len(), 1);

        let err = failure.into_error(None, manual_commands(&steps));
        assert!(err.to_string().starts_with("Formatting swap failed"));
        assert_eq!(
            err.manual_commands(),
            ["sudo mkswap /swapfile", "sudo swapon /swapfile"]
        );
    }
}
