//! Single chokepoint for every external command the toolkit runs.
//!
//! Provisioning code never touches `std::process` directly. It builds a
//! [`CommandSpec`] and hands it to a [`CommandRunner`], which keeps timeout
//! handling, stderr capture, privilege elevation and debug logging uniform.

use std::fmt;
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use thiserror::Error;

use crate::common::shell::shell_quote;
use crate::ui::{Level, emit, is_debug_enabled};

/// A program plus arguments, described without running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Needs root; the system runner prefixes `sudo` when not already root.
    pub privileged: bool,
    /// Changes system state (partition table, swap, files).
    pub mutates: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            privileged: false,
            mutates: false,
        }
    }

    /// Privileged command that changes system state.
    pub fn privileged(program: impl Into<String>) -> Self {
        Self {
            privileged: true,
            mutates: true,
            ..Self::new(program)
        }
    }

    /// Privileged command that only reads state (`parted print`, `sfdisk --dump`).
    pub fn privileged_query(program: impl Into<String>) -> Self {
        Self {
            privileged: true,
            ..Self::new(program)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The command line an operator would type to run this by hand.
    pub fn manual(&self) -> String {
        if self.privileged {
            format!("sudo {}", self)
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// How a single invocation should behave.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Turn a non-zero exit into [`CommandError::Failed`].
    pub check: bool,
    /// Kill the process and return [`CommandError::Timeout`] after this long.
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn checked() -> Self {
        Self {
            check: true,
            timeout: None,
        }
    }

    pub fn unchecked() -> Self {
        Self {
            check: false,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command `{cmd}` failed (exit code {}): {stderr}", display_code(*exit_code))]
    Failed {
        cmd: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("command `{cmd}` timed out after {}s", after.as_secs())]
    Timeout { cmd: String, after: Duration },

    #[error("failed to start `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: io::Error,
    },
}

fn display_code(code: Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

impl CommandError {
    pub fn failed(spec: &CommandSpec, output: &CommandOutput) -> Self {
        CommandError::Failed {
            cmd: spec.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::Timeout { .. })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CommandError::Failed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    pub fn stderr(&self) -> &str {
        match self {
            CommandError::Failed { stderr, .. } => stderr,
            _ => "",
        }
    }
}

pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec, opts: RunOptions) -> Result<CommandOutput, CommandError>;

    /// Whether mutating commands are only being printed.
    fn dry_run(&self) -> bool {
        false
    }

    fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        self.run(spec, RunOptions::checked())
    }

    /// Run checked and return trimmed stdout.
    fn stdout(&self, spec: &CommandSpec) -> Result<String, CommandError> {
        Ok(self.run_checked(spec)?.stdout.trim().to_string())
    }

    /// Run a probe whose failure just means "nothing to do".
    ///
    /// Spawn failures are folded into an unsuccessful output as well.
    fn probe(&self, spec: &CommandSpec) -> CommandOutput {
        match self.run(spec, RunOptions::unchecked()) {
            Ok(output) => output,
            Err(err) => {
                emit(
                    Level::Debug,
                    "command.probe.failed",
                    &format!("Probe `{}` did not run: {}", spec, err),
                    None,
                );
                CommandOutput {
                    stderr: err.to_string(),
                    ..CommandOutput::default()
                }
            }
        }
    }
}

/// Runs commands on the host.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    elevate: bool,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemRunner {
    pub fn new() -> Self {
        Self {
            elevate: !matches!(sudo::check(), sudo::RunningAs::Root),
        }
    }

    fn build(&self, spec: &CommandSpec, own_group: bool) -> Command {
        let mut command = if spec.privileged && self.elevate {
            let mut c = Command::new("sudo");
            // A background process group cannot prompt for a password
            if own_group {
                c.arg("-n");
            }
            c.arg(&spec.program);
            c
        } else {
            Command::new(&spec.program)
        };
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Timed commands get their own process group so expiry reaches
        // grandchildren (the tool behind `sudo`, children of `sh -c`)
        if own_group {
            command.process_group(0);
        }
        command
    }

    /// Ask for the sudo password up front, on the terminal.
    fn refresh_credentials(&self) -> Result<(), CommandError> {
        let cmd = "sudo -v".to_string();
        let status = Command::new("sudo")
            .arg("-v")
            .status()
            .map_err(|source| CommandError::Spawn {
                cmd: cmd.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(CommandError::Failed {
                cmd,
                exit_code: status.code(),
                stderr: "could not obtain sudo credentials".to_string(),
            })
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, opts: RunOptions) -> Result<CommandOutput, CommandError> {
        if is_debug_enabled() {
            emit(
                Level::Debug,
                "command.exec",
                &format!("Executing: {}", spec.manual()),
                None,
            );
        }

        let spawn_err = |source: io::Error| CommandError::Spawn {
            cmd: spec.to_string(),
            source,
        };

        let own_group = opts.timeout.is_some();
        if own_group && spec.privileged && self.elevate {
            self.refresh_credentials()?;
        }

        let mut child = self.build(spec, own_group).spawn().map_err(spawn_err)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_reader = thread::spawn(move || read_stream(stdout));
        let stderr_reader = thread::spawn(move || read_stream(stderr));

        let status = match opts.timeout {
            Some(limit) => wait_with_timeout(&mut child, limit).map_err(spawn_err)?,
            None => Some(child.wait().map_err(spawn_err)?),
        };

        // On expiry the readers are left to finish on their own; a survivor
        // holding the pipes must not delay the timeout
        let Some(status) = status else {
            emit(
                Level::Debug,
                "command.timeout",
                &format!("Timeout exceeded for: {}", spec),
                None,
            );
            return Err(CommandError::Timeout {
                cmd: spec.to_string(),
                after: opts.timeout.unwrap_or_default(),
            });
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        let output = CommandOutput {
            stdout,
            stderr,
            exit_code: status.code(),
        };

        if !output.success() {
            if is_debug_enabled() {
                emit(
                    Level::Debug,
                    "command.failed",
                    &format!(
                        "Command failed (code {}): {}\nStderr: {}",
                        display_code(output.exit_code),
                        spec,
                        output.stderr.trim()
                    ),
                    None,
                );
            }
            if opts.check {
                return Err(CommandError::failed(spec, &output));
            }
        }

        Ok(output)
    }
}

/// Prints mutating commands instead of running them; queries still execute.
#[derive(Debug, Clone)]
pub struct DryRunRunner<R> {
    inner: R,
}

impl<R: CommandRunner> DryRunRunner<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: CommandRunner> CommandRunner for DryRunRunner<R> {
    fn run(&self, spec: &CommandSpec, opts: RunOptions) -> Result<CommandOutput, CommandError> {
        if spec.mutates {
            println!("[DRY RUN] {}", spec.manual());
            return Ok(CommandOutput {
                exit_code: Some(0),
                ..CommandOutput::default()
            });
        }
        self.inner.run(spec, opts)
    }

    fn dry_run(&self) -> bool {
        true
    }
}

fn read_stream<S: Read>(stream: Option<S>) -> String {
    let mut buf = Vec::new();
    if let Some(mut s) = stream {
        let _ = s.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

const POLL: Duration = Duration::from_millis(50);
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Returns `None` when the child's process group had to be killed.
fn wait_with_timeout(child: &mut Child, limit: Duration) -> io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= limit {
            terminate_group(child)?;
            return Ok(None);
        }
        thread::sleep(POLL.min(limit.saturating_sub(start.elapsed())));
    }
}

/// SIGTERM the child's group (`sudo` relays it to its command), then SIGKILL
/// whatever is left after a short grace period.
fn terminate_group(child: &mut Child) -> io::Result<()> {
    let group = Pid::from_raw(child.id() as i32);
    let _ = killpg(group, Signal::SIGTERM);

    let deadline = Instant::now() + KILL_GRACE;
    while Instant::now() < deadline {
        if child.try_wait()?.is_some() {
            break;
        }
        thread::sleep(POLL);
    }

    let _ = killpg(group, Signal::SIGKILL);
    let _ = child.kill();
    child.wait()?;
    Ok(())
}
