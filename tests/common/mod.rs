#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use crashcap::common::command::{CommandError, CommandOutput, CommandRunner, CommandSpec, RunOptions};
use crashcap::swap::error::SwapError;
use crashcap::swap::prompt::Prompter;

/// Canned outcome for one invocation.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(String),
    Fail { code: i32, stderr: String },
    Timeout,
    Missing,
}

pub fn ok(stdout: &str) -> Reply {
    Reply::Ok(stdout.to_string())
}

pub fn fail(code: i32, stderr: &str) -> Reply {
    Reply::Fail {
        code,
        stderr: stderr.to_string(),
    }
}

/// Replays scripted replies keyed by the rendered command line.
///
/// Replies for a command are consumed in order; the last one repeats.
/// Unscripted commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    replies: RefCell<HashMap<String, VecDeque<Reply>>>,
    issued: RefCell<Vec<String>>,
    dry_run: bool,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, command: &str, reply: Reply) -> &Self {
        self.replies
            .borrow_mut()
            .entry(command.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn issued(&self) -> Vec<String> {
        self.issued.borrow().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.issued.borrow().iter().filter(|c| *c == command).count()
    }

    pub fn count_program(&self, program: &str) -> usize {
        self.issued
            .borrow()
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(program))
            .count()
    }

    pub fn position(&self, command: &str) -> Option<usize> {
        self.issued.borrow().iter().position(|c| c == command)
    }

    fn next_reply(&self, command: &str) -> Reply {
        let mut replies = self.replies.borrow_mut();
        match replies.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Reply::Ok(String::new())),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::Ok(String::new())),
            None => Reply::Ok(String::new()),
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec, opts: RunOptions) -> Result<CommandOutput, CommandError> {
        let command = spec.to_string();
        self.issued.borrow_mut().push(command.clone());

        let output = match self.next_reply(&command) {
            Reply::Ok(stdout) => CommandOutput {
                stdout,
                stderr: String::new(),
                exit_code: Some(0),
            },
            Reply::Fail { code, stderr } => CommandOutput {
                stdout: String::new(),
                stderr,
                exit_code: Some(code),
            },
            Reply::Timeout => {
                return Err(CommandError::Timeout {
                    cmd: command,
                    after: opts.timeout.unwrap_or(Duration::from_secs(30)),
                });
            }
            Reply::Missing => {
                return Err(CommandError::Spawn {
                    cmd: command,
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
                });
            }
        };

        if opts.check && !output.success() {
            return Err(CommandError::failed(spec, &output));
        }
        Ok(output)
    }

    fn dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Answers confirmations from a queue and records the questions.
pub struct ScriptedPrompter {
    answers: RefCell<VecDeque<bool>>,
    asked: RefCell<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn answering(answers: &[bool]) -> Self {
        Self {
            answers: RefCell::new(answers.iter().copied().collect()),
            asked: RefCell::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, prompt: &str, _default: bool) -> Result<bool, SwapError> {
        self.asked.borrow_mut().push(prompt.to_string());
        Ok(self.answers.borrow_mut().pop_front().unwrap_or(false))
    }
}

/// Scratch directory holding a mount table and a backup directory.
pub struct TestEnvironment {
    temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        fs::write(
            temp_dir.path().join("fstab"),
            "UUID=0a1b2c3d / ext4 defaults 0 1\n",
        )?;
        fs::create_dir_all(temp_dir.path().join("backups"))?;
        Ok(Self { temp_dir })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn fstab(&self) -> PathBuf {
        self.path().join("fstab")
    }

    pub fn fstab_contents(&self) -> String {
        fs::read_to_string(self.fstab()).unwrap_or_default()
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.path().join("backups")
    }

    pub fn backups(&self) -> Vec<PathBuf> {
        fs::read_dir(self.backup_dir())
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    pub fn swap_file(&self) -> PathBuf {
        self.path().join("swapfile")
    }

    pub fn swap_file_str(&self) -> String {
        self.swap_file().to_string_lossy().into_owned()
    }
}
