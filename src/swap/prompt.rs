//! Yes/no gates in front of destructive actions.

use std::io;

use dialoguer::Confirm;

use super::error::SwapError;

pub trait Prompter {
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, SwapError>;
}

/// Asks on the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct DialoguerPrompter;

impl Prompter for DialoguerPrompter {
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, SwapError> {
        Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()
            .map_err(|e| SwapError::Io(io::Error::other(e.to_string())))
    }
}

/// Answers every question with yes (`--yes`).
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Prompter for AssumeYes {
    fn confirm(&self, _prompt: &str, _default: bool) -> Result<bool, SwapError> {
        Ok(true)
    }
}
