//! Terminal and JSON output for every crashcap message.
//!
//! Each message is an event with a level, a stable dotted code and optional
//! structured data. Text mode prints the message; JSON mode prints one object
//! per line so the output can be piped into `jq`.

use colored::*;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::io::{self, Write};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

pub mod nerd_font;
pub use nerd_font::NerdFont;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Success,
    Warn,
    Error,
    Debug,
}

impl Level {
    fn icon(self) -> Option<NerdFont> {
        match self {
            Level::Success => Some(NerdFont::Check),
            Level::Warn => Some(NerdFont::Warning),
            Level::Error => Some(NerdFont::CrossCircle),
            Level::Info | Level::Debug => None,
        }
    }

    fn paint(self, line: &str) -> String {
        match self {
            Level::Info => line.normal().to_string(),
            Level::Success => line.green().bold().to_string(),
            Level::Warn => line.yellow().bold().to_string(),
            Level::Error => line.red().bold().to_string(),
            Level::Debug => line.cyan().to_string(),
        }
    }

    fn to_stderr(self) -> bool {
        matches!(self, Level::Warn | Level::Error)
    }
}

#[derive(Debug, Clone, Copy)]
struct OutputSettings {
    format: OutputFormat,
    color: bool,
}

lazy_static! {
    static ref SETTINGS: RwLock<OutputSettings> = RwLock::new(OutputSettings {
        format: OutputFormat::Text,
        color: true,
    });
    static ref ANSI_ESCAPE: Option<Regex> = Regex::new(r"\x1b\[[0-9;?]*[@-~]").ok();
}

static DEBUG_MODE: AtomicBool = AtomicBool::new(false);

pub fn set_debug_mode(enabled: bool) {
    DEBUG_MODE.store(enabled, Ordering::Relaxed);
}

pub fn is_debug_enabled() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

pub fn init(format: OutputFormat, color: bool) {
    if let Ok(mut settings) = SETTINGS.write() {
        *settings = OutputSettings { format, color };
    }
}

fn settings() -> OutputSettings {
    SETTINGS
        .read()
        .map(|s| *s)
        .unwrap_or_else(|poisoned| *poisoned.into_inner())
}

pub fn get_output_format() -> OutputFormat {
    settings().format
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    level: Level,
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

fn strip_ansi(input: &str) -> String {
    match ANSI_ESCAPE.as_ref() {
        Some(re) => re.replace_all(input, "").into_owned(),
        None => input.to_string(),
    }
}

fn render(
    settings: OutputSettings,
    level: Level,
    code: &str,
    message: &str,
    data: Option<serde_json::Value>,
) -> Option<String> {
    if level == Level::Debug && !is_debug_enabled() {
        return None;
    }
    match settings.format {
        OutputFormat::Text => {
            let line = match level.icon() {
                Some(icon) => format!("{} {}", char::from(icon), message),
                None => message.to_string(),
            };
            Some(if settings.color { level.paint(&line) } else { line })
        }
        OutputFormat::Json => {
            let message = strip_ansi(message);
            serde_json::to_string(&JsonEvent {
                level,
                code,
                message: &message,
                data,
            })
            .ok()
        }
    }
}

/// Print one event; warnings and errors go to stderr.
pub fn emit(level: Level, code: &str, message: &str, data: Option<serde_json::Value>) {
    let Some(line) = render(settings(), level, code, message, data) else {
        return;
    };
    let _ = if level.to_stderr() {
        writeln!(io::stderr(), "{}", line)
    } else {
        writeln!(io::stdout(), "{}", line)
    };
}

pub mod prelude {
    pub use super::{Level, NerdFont, OutputFormat, emit, get_output_format};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const PLAIN_TEXT: OutputSettings = OutputSettings {
        format: OutputFormat::Text,
        color: false,
    };

    #[test]
    fn escapes_are_removed_from_json_messages() {
        assert_eq!(strip_ansi("\u{1b}[1;32mdone\u{1b}[0m ok"), "done ok");
        assert_eq!(strip_ansi("/dev/sda3"), "/dev/sda3");
    }

    #[test]
    fn json_events_carry_code_and_data() {
        let settings = OutputSettings {
            format: OutputFormat::Json,
            color: false,
        };
        let line = render(
            settings,
            Level::Success,
            "swap.provisioned",
            "\u{1b}[32mready\u{1b}[0m",
            Some(serde_json::json!({"path": "/swapfile"})),
        )
        .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["level"], "success");
        assert_eq!(parsed["code"], "swap.provisioned");
        assert_eq!(parsed["message"], "ready");
        assert_eq!(parsed["data"]["path"], "/swapfile");
    }

    #[test]
    #[serial]
    fn debug_text_is_hidden_unless_enabled() {
        set_debug_mode(false);
        assert!(render(PLAIN_TEXT, Level::Debug, "c", "hidden", None).is_none());
        set_debug_mode(true);
        assert_eq!(
            render(PLAIN_TEXT, Level::Debug, "c", "shown", None).as_deref(),
            Some("shown")
        );
        set_debug_mode(false);
    }

    #[test]
    fn text_outcomes_get_an_icon() {
        let line = render(PLAIN_TEXT, Level::Warn, "swap.fstab.failed", "fstab not updated", None)
            .unwrap();
        assert_eq!(line, format!("{} fstab not updated", char::from(NerdFont::Warning)));
        assert_eq!(
            render(PLAIN_TEXT, Level::Info, "swap.status", "NAME TYPE", None).as_deref(),
            Some("NAME TYPE")
        );
    }
}
