pub mod command;
pub mod config;
pub mod paths;
pub mod progress;
pub mod shell;

// Re-export commonly used types
pub use command::{CommandOutput, CommandRunner, CommandSpec, RunOptions, SystemRunner};
pub use config::CrashcapConfig;
