use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueHint};

use crashcap::common::config::CrashcapConfig;
use crashcap::common::paths;
use crashcap::swap::cli::{SwapCommands, handle_disks_command, handle_swap_command};
use crashcap::ui::{self, Level, OutputFormat, emit};

/// Crashcap: swap partitions and swap files without the guesswork
#[derive(Parser, Debug)]
#[command(name = "crashcap", author, version, about, long_about = None)]
struct Cli {
    /// Print every external command and its failures
    #[arg(short, long, global = true)]
    debug: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    output: OutputFormat,

    /// Disable coloured output
    #[arg(long, global = true)]
    no_color: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Print state-changing commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List disks and their partitions
    Disks,

    /// Swap partition and swap file management
    Swap {
        #[command(subcommand)]
        command: SwapCommands,
    },

    /// Inspect the crashcap configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
}

fn config_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => paths::default_config_path(),
    }
}

fn load_config(cli: &Cli) -> Result<CrashcapConfig> {
    match &cli.config {
        Some(path) => CrashcapConfig::load_from_path(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => CrashcapConfig::load().context("loading default config"),
    }
}

fn handle_config_command(cli: &Cli, command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = load_config(cli)?;
            let data = serde_json::to_value(&config)?;
            emit(Level::Info, "config.show", config.to_toml()?.trim_end(), Some(data));
        }
        ConfigCommands::Path => {
            let path = config_path(cli)?;
            emit(
                Level::Info,
                "config.path",
                &path.display().to_string(),
                Some(serde_json::json!({ "path": path })),
            );
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Disks => handle_disks_command(cli.dry_run),
        Commands::Swap { command } => {
            let config = load_config(&cli)?;
            handle_swap_command(command.clone(), &config, cli.dry_run)
        }
        Commands::Config { command } => handle_config_command(&cli, command),
    }
}

fn main() {
    let cli = Cli::parse();

    ui::init(cli.output, !cli.no_color);
    ui::set_debug_mode(cli.debug);
    if cli.debug {
        emit(Level::Debug, "cli.debug", "Debug mode is on", None);
    }

    if let Err(e) = run(cli) {
        emit(Level::Error, "cli.error", &format!("Error: {:#}", e), None);
        std::process::exit(1);
    }
}
