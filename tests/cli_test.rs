use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use anyhow::Result;
use tempfile::TempDir;

fn crashcap(config: &Path, args: &[&str]) -> Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_crashcap"))
        .arg("--config")
        .arg(config)
        .args(args)
        .output()?)
}

#[test]
fn config_show_writes_and_prints_defaults() -> Result<()> {
    let dir = TempDir::new()?;
    let config = dir.path().join("config.toml");

    let output = crashcap(&config, &["--output", "json", "config", "show"])?;

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(config.exists());
    let stdout = String::from_utf8(output.stdout)?;
    let event: serde_json::Value = serde_json::from_str(stdout.trim())?;
    assert_eq!(event["code"], "config.show");
    assert_eq!(event["data"]["max_retries"], 2);
    assert_eq!(event["data"]["swap_file_path"], "/swapfile");
    Ok(())
}

#[test]
fn config_path_honours_override() -> Result<()> {
    let dir = TempDir::new()?;
    let config = dir.path().join("custom.toml");

    let output = crashcap(&config, &["config", "path"])?;

    assert!(output.status.success());
    assert!(String::from_utf8(output.stdout)?.contains("custom.toml"));
    Ok(())
}

#[test]
fn invalid_size_is_rejected_before_touching_the_disk() -> Result<()> {
    let dir = TempDir::new()?;
    let config = dir.path().join("config.toml");

    let output = crashcap(
        &config,
        &["swap", "partition", "--disk", "sda", "--size", "2TiB", "--yes"],
    )?;

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("Invalid size format '2TiB'"), "{stderr}");
    Ok(())
}

#[test]
fn swap_file_in_system_directory_is_refused() -> Result<()> {
    let dir = TempDir::new()?;
    let config = dir.path().join("config.toml");

    let output = crashcap(
        &config,
        &["swap", "file", "--path", "/etc/swapfile", "--size", "1G", "--yes"],
    )?;

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("system directory"), "{stderr}");
    Ok(())
}

#[test]
fn dry_run_prints_swap_file_commands() -> Result<()> {
    let dir = TempDir::new()?;
    let config = dir.path().join("config.toml");
    let fstab = dir.path().join("fstab");
    fs::write(&fstab, "")?;
    fs::write(
        &config,
        format!("fstab_path = \"{}\"\n", fstab.display()),
    )?;
    let swap_file = dir.path().join("swapfile");
    let swap_file = swap_file.to_string_lossy();

    let output = crashcap(
        &config,
        &["--dry-run", "--no-color", "swap", "file", "--path", &swap_file, "--size", "256M", "--yes"],
    )?;

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains(&format!("[DRY RUN] sudo mkswap {}", swap_file)), "{stdout}");
    assert!(stdout.contains(&format!("[DRY RUN] sudo swapon {}", swap_file)), "{stdout}");
    assert_eq!(fs::read_to_string(&fstab)?, "");
    assert!(!Path::new(swap_file.as_ref()).exists());
    Ok(())
}
