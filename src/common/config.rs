//! Crashcap configuration
//!
//! Stored as TOML at `~/.config/crashcap/config.toml`. Every field has a
//! default (`#[serde(default)]`), so a partial or empty file is valid. When no
//! file exists a documented default file is written on first load.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::paths;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashcapConfig {
    /// Where `swap file` creates its swap file
    pub swap_file_path: PathBuf,
    /// Extra attempts for the copy-on-write-safe strategy when activation fails
    pub max_retries: u32,
    /// Per-step timeout for the standard swap file strategy
    pub step_timeout_secs: u64,
    /// Persisted mount table that receives swap entries
    pub fstab_path: PathBuf,
    /// Directory for partition table backups
    pub backup_dir: PathBuf,
    /// Filesystems that need the copy-on-write-safe swap file strategy
    pub cow_filesystems: Vec<String>,
    /// Pause after a partition table change before listing devices again
    pub settle_delay_ms: u64,
}

impl Default for CrashcapConfig {
    fn default() -> Self {
        Self {
            swap_file_path: PathBuf::from(Self::DEFAULT_SWAP_FILE),
            max_retries: Self::DEFAULT_MAX_RETRIES,
            step_timeout_secs: Self::DEFAULT_STEP_TIMEOUT_SECS,
            fstab_path: PathBuf::from("/etc/fstab"),
            backup_dir: PathBuf::from("/tmp"),
            cow_filesystems: vec!["btrfs".to_string()],
            settle_delay_ms: 1000,
        }
    }
}

/// (field, description) pairs written as comments into a fresh config file.
const FIELD_DOCS: &[(&str, &str)] = &[
    ("swap_file_path", "Where `swap file` creates its swap file"),
    (
        "max_retries",
        "Extra attempts for the copy-on-write-safe strategy when activation fails",
    ),
    (
        "step_timeout_secs",
        "Per-step timeout (seconds) for the standard swap file strategy",
    ),
    ("fstab_path", "Persisted mount table that receives swap entries"),
    ("backup_dir", "Directory for partition table backups"),
    (
        "cow_filesystems",
        "Filesystems that need the copy-on-write-safe swap file strategy",
    ),
    (
        "settle_delay_ms",
        "Pause after a partition table change before listing devices again",
    ),
];

impl CrashcapConfig {
    pub const DEFAULT_SWAP_FILE: &'static str = "/swapfile";
    pub const DEFAULT_MAX_RETRIES: u32 = 2;
    pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;

    pub fn load() -> Result<Self> {
        Self::load_from_path(paths::default_config_path()?)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self::default();
            config.save_with_documentation(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("parsing crashcap config")?;
        Ok(config.sanitized())
    }

    /// Replace values that cannot work with their defaults.
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.swap_file_path.as_os_str().is_empty() {
            self.swap_file_path = defaults.swap_file_path;
        }
        if self.step_timeout_secs == 0 {
            self.step_timeout_secs = defaults.step_timeout_secs;
        }
        if self.fstab_path.as_os_str().is_empty() {
            self.fstab_path = defaults.fstab_path;
        }
        if self.backup_dir.as_os_str().is_empty() {
            self.backup_dir = defaults.backup_dir;
        }
        self.cow_filesystems = self
            .cow_filesystems
            .into_iter()
            .map(|fs| fs.trim().to_lowercase())
            .filter(|fs| !fs.is_empty())
            .collect();
        self
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing crashcap config")
    }

    /// Save config with an inline description above every field
    pub fn save_with_documentation(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory {}", parent.display()))?;
        }

        let value = toml::Value::try_from(self).context("serializing crashcap config")?;
        let mut output = String::new();
        for (name, description) in FIELD_DOCS {
            let Some(field) = value.get(*name) else {
                continue;
            };
            output.push_str(&format!("# {}\n{} = {}\n\n", description, name, field));
        }

        fs::write(path, output).with_context(|| format!("writing config to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = CrashcapConfig::load_from_path(&path).unwrap();
        assert_eq!(config, CrashcapConfig::default());

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("# Where `swap file` creates its swap file"));
        assert!(written.contains("max_retries = 2"));

        // The documented file parses back to the same values
        let reloaded = CrashcapConfig::load_from_path(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let config = CrashcapConfig::from_toml("max_retries = 5\nswap_file_path = \"/data/swap\"\n")
            .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.swap_file_path, PathBuf::from("/data/swap"));
        assert_eq!(config.step_timeout(), Duration::from_secs(30));
        assert_eq!(config.cow_filesystems, vec!["btrfs".to_string()]);
    }

    #[test]
    fn unusable_values_fall_back() {
        let config = CrashcapConfig::from_toml(
            "step_timeout_secs = 0\nfstab_path = \"\"\ncow_filesystems = [\" BTRFS \", \"\"]\n",
        )
        .unwrap();
        assert_eq!(config.step_timeout_secs, 30);
        assert_eq!(config.fstab_path, PathBuf::from("/etc/fstab"));
        assert_eq!(config.cow_filesystems, vec!["btrfs".to_string()]);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(CrashcapConfig::from_toml("max_retries = \"many\"").is_err());
    }
}
