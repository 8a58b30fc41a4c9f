//! Disk and partition inventory from `lsblk -J`.

use serde::{Deserialize, Serialize};

use super::error::SwapError;
use crate::common::command::{CommandRunner, CommandSpec};

/// A whole block device that may receive a new partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disk {
    pub name: String,
    pub size: String,
    pub model: String,
}

impl Disk {
    pub fn device_path(&self) -> String {
        device_path(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub name: String,
    pub size: String,
    pub mountpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
}

/// `/dev/<name>` unless `name` already is a path.
pub fn device_path(name: &str) -> String {
    if name.starts_with("/dev/") {
        name.to_string()
    } else {
        format!("/dev/{}", name)
    }
}

pub fn device_name(path: &str) -> &str {
    path.strip_prefix("/dev/").unwrap_or(path)
}

pub fn list_disks(runner: &dyn CommandRunner) -> Result<Vec<Disk>, SwapError> {
    let json = runner.stdout(
        &CommandSpec::new("lsblk").args(["-J", "-d", "-o", "NAME,SIZE,TYPE,MODEL"]),
    )?;
    parse_disks(&json)
}

pub fn list_partitions(runner: &dyn CommandRunner, disk: &str) -> Result<Vec<Partition>, SwapError> {
    let json = runner.stdout(
        &CommandSpec::new("lsblk")
            .args(["-J", "-l", "-o", "NAME,SIZE,TYPE,MOUNTPOINT"])
            .arg(device_path(disk)),
    )?;
    parse_partitions(&json)
}

/// Ordered device names under `disk` (the disk itself included).
pub fn device_names(runner: &dyn CommandRunner, disk: &str) -> Result<Vec<String>, SwapError> {
    let out = runner.stdout(
        &CommandSpec::new("lsblk")
            .args(["-ln", "-o", "NAME"])
            .arg(device_path(disk)),
    )?;
    Ok(out
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Total size of a block device in bytes.
pub fn disk_size_bytes(runner: &dyn CommandRunner, disk: &str) -> Result<u64, SwapError> {
    let out = runner.stdout(
        &CommandSpec::new("lsblk")
            .args(["-b", "-d", "-n", "-o", "SIZE"])
            .arg(device_path(disk)),
    )?;
    let first = out.lines().next().unwrap_or("").trim();
    first
        .parse()
        .map_err(|_| SwapError::parse("lsblk", format!("disk size '{}'", first)))
}

fn parse_lsblk(json: &str) -> Result<LsblkOutput, SwapError> {
    serde_json::from_str(json).map_err(|e| SwapError::parse("lsblk", e.to_string()))
}

pub fn parse_disks(json: &str) -> Result<Vec<Disk>, SwapError> {
    Ok(parse_lsblk(json)?
        .blockdevices
        .into_iter()
        .filter(|d| d.kind.as_deref() == Some("disk"))
        .map(|d| Disk {
            name: d.name,
            size: d.size.unwrap_or_default(),
            model: d.model.map(|m| m.trim().to_string()).unwrap_or_default(),
        })
        .collect())
}

pub fn parse_partitions(json: &str) -> Result<Vec<Partition>, SwapError> {
    Ok(parse_lsblk(json)?
        .blockdevices
        .into_iter()
        .filter(|d| d.kind.as_deref() == Some("part"))
        .map(|d| Partition {
            name: d.name,
            size: d.size.unwrap_or_default(),
            mountpoint: d.mountpoint.filter(|m| !m.is_empty()),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_whole_disks_are_listed() {
        let json = r#"{
           "blockdevices": [
              {"name": "loop0", "size": "55.5M", "type": "loop", "model": null},
              {"name": "sda", "size": "465.8G", "type": "disk", "model": "Samsung SSD 860  "},
              {"name": "sr0", "size": "1024M", "type": "rom", "model": "DVD-RW"},
              {"name": "zram0", "size": "8G", "type": "disk", "model": null},
              {"name": "nvme0n1", "size": "953.9G", "type": "disk", "model": "WD Blue SN570"}
           ]
        }"#;
        let disks = parse_disks(json).unwrap();
        let names: Vec<_> = disks.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["sda", "zram0", "nvme0n1"]);
        assert_eq!(disks[0].model, "Samsung SSD 860");
        assert_eq!(disks[1].model, "");
        assert_eq!(disks[2].device_path(), "/dev/nvme0n1");
    }

    #[test]
    fn partitions_keep_mountpoints() {
        let json = r#"{
           "blockdevices": [
              {"name": "sda", "size": "465.8G", "type": "disk", "mountpoint": null},
              {"name": "sda1", "size": "512M", "type": "part", "mountpoint": "/boot/efi"},
              {"name": "sda2", "size": "400G", "type": "part", "mountpoint": ""},
              {"name": "cryptroot", "size": "400G", "type": "crypt", "mountpoint": "/"}
           ]
        }"#;
        let parts = parse_partitions(json).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].mountpoint.as_deref(), Some("/boot/efi"));
        assert_eq!(parts[1].mountpoint, None);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(
            parse_disks("not json"),
            Err(SwapError::Parse { tool: "lsblk", .. })
        ));
    }

    #[test]
    fn device_path_helpers() {
        assert_eq!(device_path("sda"), "/dev/sda");
        assert_eq!(device_path("/dev/sda"), "/dev/sda");
        assert_eq!(device_name("/dev/nvme0n1"), "nvme0n1");
        assert_eq!(device_name("sdb"), "sdb");
    }
}
