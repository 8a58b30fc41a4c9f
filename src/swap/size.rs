//! Human size strings (`512M`, `2GiB`, `1.5G`).
//!
//! `M`, `MB` and `MiB` all mean mebibytes; `G`, `GB` and `GiB` all mean
//! gibibytes. SI units are deliberately not distinguished.

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

use super::error::SwapError;

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

/// Smallest swap file `swapon` is asked to accept.
pub const MIN_SWAP_FILE_BYTES: u64 = 64 * MIB;

lazy_static! {
    static ref SIZE_PATTERN: Option<Regex> =
        Regex::new(r"(?i)^(\d+(?:\.\d+)?)(MiB|GiB|MB|GB|M|G)$").ok();
}

/// A validated, non-zero byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SizeSpec {
    bytes: u64,
}

impl SizeSpec {
    pub fn parse(input: &str) -> Result<Self, SwapError> {
        let invalid = || SwapError::InvalidSizeFormat(input.to_string());
        let caps = SIZE_PATTERN
            .as_ref()
            .and_then(|re| re.captures(input.trim()))
            .ok_or_else(invalid)?;

        let number: f64 = caps[1].parse().map_err(|_| invalid())?;
        let unit = match caps[2].to_ascii_lowercase().as_str() {
            "m" | "mb" | "mib" => MIB,
            _ => GIB,
        };

        // Truncation is the only rounding applied
        let bytes = (number * unit as f64) as u64;
        if bytes == 0 {
            return Err(invalid());
        }
        Ok(Self { bytes })
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn as_mib(&self) -> f64 {
        self.bytes as f64 / MIB as f64
    }

    pub fn as_gib(&self) -> f64 {
        self.bytes as f64 / GIB as f64
    }

    /// Whole mebibytes, as used for `dd bs=1M count=N`.
    pub fn whole_mib(&self) -> u64 {
        self.bytes / MIB
    }

    pub fn ensure_swap_file_minimum(self) -> Result<Self, SwapError> {
        if self.bytes < MIN_SWAP_FILE_BYTES {
            return Err(SwapError::SizeTooSmall {
                requested: self.bytes,
            });
        }
        Ok(self)
    }
}

impl FromStr for SizeSpec {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_bytes(self.bytes))
    }
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else {
        format!("{:.0} MiB", bytes as f64 / MIB as f64)
    }
}

/// Parse the loose sizes printed by `swapon`/`/proc/swaps` into KiB.
///
/// `G`, `M` and `K` suffixes are honoured, a bare `B` suffix counts as zero
/// and a plain number is already KiB.
pub fn parse_size_to_kib(input: &str) -> Option<u64> {
    let s = input.trim().to_ascii_uppercase();
    let (number, factor) = if let Some(n) = s.strip_suffix('G') {
        (n, 1024.0 * 1024.0)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1024.0)
    } else if let Some(n) = s.strip_suffix('K') {
        (n, 1.0)
    } else if s.ends_with('B') {
        return Some(0);
    } else {
        (s.as_str(), 1.0)
    };
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * factor) as u64)
}
