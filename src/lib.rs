//! Swap-space provisioning for Linux: new partitions or swap files, with
//! filesystem-aware fallbacks and persistent mount-table entries.

pub mod common;
pub mod swap;
pub mod ui;
