//! Disk discovery
//!
//! Configured disks (`/dev/sda`, ...) are mapped to their stable
//! `/dev/disk/by-id` names so partition paths survive device renumbering.

use crate::exec::Exec;
use anyhow::{Context, Result, bail};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::sync::OnceCell;
use walkdir::WalkDir;

const BY_ID_DIR: &str = "/dev/disk/by-id";

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b([0-9]+) bytes\b").unwrap());

/// A target disk and its size in bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    /// Stable `/dev/disk/by-id` path
    pub path: String,
    pub size: u64,
}

impl Disk {
    /// Path of partition `number` on this disk
    pub fn partition(&self, number: u8) -> String {
        partition_path(&self.path, number)
    }
}

pub fn partition_path(disk: &str, number: u8) -> String {
    format!("{disk}-part{number}")
}

/// Look up the configured disks, once per process
pub async fn discover(configured: &[String]) -> Result<&'static [Disk]> {
    static DISKS: OnceCell<Vec<Disk>> = OnceCell::const_new();
    DISKS
        .get_or_try_init(|| lookup(configured))
        .await
        .map(Vec::as_slice)
}

async fn lookup(configured: &[String]) -> Result<Vec<Disk>> {
    let mut disks = Vec::with_capacity(configured.len());
    for device in configured {
        let ids = find_ids(Path::new(BY_ID_DIR), Path::new(device))?;
        let Some(path) = longest(&ids) else {
            bail!("Could not find corresponding {BY_ID_DIR}/* device for \"{device}\"");
        };
        let size = disk_size(&path).await?;
        log::info!("Disk {device} is {path} ({size} bytes)");
        disks.push(Disk { path, size });
    }
    Ok(disks)
}

/// Entries of `by_id_dir` that resolve to `target`
pub fn find_ids(by_id_dir: &Path, target: &Path) -> Result<Vec<String>> {
    let target = std::fs::canonicalize(target)
        .with_context(|| format!("Disk {} does not exist", target.display()))?;

    let mut ids = Vec::new();
    for entry in WalkDir::new(by_id_dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("Failed to read {}", by_id_dir.display()))?;
        let resolved: Option<PathBuf> = std::fs::canonicalize(entry.path()).ok();
        if resolved.as_deref() == Some(target.as_path()) {
            ids.push(entry.path().to_string_lossy().into_owned());
        }
    }
    ids.sort();
    Ok(ids)
}

fn longest(ids: &[String]) -> Option<String> {
    ids.iter()
        .fold(None, |best: Option<&String>, id| match best {
            Some(best) if best.len() >= id.len() => Some(best),
            _ => Some(id),
        })
        .cloned()
}

/// Size of a disk or partition in bytes
pub async fn disk_size(path: &str) -> Result<u64> {
    let output = Exec::new("fdisk")
        .args(["-l", "--bytes", path])
        .quiet()
        .stdout()
        .await?;
    parse_fdisk_size(&output).with_context(|| format!("Could not figure out the size of {path}"))
}

pub fn parse_fdisk_size(output: &str) -> Option<u64> {
    SIZE_RE.captures(output)?.get(1)?.as_str().parse().ok()
}

/// The smallest disk; the first one listed wins a tie
pub fn smallest(disks: &[Disk]) -> Option<&Disk> {
    disks.iter().reduce(|best, disk| if disk.size < best.size { disk } else { best })
}
