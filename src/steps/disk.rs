//! Disk partitioning and ZFS pools
//!
//! Every disk gets the same layout:
//!
//! | # | type | size |
//! |---|------|------|
//! | 2 | EFI system (`EF00`) | 5 GiB, starting at 1 MiB |
//! | 3 | boot pool (`BF00`) | 5 GiB |
//! | 4 | root pool (`BF01`) | rest of the smallest disk |
//!
//! The root partition of the smallest disk takes all remaining space. Larger
//! disks get a root partition of exactly that size, read back once it
//! exists, so the mirror members match.

use super::Catalog;
use crate::exec::Exec;
use crate::os::disks::{self, Disk};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use taskgraph::{Lock, Task};

const POOL_ROOT: &str = "/mnt";

const BOOT_POOL_FEATURES: &[&str] = &[
    "async_destroy",
    "bookmarks",
    "embedded_data",
    "empty_bpobj",
    "enabled_txg",
    "extensible_dataset",
    "filesystem_limits",
    "hole_birth",
    "large_blocks",
    "livelist",
    "lz4_compress",
    "spacemap_histogram",
    "zpool_checkpoint",
];

const BOOT_POOL_PROPERTIES: &[&str] = &[
    "acltype=posixacl",
    "canmount=off",
    "compression=lz4",
    "devices=off",
    "normalization=formD",
    "relatime=on",
    "xattr=sa",
    "mountpoint=/boot",
];

const ROOT_POOL_PROPERTIES: &[&str] = &[
    "encryption=aes-256-gcm",
    "keyformat=passphrase",
    "keylocation=prompt",
    "acltype=posixacl",
    "canmount=off",
    "compression=lz4",
    "dnodesize=auto",
    "normalization=formD",
    "relatime=on",
    "xattr=sa",
    "mountpoint=/",
];

/// GPT partition type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionType {
    Efi,
    ZfsBoot,
    ZfsOther,
}

impl PartitionType {
    pub fn code(self) -> &'static str {
        match self {
            Self::Efi => "EF00",
            Self::ZfsBoot => "BF00",
            Self::ZfsOther => "BF01",
        }
    }

    fn offset(self) -> &'static str {
        match self {
            Self::Efi => "1M",
            Self::ZfsBoot | Self::ZfsOther => "0",
        }
    }
}

#[derive(Debug, Clone)]
enum PartitionSize {
    /// An sgdisk size such as `+5G`
    Fixed(&'static str),
    /// All remaining space
    Rest,
    /// As large as another, already existing partition
    SameAs(String),
}

impl PartitionSize {
    async fn resolve(&self) -> Result<String> {
        match self {
            Self::Fixed(size) => Ok((*size).to_string()),
            Self::Rest => Ok("0".to_string()),
            Self::SameAs(partition) => Ok(kibibytes(disks::disk_size(partition).await?)),
        }
    }
}

fn kibibytes(bytes: u64) -> String {
    format!("+{}K", bytes / 1024)
}

pub fn sgdisk_args(disk: &str, number: u8, kind: PartitionType, size: &str) -> Vec<String> {
    vec![
        "-n".to_string(),
        format!("{number}:{}:{size}", kind.offset()),
        "-t".to_string(),
        format!("{number}:{}", kind.code()),
        disk.to_string(),
    ]
}

fn disk_lock(disk: &Disk) -> Arc<Lock> {
    Lock::path(&disk.path)
}

/// Locks on every disk, in the global disk order
pub(super) fn all_disk_locks(disks: &[Disk]) -> Vec<Arc<Lock>> {
    let mut paths: Vec<&str> = disks.iter().map(|d| d.path.as_str()).collect();
    paths.sort_unstable();
    paths.into_iter().map(Lock::path).collect()
}

fn partition(
    catalog: &Catalog,
    name: &str,
    disk: &Disk,
    number: u8,
    kind: PartitionType,
    size: PartitionSize,
) -> Result<Task> {
    let path = disk.partition(number);
    let check = path.clone();
    let device = disk.path.clone();
    Ok(Task::new(format!("{name} {}", disk.path))
        .with_dependencies([catalog.get("prepare-install-env")?])
        .with_locks([disk_lock(disk)])
        .with_skip_if(move || {
            let exists = Path::new(&check).exists();
            async move { Ok(exists) }
        })
        .with_run(move || create_partition(device, number, kind, size, path)))
}

async fn create_partition(
    disk: String,
    number: u8,
    kind: PartitionType,
    size: PartitionSize,
    path: String,
) -> Result<String> {
    let size = size.resolve().await?;
    Exec::new("sgdisk")
        .args(sgdisk_args(&disk, number, kind, &size))
        .run()
        .await?;
    Exec::new("udevadm").arg("settle").run().await?;
    if !Path::new(&path).exists() {
        anyhow::bail!("Partition {path} did not appear");
    }
    Ok(format!("Created partition {path}."))
}

pub(super) fn efi_partitions(catalog: &Catalog) -> Result<Task> {
    let parts = catalog
        .disks()?
        .iter()
        .map(|disk| {
            partition(
                catalog,
                "zfs-partition-2-efi",
                disk,
                2,
                PartitionType::Efi,
                PartitionSize::Fixed("+5G"),
            )
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Task::new("zfs-partition-2-efi").with_dependencies(parts))
}

pub(super) fn boot_partitions(catalog: &Catalog) -> Result<Task> {
    let efi = catalog.get("zfs-partition-2-efi")?;
    let parts = catalog
        .disks()?
        .iter()
        .map(|disk| {
            Ok(partition(
                catalog,
                "zfs-partition-3-boot",
                disk,
                3,
                PartitionType::ZfsBoot,
                PartitionSize::Fixed("+5G"),
            )?
            .with_dependencies([efi.clone()]))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Task::new("zfs-partition-3-boot").with_dependencies(parts))
}

pub(super) fn root_partitions(catalog: &Catalog) -> Result<Task> {
    let boot = catalog.get("zfs-partition-3-boot")?;
    let all = catalog.disks()?;
    let smallest = disks::smallest(all).context("No disks to partition")?;

    let first = partition(
        catalog,
        "zfs-partition-4-root",
        smallest,
        4,
        PartitionType::ZfsOther,
        PartitionSize::Rest,
    )?
    .with_dependencies([boot]);

    let mut parts = vec![first.clone()];
    for disk in all.iter().filter(|d| d.path != smallest.path) {
        let part = partition(
            catalog,
            "zfs-partition-4-root",
            disk,
            4,
            PartitionType::ZfsOther,
            PartitionSize::SameAs(smallest.partition(4)),
        )?
        .with_dependencies([first.clone()]);
        parts.push(part);
    }
    Ok(Task::new("zfs-partition-4-root").with_dependencies(parts))
}

pub(super) fn partitions(catalog: &Catalog) -> Result<Task> {
    Ok(Task::new("zfs-partitions").with_dependencies([
        catalog.get("prepare-install-env")?,
        catalog.get("zfs-partition-4-root")?,
    ]))
}

/// `vdev` arguments: a mirror when there is more than one disk
fn vdev(partitions: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity(partitions.len() + 1);
    if partitions.len() > 1 {
        args.push("mirror".to_string());
    }
    args.extend(partitions.iter().cloned());
    args
}

fn flag_each(flag: &str, values: impl IntoIterator<Item = String>) -> Vec<String> {
    values
        .into_iter()
        .flat_map(|value| [flag.to_string(), value])
        .collect()
}

pub fn boot_pool_args(partitions: &[String]) -> Vec<String> {
    let options = ["cachefile=/etc/zfs/zpool.cache", "ashift=12", "autotrim=on"]
        .into_iter()
        .map(str::to_string)
        .chain(BOOT_POOL_FEATURES.iter().map(|f| format!("feature@{f}=enabled")));

    let mut args = vec!["create".to_string(), "-d".to_string()];
    args.extend(flag_each("-o", options));
    args.extend(flag_each("-O", BOOT_POOL_PROPERTIES.iter().map(|p| p.to_string())));
    args.extend(["-f", "-R", POOL_ROOT, "bpool"].map(str::to_string));
    args.extend(vdev(partitions));
    args
}

pub fn root_pool_args(partitions: &[String]) -> Vec<String> {
    let mut args = vec!["create".to_string()];
    args.extend(flag_each("-o", ["ashift=12", "autotrim=on"].map(str::to_string)));
    args.extend(flag_each("-O", ROOT_POOL_PROPERTIES.iter().map(|p| p.to_string())));
    args.extend(["-f", "-R", POOL_ROOT, "rpool"].map(str::to_string));
    args.extend(vdev(partitions));
    args
}

async fn pool_exists(pool: &'static str) -> Result<bool> {
    Ok(Exec::new("zpool").args(["list", pool]).quiet().succeeds().await)
}

pub(super) fn boot_pool(catalog: &Catalog) -> Result<Task> {
    let all = catalog.disks()?;
    let parts: Vec<String> = all.iter().map(|d| d.partition(3)).collect();
    Ok(Task::new("zfs-boot-pool")
        .with_dependencies([
            catalog.get("prepare-install-env")?,
            catalog.get("zfs-partitions")?,
            catalog.get("zfs-partition-3-boot")?,
        ])
        .with_locks(all_disk_locks(all))
        .with_skip_if(|| pool_exists("bpool"))
        .with_run(move || async move {
            Exec::new("zpool").args(boot_pool_args(&parts)).run().await?;
            Ok::<_, anyhow::Error>("Created boot pool bpool.")
        }))
}

pub(super) fn root_pool(catalog: &Catalog) -> Result<Task> {
    let all = catalog.disks()?;
    let passphrase = catalog.config().require_disk_encryption_password()?.clone();
    let parts: Vec<String> = all.iter().map(|d| d.partition(4)).collect();
    Ok(Task::new("zfs-root-pool")
        .with_dependencies([
            catalog.get("prepare-install-env")?,
            catalog.get("zfs-partitions")?,
        ])
        .with_locks(all_disk_locks(all))
        .with_skip_if(|| pool_exists("rpool"))
        .with_run(move || async move {
            let secret = passphrase.expose();
            Exec::new("zpool")
                .args(root_pool_args(&parts))
                .stdin(format!("{secret}\n{secret}\n"))
                .run()
                .await?;
            Ok::<_, anyhow::Error>("Created encrypted root pool rpool.")
        }))
}

pub(super) fn disk_formatting(catalog: &Catalog) -> Result<Task> {
    Ok(Task::new("disk-formatting").with_dependencies([
        catalog.get("prepare-install-env")?,
        catalog.get("zfs-partitions")?,
        catalog.get("zfs-boot-pool")?,
        catalog.get("zfs-root-pool")?,
    ]))
}

/// Stop md arrays, destroy every pool and wipe the configured disks
pub(super) fn destroy_all_pools_and_disks(catalog: &Catalog) -> Result<Task> {
    let disks = catalog.disks()?;
    let paths: Vec<String> = disks.iter().map(|d| d.path.clone()).collect();
    let tools = ["zfsutils-linux", "gdisk", "mdadm"]
        .into_iter()
        .map(|package| catalog.os_package(package))
        .collect::<Result<Vec<_>>>()?;
    Ok(Task::new("destroy-all-pools-and-disks")
        .with_dependencies(tools)
        .with_locks(all_disk_locks(disks))
        .with_run(move || destroy_everything(paths)))
}

async fn destroy_everything(disks: Vec<String>) -> Result<String> {
    Exec::new("swapoff").arg("--all").run().await?;
    Exec::shell(format!(
        "umount -lR {POOL_ROOT} 2>/dev/null || true; rm -rf {POOL_ROOT}/debootstrap; rmdir {POOL_ROOT}/* 2>/dev/null || true"
    ))
    .run()
    .await?;

    let arrays = Exec::shell("ls -d /dev/md[0-9]* 2>/dev/null || true").stdout().await?;
    let arrays: Vec<&str> = arrays.lines().filter(|line| !line.is_empty()).collect();
    for array in &arrays {
        Exec::new("mdadm").args(["--stop", *array]).run().await?;
    }
    if !arrays.is_empty() {
        for disk in &disks {
            Exec::new("mdadm")
                .args(["--zero-superblock", "--force", disk.as_str()])
                .run()
                .await?;
        }
    }

    let pools = Exec::new("zpool").args(["list", "-o", "name", "-H"]).stdout().await?;
    for pool in pools.lines().filter(|line| !line.is_empty()) {
        Exec::new("zpool").args(["destroy", "-f", pool]).run().await?;
    }

    for disk in &disks {
        Exec::new("wipefs").args(["--all", disk.as_str()]).run().await?;
        Exec::new("sgdisk").args(["--zap-all", disk.as_str()]).run().await?;
    }
    Ok(format!("Destroyed all pools and wiped {}.", disks.join(", ")))
}
