//! Base system installation and configuration under `/mnt`

use super::Catalog;
use super::files::{CreateFile, LineInFile, MODE_SECRET};
use super::packages::sources_list;
use crate::exec::Exec;
use crate::os::network::find_network_device;
use crate::os::user::PasswdEntry;
use anyhow::{Context, Result, bail};
use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use taskgraph::{Lock, SkipPredicate, Task};

pub(super) const TARGET: &str = "/mnt";

const CHROOT_MOUNTS: &[&str] = &["dev", "proc", "sys"];

const REBOOT_INSTRUCTIONS: &str = "
Debian is installed.

Now, reboot.

When you get to the initramfs prompt, run these two commands:

  zpool import -fa
  zpool export -fa

Then reboot again, and you will be prompted for the zfs encryption key.
";

const DATASETS: &str = "
zfs list rpool/ROOT >/dev/null 2>&1 || zfs create -o canmount=off -o mountpoint=none rpool/ROOT
zfs list bpool/BOOT >/dev/null 2>&1 || zfs create -o canmount=off -o mountpoint=none bpool/BOOT
zfs list rpool/ROOT/debian >/dev/null 2>&1 || zfs create -o canmount=noauto -o mountpoint=/ rpool/ROOT/debian
mountpoint -q /mnt || zfs mount rpool/ROOT/debian
zfs list bpool/BOOT/debian >/dev/null 2>&1 || zfs create -o mountpoint=/boot bpool/BOOT/debian
";

/// Run a bash script inside the installed system
pub(super) fn in_chroot(script: &str) -> Exec {
    Exec::new("chroot")
        .args([TARGET, "/usr/bin/env", "bash", "-euo", "pipefail", "-c"])
        .arg(script)
}

pub(super) fn succeeds(exec: Exec) -> SkipPredicate {
    SkipPredicate::new(move || {
        let exec = exec.clone();
        async move { Ok(exec.quiet().succeeds().await) }
    })
}

/// The dpkg database of the installed system
pub(super) fn target_package_database() -> Arc<Lock> {
    Lock::path("/mnt/var/lib/apt")
}

pub(super) fn prepare_install_env(catalog: &Catalog) -> Result<Task> {
    let mut dependencies = vec![catalog.get("refresh-os-packages")?];
    for package in ["debootstrap", "gdisk", "zfsutils-linux"] {
        dependencies.push(catalog.os_package(package)?);
    }
    Ok(Task::new("prepare-install-env").with_dependencies(dependencies))
}

pub(super) fn debian(catalog: &Catalog) -> Result<Task> {
    Ok(Task::new("debian").with_dependencies([
        catalog.get("prepare-install-env")?,
        catalog.get("disk-formatting")?,
    ]))
}

pub(super) fn datasets(catalog: &Catalog) -> Result<Task> {
    Ok(Task::new("zfs-datasets")
        .with_dependencies([catalog.get("disk-formatting")?])
        .with_skip_if_all([
            succeeds(Exec::new("zfs").args(["list", "rpool/ROOT/debian"])),
            succeeds(Exec::new("mountpoint").args(["-q", TARGET])),
            succeeds(Exec::new("zfs").args(["list", "bpool/BOOT/debian"])),
        ])
        .with_run(|| async {
            Exec::shell(DATASETS).run().await?;
            Ok::<_, anyhow::Error>("Created and mounted rpool/ROOT/debian and bpool/BOOT/debian.")
        }))
}

pub(super) fn debootstrap(catalog: &Catalog) -> Result<Task> {
    let suite = catalog.config().debian_suite.clone();
    Ok(Task::new("debootstrap")
        .with_dependencies([catalog.get("prepare-install-env")?, catalog.get("zfs-datasets")?])
        .with_skip_if(|| async { Ok(Path::new(TARGET).join("etc/debian_version").exists()) })
        .with_run(move || async move {
            Exec::new("debootstrap").args([suite.as_str(), TARGET]).run().await?;
            Ok::<_, anyhow::Error>(format!("Installed Debian {suite} into {TARGET}."))
        }))
}

pub(super) fn system_installation(catalog: &Catalog) -> Result<Task> {
    Ok(Task::new("system-installation").with_dependencies([
        catalog.get("prepare-install-env")?,
        catalog.get("debootstrap")?,
    ]))
}

pub(super) fn hostname(catalog: &Catalog) -> Result<Task> {
    let config = catalog.config();
    let name = config.require_hostname()?;
    let installed = catalog.get("system-installation")?;
    let hostname = CreateFile::new("/mnt/etc/hostname", format!("{name}\n"))
        .into_task()
        .with_dependencies([installed.clone()]);
    let hosts = LineInFile::new("/mnt/etc/hosts", format!("127.0.1.1       {}", config.hostnames()))
        .into_task()
        .with_dependencies([installed]);
    Ok(Task::new("hostname").with_dependencies([hostname, hosts]))
}

/// Address configuration of the installed system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpConfig {
    Dhcp,
    Static {
        address: IpAddr,
        prefix: u8,
        gateway: Option<IpAddr>,
    },
}

impl IpConfig {
    /// Parse `dhcp`, `ADDR/PREFIX` or `ADDR/PREFIX/GATEWAY`
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("dhcp") {
            return Ok(Self::Dhcp);
        }
        let parts: Vec<&str> = value.split('/').collect();
        let (address, prefix, gateway) = match parts.as_slice() {
            [address, prefix] => (address, prefix, None),
            [address, prefix, gateway] => (address, prefix, Some(gateway)),
            _ => bail!("Invalid ip \"{value}\": expected dhcp, ADDR/PREFIX or ADDR/PREFIX/GATEWAY"),
        };
        let address: IpAddr = address
            .parse()
            .with_context(|| format!("Invalid address in ip \"{value}\""))?;
        let prefix: u8 = prefix
            .parse()
            .with_context(|| format!("Invalid prefix length in ip \"{value}\""))?;
        let max = if address.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            bail!("Prefix length {prefix} is too long for {address}");
        }
        let gateway = gateway
            .map(|gateway| gateway.parse::<IpAddr>())
            .transpose()
            .with_context(|| format!("Invalid gateway in ip \"{value}\""))?;
        Ok(Self::Static {
            address,
            prefix,
            gateway,
        })
    }

    /// ifupdown stanza for `device`
    pub fn interfaces(&self, device: &str) -> String {
        let family = match self {
            Self::Static { address, .. } if address.is_ipv6() => "inet6",
            _ => "inet",
        };
        let mut stanza = format!("auto {device}\n");
        match self {
            Self::Dhcp => {
                let _ = writeln!(stanza, "iface {device} {family} dhcp");
            }
            Self::Static {
                address,
                prefix,
                gateway,
            } => {
                let _ = writeln!(stanza, "iface {device} {family} static");
                let _ = writeln!(stanza, "    address {address}/{prefix}");
                if let Some(gateway) = gateway {
                    let _ = writeln!(stanza, "    gateway {gateway}");
                }
            }
        }
        stanza
    }
}

pub(super) fn network_interface(catalog: &Catalog) -> Result<Task> {
    let ip = IpConfig::parse(&catalog.config().ip)?;
    let installed = catalog.get("system-installation")?;
    Ok(Task::new("network-interface")
        .with_dependencies([installed.clone()])
        .with_run(move || interface_file(ip, installed)))
}

/// Follow-up writing the stanza once the device name is known
async fn interface_file(ip: IpConfig, installed: Task) -> Result<Vec<Task>> {
    let device = find_network_device().await?;
    log::info!("Default network device is {device}");
    let path = format!("{TARGET}/etc/network/interfaces.d/{device}");
    Ok(vec![
        CreateFile::new(path, ip.interfaces(&device))
            .into_task()
            .with_dependencies([installed]),
    ])
}

pub(super) fn apt_sources_list_mnt(catalog: &Catalog) -> Result<Task> {
    Ok(
        CreateFile::new("/mnt/etc/apt/sources.list", sources_list(&catalog.config().debian_suite))
            .named("apt-sources-list-mnt")
            .into_task()
            .with_dependencies([catalog.get("system-installation")?]),
    )
}

pub(super) fn chroot_mount(catalog: &Catalog) -> Result<Task> {
    let mounted = CHROOT_MOUNTS.iter().map(|dir| {
        succeeds(Exec::new("mountpoint").arg("-q").arg(format!("{TARGET}/{dir}")))
    });
    Ok(Task::new("chroot-mount")
        .with_dependencies([
            catalog.get("hostname")?,
            catalog.get("network-interface")?,
            catalog.get("apt-sources-list-mnt")?,
        ])
        .with_skip_if_all(mounted)
        .with_run(mount_for_chroot))
}

async fn mount_for_chroot() -> Result<String> {
    let mut mounted = Vec::new();
    for dir in CHROOT_MOUNTS {
        let target = format!("{TARGET}/{dir}");
        if Exec::new("mountpoint").args(["-q", target.as_str()]).quiet().succeeds().await {
            continue;
        }
        Exec::new("mount")
            .args(["--make-private", "--rbind"])
            .arg(format!("/{dir}"))
            .arg(target.as_str())
            .run()
            .await?;
        mounted.push(target);
    }
    Ok(format!("Mounted {} for chroot.", mounted.join(", ")))
}

pub(super) fn chroot_passwd_root(catalog: &Catalog) -> Result<Task> {
    let password = catalog.config().require_root_password()?.clone();
    Ok(Task::new("chroot-passwd-root")
        .with_dependencies([catalog.get("chroot-mount")?])
        .with_run(move || async move {
            let secret = password.expose();
            in_chroot("passwd root")
                .stdin(format!("{secret}\n{secret}\n"))
                .run()
                .await?;
            Ok::<_, anyhow::Error>("Set the root password of the installed system.")
        }))
}

pub(super) fn chroot_ssh(catalog: &Catalog) -> Result<Task> {
    let keys = catalog.config().require_root_authorized_keys()?;
    let install = catalog.shared("chroot-install-openssh-server", || {
        Ok(Task::new("chroot-install-openssh-server")
            .with_dependencies([catalog.get("chroot-mount")?])
            .with_locks([target_package_database()])
            .with_skip_if_all([succeeds(in_chroot("dpkg --status openssh-server"))])
            .with_run(|| async {
                in_chroot("apt-get update && apt-get install -y openssh-server")
                    .run()
                    .await?;
                Ok::<_, anyhow::Error>("Installed openssh-server in the installed system.")
            }))
    })?;
    let authorized_keys = CreateFile::new("/mnt/root/.ssh/authorized_keys", format!("{}\n", keys.expose()))
        .mode(MODE_SECRET)
        .owner(&PasswdEntry::root())
        .into_task()
        .with_dependencies([install]);
    Ok(Task::new("chroot-ssh").with_dependencies([authorized_keys]))
}

pub(super) fn reboot_instructions() -> Task {
    Task::new("reboot-instructions").with_run(|| async { Ok(REBOOT_INSTRUCTIONS) })
}

pub(super) fn zfs_umount() -> Task {
    Task::new("zfs-umount")
        .with_skip_if(|| async {
            let imported = Exec::new("zpool").args(["list", "bpool"]).quiet().succeeds().await;
            Ok(!imported)
        })
        .with_run(|| async {
            Exec::shell("mount | grep -v zfs | tac | awk '/\\/mnt/ {print $3}' | xargs -r -I{} umount -lf {}")
                .run()
                .await?;
            Exec::new("zpool").args(["export", "bpool"]).run().await?;
            Ok::<_, anyhow::Error>("Unmounted /mnt and exported bpool.")
        })
}
