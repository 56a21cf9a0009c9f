//! Configuration of the installed system from inside `chroot /mnt`
//!
//! Script steps need the basic system environment first. Scripts that run
//! apt or dpkg hold the package database lock of the installed system.

use super::Catalog;
use super::disk::all_disk_locks;
use super::files::{CreateFile, LineInFile, MODE_SECRET};
use super::system::{IpConfig, TARGET, in_chroot, succeeds, target_package_database};
use crate::exec::Exec;
use crate::os::disks::partition_path;
use crate::os::user::PasswdEntry;
use anyhow::{Context, Result, bail};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use taskgraph::{Lock, SkipPredicate, Task};

const DEBCONF_SELECTIONS: &str = include_str!("templates/debconf-selections");
const ZFS_IMPORT_BPOOL_SERVICE: &str = include_str!("templates/zfs-import-bpool.service");
const GRUB_INSTALLATION: &str = include_str!("templates/grub-installation.sh");
const PROXMOX: &str = include_str!("templates/proxmox.sh");

/// sha512 of the Proxmox VE release key, per Debian suite
const PROXMOX_RELEASE_KEYS: &[(&str, &str)] = &[(
    "bookworm",
    "7da6fe34168adc6e479327ba517796d4702fa2f8b4f0a9833f5ea6e6b48f6507a6da403a274fe201595edc86a84463d50383d07f64bdde2e3658108db7d6dc87",
)];

const ZFS_IN_TARGET: &str = "
apt-get install -y dpkg-dev linux-headers-amd64 linux-image-amd64
apt-get install -y zfs-initramfs
echo REMAKE_INITRD=yes > /etc/dkms/zfs.conf
";

const TMPFS: &str = "
cp /usr/share/systemd/tmp.mount /etc/systemd/system/
systemctl enable tmp.mount
";

/// Holds when every initrd is newer than the dropbear settings
const INITRAMFS_IS_CURRENT: &str = r#"
for initrd in /boot/initrd.img-*; do
  [ -e "$initrd" ] \
    && [ "$initrd" -nt /etc/dropbear/initramfs/authorized_keys ] \
    && [ "$initrd" -nt /etc/initramfs-tools/initramfs.conf ] \
    || exit 1
done
"#;

const EFI_MOUNT: &str = "/mnt/boot/efi";
const GRUB_EFI_LOADER: &str = r"\EFI\debian\grubx64.efi";

/// A script run inside the installed system, built once per catalog
struct ChrootStep {
    name: &'static str,
    script: String,
    dependencies: Vec<Task>,
    locks: Vec<Arc<Lock>>,
    done: Vec<SkipPredicate>,
}

impl ChrootStep {
    fn new(name: &'static str, script: impl Into<String>) -> Self {
        Self {
            name,
            script: script.into(),
            dependencies: Vec::new(),
            locks: Vec::new(),
            done: Vec::new(),
        }
    }

    fn after(mut self, tasks: impl IntoIterator<Item = Task>) -> Self {
        self.dependencies.extend(tasks);
        self
    }

    fn lock(mut self, lock: Arc<Lock>) -> Self {
        self.locks.push(lock);
        self
    }

    /// Skip the script when this holds (together with the other predicates)
    fn done_when(mut self, predicate: SkipPredicate) -> Self {
        self.done.push(predicate);
        self
    }

    fn build(self, catalog: &Catalog) -> Result<Task> {
        catalog.shared(self.name, || {
            let mut locks = self.locks;
            if self.script.contains("apt") || self.script.contains("dpkg") {
                locks.push(target_package_database());
            }
            let script = self.script;
            Ok(Task::new(self.name)
                .with_dependencies(self.dependencies)
                .with_dependencies([catalog.get("chroot-basic-system-environment")?])
                .with_locks(locks)
                .with_skip_if_all(self.done)
                .with_run(move || run_script(script)))
        })
    }
}

async fn run_script(script: String) -> Result<()> {
    in_chroot(&script).run().await?;
    Ok(())
}

/// Every package is installed in the installed system
fn installed(packages: &str) -> SkipPredicate {
    succeeds(in_chroot(&format!("dpkg --status {packages}")))
}

fn exists(path: impl Into<PathBuf>) -> SkipPredicate {
    let path = path.into();
    SkipPredicate::new(move || {
        let path = path.clone();
        async move { Ok::<_, anyhow::Error>(tokio::fs::try_exists(&path).await?) }
    })
}

/// Holds when `path` exists and its contents pass `check`
fn file_matches(path: impl Into<PathBuf>, check: fn(&str) -> bool) -> SkipPredicate {
    let path = path.into();
    SkipPredicate::new(move || {
        let path = path.clone();
        async move {
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => Ok(check(&contents)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(anyhow::Error::from(e).context(format!("Could not read {}", path.display()))),
            }
        }
    })
}

fn has_efi_label(partition: &str) -> SkipPredicate {
    succeeds(Exec::shell(format!(
        "[ \"$(blkid -s LABEL -o value {partition})\" = EFI ]"
    )))
}

pub(super) fn basic_system_environment(catalog: &Catalog) -> Result<Task> {
    let script = format!(
        "ln -sf /proc/self/mounts /etc/mtab
apt-get update
debconf-set-selections <<'EOF'
{DEBCONF_SELECTIONS}EOF
apt-get install -y console-setup locales
dpkg-reconfigure -f noninteractive locales tzdata keyboard-configuration console-setup
"
    );
    let mtab = SkipPredicate::new(|| async {
        let metadata = tokio::fs::symlink_metadata(format!("{TARGET}/etc/mtab")).await;
        Ok(metadata.is_ok_and(|m| m.file_type().is_symlink()))
    });
    Ok(Task::new("chroot-basic-system-environment")
        .with_dependencies([catalog.get("chroot-mount")?])
        .with_locks([target_package_database()])
        .with_skip_if_all([mtab, installed("console-setup locales")])
        .with_run(move || run_script(script)))
}

pub(super) fn zfs(catalog: &Catalog) -> Result<Task> {
    ChrootStep::new("chroot-zfs", ZFS_IN_TARGET)
        .after([
            catalog.get("system-installation")?,
            catalog.get("hostname")?,
            catalog.get("network-interface")?,
            catalog.get("apt-sources-list-mnt")?,
        ])
        .done_when(installed("linux-image-amd64 zfs-initramfs"))
        .done_when(file_matches("/mnt/etc/dkms/zfs.conf", |c| {
            c.lines().any(|line| line.trim() == "REMAKE_INITRD=yes")
        }))
        .build(catalog)
}

pub(super) fn zfs_bpool(catalog: &Catalog) -> Result<Task> {
    let service = CreateFile::new("/mnt/etc/systemd/system/zfs-import-bpool.service", ZFS_IMPORT_BPOOL_SERVICE)
        .into_task()
        .with_dependencies([catalog.get("system-installation")?]);
    ChrootStep::new("chroot-zfs-bpool", "systemctl enable zfs-import-bpool.service")
        .after([service, catalog.get("chroot-zfs")?])
        .done_when(succeeds(in_chroot("systemctl is-enabled --quiet zfs-import-bpool.service")))
        .build(catalog)
}

pub(super) fn tmpfs(catalog: &Catalog) -> Result<Task> {
    ChrootStep::new("chroot-tmpfs", TMPFS)
        .done_when(exists("/mnt/etc/systemd/system/tmp.mount"))
        .done_when(succeeds(in_chroot("systemctl is-enabled --quiet tmp.mount")))
        .build(catalog)
}

/// EFI partition of the first disk, formatted, mounted and booting GRUB
///
/// The substeps run one after another.
pub(super) fn grub(catalog: &Catalog) -> Result<Task> {
    let first = catalog.disks()?.first().context("No disks configured")?;
    let efi = first.partition(2);

    let dosfstools = ChrootStep::new("chroot-grub-install-dosfstools", "apt-get install -y dosfstools")
        .after([catalog.get("chroot-zfs")?])
        .done_when(installed("dosfstools"))
        .build(catalog)?;
    let mkfs = ChrootStep::new("chroot-grub-mkfs-efi", format!("mkdosfs -F 32 -s 1 -n EFI {efi}"))
        .after([dosfstools])
        .lock(Lock::path(&first.path))
        .done_when(has_efi_label(&efi))
        .build(catalog)?;
    let mkdir = ChrootStep::new("chroot-grub-mkdir-boot-efi", "mkdir -p /boot/efi")
        .after([mkfs])
        .done_when(exists(EFI_MOUNT))
        .build(catalog)?;
    let fstab = LineInFile::new("/mnt/etc/fstab", format!("{efi} /boot/efi vfat defaults 0 0"))
        .into_task()
        .with_dependencies([mkdir]);
    let mount = ChrootStep::new("chroot-grub-mount-boot-efi", "mount /boot/efi")
        .after([fstab])
        .done_when(succeeds(Exec::new("mountpoint").args(["-q", EFI_MOUNT])))
        .build(catalog)?;
    let grub = ChrootStep::new("chroot-grub-install-grub", "apt-get install -y grub-efi-amd64")
        .after([mount])
        .done_when(installed("grub-efi-amd64"))
        .build(catalog)?;
    let shim = ChrootStep::new("chroot-grub-install-shim-signed", "apt-get install -y shim-signed")
        .after([grub])
        .done_when(installed("shim-signed"))
        .build(catalog)?;
    let os_prober = ChrootStep::new("chroot-grub-remove-os-prober", "apt-get purge -y os-prober")
        .after([shim])
        .done_when(succeeds(in_chroot("! dpkg --status os-prober")))
        .build(catalog)?;

    Ok(Task::new("chroot-grub").with_dependencies([os_prober]))
}

/// `authorized_keys` for the initramfs: every key may only unlock the pools
pub fn unlock_keys(keys: &str) -> String {
    keys.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| format!("command=\"/usr/bin/zfsunlock\" {line}\n"))
        .collect()
}

fn netmask(prefix: u8) -> Ipv4Addr {
    Ipv4Addr::from(u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0))
}

/// `IP=` line for `initramfs.conf` from an `IP=` line, dhcp or ADDR/PREFIX[/GATEWAY]
pub fn initramfs_ip_line(value: &str) -> Result<String> {
    let value = value.trim();
    if value.starts_with("IP=") {
        return Ok(value.to_string());
    }
    match IpConfig::parse(value)? {
        IpConfig::Dhcp => Ok("IP=dhcp".to_string()),
        IpConfig::Static {
            address: IpAddr::V4(address),
            prefix,
            gateway,
        } => {
            let gateway = match gateway {
                None => String::new(),
                Some(IpAddr::V4(gateway)) => gateway.to_string(),
                Some(IpAddr::V6(gateway)) => bail!("Gateway {gateway} is not an IPv4 address"),
            };
            Ok(format!("IP={address}::{gateway}:{}", netmask(prefix)))
        }
        IpConfig::Static { address, .. } => {
            bail!("The initramfs cannot use {address}; set initramfs-ip to an IPv4 address or an IP= line")
        }
    }
}

pub(super) fn dropbear_remote_unlocking(catalog: &Catalog) -> Result<Task> {
    let config = catalog.config();
    let keys = config.require_root_authorized_keys()?;
    let ip_line = initramfs_ip_line(config.initramfs_ip.as_deref().unwrap_or(&config.ip))
        .context("Invalid initramfs-ip")?;

    let install = ChrootStep::new(
        "chroot-install-dropbear-initramfs",
        "apt-get install -y --no-install-recommends dropbear-initramfs",
    )
    .after([catalog.get("chroot-ssh")?])
    .done_when(installed("dropbear-initramfs"))
    .build(catalog)?;
    let authorized_keys = CreateFile::new("/mnt/etc/dropbear/initramfs/authorized_keys", unlock_keys(keys.expose()))
        .mode(MODE_SECRET)
        .owner(&PasswdEntry::root())
        .into_task()
        .with_dependencies([install]);
    let network = LineInFile::new("/mnt/etc/initramfs-tools/initramfs.conf", ip_line)
        .into_task()
        .with_dependencies([authorized_keys.clone()]);
    let update = ChrootStep::new("chroot-update-initramfs", "update-initramfs -u -k all")
        .after([authorized_keys, network, catalog.get("chroot-zfs")?])
        .done_when(succeeds(in_chroot(INITRAMFS_IS_CURRENT)))
        .build(catalog)?;

    Ok(Task::new("chroot-dropbear-remote-unlocking").with_dependencies([update]))
}

pub(super) fn proxmox(catalog: &Catalog) -> Result<Task> {
    let suite = catalog.config().debian_suite.as_str();
    let Some((_, checksum)) = PROXMOX_RELEASE_KEYS.iter().find(|(name, _)| *name == suite) else {
        bail!("No Proxmox VE release key known for Debian {suite}");
    };
    let script = PROXMOX.replace("{suite}", suite).replace("{checksum}", checksum);
    ChrootStep::new("chroot-proxmox", script)
        .after([catalog.get("chroot-zfs")?])
        .done_when(exists("/mnt/etc/apt/sources.list.d/pve-install-repo.list"))
        .done_when(installed("open-iscsi postfix chrony"))
        .build(catalog)
}

pub(super) fn system_configuration(catalog: &Catalog) -> Result<Task> {
    let steps = [
        "chroot-zfs",
        "chroot-zfs-bpool",
        "chroot-tmpfs",
        "chroot-grub",
        "chroot-passwd-root",
        "chroot-dropbear-remote-unlocking",
    ];
    let dependencies = steps
        .into_iter()
        .map(|step| catalog.get(step))
        .collect::<Result<Vec<_>>>()?;
    Ok(Task::new("debian-4-system-configuration").with_dependencies(dependencies))
}

/// A zfs-list cache that has content and no `/mnt` mountpoints left
pub fn zfs_list_cache_is_final(contents: &str) -> bool {
    !contents.trim().is_empty()
        && !contents
            .split(['\t', '\n'])
            .any(|field| field == TARGET || field.starts_with("/mnt/"))
}

pub(super) fn grub_installation(catalog: &Catalog) -> Result<Task> {
    ChrootStep::new("debian-5-grub-installation", GRUB_INSTALLATION)
        .after([catalog.get("debian-4-system-configuration")?])
        .done_when(exists("/mnt/boot/efi/EFI/debian/grubx64.efi"))
        .done_when(file_matches("/mnt/etc/zfs/zfs-list.cache/bpool", zfs_list_cache_is_final))
        .done_when(file_matches("/mnt/etc/zfs/zfs-list.cache/rpool", zfs_list_cache_is_final))
        .build(catalog)
}

/// Whether `efibootmgr` output has a `debian-N` entry for every mirror disk
pub fn has_mirror_boot_entries(efibootmgr: &str, disks: usize) -> bool {
    (1..disks).all(|index| {
        let label = format!("debian-{index}");
        efibootmgr
            .lines()
            .any(|line| line.split_whitespace().any(|word| word == label))
    })
}

pub(super) fn mirror_grub(catalog: &Catalog) -> Result<Task> {
    let disks: Vec<String> = catalog.disks()?.iter().map(|d| d.path.clone()).collect();
    let count = disks.len();
    let mut done = vec![SkipPredicate::new(move || mirror_boot_entries_exist(count))];
    done.extend(disks.iter().skip(1).map(|disk| has_efi_label(&partition_path(disk, 2))));

    Ok(Task::new("zfs-mirror-grub")
        .with_dependencies([catalog.get("debian-5-grub-installation")?])
        .with_locks(all_disk_locks(catalog.disks()?))
        .with_skip_if_all(done)
        .with_run(move || mirror_efi_partitions(disks)))
}

async fn mirror_boot_entries_exist(disks: usize) -> Result<bool> {
    if disks < 2 {
        return Ok(true);
    }
    let entries = Exec::new("efibootmgr").quiet().stdout().await?;
    Ok(has_mirror_boot_entries(&entries, disks))
}

/// Copy the EFI partition of the first disk to the others and register them
async fn mirror_efi_partitions(disks: Vec<String>) -> Result<String> {
    let Some((first, mirrors)) = disks.split_first() else {
        bail!("No disks configured");
    };
    if mirrors.is_empty() {
        return Ok("Only one disk, nothing to mirror.".to_string());
    }
    let source = partition_path(first, 2);

    if Exec::new("mountpoint").args(["-q", EFI_MOUNT]).quiet().succeeds().await {
        Exec::new("umount").arg(EFI_MOUNT).run().await?;
    }
    for (i, disk) in mirrors.iter().enumerate() {
        Exec::new("dd")
            .arg(format!("if={source}"))
            .arg(format!("of={}", partition_path(disk, 2)))
            .args(["bs=1M", "conv=fsync"])
            .run()
            .await?;
        Exec::new("efibootmgr")
            .args(["-c", "-g", "-d", disk.as_str(), "-p", "2", "-L"])
            .arg(format!("debian-{}", i + 1))
            .args(["-l", GRUB_EFI_LOADER])
            .run()
            .await?;
    }
    in_chroot("mount /boot/efi").run().await?;

    Ok(format!("Copied {source} to {} more disks.", mirrors.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::tests::{catalog, config};
    use taskgraph::{LockKey, Plan};

    fn order(root: &str) -> Vec<String> {
        let catalog = catalog();
        let plan = Plan::build(&[catalog.get(root).unwrap()]).unwrap();
        plan.order().iter().map(|t| t.name().to_string()).collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order
            .iter()
            .position(|n| n == name)
            .unwrap_or_else(|| panic!("{name} not planned"))
    }

    #[test]
    fn test_initramfs_ip_line() {
        assert_eq!(initramfs_ip_line("dhcp").unwrap(), "IP=dhcp");
        assert_eq!(
            initramfs_ip_line("10.0.0.5/24/10.0.0.1").unwrap(),
            "IP=10.0.0.5::10.0.0.1:255.255.255.0"
        );
        assert_eq!(initramfs_ip_line("192.168.7.9/20").unwrap(), "IP=192.168.7.9:::255.255.240.0");
        assert_eq!(
            initramfs_ip_line(" IP=10.0.0.5::10.0.0.1:255.255.255.0:box ").unwrap(),
            "IP=10.0.0.5::10.0.0.1:255.255.255.0:box"
        );
        assert!(initramfs_ip_line("2001:db8::2/64").is_err());
        assert!(initramfs_ip_line("10.0.0.5").is_err());
    }

    #[test]
    fn test_netmask_edges() {
        assert_eq!(netmask(0), Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(netmask(32), Ipv4Addr::new(255, 255, 255, 255));
    }

    #[test]
    fn test_unlock_keys_restrict_every_key() {
        let keys = "ssh-ed25519 AAAA admin@example.com\n\n# old laptop\nssh-rsa BBBB ops@example.com\n";
        assert_eq!(
            unlock_keys(keys),
            "command=\"/usr/bin/zfsunlock\" ssh-ed25519 AAAA admin@example.com\n\
             command=\"/usr/bin/zfsunlock\" ssh-rsa BBBB ops@example.com\n"
        );
    }

    #[test]
    fn test_zfs_list_cache_is_final() {
        assert!(!zfs_list_cache_is_final(""));
        assert!(!zfs_list_cache_is_final("rpool/ROOT/debian\t/mnt\ton\n"));
        assert!(!zfs_list_cache_is_final("bpool/BOOT/debian\t/mnt/boot\ton\n"));
        assert!(zfs_list_cache_is_final("rpool/ROOT/debian\t/\ton\nbpool/BOOT/debian\t/boot\ton\n"));
        assert!(zfs_list_cache_is_final("rpool/home\t/mnt2\ton\n"));
    }

    #[test]
    fn test_mirror_boot_entries() {
        let efibootmgr = "BootCurrent: 0000\nBoot0000* debian\tHD(2,GPT)\nBoot0001* debian-1\tHD(2,GPT)\n";
        assert!(has_mirror_boot_entries(efibootmgr, 1));
        assert!(has_mirror_boot_entries(efibootmgr, 2));
        assert!(!has_mirror_boot_entries(efibootmgr, 3));
        assert!(!has_mirror_boot_entries("Boot0003* debian-10\tHD\n", 2));
    }

    #[test]
    fn test_grub_substeps_run_in_sequence() {
        let order = order("chroot-grub");
        let steps = [
            "chroot-zfs",
            "chroot-grub-install-dosfstools",
            "chroot-grub-mkfs-efi",
            "chroot-grub-mkdir-boot-efi",
            "line-in-file /mnt/etc/fstab",
            "chroot-grub-mount-boot-efi",
            "chroot-grub-install-grub",
            "chroot-grub-install-shim-signed",
            "chroot-grub-remove-os-prober",
            "chroot-grub",
        ];
        let positions: Vec<usize> = steps.iter().map(|step| position(&order, step)).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{order:?}");
    }

    #[test]
    fn test_grub_formats_the_first_disk() {
        let catalog = catalog();
        let plan = Plan::build(&[catalog.get("chroot-grub").unwrap()]).unwrap();
        let mkfs = plan
            .order()
            .iter()
            .find(|t| t.name() == "chroot-grub-mkfs-efi")
            .unwrap();
        let locks = mkfs.locks();
        assert!(locks.contains(&LockKey::Path("/dev/disk/by-id/ata-big".into())));
        assert!(!locks.contains(&LockKey::Path("/mnt/var/lib/apt".into())));

        let install = plan
            .order()
            .iter()
            .find(|t| t.name() == "chroot-grub-install-grub")
            .unwrap();
        assert_eq!(install.locks(), vec![LockKey::Path("/mnt/var/lib/apt".into())]);
    }

    #[test]
    fn test_grub_installation_follows_system_configuration() {
        let order = order("zfs-mirror-grub");
        for step in [
            "chroot-basic-system-environment",
            "chroot-zfs",
            "chroot-zfs-bpool",
            "chroot-tmpfs",
            "chroot-grub",
            "chroot-passwd-root",
            "chroot-dropbear-remote-unlocking",
        ] {
            assert!(
                position(&order, step) < position(&order, "debian-4-system-configuration"),
                "{step}"
            );
        }
        assert!(position(&order, "debian-4-system-configuration") < position(&order, "debian-5-grub-installation"));
        assert!(position(&order, "debian-5-grub-installation") < position(&order, "zfs-mirror-grub"));
        assert!(!order.iter().any(|n| n == "chroot-proxmox"));
    }

    #[test]
    fn test_dropbear_rebuilds_initramfs_after_zfs_and_keys() {
        let order = order("chroot-dropbear-remote-unlocking");
        let update = position(&order, "chroot-update-initramfs");
        assert!(position(&order, "chroot-ssh") < position(&order, "chroot-install-dropbear-initramfs"));
        assert!(position(&order, "create-file /mnt/etc/dropbear/initramfs/authorized_keys") < update);
        assert!(position(&order, "line-in-file /mnt/etc/initramfs-tools/initramfs.conf") < update);
        assert!(position(&order, "chroot-zfs") < update);
    }

    #[test]
    fn test_dropbear_rejects_ipv6_initramfs_address() {
        let mut config = config();
        config.initramfs_ip = Some("2001:db8::2/64".into());
        let catalog = Catalog::new(config, catalog().disks().unwrap().to_vec());
        let error = catalog.get("chroot-dropbear-remote-unlocking").unwrap_err();
        assert!(format!("{error:#}").contains("initramfs-ip"), "{error:#}");
    }

    #[test]
    fn test_proxmox_needs_a_known_release_key() {
        assert!(catalog().get("chroot-proxmox").is_ok());

        let mut config = config();
        config.debian_suite = "trixie".into();
        let catalog = Catalog::new(config, Vec::new());
        let error = catalog.get("chroot-proxmox").unwrap_err();
        assert!(error.to_string().contains("trixie"), "{error}");
    }

    #[test]
    fn test_proxmox_script_is_filled_in() {
        let script = PROXMOX.replace("{suite}", "bookworm");
        assert!(script.contains("pve bookworm pve-no-subscription"));
        assert!(script.contains("proxmox-release-bookworm.gpg"));
        assert!(!script.contains("{suite}"));
    }

    #[test]
    fn test_chroot_steps_are_memoized() {
        let catalog = catalog();
        let plan = Plan::build(&[
            catalog.get("chroot-grub").unwrap(),
            catalog.get("chroot-dropbear-remote-unlocking").unwrap(),
            catalog.get("chroot-proxmox").unwrap(),
        ])
        .unwrap();
        let zfs = catalog.get("chroot-zfs").unwrap();
        assert_eq!(plan.order().iter().filter(|t| **t == zfs).count(), 1);
        let basic = plan
            .order()
            .iter()
            .filter(|t| t.name() == "chroot-basic-system-environment")
            .count();
        assert_eq!(basic, 1);
    }

    #[tokio::test]
    async fn test_cache_predicate_reads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bpool");

        let predicate = file_matches(path.clone(), zfs_list_cache_is_final);
        assert!(!predicate.evaluate().await.unwrap());

        std::fs::write(&path, "bpool/BOOT/debian\t/mnt/boot\ton\n").unwrap();
        assert!(!predicate.evaluate().await.unwrap());

        std::fs::write(&path, "bpool/BOOT/debian\t/boot\ton\n").unwrap();
        assert!(predicate.evaluate().await.unwrap());
    }
}
