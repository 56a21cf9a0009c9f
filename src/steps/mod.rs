//! Catalog of provisioning steps
//!
//! Steps are built on demand from their names. Every step, package and file
//! is built once per catalog, so a step requested directly and reached as a
//! dependency is the same task node and runs once.

mod chroot;
mod desktop;
mod disk;
mod files;
mod packages;
mod system;

use crate::config::Config;
use crate::os::disks::Disk;
use anyhow::{Result, bail};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, PoisonError};
use taskgraph::Task;

static PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9+.-]+$").unwrap());

/// Step names and descriptions, in rough installation order
pub const STEPS: &[(&str, &str)] = &[
    ("apt-sources-list", "Write /etc/apt/sources.list for the live system"),
    ("refresh-os-packages", "Refresh the list of OS packages"),
    ("upgrade-os-packages", "Upgrade all installed OS packages"),
    ("prepare-install-env", "Install debootstrap, gdisk and ZFS tools"),
    ("zfs-partition-2-efi", "Create the EFI partition on every disk"),
    ("zfs-partition-3-boot", "Create the boot pool partition on every disk"),
    ("zfs-partition-4-root", "Create equally sized root pool partitions"),
    ("zfs-partitions", "Create all partitions"),
    ("zfs-boot-pool", "Create the boot pool (bpool)"),
    ("zfs-root-pool", "Create the encrypted root pool (rpool)"),
    ("disk-formatting", "Partition disks and create both pools"),
    ("destroy-all-pools-and-disks", "Destroy every pool and wipe the configured disks"),
    ("debian", "Prepare the install environment and format disks"),
    ("zfs-datasets", "Create and mount the root and boot datasets"),
    ("debootstrap", "Install a minimal Debian into /mnt"),
    ("system-installation", "Install the base system"),
    ("hostname", "Set the host name of the installed system"),
    ("network-interface", "Configure the default network device"),
    ("apt-sources-list-mnt", "Write apt sources for the installed system"),
    ("chroot-mount", "Bind mount /dev, /proc and /sys into /mnt"),
    ("chroot-passwd-root", "Set the root password of the installed system"),
    ("chroot-ssh", "Install OpenSSH and root's authorized keys"),
    ("chroot-basic-system-environment", "Set up locales, keyboard and console in /mnt"),
    ("chroot-zfs", "Install the kernel and ZFS initramfs support in /mnt"),
    ("chroot-zfs-bpool", "Import the boot pool at boot"),
    ("chroot-tmpfs", "Mount /tmp as tmpfs"),
    ("chroot-grub", "Format and mount the EFI partition, install GRUB"),
    ("chroot-dropbear-remote-unlocking", "Unlock the root pool over SSH from the initramfs"),
    ("chroot-proxmox", "Add the Proxmox VE repository and preload its packages"),
    ("debian-4-system-configuration", "Configure the installed system"),
    ("debian-5-grub-installation", "Install GRUB and finalize the ZFS mount cache"),
    ("zfs-mirror-grub", "Copy the EFI partition to the other disks"),
    ("reboot-instructions", "Show what to do after rebooting"),
    ("zfs-umount", "Unmount /mnt and export the boot pool; run last"),
    ("vim", "Install vim and make it the default editor"),
    ("gsettings", "Disable automount and sleep on AC for the invoking user"),
    ("null-command", "Do nothing"),
];

/// Builds and memoizes step tasks
pub struct Catalog {
    config: Config,
    disks: Vec<Disk>,
    shared: Mutex<HashMap<String, Task>>,
}

impl Catalog {
    pub fn new(config: Config, disks: Vec<Disk>) -> Self {
        Self {
            config,
            disks,
            shared: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Target disks; fails when none are configured
    pub fn disks(&self) -> Result<&[Disk]> {
        self.config.require_disks()?;
        if self.disks.is_empty() {
            bail!("Disks were configured but not discovered");
        }
        Ok(&self.disks)
    }

    /// The task for a step name, or an OS package install for unknown names
    pub fn get(&self, name: &str) -> Result<Task> {
        self.shared(name, || match name {
            "apt-sources-list" => Ok(packages::apt_sources_list(self)),
            "refresh-os-packages" => packages::refresh_os_packages(self),
            "upgrade-os-packages" => packages::upgrade_os_packages(self),
            "vim" => packages::vim(self),
            "prepare-install-env" => system::prepare_install_env(self),
            "zfs-partition-2-efi" => disk::efi_partitions(self),
            "zfs-partition-3-boot" => disk::boot_partitions(self),
            "zfs-partition-4-root" => disk::root_partitions(self),
            "zfs-partitions" => disk::partitions(self),
            "zfs-boot-pool" => disk::boot_pool(self),
            "zfs-root-pool" => disk::root_pool(self),
            "disk-formatting" => disk::disk_formatting(self),
            "destroy-all-pools-and-disks" => disk::destroy_all_pools_and_disks(self),
            "debian" => system::debian(self),
            "zfs-datasets" => system::datasets(self),
            "debootstrap" => system::debootstrap(self),
            "system-installation" => system::system_installation(self),
            "hostname" => system::hostname(self),
            "network-interface" => system::network_interface(self),
            "apt-sources-list-mnt" => system::apt_sources_list_mnt(self),
            "chroot-mount" => system::chroot_mount(self),
            "chroot-passwd-root" => system::chroot_passwd_root(self),
            "chroot-ssh" => system::chroot_ssh(self),
            "chroot-basic-system-environment" => chroot::basic_system_environment(self),
            "chroot-zfs" => chroot::zfs(self),
            "chroot-zfs-bpool" => chroot::zfs_bpool(self),
            "chroot-tmpfs" => chroot::tmpfs(self),
            "chroot-grub" => chroot::grub(self),
            "chroot-dropbear-remote-unlocking" => chroot::dropbear_remote_unlocking(self),
            "chroot-proxmox" => chroot::proxmox(self),
            "debian-4-system-configuration" => chroot::system_configuration(self),
            "debian-5-grub-installation" => chroot::grub_installation(self),
            "zfs-mirror-grub" => chroot::mirror_grub(self),
            "gsettings" => desktop::gsettings(self),
            "reboot-instructions" => Ok(system::reboot_instructions()),
            "zfs-umount" => Ok(system::zfs_umount()),
            "null-command" => Ok(Task::new("null-command")),
            package => self.os_package(package),
        })
    }

    /// Install an OS package on the live system
    pub fn os_package(&self, package: &str) -> Result<Task> {
        if !PACKAGE_RE.is_match(package) {
            bail!("Unknown step \"{package}\" (not a valid OS package name either)");
        }
        self.shared(&format!("install-os-package {package}"), || {
            packages::install_os_package(self, package)
        })
    }

    /// Return the memoized task for `key`, building it on first use
    ///
    /// The map is not locked while building, so builders may request other
    /// shared tasks.
    pub(crate) fn shared(&self, key: &str, build: impl FnOnce() -> Result<Task>) -> Result<Task> {
        if let Some(task) = self.lookup(key) {
            return Ok(task);
        }
        let task = build()?;
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(shared.entry(key.to_string()).or_insert(task).clone())
    }

    fn lookup(&self, key: &str) -> Option<Task> {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cli::SettingsArgs;
    use crate::config::FileConfig;
    use taskgraph::Plan;

    pub(crate) fn config() -> Config {
        let cli = SettingsArgs {
            disks: vec!["/dev/sda".into(), "/dev/sdb".into()],
            fqdn: Some("box.example.com".into()),
            disk_encryption_password: Some("passphrase".into()),
            root_password: Some("root".into()),
            root_authorized_keys: Some("ssh-ed25519 AAAA admin@example.com".into()),
            ..Default::default()
        };
        Config::merge(cli, FileConfig::default()).unwrap()
    }

    pub(crate) fn catalog() -> Catalog {
        let disks = vec![
            Disk {
                path: "/dev/disk/by-id/ata-big".into(),
                size: 2_000_000_000_000,
            },
            Disk {
                path: "/dev/disk/by-id/ata-small".into(),
                size: 1_000_000_000_000,
            },
        ];
        Catalog::new(config(), disks)
    }

    fn names(plan: &Plan) -> Vec<&str> {
        plan.order().iter().map(Task::name).collect()
    }

    #[test]
    fn test_every_listed_step_plans() {
        let catalog = catalog();
        for (name, _) in STEPS {
            let task = catalog.get(name).unwrap_or_else(|e| panic!("{name}: {e:#}"));
            assert_eq!(task.name(), *name);
            Plan::build(&[task]).unwrap_or_else(|e| panic!("{name}: {e}"));
        }
    }

    #[test]
    fn test_steps_are_memoized() {
        let catalog = catalog();
        let a = catalog.get("zfs-boot-pool").unwrap();
        let b = catalog.get("zfs-boot-pool").unwrap();
        assert_eq!(a, b);

        let refresh = catalog.get("refresh-os-packages").unwrap();
        let plan = Plan::build(&[catalog.get("prepare-install-env").unwrap(), catalog.get("vim").unwrap()]).unwrap();
        let refreshes = plan.order().iter().filter(|t| **t == refresh).count();
        assert_eq!(refreshes, 1);
    }

    #[test]
    fn test_unknown_names_are_packages() {
        let catalog = catalog();
        let task = catalog.get("htop").unwrap();
        assert_eq!(task.name(), "install-os-package htop");
        assert_eq!(task, catalog.os_package("htop").unwrap());

        let plan = Plan::build(&[task]).unwrap();
        assert_eq!(
            names(&plan),
            vec!["apt-sources-list", "refresh-os-packages", "install-os-package htop"]
        );
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let catalog = catalog();
        assert!(catalog.get("Not A Package").is_err());
        assert!(catalog.get("rm -rf /").is_err());
        assert!(catalog.get("x").is_err());
    }

    #[test]
    fn test_disk_steps_need_disks() {
        let catalog = Catalog::new(Config::default(), Vec::new());
        let error = catalog.get("zfs-boot-pool").unwrap_err();
        assert!(error.to_string().contains("--disks"), "{error}");
        assert!(catalog.get("vim").is_ok());
    }
}
