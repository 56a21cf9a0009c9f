//! OS package steps
//!
//! Everything that touches the dpkg database holds the `package-database`
//! lock, so apt runs never overlap.

use super::Catalog;
use super::files::{CreateFile, LineInFile};
use crate::exec::Exec;
use anyhow::Result;
use std::sync::Arc;
use taskgraph::{Lock, Task};

const SOURCES_LIST: &str = include_str!("templates/sources.list");

pub(super) fn package_database() -> Arc<Lock> {
    Lock::named("package-database")
}

/// apt sources for `suite`
pub(super) fn sources_list(suite: &str) -> String {
    SOURCES_LIST.replace("{suite}", suite)
}

pub(super) fn apt_sources_list(catalog: &Catalog) -> Task {
    CreateFile::new("/etc/apt/sources.list", sources_list(&catalog.config().debian_suite))
        .named("apt-sources-list")
        .backup()
        .into_task()
}

pub(super) fn refresh_os_packages(catalog: &Catalog) -> Result<Task> {
    Ok(Task::new("refresh-os-packages")
        .with_dependencies([catalog.get("apt-sources-list")?])
        .with_locks([package_database()])
        .with_run(refresh))
}

async fn refresh() -> Result<&'static str> {
    Exec::new("apt").arg("update").run().await?;
    Ok("Refreshed list of OS packages.")
}

pub(super) fn upgrade_os_packages(catalog: &Catalog) -> Result<Task> {
    Ok(Task::new("upgrade-os-packages")
        .with_dependencies([catalog.get("refresh-os-packages")?])
        .with_locks([package_database()])
        .with_run(upgrade))
}

async fn upgrade() -> Result<&'static str> {
    Exec::new("apt-get")
        .args(["full-upgrade", "-y", "--purge", "--auto-remove"])
        .run()
        .await?;
    Ok("Upgraded OS packages.")
}

pub(super) fn install_os_package(catalog: &Catalog, package: &str) -> Result<Task> {
    let check = package.to_string();
    let package = package.to_string();
    Ok(Task::new(format!("install-os-package {package}"))
        .with_dependencies([catalog.get("refresh-os-packages")?])
        .with_locks([package_database()])
        .with_skip_if(move || is_installed(check.clone()))
        .with_run(move || install(package)))
}

async fn is_installed(package: String) -> Result<bool> {
    Ok(Exec::new("dpkg")
        .args(["--status", package.as_str()])
        .quiet()
        .succeeds()
        .await)
}

async fn install(package: String) -> Result<String> {
    Exec::new("apt-get")
        .args(["install", "-y", package.as_str()])
        .run()
        .await?;
    Ok(format!("Installed OS package {package}."))
}

pub(super) fn vim(catalog: &Catalog) -> Result<Task> {
    Ok(Task::new("vim").with_dependencies([
        catalog.os_package("vim")?,
        LineInFile::new("/etc/environment", "EDITOR=vim").into_task(),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::tests::catalog;
    use taskgraph::LockKey;

    #[test]
    fn test_sources_list_uses_suite() {
        let sources = sources_list("trixie");
        assert!(sources.contains("deb http://deb.debian.org/debian trixie main contrib non-free-firmware"));
        assert!(sources.contains("trixie-security"));
        assert!(sources.contains("trixie-updates"));
        assert!(!sources.contains("{suite}"));
    }

    #[test]
    fn test_package_steps_share_the_database_lock() {
        let catalog = catalog();
        let expected = vec![LockKey::Name("package-database".into())];
        for task in [
            catalog.get("refresh-os-packages").unwrap(),
            catalog.get("upgrade-os-packages").unwrap(),
            catalog.os_package("gdisk").unwrap(),
        ] {
            assert_eq!(task.locks(), expected, "{task}");
        }
    }

    #[test]
    fn test_install_depends_on_refresh() {
        let catalog = catalog();
        let refresh = catalog.get("refresh-os-packages").unwrap();
        let install = catalog.os_package("zfsutils-linux").unwrap();
        assert_eq!(install.dependencies(), vec![refresh]);
    }
}
