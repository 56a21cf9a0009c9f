//! GNOME settings of the user who invoked the installer

use super::Catalog;
use crate::exec::Exec;
use crate::os::user::{PasswdEntry, target_user};
use anyhow::Result;
use taskgraph::Task;

/// `(schema, key, value)`
const SETTINGS: &[(&str, &str, &str)] = &[
    ("org.gnome.desktop.media-handling", "automount", "false"),
    ("org.gnome.settings-daemon.plugins.power", "sleep-inactive-ac-type", "nothing"),
];

pub(super) fn gsettings(catalog: &Catalog) -> Result<Task> {
    let tools = [catalog.os_package("libglib2.0-bin")?, catalog.os_package("gnome-shell")?];
    let settings: Vec<Task> = SETTINGS
        .iter()
        .map(|&(schema, key, value)| {
            Task::new(format!("gsettings {schema} {key}"))
                .with_dependencies(tools.clone())
                .with_skip_if(move || is_set(schema, key, value))
                .with_run(move || set(schema, key, value))
        })
        .collect();
    Ok(Task::new("gsettings").with_dependencies(settings))
}

/// `gsettings` as `user`, on their session bus
fn gsettings_as(user: &PasswdEntry) -> Exec {
    Exec::new("gsettings")
        .as_user(user)
        .env("DBUS_SESSION_BUS_ADDRESS", format!("unix:path=/run/user/{}/bus", user.uid))
}

/// Compare `gsettings get` output, which quotes strings, with a plain value
pub fn same_value(current: &str, wanted: &str) -> bool {
    current.trim().trim_matches('\'') == wanted
}

async fn is_set(schema: &'static str, key: &'static str, value: &'static str) -> Result<bool> {
    let user = target_user().await?;
    let current = gsettings_as(&user).args(["get", schema, key]).quiet().stdout().await?;
    Ok(same_value(&current, value))
}

async fn set(schema: &'static str, key: &'static str, value: &'static str) -> Result<String> {
    let user = target_user().await?;
    gsettings_as(&user).args(["set", schema, key, value]).run().await?;
    Ok(format!("Set {schema} {key} to {value} for {}.", user.username))
}
