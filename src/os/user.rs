//! User accounts
//!
//! The installer runs as root through `sudo`. `SUDO_USER` names the account
//! that invoked it, which is the target user for per-user configuration.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use tokio::process::Command;
use tokio::sync::OnceCell;

const SUDO_USER: &str = "SUDO_USER";

/// One line of `/etc/passwd`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

impl PasswdEntry {
    pub fn root() -> Self {
        Self {
            username: "root".into(),
            uid: 0,
            gid: 0,
            home: PathBuf::from("/root"),
        }
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }

    /// Parse `name:password:uid:gid:gecos:home:shell`
    pub fn parse_line(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 7 {
            return None;
        }
        Some(Self {
            username: fields[0].to_string(),
            uid: fields[2].parse().ok()?,
            gid: fields[3].parse().ok()?,
            home: PathBuf::from(fields[5]),
        })
    }
}

/// Parse passwd content, sorted by uid; malformed lines are skipped
pub fn parse_passwd(content: &str) -> Vec<PasswdEntry> {
    let mut entries: Vec<PasswdEntry> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(PasswdEntry::parse_line)
        .collect();
    entries.sort_by_key(|entry| entry.uid);
    entries
}

/// All accounts known to the system, looked up once
pub async fn users() -> Result<&'static [PasswdEntry]> {
    static USERS: OnceCell<Vec<PasswdEntry>> = OnceCell::const_new();
    USERS.get_or_try_init(load_users).await.map(Vec::as_slice)
}

// Not routed through `Exec`, which itself asks for the target user.
async fn load_users() -> Result<Vec<PasswdEntry>> {
    let output = Command::new("getent")
        .arg("passwd")
        .output()
        .await
        .context("Failed to run getent passwd")?;
    if !output.status.success() {
        bail!("getent passwd exited with {}", output.status);
    }
    Ok(parse_passwd(&String::from_utf8_lossy(&output.stdout)))
}

/// The account that invoked the installer through `sudo`
pub async fn target_user() -> Result<PasswdEntry> {
    let Ok(name) = std::env::var(SUDO_USER) else {
        bail!("No target user found. Log in as the target user, then use sudo.");
    };
    find_user(users().await?, &name)
        .cloned()
        .with_context(|| format!("Could not find requested {SUDO_USER} \"{name}\""))
}

fn find_user<'a>(users: &'a [PasswdEntry], name: &str) -> Option<&'a PasswdEntry> {
    users.iter().find(|user| user.username == name)
}

/// Session bus of the target user, when running as root on their behalf
pub async fn session_bus_address() -> Option<String> {
    if !is_running_as_root() {
        return None;
    }
    let user = target_user().await.ok()?;
    Some(format!("unix:path=/run/user/{}/bus", user.uid))
}

pub fn is_running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}
