//! Path handling for zfsroot
//!
//! File steps lock the files they touch. Lock keys must be canonical so two
//! steps naming the same file through different spellings (`~/x`, `/root/x`,
//! `/root/./x`) contend for the same lock.
//!
//! ## Environment Variables
//!
//! - `ZFSROOT_CONFIG`: Override the configuration file location

use crate::os::user::PasswdEntry;
use anyhow::{Result, bail};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use taskgraph::Lock;

/// Environment variable for the configuration file location
pub const ENV_CONFIG: &str = "ZFSROOT_CONFIG";

const DEFAULT_CONFIG: &str = "/etc/zfsroot.toml";

/// Configuration file location
///
/// Resolution order:
/// 1. `$ZFSROOT_CONFIG` (if set)
/// 2. `/etc/zfsroot.toml`
pub fn config_file() -> PathBuf {
    std::env::var(ENV_CONFIG).map_or_else(|_| PathBuf::from(DEFAULT_CONFIG), |p| expand(&p))
}

/// Expand ~ and environment variables in a path string.
///
/// Unknown variables are left as written.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Resolve `path` as seen by `user`
///
/// `~` and `~/x` expand against the user's home, relative paths are taken
/// relative to the home, and `.`/`..` are removed lexically.
pub fn resolve_path(user: &PasswdEntry, path: &str) -> Result<PathBuf> {
    if path.trim().is_empty() {
        bail!("Empty path");
    }
    let home = user.home.to_string_lossy();
    let expanded = shellexpand::tilde_with_context(path, || Some(home.as_ref()));
    Ok(normalize(&user.home.join(expanded.as_ref())))
}

/// Lock guarding the file at `path`, as seen by root
pub fn file_lock(path: &Path) -> Arc<Lock> {
    let key = resolve_path(&PasswdEntry::root(), &path.to_string_lossy()).unwrap_or_else(|_| path.to_path_buf());
    Lock::path(key)
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

// ============================================================================
// Tests
// ============================================================================
