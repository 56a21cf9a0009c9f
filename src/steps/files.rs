//! File steps
//!
//! Both kinds lock the file they touch and are skipped when the file already
//! has the wanted content.

use crate::os::user::PasswdEntry;
use crate::paths::file_lock;
use anyhow::{Context, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use taskgraph::Task;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const MODE_SECRET: u32 = 0o600;

/// Write a file with exact contents
#[derive(Debug, Clone)]
pub struct CreateFile {
    name: Option<String>,
    path: PathBuf,
    contents: String,
    backup: bool,
    mode: Option<u32>,
    owner: Option<PasswdEntry>,
}

impl CreateFile {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Self {
            name: None,
            path: path.into(),
            contents: contents.into(),
            backup: false,
            mode: None,
            owner: None,
        }
    }

    /// Task name to use instead of `create-file <path>`
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Move differing existing content to `<path>.<millis>.backup` first
    pub fn backup(mut self) -> Self {
        self.backup = true;
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn owner(mut self, owner: &PasswdEntry) -> Self {
        self.owner = Some(owner.clone());
        self
    }

    pub fn into_task(self) -> Task {
        let check = self.clone();
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("create-file {}", self.path.display()));
        Task::new(name)
            .with_locks([file_lock(&self.path)])
            .with_skip_if(move || {
                let check = check.clone();
                async move { Ok(check.is_current().await) }
            })
            .with_run(move || async move { self.write().await })
    }

    async fn is_current(&self) -> bool {
        let Ok(existing) = fs::read_to_string(&self.path).await else {
            return false;
        };
        if existing != self.contents {
            return false;
        }
        match self.mode {
            Some(mode) => fs::metadata(&self.path)
                .await
                .is_ok_and(|meta| meta.permissions().mode() & 0o7777 == mode),
            None => true,
        }
    }

    async fn write(&self) -> Result<String> {
        let path = &self.path;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let backup = if self.backup {
            self.backup_existing().await?
        } else {
            None
        };

        fs::write(path, &self.contents)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if let Some(mode) = self.mode {
            fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
                .await
                .with_context(|| format!("Failed to set mode {mode:o} on {}", path.display()))?;
        }
        if let Some(owner) = &self.owner {
            chown(path, owner)?;
        }

        let mut message = format!("Created file {}.", path.display());
        if let Some(backup) = backup {
            message.push_str(&format!("\nBacked up previous file to {}", backup.display()));
        }
        Ok(message)
    }

    async fn backup_existing(&self) -> Result<Option<PathBuf>> {
        let Ok(existing) = fs::read_to_string(&self.path).await else {
            return Ok(None);
        };
        if existing == self.contents {
            return Ok(None);
        }
        let backup = backup_path(&self.path, chrono::Utc::now().timestamp_millis());
        fs::rename(&self.path, &backup)
            .await
            .with_context(|| format!("Failed to back up {}", self.path.display()))?;
        log::info!("Backed up {} to {}", self.path.display(), backup.display());
        Ok(Some(backup))
    }
}

fn backup_path(path: &Path, millis: i64) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{millis}.backup"));
    PathBuf::from(name)
}

fn chown(path: &Path, owner: &PasswdEntry) -> Result<()> {
    std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid))
        .with_context(|| format!("Failed to chown {} to {}", path.display(), owner.username))
}

/// Ensure a file contains a line, appending it when missing
#[derive(Debug, Clone)]
pub struct LineInFile {
    path: PathBuf,
    line: String,
}

impl LineInFile {
    pub fn new(path: impl Into<PathBuf>, line: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line: line.into(),
        }
    }

    pub fn into_task(self) -> Task {
        let check = self.clone();
        Task::new(format!("line-in-file {}", self.path.display()))
            .with_locks([file_lock(&self.path)])
            .with_skip_if(move || {
                let check = check.clone();
                async move { Ok(check.is_present().await) }
            })
            .with_run(move || async move { self.append().await })
    }

    async fn is_present(&self) -> bool {
        fs::read_to_string(&self.path)
            .await
            .is_ok_and(|content| content.lines().any(|l| l == self.line))
    }

    async fn append(&self) -> Result<String> {
        let existing = fs::read_to_string(&self.path).await.unwrap_or_default();
        let mut addition = String::new();
        if !existing.is_empty() && !existing.ends_with('\n') {
            addition.push('\n');
        }
        addition.push_str(&self.line);
        addition.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(addition.as_bytes())
            .await
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        file.flush().await?;
        Ok(format!("Line ensured in file {}.", self.path.display()))
    }
}
