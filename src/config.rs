//! Installation settings
//!
//! Settings come from an optional TOML file (`/etc/zfsroot.toml` or
//! `--config`) and from the command line / `ZFSROOT_*` environment, which take
//! precedence. Secrets may be given inline, as a file, or as a URL to fetch.

use crate::cli::SettingsArgs;
use crate::paths;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_IP: &str = "dhcp";
const DEFAULT_DEBIAN_SUITE: &str = "bookworm";
const USER_AGENT: &str = concat!("zfsroot/", env!("CARGO_PKG_VERSION"));

/// Configuration file contents
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub disks: Vec<String>,
    pub hostname: Option<String>,
    pub fqdn: Option<String>,
    pub ip: Option<String>,
    pub initramfs_ip: Option<String>,
    pub debian_suite: Option<String>,
    pub disk_encryption_password: Option<String>,
    pub disk_encryption_password_file: Option<PathBuf>,
    pub disk_encryption_password_url: Option<String>,
    pub root_password: Option<String>,
    pub root_password_file: Option<PathBuf>,
    pub root_password_url: Option<String>,
    pub root_authorized_keys: Option<String>,
    pub root_authorized_keys_file: Option<PathBuf>,
    pub root_authorized_keys_url: Option<String>,
}

impl FileConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid configuration file")
    }

    /// Load `path`; a missing file at the default location is not an error
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        if !explicit && !path.exists() {
            log::debug!("No configuration file at {}", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("In {}", path.display()))
    }
}

/// A value that must not show up in logs
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Where a secret comes from
#[derive(Debug, Default)]
struct SecretSource {
    value: Option<String>,
    file: Option<PathBuf>,
    url: Option<String>,
}

impl SecretSource {
    fn is_set(&self) -> bool {
        self.value.is_some() || self.file.is_some() || self.url.is_some()
    }

    fn or(self, other: Self) -> Self {
        if self.is_set() { self } else { other }
    }

    fn resolve(self, name: &str) -> Result<Option<Secret>> {
        let raw = if let Some(value) = self.value {
            value
        } else if let Some(file) = self.file {
            let file = paths::expand(&file.to_string_lossy());
            fs::read_to_string(&file)
                .with_context(|| format!("Could not read {name} from {}", file.display()))?
        } else if let Some(url) = self.url {
            fetch(&url).with_context(|| format!("Could not fetch {name} from {url}"))?
        } else {
            return Ok(None);
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            bail!("{name} is empty");
        }
        Ok(Some(Secret::new(trimmed)))
    }
}

fn fetch(url: &str) -> Result<String> {
    log::info!("Fetching {url}");
    let mut response = ureq::Agent::new_with_defaults()
        .get(url)
        .header("User-Agent", USER_AGENT)
        .call()
        .context("Request failed")?;
    response
        .body_mut()
        .read_to_string()
        .context("Failed to read response body")
}

/// Resolved installation settings
#[derive(Debug, Clone)]
pub struct Config {
    pub disks: Vec<String>,
    pub hostname: Option<String>,
    pub fqdn: Option<String>,
    pub ip: String,
    /// Address used by the initramfs for remote unlocking [default: `ip`]
    pub initramfs_ip: Option<String>,
    pub debian_suite: String,
    pub disk_encryption_password: Option<Secret>,
    pub root_password: Option<Secret>,
    pub root_authorized_keys: Option<Secret>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            disks: Vec::new(),
            hostname: None,
            fqdn: None,
            ip: DEFAULT_IP.to_string(),
            initramfs_ip: None,
            debian_suite: DEFAULT_DEBIAN_SUITE.to_string(),
            disk_encryption_password: None,
            root_password: None,
            root_authorized_keys: None,
        }
    }
}

impl Config {
    /// Load the configuration file and apply command line settings on top
    pub fn load(cli: &SettingsArgs) -> Result<Self> {
        let (path, explicit) = match &cli.config {
            Some(path) => (path.clone(), true),
            None => (paths::config_file(), std::env::var_os(paths::ENV_CONFIG).is_some()),
        };
        let file = FileConfig::load(&path, explicit)?;
        Self::merge(cli.clone(), file)
    }

    /// Combine both sources; command line values win field by field
    pub fn merge(cli: SettingsArgs, file: FileConfig) -> Result<Self> {
        let disks = if cli.disks.is_empty() { file.disks } else { cli.disks };
        let fqdn = non_empty(cli.fqdn.or(file.fqdn));
        let hostname = non_empty(cli.hostname.or(file.hostname))
            .or_else(|| fqdn.as_deref().and_then(first_label));

        let disk_encryption_password = SecretSource {
            value: cli.disk_encryption_password,
            file: cli.disk_encryption_password_file,
            url: cli.disk_encryption_password_url,
        }
        .or(SecretSource {
            value: file.disk_encryption_password,
            file: file.disk_encryption_password_file,
            url: file.disk_encryption_password_url,
        })
        .resolve("disk-encryption-password")?;

        let root_password = SecretSource {
            value: cli.root_password,
            file: cli.root_password_file,
            url: cli.root_password_url,
        }
        .or(SecretSource {
            value: file.root_password,
            file: file.root_password_file,
            url: file.root_password_url,
        })
        .resolve("root-password")?;

        let root_authorized_keys = SecretSource {
            value: cli.root_authorized_keys,
            file: cli.root_authorized_keys_file,
            url: cli.root_authorized_keys_url,
        }
        .or(SecretSource {
            value: file.root_authorized_keys,
            file: file.root_authorized_keys_file,
            url: file.root_authorized_keys_url,
        })
        .resolve("root-authorized-keys")?;

        Ok(Self {
            disks,
            hostname,
            fqdn,
            ip: non_empty(cli.ip.or(file.ip)).unwrap_or_else(|| DEFAULT_IP.to_string()),
            initramfs_ip: non_empty(cli.initramfs_ip.or(file.initramfs_ip)),
            debian_suite: non_empty(cli.debian_suite.or(file.debian_suite))
                .unwrap_or_else(|| DEFAULT_DEBIAN_SUITE.to_string()),
            disk_encryption_password,
            root_password,
            root_authorized_keys,
        })
    }

    pub fn require_disks(&self) -> Result<&[String]> {
        if self.disks.is_empty() {
            bail!(missing("disks"));
        }
        Ok(&self.disks)
    }

    pub fn require_hostname(&self) -> Result<&str> {
        self.hostname.as_deref().with_context(|| missing("hostname"))
    }

    pub fn require_disk_encryption_password(&self) -> Result<&Secret> {
        self.disk_encryption_password
            .as_ref()
            .with_context(|| missing("disk-encryption-password"))
    }

    pub fn require_root_password(&self) -> Result<&Secret> {
        self.root_password.as_ref().with_context(|| missing("root-password"))
    }

    pub fn require_root_authorized_keys(&self) -> Result<&Secret> {
        self.root_authorized_keys
            .as_ref()
            .with_context(|| missing("root-authorized-keys"))
    }

    /// Names for the `127.0.1.1` line in `/etc/hosts`
    pub fn hostnames(&self) -> String {
        [self.fqdn.as_deref(), self.hostname.as_deref()]
            .into_iter()
            .flatten()
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn missing(option: &str) -> String {
    let env = option.to_uppercase().replace('-', "_");
    format!("Missing setting: pass --{option}, set ZFSROOT_{env}, or add `{option}` to the configuration file")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn first_label(fqdn: &str) -> Option<String> {
    fqdn.split('.').next().filter(|label| !label.is_empty()).map(str::to_string)
}
