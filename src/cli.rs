use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "zfsroot")]
#[command(version)]
#[command(about = "Idempotent installer for Debian on an encrypted ZFS root", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Do not ask for confirmation before starting
    #[arg(short, long, global = true, env = "ZFSROOT_NON_INTERACTIVE")]
    pub yes: bool,

    #[command(flatten)]
    pub settings: SettingsArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Plan, confirm and execute steps
    Run(StepsArgs),

    /// Show the execution order of steps without running anything
    Plan(StepsArgs),

    /// List available steps
    List,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
pub struct StepsArgs {
    /// Steps to run; unknown names are installed as OS packages
    #[arg(required = true, num_args = 1..)]
    pub steps: Vec<String>,

    /// Run requested steps one after another instead of concurrently
    #[arg(long)]
    pub sequential: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

// ============================================================================
// Settings
// ============================================================================

/// Installation settings; these override the configuration file
#[derive(Args, Debug, Clone, Default)]
#[command(next_help_heading = "Settings")]
pub struct SettingsArgs {
    /// Configuration file [default: /etc/zfsroot.toml]
    #[arg(long, global = true, env = "ZFSROOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disks to install on (comma-separated), e.g. /dev/sda,/dev/sdb
    #[arg(long, global = true, env = "ZFSROOT_DISKS", value_delimiter = ',')]
    pub disks: Vec<String>,

    /// Short host name [default: first label of --fqdn]
    #[arg(long, global = true, env = "ZFSROOT_HOSTNAME")]
    pub hostname: Option<String>,

    /// Fully qualified domain name
    #[arg(long, global = true, env = "ZFSROOT_FQDN")]
    pub fqdn: Option<String>,

    /// Address of the installed system: dhcp, ADDR/PREFIX or ADDR/PREFIX/GATEWAY [default: dhcp]
    #[arg(long, global = true, env = "ZFSROOT_IP")]
    pub ip: Option<String>,

    /// Address for remote unlocking in the initramfs: an `IP=` line, dhcp or ADDR/PREFIX[/GATEWAY] [default: --ip]
    #[arg(long, global = true, env = "ZFSROOT_INITRAMFS_IP")]
    pub initramfs_ip: Option<String>,

    /// Debian release to install [default: bookworm]
    #[arg(long, global = true, env = "ZFSROOT_DEBIAN_SUITE")]
    pub debian_suite: Option<String>,

    /// Passphrase for the encrypted root pool
    #[arg(long, global = true, env = "ZFSROOT_DISK_ENCRYPTION_PASSWORD", hide_env_values = true)]
    pub disk_encryption_password: Option<String>,

    /// Read the root pool passphrase from a file
    #[arg(long, global = true, env = "ZFSROOT_DISK_ENCRYPTION_PASSWORD_FILE")]
    pub disk_encryption_password_file: Option<PathBuf>,

    /// Fetch the root pool passphrase from a URL
    #[arg(long, global = true, env = "ZFSROOT_DISK_ENCRYPTION_PASSWORD_URL")]
    pub disk_encryption_password_url: Option<String>,

    /// Password for root on the installed system
    #[arg(long, global = true, env = "ZFSROOT_ROOT_PASSWORD", hide_env_values = true)]
    pub root_password: Option<String>,

    /// Read the root password from a file
    #[arg(long, global = true, env = "ZFSROOT_ROOT_PASSWORD_FILE")]
    pub root_password_file: Option<PathBuf>,

    /// Fetch the root password from a URL
    #[arg(long, global = true, env = "ZFSROOT_ROOT_PASSWORD_URL")]
    pub root_password_url: Option<String>,

    /// SSH public keys allowed to log in as root
    #[arg(long, global = true, env = "ZFSROOT_ROOT_AUTHORIZED_KEYS")]
    pub root_authorized_keys: Option<String>,

    /// Read root's authorized keys from a file
    #[arg(long, global = true, env = "ZFSROOT_ROOT_AUTHORIZED_KEYS_FILE")]
    pub root_authorized_keys_file: Option<PathBuf>,

    /// Fetch root's authorized keys from a URL, e.g. https://github.com/<user>.keys
    #[arg(long, global = true, env = "ZFSROOT_ROOT_AUTHORIZED_KEYS_URL")]
    pub root_authorized_keys_url: Option<String>,
}
