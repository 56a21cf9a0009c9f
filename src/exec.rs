//! Process invocation
//!
//! Every external command the installer runs goes through [`Exec`]. Commands
//! run as root by default; [`Exec::as_user`] switches to another account via
//! `sudo`. Failures carry the command line, exit code and captured output so
//! they can be shown verbatim in the run summary.

use crate::os::user::{self, PasswdEntry};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const PRESERVED_ENV: &str = "DBUS_SESSION_BUS_ADDRESS,XAUTHORITY,DISPLAY,DEBIAN_FRONTEND";

/// Errors from running an external command
#[derive(Debug, Error)]
pub enum ExecError {
    /// The process could not be started or talked to
    #[error("could not run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited unsuccessfully
    #[error("{}", render_failure(.command, .code, .stdout, .stderr))]
    Failed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

fn render_failure(command: &str, code: &Option<i32>, stdout: &str, stderr: &str) -> String {
    let mut message = match code {
        Some(code) => format!("`{command}` exited with code {code}"),
        None => format!("`{command}` was killed by a signal"),
    };
    for (label, output) in [("stdout", stdout), ("stderr", stderr)] {
        let output = output.trim();
        if !output.is_empty() {
            let _ = write!(message, "\n{label}:\n{output}");
        }
    }
    message
}

/// Captured result of a successful command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Builder for an external command
#[derive(Debug, Clone)]
pub struct Exec {
    program: String,
    args: Vec<String>,
    user: Option<PasswdEntry>,
    env: Vec<(String, String)>,
    stdin: Option<String>,
    cwd: Option<PathBuf>,
    quiet: bool,
}

impl Exec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            user: None,
            env: Vec::new(),
            stdin: None,
            cwd: None,
            quiet: false,
        }
    }

    /// Run a bash script with `-euo pipefail`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("bash").args(["-euo", "pipefail", "-c"]).arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run as `user` instead of root
    pub fn as_user(mut self, user: &PasswdEntry) -> Self {
        self.user = (!user.is_root()).then(|| user.clone());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Text piped to the command's standard input
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Log at trace level instead of debug (for state checks)
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// The argv actually spawned, including any `sudo` prefix
    pub fn effective_command(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 6);
        if let Some(user) = &self.user {
            argv.extend([
                "sudo".to_string(),
                format!("--preserve-env={PRESERVED_ENV}"),
                format!("--user={}", user.username),
                "--non-interactive".to_string(),
                "--".to_string(),
            ]);
        }
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Shell-like rendering of the command for logs and errors
    pub fn display(&self) -> String {
        self.effective_command()
            .iter()
            .map(|arg| quote(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion, failing on a non-zero exit
    pub async fn run(&self) -> Result<CommandOutput, ExecError> {
        let command = self.display();
        if self.quiet {
            log::trace!("$ {command}");
        } else {
            log::debug!("$ {command}");
        }

        let argv = self.effective_command();
        let Some((program, args)) = argv.split_first() else {
            return Err(ExecError::Io {
                command,
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            });
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.user.is_none()
            && let Some(address) = user::session_bus_address().await
        {
            cmd.env("DBUS_SESSION_BUS_ADDRESS", address);
        }
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let io_error = |source| ExecError::Io {
            command: command.clone(),
            source,
        };

        let mut child = cmd.spawn().map_err(io_error)?;
        let pipe = child.stdin.take();
        let input = self.stdin.as_deref().unwrap_or_default();
        // Stdin is fed while stdout and stderr drain, so a child that echoes
        // large input cannot fill its output pipe and stall the writer.
        let feed = async move {
            if let Some(mut pipe) = pipe {
                pipe.write_all(input.as_bytes()).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(io_error)?;
        if let Err(e) = fed
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(io_error(e));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(ExecError::Failed {
                command,
                code: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(CommandOutput {
            code: output.status.code(),
            stdout,
            stderr,
        })
    }

    /// Run and return trimmed standard output
    pub async fn stdout(&self) -> Result<String, ExecError> {
        Ok(self.run().await?.stdout.trim().to_string())
    }

    /// Whether the command exits successfully
    pub async fn succeeds(&self) -> bool {
        self.run().await.is_ok()
    }
}

fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
