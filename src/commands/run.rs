//! `run` and `plan`: build the requested steps and hand them to the engine

use anyhow::{Context as _, Result};
use thiserror::Error;

use crate::Context;
use crate::cli::{SettingsArgs, StepsArgs};
use crate::config::Config;
use crate::engine::{self, RunOptions};
use crate::os::{disks, user};
use crate::steps::Catalog;
use crate::ui;
use taskgraph::{ExecuteSummary, Task};

/// Exit code when `run` is started without root privileges
pub const EXIT_NOT_ROOT: u8 = 3;

#[derive(Debug, Error)]
#[error("zfsroot must run as root (try: sudo zfsroot run ...)")]
pub struct NotRoot;

#[derive(Debug, Error)]
#[error("{failed} of {total} steps failed")]
pub struct StepsFailed {
    pub failed: usize,
    pub total: usize,
}

/// Plan, confirm and execute the requested steps
pub fn run(ctx: &Context, settings: &SettingsArgs, args: StepsArgs, yes: bool) -> Result<()> {
    if !user::is_running_as_root() {
        return Err(NotRoot.into());
    }
    let opts = RunOptions {
        dry_run: false,
        sequential: args.sequential,
        yes,
        quiet: ctx.quiet || args.json,
    };
    drive(ctx, settings, &args, &opts)
}

/// Show the execution order of the requested steps
pub fn plan(ctx: &Context, settings: &SettingsArgs, args: StepsArgs) -> Result<()> {
    let opts = RunOptions {
        dry_run: true,
        sequential: args.sequential,
        yes: true,
        quiet: ctx.quiet || args.json,
    };
    drive(ctx, settings, &args, &opts)
}

fn drive(ctx: &Context, settings: &SettingsArgs, args: &StepsArgs, opts: &RunOptions) -> Result<()> {
    let config = Config::load(settings)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    let summary = runtime.block_on(build_and_execute(ctx, config, &args.steps, opts))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    if !summary.is_success() {
        return Err(StepsFailed {
            failed: summary.failed,
            total: summary.total(),
        }
        .into());
    }
    Ok(())
}

async fn build_and_execute(
    ctx: &Context,
    config: Config,
    steps: &[String],
    opts: &RunOptions,
) -> Result<ExecuteSummary> {
    let disks = if config.disks.is_empty() {
        Vec::new()
    } else {
        disks::discover(&config.disks)
            .await
            .context("Failed to look up the configured disks")?
            .to_vec()
    };

    if !opts.quiet {
        print_settings(ctx, &config, &disks);
    }

    let catalog = Catalog::new(config, disks);
    let roots = build_roots(&catalog, steps)?;
    engine::execute(&roots, opts).await
}

/// Look up every requested step, failing on the first one that cannot be built
fn build_roots(catalog: &Catalog, steps: &[String]) -> Result<Vec<Task>> {
    steps
        .iter()
        .map(|step| {
            catalog
                .get(step)
                .with_context(|| format!("Cannot build step \"{step}\""))
        })
        .collect()
}

fn print_settings(ctx: &Context, config: &Config, disks: &[disks::Disk]) {
    ui::header("zfsroot");
    if let Some(fqdn) = &config.fqdn {
        ui::kv("Host", fqdn);
    }
    ui::kv("Debian", &config.debian_suite);
    ui::kv("IP", &config.ip);
    for disk in disks {
        ui::kv("Disk", &format!("{} ({})", disk.path, ui::format_size(disk.size)));
    }
    if ctx.verbose > 0 && disks.is_empty() {
        ui::warn("No disks configured; disk steps are unavailable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::tests::catalog;

    #[test]
    fn test_build_roots_in_request_order() {
        let catalog = catalog();
        let steps = ["vim", "hostname", "htop"].map(String::from);
        let roots = build_roots(&catalog, &steps).unwrap();
        let names: Vec<_> = roots.iter().map(Task::name).collect();
        assert_eq!(names, vec!["vim", "hostname", "install-os-package htop"]);
    }

    #[test]
    fn test_build_roots_names_the_bad_step() {
        let catalog = catalog();
        let steps = ["vim", "Bad Name"].map(String::from);
        let error = build_roots(&catalog, &steps).unwrap_err();
        assert!(error.to_string().contains("Bad Name"), "{error}");
    }

    #[test]
    fn test_steps_failed_message() {
        let error = StepsFailed { failed: 1, total: 3 };
        assert_eq!(error.to_string(), "1 of 3 steps failed");
    }
}
