mod cli;
mod commands;
mod config;
mod engine;
mod exec;
mod os;
mod paths;
mod steps;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match dispatch(&ctx, cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            exit_code(&e)
        }
    }
}

fn dispatch(ctx: &Context, cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => commands::run::run(ctx, &cli.settings, args, cli.yes),
        Command::Plan(args) => commands::run::plan(ctx, &cli.settings, args),
        Command::List => commands::list::run(ctx),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "zfsroot", &mut io::stdout());
            Ok(())
        }
    }
}

fn exit_code(error: &anyhow::Error) -> ExitCode {
    if error.is::<commands::run::NotRoot>() {
        ExitCode::from(commands::run::EXIT_NOT_ROOT)
    } else {
        ExitCode::FAILURE
    }
}
