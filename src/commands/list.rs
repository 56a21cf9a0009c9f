use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::steps::STEPS;
use crate::ui;

/// Print the available steps
pub fn run(ctx: &Context) -> Result<()> {
    if ctx.quiet {
        for (name, _) in STEPS {
            println!("{name}");
        }
        return Ok(());
    }

    ui::header("Available Steps");
    let width = STEPS.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, description) in STEPS {
        println!("  {}  {}", format!("{name:<width$}").bold(), description.dimmed());
    }
    println!();
    ui::dim("Any other name installs the OS package of that name.");
    Ok(())
}
