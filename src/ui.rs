use colored::Colorize;
use taskgraph::{Failure, Outcome};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{num}/{total}]").blue().bold(), msg);
}

// ============================================================================
// Outcomes
// ============================================================================

/// Print the outcome of a requested step
pub fn outcome(task: &str, outcome: &Outcome) {
    match outcome {
        Outcome::Success(message) => {
            println!("{} {}", "✓".green(), task.bold());
            indented(message);
        }
        Outcome::AlreadySatisfied(message) => {
            println!("{} {}", "○".dimmed(), task.bold());
            indented(&message.dimmed().to_string());
        }
        Outcome::Failure(failure) => {
            eprintln!("{} {}", "✗".red(), task.bold());
            for line in failure_lines(failure) {
                eprintln!("    {line}");
            }
        }
    }
}

fn indented(message: &str) {
    for line in message.lines() {
        println!("    {line}");
    }
}

/// Describe a failure: the dependency path, then the failing action's message
pub fn failure_lines(failure: &Failure) -> Vec<String> {
    let mut lines = Vec::new();
    let chain = failure.chain();
    if chain.len() > 1 {
        lines.push(format!("failed via {}", chain.join(" → ")));
    }
    match failure.root_cause() {
        Failure::Action { task, message } => {
            lines.push(format!("{task}:"));
            lines.extend(message.lines().map(|line| format!("  {line}")));
        }
        other => lines.push(other.to_string()),
    }
    lines
}

// ============================================================================
// Size Formatting
// ============================================================================

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;
const TB: u64 = GB * 1024;

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

// ============================================================================
// Tests
// ============================================================================
