//! Colored terminal output and spinners for `envctl`.
//!
//! Uses owo-colors for terminal colors and indicatif for spinners.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

use crate::env::EnvState;

/// Print an action header (blue, bold)
/// Example: "==> Installing 3f9a2c1-default"
pub fn action(message: &str) {
    println!("{} {}", "==>".blue().bold(), message.bold());
}

/// Print a detail line (dimmed)
pub fn detail(message: &str) {
    println!("     {}", message.dimmed());
}

pub fn success(message: &str) {
    println!("{} {}", "==>".green().bold(), message.green());
}

pub fn info(message: &str) {
    println!("{} {}", "::".cyan(), message);
}

pub fn warning(message: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), message.yellow());
}

pub fn error(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message.red());
}

/// Print a skip message (dimmed)
/// Example: "==> 3f9a2c1-default not installed, nothing to remove"
pub fn skip(message: &str) {
    println!("{} {}", "==>".dimmed(), message.dimmed());
}

/// One release of a resolved closure; roots are highlighted.
pub fn release_item(id: &str, is_root: bool) {
    if is_root {
        println!("  {}", id.green());
    } else {
        println!("  {} {}", id, "(dependency)".dimmed());
    }
}

pub fn state_line(name: &str, state: EnvState) {
    let label = match state {
        EnvState::Installed => "installed".green().to_string(),
        EnvState::Drifted => "drifted".yellow().to_string(),
        EnvState::NotInstalled => "not installed".dimmed().to_string(),
    };
    println!("  {} {}", name.bold(), label);
}

/// Spinner for a blocking lifecycle step.
pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("     {spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn progress_success(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{}", message.green()));
}

pub fn progress_fail(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{}", message.red()));
}
