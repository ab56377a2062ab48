//! Terminal output: progress reporting, tables and error rendering.

pub mod console;
pub mod list;
pub mod theme;

use std::io::{Write, stderr};

use bring_core::BringError;
use crossterm::style::Stylize;

pub use console::ConsoleReporter;
pub use theme::Theme;

/// Render `err` as message, reason and remedy.
pub fn render_error(err: &anyhow::Error) -> String {
    let theme = Theme::default();
    let mut out = format!("{} {err}", "error:".with(theme.colors.error).bold());
    if let Some(bring) = err.downcast_ref::<BringError>() {
        out.push_str(&format!("\n  {} {}", "reason:".with(theme.colors.secondary), bring.reason()));
        if let Some(remedy) = bring.remedy() {
            out.push_str(&format!("\n  {} {remedy}", "fix:".with(theme.colors.secondary)));
        }
    } else {
        for cause in err.chain().skip(1) {
            out.push_str(&format!("\n  {} {cause}", "caused by:".with(theme.colors.secondary)));
        }
    }
    out
}

pub fn print_error(err: &anyhow::Error) {
    let mut out = stderr().lock();
    let _ = writeln!(out, "{}", render_error(err));
}
