//! Terminal output helpers for the Bastion CLI.

use anyhow::{Context, Result};
use console::style;
use serde::Serialize;
use std::fmt::Display;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable formatted output
    Human,
    /// JSON output for scripting
    Json,
    /// Plain text without colors
    Plain,
}

/// Print a success message
pub fn success(msg: impl Display) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an error message
pub fn error(msg: impl Display) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

/// Pretty JSON for any serializable value.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize output")
}

/// Print rendered command output. JSON and plain output go out unstyled.
pub fn emit(text: &str, format: OutputFormat) {
    match format {
        OutputFormat::Human => println!("{}", text),
        OutputFormat::Json | OutputFormat::Plain => println!("{}", console::strip_ansi_codes(text)),
    }
}
