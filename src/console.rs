//! Console helpers for user-facing status lines.
//!
//! Diagnostic narration goes through `tracing`; these helpers are only for
//! the step banner and the final build verdict, which are shown regardless
//! of the log level.

/// Prints a step banner in bold yellow.
pub fn step(text: &str) {
    println!("\x1b[1;33m{text}\x1b[0m");
}

/// Prints a success line in bold green.
pub fn good(text: &str) {
    println!("\x1b[1;32m{text}\x1b[0m");
}

/// Prints a failure line in bold red.
pub fn error(text: &str) {
    println!("\x1b[1;31m{text}\x1b[0m");
}
