//! Logging utilities with colored module prefixes.
//!
//! Provides the `log!` macro for formatted terminal output:
//!
//! ```ignore
//! log!("build"; "generated {} files", count);
//! log!("watch"; "rebuilt: {}", rel_path);
//! ```

use colored::{ColoredString, Colorize};
use std::io::{Write, stderr};

/// Log a message with a colored module prefix.
///
/// # Usage
/// ```ignore
/// log!("module"; "message with {} formatting", args);
/// ```
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        $crate::logger::log($module, &format!($($arg)*))
    }};
}

/// Write a prefixed message to stderr.
///
/// Goes to stderr so build output stays separate from anything a
/// metadata `build`/`serve` command prints on stdout.
pub fn log(module: &str, message: &str) {
    let prefix = colorize_prefix(module);
    let mut err = stderr().lock();
    writeln!(err, "{prefix} {message}").ok();
}

/// Apply color to a module prefix based on module type.
fn colorize_prefix(module: &str) -> ColoredString {
    let prefix = format!("[{module}]");
    match module {
        "serve" => prefix.bright_blue().bold(),
        "watch" => prefix.bright_green().bold(),
        "error" => prefix.bright_red().bold(),
        _ => prefix.bright_yellow().bold(),
    }
}
