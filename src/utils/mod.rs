//! Shared helpers: date stamps, command execution, minification.

pub mod exec;
pub mod minify;

use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current UTC date formatted as `YYYY-MM-DD`.
///
/// Exposed to templates as the reserved `Today` context key.
pub fn today() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    format!("{year:04}-{month:02}-{day:02}")
}

/// Convert days since the Unix epoch to a civil (year, month, day) date.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// Check whether a directory contains no entries.
pub fn is_dir_empty(path: &Path) -> io::Result<bool> {
    Ok(path.read_dir()?.next().is_none())
}
