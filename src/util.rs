//! Small shared helpers used across subsystems.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, PLC-clock-agnostic (§3 Sample:
/// "origin timestamp ... taken at sample capture").
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
