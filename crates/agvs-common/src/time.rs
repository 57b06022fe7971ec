//! ---
//! agvs_section: "01-common-runtime"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Wall-clock and monotonic time helpers."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::time::Instant;

use chrono::{DateTime, Utc};

/// Capture an instant suitable for expiry comparisons.
pub fn monotonic_now() -> Instant {
    Instant::now()
}

/// Split a wall-clock time into whole seconds and the nanosecond remainder,
/// the shape map snapshot responses carry on the wire.
pub fn wall_clock_parts(at: DateTime<Utc>) -> (i64, i32) {
    (at.timestamp(), at.timestamp_subsec_nanos() as i32)
}

/// Interpret a fleet-side epoch timestamp (seconds, possibly fractional) as a
/// UTC wall-clock time. Out-of-range values clamp to the epoch rather than
/// failing; vehicle clocks are informational here, never authoritative.
pub fn from_epoch_seconds(seconds: f64) -> DateTime<Utc> {
    if !seconds.is_finite() {
        return DateTime::UNIX_EPOCH;
    }
    let secs = seconds.div_euclid(1.0) as i64;
    let nanos = (seconds.rem_euclid(1.0) * 1e9) as u32;
    DateTime::from_timestamp(secs, nanos.min(999_999_999)).unwrap_or(DateTime::UNIX_EPOCH)
}
