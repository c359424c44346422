//! ---
//! ptf_section: "01-core-functionality"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Shared primitives and utilities for the core runtime."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
use std::time::Duration;

/// Convert a duration into microseconds, saturating at `u64::MAX`.
pub fn duration_to_micros(duration: Duration) -> u64 {
    duration
        .as_secs()
        .saturating_mul(1_000_000)
        .saturating_add(u64::from(duration.subsec_micros()))
}

/// Seconds with millisecond precision, as printed next to case results.
pub fn format_elapsed(duration: Duration) -> String {
    format!("{:.3}s", duration.as_secs_f64())
}

/// Whole minutes rounded to two decimals, as used by watchdog warnings.
pub fn minutes_rounded(duration: Duration) -> f64 {
    (duration.as_secs_f64() / 60.0 * 100.0).round() / 100.0
}
