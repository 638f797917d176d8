//! Wall-clock and elapsed-time string formatting for diagnostics and line
//! decoration, matching `TimeStr`/`ElapsedStr` in the original.

use chrono::{DateTime, Local};
use std::time::Duration;

/// `hh:mm:ss.mmm` in local time, millisecond precision.
pub fn time_str(at: DateTime<Local>) -> String {
    at.format("%H:%M:%S%.3f").to_string()
}

/// Human-readable elapsed duration: `S.sss`, `MM:SS.sss`, or `HH:MM:SS.sss`
/// depending on magnitude.
pub fn elapsed_str(delta: Duration) -> String {
    let total_secs = delta.as_secs();
    let millis = delta.subsec_millis();
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = total_secs / 3600;

    if hours == 0 && mins == 0 {
        format!("{secs}.{millis:03}s")
    } else if hours == 0 {
        format!("{mins:02}:{secs:02}.{millis:03}")
    } else {
        format!("{hours:02}:{mins:02}:{secs:02}.{millis:03}")
    }
}
