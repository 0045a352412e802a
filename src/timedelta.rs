//! Parsing and rendering of frame timedeltas.
//!
//! Timedeltas travel through checkpoints as strings. Anything that does not
//! parse is treated as a missing value by the metrics, never as an error.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

fn clock_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:(\d+)\s+days?,?\s*)?(\d+):([0-5]?\d):([0-5]?\d(?:\.\d+)?)$")
            .expect("static clock regex")
    })
}

fn unit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+(?:\.\d+)?)\s*(ms|s|sec|secs|seconds?|m|min|mins|minutes?|h|hours?)?$")
            .expect("static unit regex")
    })
}

/// Parse a timedelta string into a duration.
///
/// Accepted forms:
/// - `"0 days 00:01:05.5"` and `"00:01:05"`
/// - unit-suffixed values such as `"5s"`, `"250ms"`, `"2min"`, `"1h"`
/// - bare numbers, read as seconds
pub fn parse_timedelta(raw: &str) -> Option<Duration> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(caps) = clock_pattern().captures(value) {
        let days: u64 = caps.get(1).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
        let hours: u64 = caps[2].parse().ok()?;
        let minutes: u64 = caps[3].parse().ok()?;
        let seconds: f64 = caps[4].parse().ok()?;
        // Out-of-range values are missing, like any other unparseable input.
        let whole = days
            .checked_mul(86_400)?
            .checked_add(hours.checked_mul(3_600)?)?
            .checked_add(minutes * 60)?;
        return Duration::from_secs(whole).checked_add(Duration::try_from_secs_f64(seconds).ok()?);
    }

    let caps = unit_pattern().captures(value)?;
    let amount: f64 = caps[1].parse().ok()?;
    let seconds = match caps.get(2).map(|m| m.as_str()) {
        Some("ms") => amount / 1_000.0,
        None | Some("s" | "sec" | "secs" | "second" | "seconds") => amount,
        Some("m" | "min" | "mins" | "minute" | "minutes") => amount * 60.0,
        Some("h" | "hour" | "hours") => amount * 3_600.0,
        Some(_) => return None,
    };
    Duration::try_from_secs_f64(seconds).ok()
}

/// Render a duration the way checkpoints store it: `"0 days 00:00:05"`.
pub fn format_timedelta(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    let nanos = duration.subsec_nanos();
    if nanos == 0 {
        format!("{days} days {hours:02}:{minutes:02}:{seconds:02}")
    } else {
        let frac = format!("{:09}", nanos);
        let frac = frac.trim_end_matches('0');
        format!("{days} days {hours:02}:{minutes:02}:{seconds:02}.{frac}")
    }
}
