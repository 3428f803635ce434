//! Period expressions and timestamp parsing for timeline rescaling.
//!
//! Rules implemented:
//! - periods are one or more `<number><unit>` terms (`2d`, `1h30m`, `2 days`, `1.5h`)
//!   and may include a clock term (`1 day 06:00:00`)
//! - timestamps accept RFC 3339, `YYYY-MM-DD[ T]HH:MM[:SS[.f]]` with an optional
//!   offset or trailing `UTC`, and bare dates (midnight)
//! - naive timestamps are interpreted as UTC
//! - `now` resolves through the supplied [`Clock`], read exactly once

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

use crate::clock::Clock;

const NANOS_PER_MICRO: i128 = 1_000;
const NANOS_PER_MILLI: i128 = 1_000_000;
const NANOS_PER_SECOND: i128 = 1_000_000_000;
const NANOS_PER_MINUTE: i128 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: i128 = 60 * NANOS_PER_MINUTE;
const NANOS_PER_DAY: i128 = 24 * NANOS_PER_HOUR;
const NANOS_PER_WEEK: i128 = 7 * NANOS_PER_DAY;
const MAX_FRACTION_DIGITS: usize = 18;

pub const NOW_SENTINEL: &str = "now";

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f %z",
];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("invalid duration: '{0}'")]
    InvalidDuration(String),
    #[error("invalid timestamp: '{0}'")]
    InvalidTimestamp(String),
}

pub fn parse_period(input: &str) -> Result<ChronoDuration, PeriodError> {
    let invalid = || PeriodError::InvalidDuration(input.to_string());

    let trimmed = input.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed),
    };
    let lowered = body.to_ascii_lowercase();
    let mut rest = lowered.as_str();
    let mut total_ns: i128 = 0;
    let mut terms = 0usize;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }

        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid());
        }
        let number = &rest[..number_len];
        rest = &rest[number_len..];

        let term_ns = if rest.starts_with(':') {
            let clock_len = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ':'))
                .unwrap_or(rest.len());
            let clock = format!("{number}{}", &rest[..clock_len]);
            rest = &rest[clock_len..];
            clock_term_nanos(&clock).ok_or_else(invalid)?
        } else {
            rest = rest.trim_start();
            let unit_len = rest
                .find(|c: char| !c.is_ascii_alphabetic())
                .unwrap_or(rest.len());
            if unit_len == 0 {
                return Err(invalid());
            }
            let unit_ns = unit_nanos(&rest[..unit_len]).ok_or_else(invalid)?;
            rest = &rest[unit_len..];
            decimal_nanos(number, unit_ns).ok_or_else(invalid)?
        };

        total_ns = total_ns.checked_add(term_ns).ok_or_else(invalid)?;
        terms += 1;
    }

    if terms == 0 {
        return Err(invalid());
    }

    let signed = if negative { -total_ns } else { total_ns };
    let nanos = i64::try_from(signed).map_err(|_| invalid())?;
    Ok(ChronoDuration::nanoseconds(nanos))
}

pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, PeriodError> {
    let invalid = || PeriodError::InvalidTimestamp(input.to_string());

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for fmt in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(trimmed, fmt) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }

    let naive_input = strip_utc_suffix(trimmed);
    for fmt in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(naive_input, fmt) {
            return Ok(Utc.from_utc_datetime(&parsed));
        }
    }

    let date = NaiveDate::parse_from_str(naive_input, "%Y-%m-%d").map_err(|_| invalid())?;
    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?;
    Ok(Utc.from_utc_datetime(&midnight))
}

/// Resolves a caller-supplied end time. `now` reads `clock` once; anything else is parsed.
pub fn resolve_end_time(input: &str, clock: &dyn Clock) -> Result<DateTime<Utc>, PeriodError> {
    if input.trim().eq_ignore_ascii_case(NOW_SENTINEL) {
        return Ok(clock.now());
    }
    parse_timestamp(input)
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

fn strip_utc_suffix(input: &str) -> &str {
    let len = input.len();
    if let Some(suffix) = len.checked_sub(3).and_then(|start| input.get(start..)) {
        if suffix.eq_ignore_ascii_case("utc") {
            return input[..len - 3].trim_end();
        }
    }
    input
        .strip_suffix('Z')
        .or_else(|| input.strip_suffix('z'))
        .unwrap_or(input)
}

fn unit_nanos(unit: &str) -> Option<i128> {
    match unit {
        "w" | "week" | "weeks" => Some(NANOS_PER_WEEK),
        "d" | "day" | "days" => Some(NANOS_PER_DAY),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(NANOS_PER_HOUR),
        "m" | "t" | "min" | "mins" | "minute" | "minutes" => Some(NANOS_PER_MINUTE),
        "s" | "sec" | "secs" | "second" | "seconds" => Some(NANOS_PER_SECOND),
        "ms" | "l" | "milli" | "millis" | "millisecond" | "milliseconds" => Some(NANOS_PER_MILLI),
        "us" | "u" | "micro" | "micros" | "microsecond" | "microseconds" => Some(NANOS_PER_MICRO),
        "ns" | "n" | "nano" | "nanos" | "nanosecond" | "nanoseconds" => Some(1),
        _ => None,
    }
}

fn decimal_nanos(number: &str, unit_ns: i128) -> Option<i128> {
    let (int_part, frac_part) = match number.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (number, ""),
    };
    if frac_part.contains('.') || (int_part.is_empty() && frac_part.is_empty()) {
        return None;
    }

    let whole: i128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().ok()?
    };
    let mut total = whole.checked_mul(unit_ns)?;

    let frac_digits = &frac_part[..frac_part.len().min(MAX_FRACTION_DIGITS)];
    if !frac_digits.is_empty() {
        let numerator: i128 = frac_digits.parse().ok()?;
        let denominator = 10_i128.checked_pow(frac_digits.len() as u32)?;
        let scaled = numerator.checked_mul(unit_ns)?;
        total = total.checked_add((scaled + denominator / 2) / denominator)?;
    }

    Some(total)
}

fn clock_term_nanos(clock: &str) -> Option<i128> {
    let parts: Vec<&str> = clock.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m] => (*h, *m, "0"),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };

    if hours.contains('.') || minutes.contains('.') || minutes.len() != 2 {
        return None;
    }
    let hours: i128 = hours.parse().ok()?;
    let minutes: i128 = minutes.parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    let seconds_ns = decimal_nanos(seconds, NANOS_PER_SECOND)?;
    if seconds_ns >= 60 * NANOS_PER_SECOND {
        return None;
    }

    hours
        .checked_mul(NANOS_PER_HOUR)?
        .checked_add(minutes * NANOS_PER_MINUTE)?
        .checked_add(seconds_ns)
}
