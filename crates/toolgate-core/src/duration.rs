//! Duration strings in the `1h30m`, `250ms`, `1.5s` notation
//!
//! Used for the configured request timeout and for range-query step values.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{ServiceError, ServiceResult};

const NANOS_PER_SEC: u128 = 1_000_000_000;

const UNITS: [(&str, u128); 8] = [
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("μs", 1_000),
    ("ms", 1_000_000),
    ("s", NANOS_PER_SEC),
    ("m", 60 * NANOS_PER_SEC),
    ("h", 3600 * NANOS_PER_SEC),
];

/// Parse a sequence of decimal numbers each followed by a unit.
///
/// A bare `0` is accepted. Negative durations are rejected. Fractions are
/// truncated at nanosecond precision.
pub fn parse_duration(input: &str) -> ServiceResult<Duration> {
    let invalid = |why: &str| {
        ServiceError::InvalidArgument(format!("invalid duration '{}': {}", input, why))
    };

    let s = input.trim();
    let s = s.strip_prefix('+').unwrap_or(s);
    if s.starts_with('-') {
        return Err(invalid("negative durations are not allowed"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(invalid("empty"));
    }

    let mut rest = s;
    let mut total: u128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (whole, fraction) = match rest[..number_len].split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (&rest[..number_len], ""),
        };
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(invalid("expected a number"));
        }
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        if unit.is_empty() {
            return Err(invalid("missing unit"));
        }
        let scale = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| invalid("unknown unit"))?;
        rest = &rest[unit_len..];

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid("out of range"))?
        };
        total = whole
            .checked_mul(scale)
            .and_then(|n| n.checked_add(scale_fraction(fraction, scale)))
            .and_then(|n| n.checked_add(total))
            .ok_or_else(|| invalid("out of range"))?;
    }

    let secs = u64::try_from(total / NANOS_PER_SEC).map_err(|_| invalid("out of range"))?;
    Ok(Duration::new(secs, (total % NANOS_PER_SEC) as u32))
}

/// `0.<digits> * scale` in nanoseconds, truncated
fn scale_fraction(digits: &str, scale: u128) -> u128 {
    let mut value = 0u128;
    let mut divisor = 1u128;
    // 20 digits resolve below a nanosecond for every unit without overflow
    for c in digits.chars().take(20) {
        value = value * 10 + u128::from(c.to_digit(10).unwrap_or(0));
        divisor *= 10;
    }
    value * scale / divisor
}

/// `deserialize_with` helper for duration fields in configuration files
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}
