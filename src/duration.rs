//! Duration Expressions
//!
//! Parses compact expiration expressions such as `10s`, `3mn`, `8h` or
//! combinations like `2d4h10s` into a number of seconds.

use crate::error::{CacheError, Result};

const MINUTE: u32 = 60;
const HOUR: u32 = 60 * MINUTE;
const DAY: u32 = 24 * HOUR;

/// Expiration applied when no expression is given (30 days).
pub const DEFAULT_EXPIRATION: u32 = 30 * DAY;

// == Parse Duration ==
/// Parses a duration expression into seconds.
///
/// The expression is one or more `<digits><unit>` groups where unit is one of
/// `d`, `h`, `mi`, `min`, `mn` or `s`. Anything else is rejected.
pub fn parse_duration(expression: &str) -> Result<u32> {
    let invalid = || CacheError::InvalidRequest(format!("Invalid duration pattern : {expression}"));

    let bytes = expression.as_bytes();
    if bytes.is_empty() {
        return Err(invalid());
    }

    let mut seconds: u32 = 0;
    let mut pos = 0;
    while pos < bytes.len() {
        let digits_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == digits_start {
            return Err(invalid());
        }
        let amount: u32 = expression[digits_start..pos]
            .parse()
            .map_err(|_| invalid())?;

        let unit_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
            pos += 1;
        }
        let multiplier = match &expression[unit_start..pos] {
            "d" => DAY,
            "h" => HOUR,
            "mi" | "min" | "mn" => MINUTE,
            "s" => 1,
            _ => return Err(invalid()),
        };

        seconds = amount
            .checked_mul(multiplier)
            .and_then(|part| seconds.checked_add(part))
            .ok_or_else(invalid)?;
    }

    Ok(seconds)
}

/// Parses an optional expression, falling back to [`DEFAULT_EXPIRATION`].
pub fn parse_expiration(expression: Option<&str>) -> Result<u32> {
    expression.map_or(Ok(DEFAULT_EXPIRATION), parse_duration)
}
