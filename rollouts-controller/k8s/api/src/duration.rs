use std::time::Duration;

/// Errors parsing a Go-formatted duration string such as `1m30s`.
#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("invalid unit: {}", EXPECTED_UNITS)]
    InvalidUnit,

    #[error("missing a unit: {}", EXPECTED_UNITS)]
    NoUnit,

    #[error("durations may not be negative")]
    Negative,

    #[error("invalid floating-point number: {}", .0)]
    NotANumber(#[from] std::num::ParseFloatError),
}

const EXPECTED_UNITS: &str = "expected one of 'ns', 'us', '\u{00b5}s', 'ms', 's', 'm', or 'h'";

/// Parses a metric interval or delay in Go `time.ParseDuration` format.
///
/// Negative durations are rejected: an analysis can't be scheduled in the past.
pub fn parse(s: &str) -> Result<Duration, ParseError> {
    fn unit_base(unit: &str) -> Result<Duration, ParseError> {
        const MINUTE: Duration = Duration::from_secs(60);
        Ok(match unit {
            "ns" => Duration::from_nanos(1),
            // U+00B5 is the "micro sign" while U+03BC is "Greek letter mu"
            "us" | "\u{00b5}s" | "\u{03bc}s" => Duration::from_micros(1),
            "ms" => Duration::from_millis(1),
            "s" => Duration::from_secs(1),
            "m" => MINUTE,
            "h" => MINUTE * 60,
            _ => return Err(ParseError::InvalidUnit),
        })
    }

    if s.starts_with('-') {
        return Err(ParseError::Negative);
    }
    let mut s = s.trim_start_matches('+');
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(ParseError::NoUnit);
    }

    let mut total = Duration::ZERO;
    while !s.is_empty() {
        let Some(unit_start) = s.find(|c: char| c.is_alphabetic() || c == '\u{00b5}') else {
            return Err(ParseError::NoUnit);
        };
        let (val, rest) = s.split_at(unit_start);
        let val = val.parse::<f64>()?;
        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let (unit, rest) = rest.split_at(unit_end);
        total += unit_base(unit)?.mul_f64(val);
        s = rest;
    }
    Ok(total)
}
