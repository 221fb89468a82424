//! Human-friendly duration strings such as `30s`, `5m`, `2h` or `7d`.

use std::time::Duration;

use thiserror::Error;

/// Error raised when a duration string cannot be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid duration '{input}': {reason}")]
pub struct DurationParseError {
    pub input: String,
    pub reason: &'static str,
}

/// Parses a duration made of one or more `<number><unit>` segments (`1h30m`).
///
/// Supported units are `ms`, `s`, `m`, `h` and `d`. A bare number is read as seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, DurationParseError> {
    let trimmed = raw.trim();
    let error = |reason| DurationParseError {
        input: raw.to_string(),
        reason,
    };
    if trimmed.is_empty() {
        return Err(error("duration is empty"));
    }
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits_end == 0 {
            return Err(error("expected a number before each unit"));
        }
        let amount: u64 = rest[..digits_end].parse().map_err(|_| error("number is too large"))?;
        rest = &rest[digits_end..];

        let unit_end = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let segment = match &rest[..unit_end] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.saturating_mul(60)),
            "h" => Duration::from_secs(amount.saturating_mul(3_600)),
            "d" => Duration::from_secs(amount.saturating_mul(86_400)),
            "" => return Err(error("missing unit after number")),
            _ => return Err(error("unit must be one of ms, s, m, h, d")),
        };
        total = total.saturating_add(segment);
        rest = &rest[unit_end..];
    }
    Ok(total)
}

/// Formats a duration using the largest units that divide it exactly (`90s` becomes `1m30s`).
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.subsec_millis();
    let mut seconds = duration.as_secs();
    if seconds == 0 {
        return format!("{millis}ms");
    }

    let mut out = String::new();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        if seconds >= size {
            out.push_str(&format!("{}{}", seconds / size, unit));
            seconds %= size;
        }
    }
    if millis > 0 {
        out.push_str(&format!("{millis}ms"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_and_compound_units() {
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("7d"), Ok(Duration::from_secs(604_800)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5_400)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 45 "), Ok(Duration::from_secs(45)));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("m5").is_err());
        assert!(parse_duration("5w").is_err());
        assert!(parse_duration("5m3").is_err());
    }

    #[test]
    fn formats_compactly() {
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(7_200)), "2h");
        assert_eq!(format_duration(Duration::from_millis(1_500)), "1s500ms");
        assert_eq!(format_duration(Duration::ZERO), "0ms");
    }
}
