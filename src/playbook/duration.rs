//! Human-readable duration parsing for playbook fields (§6: "Durations
//! accept human-readable forms (`1s`, `500ms`)"). No duration-parsing
//! crate appears anywhere in the example pack this repo draws from, so
//! this is a small hand-rolled suffix grammar rather than an imported
//! dependency: a trailing `ms`, `s`, `m`, or `h` unit, or a bare integer
//! treated as seconds.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DurationParseError {
    #[error("empty duration string")]
    Empty,
    #[error("invalid duration {0:?}: no numeric prefix")]
    NoNumber(String),
    #[error("invalid duration {0:?}: unrecognized unit {1:?}")]
    UnknownUnit(String, String),
}

pub fn parse_duration(raw: &str) -> Result<Duration, DurationParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let split_at = raw
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(raw.len());
    let (number_part, unit_part) = raw.split_at(split_at);

    let number: f64 = number_part
        .parse()
        .map_err(|_| DurationParseError::NoNumber(raw.to_string()))?;

    let millis = match unit_part.trim() {
        "" | "s" => number * 1000.0,
        "ms" => number,
        "m" => number * 60_000.0,
        "h" => number * 3_600_000.0,
        other => return Err(DurationParseError::UnknownUnit(raw.to_string(), other.to_string())),
    };

    Ok(Duration::from_millis(millis.max(0.0) as u64))
}

pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Json::deserialize(deserializer)?;
    match value {
        Json::String(s) => {
            parse_duration(&s).map_err(|e| serde::de::Error::custom(e.to_string()))
        }
        Json::Number(n) => Ok(Duration::from_secs_f64(n.as_f64().unwrap_or(0.0))),
        Json::Null => Ok(Duration::ZERO),
        other => Err(serde::de::Error::custom(format!(
            "expected a duration string or number, got {other}"
        ))),
    }
}

pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.as_secs_f64().serialize(serializer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_milliseconds() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn parses_seconds_suffix_and_bare() {
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn parses_minutes_and_hours() {
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse_duration("5x").is_err());
    }

    #[test]
    fn rejects_empty_string() {
        assert!(parse_duration("").is_err());
    }
}
