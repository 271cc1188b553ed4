//! The fixed function set available to every compiled expression (§4.A).
//! Grounded on the reference implementation's `internal/eval/lang.go`:
//! the date layout list and `int()`'s whitespace-token behavior are
//! replicated exactly because playbooks depend on them.

use super::EvalError;
use crate::value::Value;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use rand::Rng;

/// Layouts tried in order against `date(s)`; the first that parses wins.
/// Mirrors `lang.go`'s list: ANSIC, UnixDate, RubyDate, Kitchen, RFC3339,
/// RFC3339Nano, plus date-only and plain-datetime forms.
const DATE_LAYOUTS: &[&str] = &[
    "%a %b %e %H:%M:%S %Y",      // ANSIC: Mon Jan _2 15:04:05 2006
    "%a %b %e %H:%M:%S %Z %Y",   // UnixDate
    "%a %b %d %H:%M:%S %z %Y",   // RubyDate
    "%l:%M%p",                   // Kitchen
    "%Y-%m-%d",                  // date-only
    "%Y-%m-%d %H:%M:%S",         // plain datetime
];

pub fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    match name {
        "date" => date(args),
        "len" => len(args),
        "int" => int(args),
        "uuid" => Ok(Value::Str(uuid::Uuid::new_v4().to_string())),
        "random" => Ok(Value::Float(rand::thread_rng().gen::<f64>())),
        "randInt" => rand_int(args),
        other => Err(EvalError::Function(
            "call",
            format!("unknown function {other:?}"),
        )),
    }
}

fn date(args: Vec<Value>) -> Result<Value, EvalError> {
    let s = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| EvalError::TypeMismatch("date", "expected a string argument".to_string()))?;

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(Value::Str(dt.to_rfc3339()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{s}Z")) {
        return Ok(Value::Str(dt.to_rfc3339()));
    }

    for layout in DATE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            if let Some(dt) = local_datetime(naive) {
                return Ok(Value::Str(dt.to_rfc3339()));
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, layout) {
            let naive = date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
            if let Some(dt) = local_datetime(naive) {
                return Ok(Value::Str(dt.to_rfc3339()));
            }
        }
    }

    Err(EvalError::Function(
        "date",
        format!("no layout matched {s:?}"),
    ))
}

/// Resolves a naive timestamp against the host's local zone, picking the
/// earlier instant on a fall-back DST overlap rather than rejecting it.
fn local_datetime(naive: NaiveDateTime) -> Option<DateTime<Local>> {
    Local.from_local_datetime(&naive).earliest()
}

fn len(args: Vec<Value>) -> Result<Value, EvalError> {
    match args.first() {
        Some(Value::Str(s)) => Ok(Value::Int(s.chars().count() as i64)),
        other => Err(EvalError::TypeMismatch(
            "len",
            format!("expected a string, got {other:?}"),
        )),
    }
}

/// `int(x)`: numeric values cast directly; strings are split on ASCII
/// whitespace and the *first* token is parsed, so `int("200 OK")` == 200.
fn int(args: Vec<Value>) -> Result<Value, EvalError> {
    match args.first() {
        Some(Value::Int(n)) => Ok(Value::Int(*n)),
        Some(Value::Float(f)) => Ok(Value::Int(*f as i64)),
        Some(Value::Str(s)) => {
            let token = s.split_whitespace().next().unwrap_or("");
            token
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| EvalError::Function("int", format!("cannot parse {token:?}: {e}")))
        }
        other => Err(EvalError::TypeMismatch(
            "int",
            format!("unsupported argument {other:?}"),
        )),
    }
}

fn rand_int(args: Vec<Value>) -> Result<Value, EvalError> {
    let n = args
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| EvalError::TypeMismatch("randInt", "expected an integer bound".to_string()))?;
    if n <= 0 {
        return Err(EvalError::Function(
            "randInt",
            format!("bound must be positive, got {n}"),
        ));
    }
    Ok(Value::Int(rand::thread_rng().gen_range(0..n)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_splits_on_whitespace_and_takes_first_token() {
        assert_eq!(
            int(vec![Value::Str("200 OK".to_string())]).unwrap(),
            Value::Int(200)
        );
    }

    #[test]
    fn len_counts_chars() {
        assert_eq!(len(vec![Value::Str("hello".to_string())]).unwrap(), Value::Int(5));
    }

    #[test]
    fn rand_int_stays_in_range() {
        for _ in 0..50 {
            let v = rand_int(vec![Value::Int(10)]).unwrap();
            let n = v.as_i64().unwrap();
            assert!((0..10).contains(&n));
        }
    }

    #[test]
    fn date_parses_rfc3339() {
        let v = date(vec![Value::Str("2024-01-02T03:04:05Z".to_string())]).unwrap();
        assert!(v.as_str().unwrap().starts_with("2024-01-02T03:04:05"));
    }

    #[test]
    fn date_parses_date_only() {
        let v = date(vec![Value::Str("2024-01-02".to_string())]).unwrap();
        assert!(v.as_str().unwrap().starts_with("2024-01-02T00:00:00"));
    }

    #[test]
    fn date_rejects_unmatched_layout() {
        assert!(date(vec![Value::Str("not a date".to_string())]).is_err());
    }
}
