//! # Playbook
//!
//! The declarative input document (§3, §6): contexts, sources, a plan of
//! stages × units × steps, and blocks for the recorder/analyst/
//! statistics/monitor/reporter. Loading accepts YAML or JSON, with
//! optional camelCase-to-snake_case key normalization (`--camel-name`)
//! and human-readable duration strings (`"1s"`, `"500ms"`).

mod duration;

pub use duration::{parse_duration, DurationParseError};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybookError {
    #[error("failed to read playbook file {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse playbook as YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse playbook as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to decode plan: {0}")]
    Decode(String),
}

/// A `{type, options}` pair, used for contexts (drivers), sources,
/// recorder, analyst, monitors, and the reporter — every pluggable block
/// in the playbook carries the same discriminant shape (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub options: Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// The target context key (resolved against the driver registry).
    pub ctx: String,
    /// Arbitrary nested request value; leaves keyed with the `#` sigil
    /// are compiled expressions (§4.B).
    pub req: Json,
    #[serde(default)]
    pub success: Option<String>,
    #[serde(default, rename = "errCode")]
    pub err_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub name: String,
    pub step: Vec<Step>,
}

/// One entry in `plan.parallel`: how many workers each unit gets during
/// that stage. Units absent from the map don't run in that stage.
pub type ParallelMap = BTreeMap<String, usize>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    #[serde(
        deserialize_with = "duration::deserialize_duration",
        serialize_with = "duration::serialize_duration"
    )]
    pub duration: Duration,
    #[serde(
        default,
        deserialize_with = "duration::deserialize_duration",
        serialize_with = "duration::serialize_duration"
    )]
    pub interval: Duration,
    pub parallel: Vec<ParallelMap>,
    pub unit: Vec<Unit>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StatisticsOptions {
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub point_number: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub ctx: BTreeMap<String, Spec>,
    #[serde(default)]
    pub source: BTreeMap<String, Spec>,
    pub plan: Plan,
    #[serde(default)]
    pub recorder: Option<Spec>,
    #[serde(default)]
    pub analyst: Option<Spec>,
    #[serde(default)]
    pub statistics: StatisticsOptions,
    #[serde(default)]
    pub monitor: Vec<Spec>,
    #[serde(default)]
    pub reporter: Option<Spec>,
}

impl Playbook {
    pub fn load(path: impl AsRef<Path>, camel_name: bool) -> Result<Self, PlaybookError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| PlaybookError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let mut value: Json = if is_json {
            serde_json::from_str(&content)?
        } else {
            match serde_yaml::from_str::<Json>(&content) {
                Ok(v) => v,
                Err(_) => serde_json::from_str(&content)?,
            }
        };

        if camel_name {
            camel_to_snake(&mut value);
        }

        serde_json::from_value(value).map_err(|e| PlaybookError::Decode(e.to_string()))
    }

    /// The normalized playbook as sorted-key indented JSON, for the
    /// `desc` CLI action (§6).
    pub fn to_sorted_json(&self) -> Result<String, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        let sorted = sort_keys(&value);
        serde_json::to_string_pretty(&sorted)
    }
}

fn sort_keys(value: &Json) -> Json {
    match value {
        Json::Object(map) => {
            let sorted: std::collections::BTreeMap<String, Json> =
                map.iter().map(|(k, v)| (k.clone(), sort_keys(v))).collect();
            let mut obj = serde_json::Map::new();
            for (k, v) in sorted {
                obj.insert(k, v);
            }
            Json::Object(obj)
        }
        Json::Array(items) => Json::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Transforms every object key from camelCase to snake_case, recursively.
/// Values (including string values) are left untouched.
fn camel_to_snake(value: &mut Json) {
    match value {
        Json::Object(map) => {
            let old = std::mem::take(map);
            for (key, mut v) in old {
                camel_to_snake(&mut v);
                map.insert(to_snake_case(&key), v);
            }
        }
        Json::Array(items) => {
            for item in items {
                camel_to_snake(item);
            }
        }
        _ => {}
    }
}

fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, c) in key.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_to_snake_transforms_nested_keys() {
        let mut v = serde_json::json!({"errCode": 1, "nested": {"fooBar": 2}});
        camel_to_snake(&mut v);
        assert_eq!(v, serde_json::json!({"err_code": 1, "nested": {"foo_bar": 2}}));
    }

    #[test]
    fn to_snake_case_handles_single_word() {
        assert_eq!(to_snake_case("name"), "name");
        assert_eq!(to_snake_case("errCode"), "err_code");
        assert_eq!(to_snake_case("HTTPStatus"), "h_t_t_p_status");
    }

    #[test]
    fn sort_keys_orders_object_alphabetically() {
        let v = serde_json::json!({"b": 1, "a": 2});
        let sorted = sort_keys(&v);
        let pretty = serde_json::to_string(&sorted).unwrap();
        assert!(pretty.find("\"a\"").unwrap() < pretty.find("\"b\"").unwrap());
    }
}
