//! HTTP driver, grounded on `internal/driver/driver_http.go`. Request
//! shape: `{method, url, params, headers, data, json, timeout,
//! json_decode}`; response shape: `{status, headers, json, text}`.

use super::{Driver, DriverError};
use crate::value::{from_json, to_json, Value};
use async_trait::async_trait;
use reqwest::{Client, Method};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpDriverOptions {
    pub dial_timeout: Duration,
    pub timeout: Duration,
    pub max_idle_conns_per_host: usize,
}

impl Default for HttpDriverOptions {
    fn default() -> Self {
        HttpDriverOptions {
            dial_timeout: Duration::from_secs(3),
            timeout: Duration::from_secs(6),
            max_idle_conns_per_host: 2,
        }
    }
}

impl HttpDriverOptions {
    pub fn from_value(options: &Value) -> Result<Self, String> {
        let mut opts = HttpDriverOptions::default();
        if let Value::Map(map) = options {
            if let Some(v) = map.get("dial_timeout_ms").and_then(Value::as_i64) {
                opts.dial_timeout = Duration::from_millis(v.max(0) as u64);
            }
            if let Some(v) = map.get("timeout_ms").and_then(Value::as_i64) {
                opts.timeout = Duration::from_millis(v.max(0) as u64);
            }
            if let Some(v) = map.get("max_idle_conns_per_host").and_then(Value::as_i64) {
                opts.max_idle_conns_per_host = v.max(0) as usize;
            }
        }
        Ok(opts)
    }
}

pub struct HttpDriver {
    client: Client,
}

impl HttpDriver {
    pub fn new(options: HttpDriverOptions) -> Self {
        let client = Client::builder()
            .connect_timeout(options.dial_timeout)
            .timeout(options.timeout)
            .pool_max_idle_per_host(options.max_idle_conns_per_host)
            .build()
            .unwrap_or_else(|_| Client::new());
        HttpDriver { client }
    }
}

fn field_str<'a>(map: &'a BTreeMap<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

fn field_str_map(map: &BTreeMap<String, Value>, key: &str) -> BTreeMap<String, String> {
    match map.get(key) {
        Some(Value::Map(inner)) => inner
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
        _ => BTreeMap::new(),
    }
}

#[async_trait]
impl Driver for HttpDriver {
    async fn invoke(&self, request: Value) -> Result<Value, DriverError> {
        let Value::Map(req) = &request else {
            return Err(DriverError::bad_request(
                "http request must be an object",
            ));
        };

        let method_str = field_str(req, "method").unwrap_or("GET");
        let method = Method::from_str(&method_str.to_uppercase())
            .map_err(|e| DriverError::bad_request(format!("invalid method {method_str:?}: {e}")))?;
        let url = field_str(req, "url")
            .ok_or_else(|| DriverError::bad_request("missing required field \"url\""))?;

        let mut builder = self.client.request(method, url);

        let headers = field_str_map(req, "headers");
        for (key, value) in &headers {
            builder = builder.header(key, value);
        }

        let params = field_str_map(req, "params");
        if !params.is_empty() {
            builder = builder.query(&params);
        }

        if let Some(json_body) = req.get("json") {
            if !json_body.is_null() {
                builder = builder.json(&to_json(json_body));
            }
        } else if let Some(data) = field_str(req, "data") {
            builder = builder.body(data.to_string());
        }

        let response = builder.send().await.map_err(|e| classify(&e))?;
        let status = response.status().as_u16();
        let mut resp_headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(s) = value.to_str() {
                resp_headers.insert(name.to_string(), s.to_string());
            }
        }

        let json_decode = req.get("json_decode").and_then(Value::as_bool).unwrap_or(false);
        let body_text = response
            .text()
            .await
            .map_err(|e| DriverError::internal(format!("failed to read response body: {e}")))?;

        let mut out = BTreeMap::new();
        out.insert("status".to_string(), Value::Int(status as i64));
        out.insert(
            "headers".to_string(),
            Value::Map(resp_headers.into_iter().map(|(k, v)| (k, Value::Str(v))).collect()),
        );
        if json_decode {
            let parsed: serde_json::Value = serde_json::from_str(&body_text)
                .map_err(|e| DriverError::internal(format!("response is not valid JSON: {e}")))?;
            out.insert("json".to_string(), from_json(&parsed));
            out.insert("text".to_string(), Value::Str(String::new()));
        } else {
            out.insert("json".to_string(), Value::Null);
            out.insert("text".to_string(), Value::Str(body_text));
        }

        Ok(Value::Map(out))
    }
}

fn classify(err: &reqwest::Error) -> DriverError {
    if err.is_timeout() {
        DriverError::new("Timeout", err.to_string())
    } else if err.is_connect() {
        DriverError::new("ConnectionError", err.to_string())
    } else {
        DriverError::internal(err.to_string())
    }
}
