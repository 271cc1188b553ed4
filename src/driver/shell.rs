//! Shell driver, grounded on `internal/driver/driver_shell.go`. Runs
//! `{shebang} {args...} {command}` with the driver's env merged under
//! the request's env (request wins, same as `envs = append(d.envs,
//! envs...)` in the source). Request shape: `{command, envs}`; response
//! shape: `{stdout, stderr, exit_code}`.

use super::{Driver, DriverError};
use crate::value::Value;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct ShellDriverOptions {
    pub shebang: String,
    pub args: Vec<String>,
    pub envs: BTreeMap<String, String>,
}

impl Default for ShellDriverOptions {
    fn default() -> Self {
        ShellDriverOptions {
            shebang: "bash".to_string(),
            args: vec!["-c".to_string()],
            envs: BTreeMap::new(),
        }
    }
}

impl ShellDriverOptions {
    pub fn from_value(options: &Value) -> Result<Self, String> {
        let mut opts = ShellDriverOptions::default();
        if let Value::Map(map) = options {
            if let Some(s) = map.get("shebang").and_then(Value::as_str) {
                opts.shebang = s.to_string();
            }
            if let Some(Value::Seq(items)) = map.get("args") {
                opts.args = items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
            }
            if let Some(Value::Map(envs)) = map.get("envs") {
                opts.envs = envs
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.trim().to_string())))
                    .collect();
            }
        }
        Ok(opts)
    }
}

pub struct ShellDriver {
    shebang: String,
    args: Vec<String>,
    envs: BTreeMap<String, String>,
}

impl ShellDriver {
    pub fn new(options: ShellDriverOptions) -> Self {
        ShellDriver {
            shebang: options.shebang,
            args: options.args,
            envs: options.envs,
        }
    }
}

#[async_trait]
impl Driver for ShellDriver {
    async fn invoke(&self, request: Value) -> Result<Value, DriverError> {
        let Value::Map(req) = &request else {
            return Err(DriverError::bad_request("shell request must be an object"));
        };

        let command = req
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::bad_request("missing required field \"command\""))?;

        let mut cmd = Command::new(&self.shebang);
        cmd.args(&self.args).arg(command);
        cmd.envs(&self.envs);
        if let Some(Value::Map(req_envs)) = req.get("envs") {
            for (k, v) in req_envs {
                if let Some(s) = v.as_str() {
                    cmd.env(k, s.trim());
                }
            }
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| DriverError::internal(format!("failed to spawn shell: {e}")))?;

        let mut out = BTreeMap::new();
        out.insert(
            "stdout".to_string(),
            Value::Str(String::from_utf8_lossy(&output.stdout).into_owned()),
        );
        out.insert(
            "stderr".to_string(),
            Value::Str(String::from_utf8_lossy(&output.stderr).into_owned()),
        );
        out.insert(
            "exit_code".to_string(),
            Value::Int(output.status.code().unwrap_or(-1) as i64),
        );

        Ok(Value::Map(out))
    }
}
