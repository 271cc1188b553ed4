//! # Driver (Context)
//!
//! A driver is anything invokable with a dynamic request that returns a
//! dynamic response or a typed error. The reference implementation
//! (`internal/driver/driver.go`) gets there via reflection over arbitrary
//! Go methods — arity-based dispatch, structural coercion, a wrapper
//! type per calling convention. There is no reflection in this language,
//! so per §9 that whole dispatch table collapses into a small closed set
//! of concrete drivers, each implementing [`Driver`] directly. The
//! *observable* contract survives: a driver still returns either a
//! decoded response value or a `DriverError{code, message}`, and an
//! untyped/unclassified failure still surfaces to the scheduler as
//! `ErrCode = "Internal"`.

pub mod http;
pub mod shell;

use crate::value::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// A typed driver failure: `Code` feeds directly into `StepStat.ErrCode`
/// per §7 ("Driver invocation errors (typed)"); `message` is diagnostic
/// only and never used for control flow.
#[derive(Debug, Error, Clone)]
#[error("[{code}]: {message}")]
pub struct DriverError {
    pub code: String,
    pub message: String,
}

impl DriverError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        DriverError {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The catch-all code for failures a driver can't classify more
    /// specifically; the scheduler also falls back to this when a driver
    /// error arrives through a path that can't carry a typed code (see
    /// §7, "Driver invocation errors (untyped)").
    pub fn internal(message: impl Into<String>) -> Self {
        DriverError::new("Internal", message)
    }

    /// Raised when the materialized request can't be structurally
    /// decoded into the driver's own request shape — this repo's
    /// equivalent of the reflection design's `ConstructReqFailed`/
    /// `InvalidMethodName` family (§4.D): there is no runtime method
    /// dispatch here, so `BadRequest` is the one terminal point for "the
    /// template produced something this driver can't decode".
    pub fn bad_request(message: impl Into<String>) -> Self {
        DriverError::new("BadRequest", message)
    }
}

#[async_trait]
pub trait Driver: Send + Sync {
    async fn invoke(&self, request: Value) -> Result<Value, DriverError>;
}

#[derive(Debug, Error)]
pub enum DriverBuildError {
    #[error("unknown driver type {0:?}")]
    UnknownType(String),
    #[error("failed to build driver {name:?} of type {kind:?}: {message}")]
    Construct {
        name: String,
        kind: String,
        message: String,
    },
}

/// Process-wide registry mapping a context's `type` key to its built
/// instance. Built-ins are `Shell` and `Http` (§6); additional entries
/// may be registered before the plan starts, same as the reference
/// registry's init-time registration (§9) — in a language without
/// static initializers the caller simply registers explicitly, which is
/// what [`Registry::with_builtins`] does.
#[derive(Default)]
pub struct Registry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, driver: Arc<dyn Driver>) {
        self.drivers.insert(name.into(), driver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(name).cloned()
    }

    /// Builds a driver instance for the given `type` + options payload,
    /// using the fixed built-in constructors. Returns `UnknownType` for
    /// anything else, matching §7's "driver registry miss" build-time
    /// error.
    pub fn build(kind: &str, options: &Value) -> Result<Arc<dyn Driver>, DriverBuildError> {
        match kind {
            "Http" => {
                let opts = http::HttpDriverOptions::from_value(options).map_err(|message| {
                    DriverBuildError::Construct {
                        name: kind.to_string(),
                        kind: kind.to_string(),
                        message,
                    }
                })?;
                Ok(Arc::new(http::HttpDriver::new(opts)))
            }
            "Shell" => {
                let opts = shell::ShellDriverOptions::from_value(options).map_err(|message| {
                    DriverBuildError::Construct {
                        name: kind.to_string(),
                        kind: kind.to_string(),
                        message,
                    }
                })?;
                Ok(Arc::new(shell::ShellDriver::new(opts)))
            }
            other => Err(DriverBuildError::UnknownType(other.to_string())),
        }
    }
}
