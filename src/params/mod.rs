//! System parameter module
//!
//! Maps parameter names to the sources that produce their current value.
//! The registry is built once at startup and shared read-only between requests.

mod duration;
mod version;

pub use duration::BootDuration;
pub use version::{AppVersion, VERSION};

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Scalar value of a parameter
///
/// Serializes as a bare JSON string or number.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Number(f64),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// A resolved name/value pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub value: ParamValue,
}

/// Client-facing resolution failure
///
/// The `Display` output is sent to the client verbatim, so variants carry
/// no internal detail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no such parameter")]
    UnknownParameter,
    #[error("could not measure {0}")]
    Measurement(&'static str),
}

/// Something that can produce the current value of one parameter
#[async_trait]
pub trait ParamSource: Send + Sync {
    async fn value(&self) -> Result<ParamValue, ResolveError>;
}

/// Name to source dispatch table
#[derive(Default, Clone)]
pub struct ParamRegistry {
    sources: HashMap<String, Arc<dyn ParamSource>>,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `version` and `duration` parameters
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("version", AppVersion);
        registry.register("duration", BootDuration::default());
        registry
    }

    /// Register (or replace) the source for `name`
    pub fn register(&mut self, name: impl Into<String>, source: impl ParamSource + 'static) {
        self.sources.insert(name.into(), Arc::new(source));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub async fn resolve(&self, name: &str) -> Result<Parameter, ResolveError> {
        let source = self
            .sources
            .get(name)
            .ok_or(ResolveError::UnknownParameter)?;
        let value = source.value().await?;
        Ok(Parameter {
            name: name.to_string(),
            value,
        })
    }
}
