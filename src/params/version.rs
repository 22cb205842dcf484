// Application version parameter

use async_trait::async_trait;

use super::{ParamSource, ParamValue, ResolveError};

/// Version of the running server, taken from the package manifest
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppVersion;

#[async_trait]
impl ParamSource for AppVersion {
    async fn value(&self) -> Result<ParamValue, ResolveError> {
        Ok(ParamValue::Text(VERSION.to_string()))
    }
}
