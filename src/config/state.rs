// Application state module
// Shared, read-only state handed to every connection

use super::types::Config;
use crate::params::ParamRegistry;

/// Application state
pub struct AppState {
    pub config: Config,
    pub params: ParamRegistry,
}

impl AppState {
    pub fn new(config: Config, params: ParamRegistry) -> Self {
        Self { config, params }
    }

    /// State with the built-in parameter set
    pub fn with_default_params(config: Config) -> Self {
        Self::new(config, ParamRegistry::with_defaults())
    }
}
