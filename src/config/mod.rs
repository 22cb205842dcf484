// Configuration module entry point
// Loads layered configuration and holds per-process application state

mod state;
mod types;

use std::net::SocketAddr;

pub use state::AppState;
pub use types::Config;

/// Address the server always listens on
pub const LISTEN_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 8080);

impl Config {
    /// Load configuration from a file path (extension optional)
    /// Missing files are not an error; defaults and environment still apply.
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("SYSINFO")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_default("logging.access_log", true)?
            .set_default("logging.access_log_format", "combined")?
            .set_default("performance.keep_alive", true)?
            .set_default("performance.connection_timeout", 30)?
            .set_default("performance.shutdown_timeout", 10)?
            .build()?;

        settings.try_deserialize()
    }

    pub fn connection_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.performance.connection_timeout)
    }

    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.performance.shutdown_timeout)
    }
}
