use crate::safe_display::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TracingConfig {
    pub service_name: String,
    pub env_filter: String,
    pub json: bool,
    pub ansi: bool,
}

impl TracingConfig {
    pub fn local_dev(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            env_filter: "info".to_string(),
            json: false,
            ansi: true,
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::local_dev("glare")
    }
}

impl SafeDisplay for TracingConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "service name: {}", self.service_name);
        let _ = writeln!(&mut result, "env filter: {}", self.env_filter);
        let _ = writeln!(&mut result, "json: {}", self.json);
        result
    }
}

/// Initializes the global subscriber. `RUST_LOG` wins over the configured
/// filter so operators can raise verbosity without touching config files.
pub fn init_tracing_with_default_env_filter(config: &TracingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.env_filter.clone()));

    if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(config.ansi)
            .init();
    }
}
