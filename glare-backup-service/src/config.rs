use crate::service::dispatcher::DispatchMode;
use glare_common::config::{ConfigLoader, DbPostgresConfig};
use glare_common::tracing::TracingConfig;
use glare_common::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Env flag selecting push mode; pull mode is the default.
pub const PLAN_SCHEDULER_ENV: &str = "SERVER_PLAN_SCHEDULER_ENABLED";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupServiceConfig {
    pub tracing: TracingConfig,
    pub environment: String,
    pub http_port: u16,
    pub db: DbPostgresConfig,
    pub cors_origin_regex: String,
    /// Push mode when true: the dispatcher POSTs to workers synchronously.
    pub plan_scheduler_enabled: bool,
    #[serde(with = "humantime_serde")]
    pub scheduler_poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub lease_ttl: Duration,
}

impl Default for BackupServiceConfig {
    fn default() -> Self {
        Self {
            tracing: TracingConfig::local_dev("backup-service"),
            environment: "dev".to_string(),
            http_port: 8080,
            db: DbPostgresConfig::default(),
            cors_origin_regex: "https://*.glare.app".to_string(),
            plan_scheduler_enabled: false,
            scheduler_poll_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(30 * 60),
            lease_ttl: Duration::from_secs(120),
        }
    }
}

impl BackupServiceConfig {
    /// The deployment flag wins over the config file so fleets can flip the
    /// interaction model without shipping new configs.
    pub fn dispatch_mode(&self) -> DispatchMode {
        let enabled = std::env::var(PLAN_SCHEDULER_ENV)
            .map(|value| value == "true")
            .unwrap_or(self.plan_scheduler_enabled);
        if enabled {
            DispatchMode::Push
        } else {
            DispatchMode::Pull
        }
    }
}

impl SafeDisplay for BackupServiceConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "tracing:");
        let _ = writeln!(&mut result, "{}", self.tracing.to_safe_string_indented());
        let _ = writeln!(&mut result, "environment: {}", self.environment);
        let _ = writeln!(&mut result, "HTTP port: {}", self.http_port);
        let _ = writeln!(&mut result, "DB:");
        let _ = writeln!(&mut result, "{}", self.db.to_safe_string_indented());
        let _ = writeln!(&mut result, "CORS origin regex: {}", self.cors_origin_regex);
        let _ = writeln!(
            &mut result,
            "plan scheduler enabled: {}",
            self.plan_scheduler_enabled
        );
        let _ = writeln!(
            &mut result,
            "scheduler poll interval: {:?}",
            self.scheduler_poll_interval
        );
        let _ = writeln!(&mut result, "sweep interval: {:?}", self.sweep_interval);
        let _ = writeln!(&mut result, "lease TTL: {:?}", self.lease_ttl);
        result
    }
}

pub fn make_config_loader() -> ConfigLoader<BackupServiceConfig> {
    ConfigLoader::new(&PathBuf::from("config/backup-service.toml"))
}
