//! Command line flags and the strategy configuration they resolve to

use anyhow::{Context, Result};
use clap::Parser;
use expose_api::{ExposerKind, StrategyConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Exposes annotated services outside the cluster")]
pub struct Args {
    /// Strategy configuration file (YAML)
    #[arg(long, env = "EXPOSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Exposer to use: ingress, nodeport or loadbalancer
    #[arg(long, env = "EXPOSE_EXPOSER")]
    pub exposer: Option<ExposerKind>,

    /// Domain services are exposed under
    #[arg(long, env = "EXPOSE_DOMAIN")]
    pub domain: Option<String>,

    /// Only watch this namespace
    #[arg(long, env = "EXPOSE_NAMESPACE")]
    pub namespace: Option<String>,

    /// Seconds between full resyncs
    #[arg(long, env = "EXPOSE_RESYNC_INTERVAL", default_value_t = 300)]
    pub resync_interval: u64,

    /// Metrics and health listener
    #[arg(long, env = "EXPOSE_METRICS_ADDR", default_value = "0.0.0.0:9090")]
    pub metrics_addr: SocketAddr,

    /// Log as JSON lines
    #[arg(long, env = "EXPOSE_LOG_JSON")]
    pub log_json: bool,
}

impl Args {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval.max(1))
    }

    /// Configuration file contents with the flags applied on top
    pub async fn strategy_config(&self) -> Result<StrategyConfig> {
        let document = match &self.config {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?,
            None => String::new(),
        };
        let config = StrategyConfig::from_yaml(&document).context("invalid strategy configuration")?;
        Ok(self.apply_overrides(config))
    }

    fn apply_overrides(&self, mut config: StrategyConfig) -> StrategyConfig {
        if let Some(exposer) = self.exposer {
            config.exposer = exposer;
        }
        if let Some(domain) = &self.domain {
            config.domain = domain.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.namespace = Some(namespace.clone());
        }
        config
    }
}
