use anyhow::Result;
use clap::Parser;
use expose_core::{new_strategy, ClusterApi, KubeCluster};
use kube::Client;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod controller;
mod metrics;
mod settings;

use controller::ExposeController;
use metrics::Metrics;
use settings::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("Starting expose-controller...");

    let config = args.strategy_config().await?;
    info!(
        "Exposer {} for domain '{}' in {}",
        config.exposer,
        config.domain,
        config.namespace.as_deref().unwrap_or("all namespaces")
    );

    let client = Client::try_default().await?;
    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(client.clone()));
    let namespace = config.namespace.clone();
    let strategy = new_strategy(cluster, config).await?;

    let metrics = Arc::new(Metrics::new()?);
    let ready = Arc::new(AtomicBool::new(false));

    let metrics_addr = args.metrics_addr;
    let server_metrics = metrics.clone();
    let server_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_addr, server_metrics, server_ready).await {
            error!("Metrics server error: {}", e);
        }
    });

    let controller = ExposeController::new(
        client,
        strategy,
        namespace,
        args.resync_interval(),
        metrics,
        ready,
    );

    tokio::select! {
        result = controller.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received, exiting..."),
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
