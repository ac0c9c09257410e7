//! Exposure strategies and their factory

mod ingress;
mod loadbalancer;
mod nodeport;

pub use ingress::IngressStrategy;
pub use loadbalancer::LoadBalancerStrategy;
pub use nodeport::NodePortStrategy;

use crate::cluster::ClusterApi;
use crate::error::{ExposeError, Result};
use crate::ownership::ServiceKey;
use async_trait::async_trait;
use expose_api::{ExposerKind, StrategyConfig};
use k8s_openapi::api::core::v1::{Service, ServicePort};
use std::sync::Arc;
use tracing::info;

/// A way of making services reachable from outside the cluster.
///
/// The controller calls `sync` at the start of every reconciliation epoch,
/// then `add` for exposed services, `clean` for services that stopped
/// being exposed and `delete` for removed services. Operations take
/// `&mut self`: one strategy instance is driven by a single task.
#[async_trait]
pub trait ExposeStrategy: Send {
    /// Short name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Rebuild the strategy's view of the cluster
    async fn sync(&mut self) -> Result<()>;

    /// Whether the strategy reached its steady state
    fn has_synced(&self) -> bool;

    /// Expose a service and publish its URL
    async fn add(&mut self, service: &Service) -> Result<()>;

    /// Undo the exposure of a service that is no longer marked
    async fn clean(&mut self, service: &Service) -> Result<()>;

    /// Forget a service removed from the cluster
    async fn delete(&mut self, service: &Service) -> Result<()>;
}

/// Build the strategy selected by `config.exposer`
pub async fn new_strategy(
    cluster: Arc<dyn ClusterApi>,
    config: StrategyConfig,
) -> Result<Box<dyn ExposeStrategy>> {
    let strategy: Box<dyn ExposeStrategy> = match config.exposer {
        ExposerKind::Ingress => Box::new(IngressStrategy::new(cluster, config)?),
        ExposerKind::NodePort => Box::new(NodePortStrategy::new(cluster, &config).await?),
        ExposerKind::LoadBalancer => Box::new(LoadBalancerStrategy::new(cluster)),
    };
    info!("Using the {} exposer", strategy.name());
    Ok(strategy)
}

/// The first declared port, rejecting any other unless `allow_many`
pub(crate) fn single_port(service: &Service, allow_many: bool) -> Result<&ServicePort> {
    let ports = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_deref())
        .unwrap_or_default();
    match ports {
        [] => Err(ExposeError::NoPorts {
            service: ServiceKey::of(service).to_string(),
        }),
        [port] => Ok(port),
        [port, ..] if allow_many => Ok(port),
        _ => Err(ExposeError::TooManyPorts {
            service: ServiceKey::of(service).to_string(),
            count: ports.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeCluster;
    use k8s_openapi::api::core::v1::ServiceSpec;

    fn service(ports: &[i32]) -> Service {
        Service {
            spec: Some(ServiceSpec {
                ports: Some(
                    ports
                        .iter()
                        .map(|port| ServicePort {
                            port: *port,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_port() {
        assert!(matches!(single_port(&service(&[]), true), Err(ExposeError::NoPorts { .. })));
        assert_eq!(single_port(&service(&[80]), false).unwrap().port, 80);
        assert_eq!(single_port(&service(&[80, 443]), true).unwrap().port, 80);
        assert!(matches!(
            single_port(&service(&[80, 443]), false),
            Err(ExposeError::TooManyPorts { count: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_factory_selects_exposer() {
        let cluster = Arc::new(FakeCluster::new());
        let config = StrategyConfig {
            domain: "example.com".to_string(),
            ..Default::default()
        };
        let strategy = new_strategy(cluster.clone(), config.clone()).await.unwrap();
        assert_eq!(strategy.name(), "ingress");

        let strategy = new_strategy(
            cluster.clone(),
            StrategyConfig {
                exposer: ExposerKind::LoadBalancer,
                ..config.clone()
            },
        )
        .await
        .unwrap();
        assert_eq!(strategy.name(), "loadbalancer");

        let strategy = new_strategy(
            cluster,
            StrategyConfig {
                exposer: ExposerKind::NodePort,
                node_ip: "1.2.3.4".to_string(),
                ..config
            },
        )
        .await
        .unwrap();
        assert_eq!(strategy.name(), "nodeport");
    }

    #[tokio::test]
    async fn test_factory_rejects_ingress_without_domain() {
        let result = new_strategy(Arc::new(FakeCluster::new()), StrategyConfig::default()).await;
        assert!(matches!(result, Err(ExposeError::InvalidConfiguration(_))));
    }
}
