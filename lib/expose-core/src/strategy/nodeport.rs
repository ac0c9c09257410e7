//! Exposure on a port of the cluster's only node

use super::{single_port, ExposeStrategy};
use crate::cluster::ClusterApi;
use crate::error::Result;
use crate::node::{join_host_port, resolve_node_address};
use crate::ownership::ServiceKey;
use crate::service::{apply_service_patch, with_published, without_published};
use async_trait::async_trait;
use expose_api::StrategyConfig;
use k8s_openapi::api::core::v1::Service;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const NODE_PORT: &str = "NodePort";
const CLUSTER_IP: &str = "ClusterIP";

/// Switches exposed services to `NodePort` and publishes `node:port`.
///
/// Services whose node port is not allocated yet stay pending until a
/// later Add sees it.
pub struct NodePortStrategy {
    cluster: Arc<dyn ClusterApi>,
    node_address: String,
    pending: BTreeSet<ServiceKey>,
}

impl NodePortStrategy {
    pub async fn new(cluster: Arc<dyn ClusterApi>, config: &StrategyConfig) -> Result<Self> {
        let node_address = resolve_node_address(cluster.as_ref(), &config.node_ip).await?;
        Ok(Self {
            cluster,
            node_address,
            pending: BTreeSet::new(),
        })
    }

    /// Services waiting for their node port
    pub fn pending(&self) -> &BTreeSet<ServiceKey> {
        &self.pending
    }
}

#[async_trait]
impl ExposeStrategy for NodePortStrategy {
    fn name(&self) -> &'static str {
        "nodeport"
    }

    async fn sync(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }

    fn has_synced(&self) -> bool {
        self.pending.is_empty()
    }

    #[instrument(skip_all, fields(service = %ServiceKey::of(service)))]
    async fn add(&mut self, service: &Service) -> Result<()> {
        let key = ServiceKey::of(service);
        self.pending.remove(&key);

        let node_port = single_port(service, false)?.node_port.unwrap_or(0);

        let mut desired = service.clone();
        if let Some(spec) = desired.spec.as_mut() {
            spec.type_ = Some(NODE_PORT.to_string());
            spec.external_ips = None;
        }
        let desired = if node_port > 0 {
            let host = join_host_port(&self.node_address, node_port);
            with_published(&desired, &format!("http://{}", host), &host)
        } else {
            with_published(&desired, "", "")
        };

        if apply_service_patch(self.cluster.as_ref(), service, &desired).await? {
            info!("Exposed {} on node port {}", key, node_port);
        }
        if node_port <= 0 {
            debug!("Waiting for a node port for {}", key);
            self.pending.insert(key);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(service = %ServiceKey::of(service)))]
    async fn clean(&mut self, service: &Service) -> Result<()> {
        self.pending.remove(&ServiceKey::of(service));

        let Some(mut cleaned) = without_published(service) else {
            return Ok(());
        };
        if let Some(spec) = cleaned.spec.as_mut() {
            spec.type_ = Some(CLUSTER_IP.to_string());
        }
        apply_service_patch(self.cluster.as_ref(), service, &cleaned).await?;
        Ok(())
    }

    async fn delete(&mut self, service: &Service) -> Result<()> {
        self.pending.remove(&ServiceKey::of(service));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExposeError;
    use crate::fake::FakeCluster;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn service(node_ports: &[i32], annotations: &[(&str, &str)]) -> Service {
        Service {
            metadata: ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some("svc".to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                ports: Some(
                    node_ports
                        .iter()
                        .map(|node_port| ServicePort {
                            port: 80,
                            node_port: Some(*node_port),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn strategy(cluster: &FakeCluster, node_ip: &str) -> NodePortStrategy {
        let config = StrategyConfig {
            node_ip: node_ip.to_string(),
            ..Default::default()
        };
        NodePortStrategy::new(Arc::new(cluster.clone()), &config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pending_until_node_port_allocated() {
        let cluster = FakeCluster::new();
        cluster.insert_service(service(&[0], &[]));
        let mut strategy = strategy(&cluster, "1.2.3.4").await;
        let key = ServiceKey::new("ns", "svc");

        strategy.add(&service(&[0], &[])).await.unwrap();
        assert!(strategy.pending().contains(&key));
        assert!(!strategy.has_synced());
        assert_eq!(
            cluster.patches()[0].1,
            json!({
                "metadata": {"annotations": {"fabric8.io/exposeUrl": ""}},
                "spec": {"type": "NodePort"},
            })
        );

        strategy.add(&service(&[30080], &[])).await.unwrap();
        assert!(strategy.pending().is_empty());
        assert!(strategy.has_synced());
        let published = cluster.service("ns", "svc").unwrap();
        assert_eq!(
            published.metadata.annotations.unwrap()["fabric8.io/exposeUrl"],
            "http://1.2.3.4:30080"
        );

        // a port reading back as zero goes back to pending
        strategy.add(&service(&[0], &[])).await.unwrap();
        assert!(strategy.pending().contains(&key));

        strategy.sync().await.unwrap();
        assert!(strategy.has_synced());
    }

    #[tokio::test]
    async fn test_publishes_host_key_and_brackets_ipv6() {
        let cluster = FakeCluster::new();
        let svc = service(&[30080], &[("fabric8.io/exposeHostNameAs", "node-host")]);
        cluster.insert_service(svc.clone());
        let mut strategy = strategy(&cluster, "fd00::1").await;

        strategy.add(&svc).await.unwrap();

        let annotations = cluster.service("ns", "svc").unwrap().metadata.annotations.unwrap();
        assert_eq!(annotations["fabric8.io/exposeUrl"], "http://[fd00::1]:30080");
        assert_eq!(annotations["node-host"], "[fd00::1]:30080");
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let cluster = FakeCluster::new();
        let svc = service(&[30080], &[]);
        cluster.insert_service(svc.clone());
        let mut strategy = strategy(&cluster, "1.2.3.4").await;

        strategy.add(&svc).await.unwrap();
        let exposed = cluster.service("ns", "svc").unwrap();
        cluster.reset_counts();

        strategy.add(&exposed).await.unwrap();
        assert_eq!(cluster.operation_counts().writes(), 0);
    }

    #[tokio::test]
    async fn test_port_count_errors() {
        let cluster = FakeCluster::new();
        let mut strategy = strategy(&cluster, "1.2.3.4").await;

        let err = strategy.add(&service(&[], &[])).await.unwrap_err();
        assert!(matches!(err, ExposeError::NoPorts { .. }));
        let err = strategy.add(&service(&[30080, 30443], &[])).await.unwrap_err();
        assert!(matches!(err, ExposeError::TooManyPorts { count: 2, .. }));
        assert_eq!(cluster.operation_counts().writes(), 0);
    }

    #[tokio::test]
    async fn test_clean_reverts_only_published_services() {
        let cluster = FakeCluster::new();
        let mut strategy = strategy(&cluster, "1.2.3.4").await;

        strategy.clean(&service(&[30080], &[])).await.unwrap();
        assert_eq!(cluster.operation_counts().service_patches, 0);

        let mut exposed = service(&[30080], &[("fabric8.io/exposeUrl", "http://1.2.3.4:30080")]);
        exposed.spec.as_mut().unwrap().type_ = Some("NodePort".to_string());
        cluster.insert_service(exposed.clone());

        strategy.clean(&exposed).await.unwrap();
        let cleaned = cluster.service("ns", "svc").unwrap();
        assert_eq!(cleaned.spec.unwrap().type_.as_deref(), Some("ClusterIP"));
        assert!(cleaned.metadata.annotations.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_drops_pending() {
        let cluster = FakeCluster::new();
        cluster.insert_service(service(&[0], &[]));
        let mut strategy = strategy(&cluster, "1.2.3.4").await;

        strategy.add(&service(&[0], &[])).await.unwrap();
        strategy.delete(&service(&[0], &[])).await.unwrap();
        assert!(strategy.has_synced());
    }
}
