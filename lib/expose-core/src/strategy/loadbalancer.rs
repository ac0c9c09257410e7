//! Exposure through a cloud load balancer

use super::{single_port, ExposeStrategy};
use crate::cluster::ClusterApi;
use crate::error::Result;
use crate::node::join_host_port;
use crate::ownership::ServiceKey;
use crate::service::{apply_service_patch, with_published, without_published};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const LOAD_BALANCER: &str = "LoadBalancer";
const CLUSTER_IP: &str = "ClusterIP";

/// Switches exposed services to `LoadBalancer` and publishes the address
/// the cloud provider assigned
pub struct LoadBalancerStrategy {
    cluster: Arc<dyn ClusterApi>,
    pending: BTreeSet<ServiceKey>,
}

impl LoadBalancerStrategy {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            cluster,
            pending: BTreeSet::new(),
        }
    }

    pub fn pending(&self) -> &BTreeSet<ServiceKey> {
        &self.pending
    }
}

/// First address in the service's load balancer status
fn assigned_address(service: &Service) -> Option<&str> {
    let ingress = service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?;
    ingress
        .ip
        .as_deref()
        .or(ingress.hostname.as_deref())
        .filter(|address| !address.is_empty())
}

#[async_trait]
impl ExposeStrategy for LoadBalancerStrategy {
    fn name(&self) -> &'static str {
        "loadbalancer"
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

        let port = single_port(service, true)?.port;
        let mut desired = service.clone();
        if let Some(spec) = desired.spec.as_mut() {
            spec.type_ = Some(LOAD_BALANCER.to_string());
        }

        let address = assigned_address(service);
        let desired = match address {
            Some(address) => {
                let host = join_host_port(address, port);
                with_published(&desired, &format!("http://{}", host), &host)
            }
            None => with_published(&desired, "", ""),
        };

        if apply_service_patch(self.cluster.as_ref(), service, &desired).await? {
            info!("Exposed {} through a load balancer", key);
        }
        if address.is_none() {
            debug!("Waiting for a load balancer address for {}", key);
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
