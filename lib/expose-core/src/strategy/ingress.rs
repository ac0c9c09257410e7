//! Exposure through generated routing resources

use super::ExposeStrategy;
use crate::builder::{build_ingress, expand_url_template};
use crate::cluster::ClusterApi;
use crate::error::{ExposeError, Result};
use crate::index::{ExistingIndex, IndexBuilder};
use crate::options::ExposeOptions;
use crate::ownership::{classify, Ownership, ServiceKey};
use crate::patch::ingress_patch;
use crate::service::{apply_service_patch, with_published, without_published};
use async_trait::async_trait;
use expose_api::StrategyConfig;
use k8s_openapi::api::core::v1::Service;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Creates one routing resource per exposed service and keeps it in line
/// with the service's annotations
pub struct IngressStrategy {
    cluster: Arc<dyn ClusterApi>,
    config: StrategyConfig,
    existing: ExistingIndex,
    synced: bool,
}

impl IngressStrategy {
    pub fn new(cluster: Arc<dyn ClusterApi>, config: StrategyConfig) -> Result<Self> {
        if config.domain.trim().is_empty() {
            return Err(ExposeError::InvalidConfiguration(
                "the ingress exposer needs a domain".to_string(),
            ));
        }
        let config = config.with_default_template();
        expand_url_template(&config.url_template, "service", "namespace", &config.domain)?;

        Ok(Self {
            cluster,
            config,
            existing: ExistingIndex::new(),
            synced: false,
        })
    }

    /// Start from a known index instead of waiting for a sync
    pub fn with_existing(mut self, existing: ExistingIndex) -> Self {
        self.existing = existing;
        self
    }

    pub fn existing(&self) -> &ExistingIndex {
        &self.existing
    }

    /// Delete an indexed resource if it is still ours, then forget it.
    ///
    /// Resources that disappeared, lost their markers or moved to another
    /// service are forgotten without being touched.
    async fn reap(&mut self, key: &ServiceKey, namespace: &str, name: &str) -> Result<()> {
        match self.cluster.get_ingress(namespace, name).await? {
            None => debug!("Ingress {}/{} is already gone", namespace, name),
            Some(observed) => match classify(&observed) {
                Ownership::Unowned => {
                    warn!("Ingress {}/{} is no longer generated, leaving it", namespace, name)
                }
                Ownership::OwnedBy(owner) if &owner != key => {
                    info!("Ingress {}/{} now belongs to {}, leaving it", namespace, name, owner)
                }
                _ => {
                    self.cluster.delete_ingress(namespace, name).await?;
                    info!("Deleted ingress {}/{} of {}", namespace, name, key);
                }
            },
        }
        self.existing.remove(key, name);
        Ok(())
    }

    /// Reap every indexed resource of a service, returning the failures
    async fn reap_all(&mut self, key: &ServiceKey, namespace: &str) -> Vec<String> {
        let mut failures = Vec::new();
        for name in self.existing.remove_key(key) {
            if let Err(e) = self.reap(key, namespace, &name).await {
                warn!("Failed to remove ingress {}/{}: {}", namespace, name, e);
                failures.push(format!("{}: {}", name, e));
                self.existing.insert(key, &name);
            }
        }
        failures
    }
}

#[async_trait]
impl ExposeStrategy for IngressStrategy {
    fn name(&self) -> &'static str {
        "ingress"
    }

    #[instrument(skip(self))]
    async fn sync(&mut self) -> Result<()> {
        let ingresses = self
            .cluster
            .list_ingresses(self.config.namespace.as_deref())
            .await?;

        let mut builder = IndexBuilder::default();
        let mut failures = Vec::new();
        for ingress in ingresses {
            let namespace = ingress.metadata.namespace.clone().unwrap_or_default();
            let name = ingress.metadata.name.clone().unwrap_or_default();
            match classify(&ingress) {
                Ownership::Unowned => {}
                Ownership::OwnedBy(key) => builder.push(key, name),
                Ownership::Ambiguous => {
                    info!("Deleting ingress {}/{} without a single owning service", namespace, name);
                    if let Err(e) = self.cluster.delete_ingress(&namespace, &name).await {
                        warn!("Failed to delete ingress {}/{}: {}", namespace, name, e);
                        failures.push(format!("{}/{}: {}", namespace, name, e));
                    }
                }
            }
        }

        self.existing = builder.build();
        self.synced = true;
        info!(
            "Synced {} exposed services in {}",
            self.existing.len(),
            self.config.namespace.as_deref().unwrap_or("all namespaces")
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExposeError::SyncIncomplete { failures })
        }
    }

    fn has_synced(&self) -> bool {
        self.synced
    }

    #[instrument(skip_all, fields(service = %ServiceKey::of(service)))]
    async fn add(&mut self, service: &Service) -> Result<()> {
        let key = ServiceKey::of(service);
        let namespace = service.metadata.namespace.as_deref().unwrap_or_default();

        let options = ExposeOptions::from_service(service)?;
        let desired = build_ingress(service, &options, &self.config)?;

        let observed = self.cluster.get_ingress(namespace, &desired.name).await?;
        if let Some(observed) = &observed {
            match classify(observed) {
                Ownership::Unowned => return Err(not_managed(namespace, &desired.name, &key)),
                Ownership::OwnedBy(owner) if owner != key => {
                    return Err(not_managed(namespace, &desired.name, &key));
                }
                _ => {}
            }
        }

        match observed {
            Some(observed) => match ingress_patch(&observed, &desired.ingress)? {
                Some(patch) => {
                    debug!("Patching ingress {}/{}: {}", namespace, desired.name, patch);
                    self.cluster
                        .patch_ingress(namespace, &desired.name, &patch)
                        .await?;
                    info!("Updated ingress {}/{}", namespace, desired.name);
                }
                None => debug!("Ingress {}/{} is up to date", namespace, desired.name),
            },
            None => {
                self.cluster.create_ingress(&desired.ingress).await?;
                info!("Created ingress {}/{} for {}", namespace, desired.name, desired.url);
            }
        }

        self.existing.insert(&key, &desired.name);

        // previous names are dropped only once the desired resource is in place
        let stale: Vec<String> = self
            .existing
            .names(&key)
            .iter()
            .filter(|name| **name != desired.name)
            .cloned()
            .collect();
        for name in stale {
            self.reap(&key, namespace, &name).await?;
        }

        let published = with_published(service, &desired.url, &desired.host);
        apply_service_patch(self.cluster.as_ref(), service, &published).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(service = %ServiceKey::of(service)))]
    async fn clean(&mut self, service: &Service) -> Result<()> {
        let key = ServiceKey::of(service);
        let namespace = service.metadata.namespace.as_deref().unwrap_or_default();
        let failures = self.reap_all(&key, namespace).await;

        if let Some(cleaned) = without_published(service) {
            apply_service_patch(self.cluster.as_ref(), service, &cleaned).await?;
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExposeError::PartialClean {
                service: key.to_string(),
                failures,
            })
        }
    }

    #[instrument(skip_all, fields(service = %ServiceKey::of(service)))]
    async fn delete(&mut self, service: &Service) -> Result<()> {
        let key = ServiceKey::of(service);
        let namespace = service.metadata.namespace.as_deref().unwrap_or_default();
        let failures = self.reap_all(&key, namespace).await;

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExposeError::PartialClean {
                service: key.to_string(),
                failures,
            })
        }
    }
}

fn not_managed(namespace: &str, name: &str, key: &ServiceKey) -> ExposeError {
    ExposeError::NotManaged {
        kind: "Ingress",
        namespace: namespace.to_string(),
        name: name.to_string(),
        service: key.to_string(),
    }
}
