//! Service watch loop driving an exposure strategy

use crate::metrics::Metrics;
use anyhow::{bail, Result};
use expose_api::annotations::is_exposed;
use expose_core::{ExposeStrategy, ServiceKey};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};
use kube_runtime::watcher::Event;
use kube_runtime::{watcher, WatchStreamExt};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

pub struct ExposeController {
    client: Client,
    strategy: Box<dyn ExposeStrategy>,
    namespace: Option<String>,
    resync: Duration,
    metrics: Arc<Metrics>,
    ready: Arc<AtomicBool>,
    // last seen state of every watched service
    services: BTreeMap<ServiceKey, Service>,
}

impl ExposeController {
    pub fn new(
        client: Client,
        strategy: Box<dyn ExposeStrategy>,
        namespace: Option<String>,
        resync: Duration,
        metrics: Arc<Metrics>,
        ready: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client,
            strategy,
            namespace,
            resync,
            metrics,
            ready,
            services: BTreeMap::new(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let api: Api<Service> = match &self.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        };
        info!(
            "Watching services in {}",
            self.namespace.as_deref().unwrap_or("all namespaces")
        );

        let stream = watcher(api, watcher::Config::default()).default_backoff();
        tokio::pin!(stream);
        let mut resync = interval_at(Instant::now() + self.resync, self.resync);
        let mut listing: Vec<Service> = Vec::new();

        loop {
            tokio::select! {
                event = stream.next() => match event {
                    Some(Ok(Event::Init)) => listing.clear(),
                    Some(Ok(Event::InitApply(service))) => listing.push(service),
                    Some(Ok(Event::InitDone)) => {
                        self.services = listing
                            .drain(..)
                            .map(|service| (ServiceKey::of(&service), service))
                            .collect();
                        self.resync_all().await;
                    }
                    Some(Ok(Event::Apply(service))) => {
                        self.services.insert(ServiceKey::of(&service), service.clone());
                        self.reconcile(&service).await;
                    }
                    Some(Ok(Event::Delete(service))) => {
                        self.services.remove(&ServiceKey::of(&service));
                        let result = self.strategy.delete(&service).await;
                        self.report("delete", &service, result);
                    }
                    Some(Err(e)) => warn!("Service watch error: {}", e),
                    None => bail!("service watch ended"),
                },
                _ = resync.tick() => self.resync_all().await,
            }
            self.ready.store(self.strategy.has_synced(), Ordering::Relaxed);
        }
    }

    /// Start a new epoch: sync, then reconcile every known service
    async fn resync_all(&mut self) {
        self.metrics.syncs_total.inc();
        match self.strategy.sync().await {
            Ok(()) => self.metrics.record("sync", true),
            Err(e) => {
                self.metrics.record("sync", false);
                error!("Sync failed: {}", e);
            }
        }

        let services: Vec<Service> = self.services.values().cloned().collect();
        debug!("Reconciling {} services", services.len());
        for service in &services {
            self.reconcile(service).await;
        }
    }

    async fn reconcile(&mut self, service: &Service) {
        let meta = &service.metadata;
        if is_exposed(meta.annotations.as_ref(), meta.labels.as_ref()) {
            let result = self.strategy.add(service).await;
            self.report("add", service, result);
        } else {
            let result = self.strategy.clean(service).await;
            self.report("clean", service, result);
        }
    }

    fn report(&self, op: &str, service: &Service, result: expose_core::Result<()>) {
        self.metrics.record(op, result.is_ok());
        let Err(e) = result else {
            return;
        };
        let key = ServiceKey::of(service);
        if e.is_configuration() {
            warn!("Cannot {} {}: {}", op, key, e);
        } else if e.is_conflict() {
            info!("Conflict on {} of {}, retrying on the next event: {}", op, key, e);
        } else {
            error!("Failed to {} {}: {}", op, key, e);
        }
    }
}
