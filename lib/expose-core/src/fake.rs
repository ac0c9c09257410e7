//! In-memory cluster for testing
//!
//! Stores routing resources, services and nodes, applies merge patches the
//! way the API server does and counts every call so tests can assert on
//! the writes a reconciliation issued.

use crate::cluster::ClusterApi;
use crate::error::{ExposeError, Result};
use crate::patch;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::networking::v1::Ingress;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type ObjectKey = (String, String);

/// Calls that can be made to fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FakeOperation {
    Get,
    Create,
    Patch,
    Delete,
    PatchService,
}

/// Counts of calls performed, for assertions
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub lists: usize,
    pub gets: usize,
    pub creates: usize,
    pub patches: usize,
    pub deletes: usize,
    pub service_patches: usize,
    pub node_lists: usize,
}

impl OperationCounts {
    /// Every call that mutated, or tried to mutate, the cluster
    pub fn writes(&self) -> usize {
        self.creates + self.patches + self.deletes + self.service_patches
    }
}

#[derive(Default)]
struct State {
    ingresses: BTreeMap<ObjectKey, Ingress>,
    services: BTreeMap<ObjectKey, Service>,
    nodes: Vec<Node>,
    counts: OperationCounts,
    failures: BTreeSet<(FakeOperation, String)>,
    patch_log: Vec<(String, Value)>,
    version: u64,
    uid: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn check(&self, operation: FakeOperation, name: &str) -> std::result::Result<(), kube::Error> {
        if self.failures.contains(&(operation, name.to_string())) {
            Err(api_error(500, "InternalError", &format!("injected failure for {}", name)))
        } else {
            Ok(())
        }
    }
}

/// ClusterApi over in-memory stores
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated routing resources
    pub fn with_ingresses(ingresses: impl IntoIterator<Item = Ingress>) -> Self {
        let cluster = Self::new();
        for ingress in ingresses {
            cluster.insert_ingress(ingress);
        }
        cluster
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a routing resource as is, without counting a call
    pub fn insert_ingress(&self, mut ingress: Ingress) {
        let mut state = self.state();
        ingress.metadata.resource_version = Some(state.next_version());
        state.ingresses.insert(key_of(&ingress.metadata), ingress);
    }

    pub fn insert_service(&self, mut service: Service) {
        let mut state = self.state();
        service.metadata.resource_version = Some(state.next_version());
        state.services.insert(key_of(&service.metadata), service);
    }

    pub fn insert_node(&self, node: Node) {
        self.state().nodes.push(node);
    }

    pub fn ingress(&self, namespace: &str, name: &str) -> Option<Ingress> {
        self.state()
            .ingresses
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Every stored routing resource, ordered by namespace and name
    pub fn ingresses(&self) -> Vec<Ingress> {
        self.state().ingresses.values().cloned().collect()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state()
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Make every call of `operation` on `name` fail with a server error
    pub fn fail(&self, operation: FakeOperation, name: &str) {
        self.state().failures.insert((operation, name.to_string()));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.state().counts.clone()
    }

    pub fn reset_counts(&self) {
        let mut state = self.state();
        state.counts = OperationCounts::default();
        state.patch_log.clear();
    }

    /// Patches sent so far, as `(namespace/name, patch)`
    pub fn patches(&self) -> Vec<(String, Value)> {
        self.state().patch_log.clone()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_ingresses(&self, namespace: Option<&str>) -> Result<Vec<Ingress>> {
        let mut state = self.state();
        state.counts.lists += 1;
        Ok(state
            .ingresses
            .iter()
            .filter(|((ns, _), _)| namespace.map_or(true, |wanted| ns == wanted))
            .map(|(_, ingress)| ingress.clone())
            .collect())
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>> {
        let mut state = self.state();
        state.counts.gets += 1;
        state
            .check(FakeOperation::Get, name)
            .map_err(ExposeError::api("get", "Ingress", namespace, name))?;
        Ok(state
            .ingresses
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress> {
        let key = key_of(&ingress.metadata);
        let (namespace, name) = (key.0.clone(), key.1.clone());
        let mut state = self.state();
        state.counts.creates += 1;
        state
            .check(FakeOperation::Create, &name)
            .map_err(ExposeError::api("create", "Ingress", &namespace, &name))?;
        if state.ingresses.contains_key(&key) {
            let error = api_error(409, "AlreadyExists", &format!("ingress {} already exists", name));
            return Err(ExposeError::api("create", "Ingress", &namespace, &name)(error));
        }

        let mut created = ingress.clone();
        state.uid += 1;
        created.metadata.uid = Some(format!("ingress-uid-{}", state.uid));
        created.metadata.resource_version = Some(state.next_version());
        state.ingresses.insert(key, created.clone());
        Ok(created)
    }

    async fn patch_ingress(&self, namespace: &str, name: &str, patch: &Value) -> Result<Ingress> {
        let key = (namespace.to_string(), name.to_string());
        let mut state = self.state();
        state.counts.patches += 1;
        state
            .patch_log
            .push((format!("{}/{}", namespace, name), patch.clone()));
        state
            .check(FakeOperation::Patch, name)
            .map_err(ExposeError::api("patch", "Ingress", namespace, name))?;

        let current = state.ingresses.get(&key).cloned().ok_or_else(|| {
            ExposeError::api("patch", "Ingress", namespace, name)(not_found(name))
        })?;
        let mut patched: Ingress = merge(&current, patch)?;
        patched.metadata.resource_version = Some(state.next_version());
        state.ingresses.insert(key, patched.clone());
        Ok(patched)
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<bool> {
        let mut state = self.state();
        state.counts.deletes += 1;
        state
            .check(FakeOperation::Delete, name)
            .map_err(ExposeError::api("delete", "Ingress", namespace, name))?;
        Ok(state
            .ingresses
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some())
    }

    async fn patch_service(&self, namespace: &str, name: &str, patch: &Value) -> Result<Service> {
        let key = (namespace.to_string(), name.to_string());
        let mut state = self.state();
        state.counts.service_patches += 1;
        state
            .patch_log
            .push((format!("{}/{}", namespace, name), patch.clone()));
        state
            .check(FakeOperation::PatchService, name)
            .map_err(ExposeError::api("patch", "Service", namespace, name))?;

        let current = state.services.get(&key).cloned().ok_or_else(|| {
            ExposeError::api("patch", "Service", namespace, name)(not_found(name))
        })?;
        let mut patched: Service = merge(&current, patch)?;
        patched.metadata.resource_version = Some(state.next_version());
        state.services.insert(key, patched.clone());
        Ok(patched)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let mut state = self.state();
        state.counts.node_lists += 1;
        Ok(state.nodes.clone())
    }
}

fn key_of(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> ObjectKey {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

fn merge<T: Serialize + DeserializeOwned>(current: &T, merge_patch: &Value) -> Result<T> {
    let mut value = serde_json::to_value(current)?;
    patch::apply(&mut value, merge_patch);
    Ok(serde_json::from_value(value)?)
}

fn not_found(name: &str) -> kube::Error {
    api_error(404, "NotFound", &format!("{} not found", name))
}

fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    })
}
