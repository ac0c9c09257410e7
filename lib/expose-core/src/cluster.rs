//! Cluster API surface used by the strategies

use crate::error::{ExposeError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::Value;
use tracing::debug;

/// Reads and writes the strategies issue against the cluster.
///
/// Patches are JSON merge patches (RFC 7386).
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List routing resources in one namespace, or all of them
    async fn list_ingresses(&self, namespace: Option<&str>) -> Result<Vec<Ingress>>;

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>>;

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress>;

    async fn patch_ingress(&self, namespace: &str, name: &str, patch: &Value) -> Result<Ingress>;

    /// Delete a routing resource, `false` when it was already gone
    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<bool>;

    async fn patch_service(&self, namespace: &str, name: &str, patch: &Value) -> Result<Service>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;
}

/// ClusterApi backed by a live API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn ingresses(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_ingresses(&self, namespace: Option<&str>) -> Result<Vec<Ingress>> {
        let api: Api<Ingress> = match namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        };
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(ExposeError::api("list", "Ingress", namespace.unwrap_or("*"), "*"))?;
        debug!("Listed {} ingresses", list.items.len());
        Ok(list.items)
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>> {
        self.ingresses(namespace)
            .get_opt(name)
            .await
            .map_err(ExposeError::api("get", "Ingress", namespace, name))
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress> {
        let namespace = ingress.metadata.namespace.as_deref().unwrap_or_default();
        let name = ingress.metadata.name.as_deref().unwrap_or_default();
        self.ingresses(namespace)
            .create(&PostParams::default(), ingress)
            .await
            .map_err(ExposeError::api("create", "Ingress", namespace, name))
    }

    async fn patch_ingress(&self, namespace: &str, name: &str, patch: &Value) -> Result<Ingress> {
        self.ingresses(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(ExposeError::api("patch", "Ingress", namespace, name))
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<bool> {
        match self
            .ingresses(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(ExposeError::api("delete", "Ingress", namespace, name)(e)),
        }
    }

    async fn patch_service(&self, namespace: &str, name: &str, patch: &Value) -> Result<Service> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(ExposeError::api("patch", "Service", namespace, name))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(ExposeError::api("list", "Node", "", "*"))?;
        Ok(list.items)
    }
}
