//! Published annotations on exposed services

use crate::cluster::ClusterApi;
use crate::error::Result;
use crate::ownership::ServiceKey;
use crate::patch::service_patch;
use expose_api::annotations;
use k8s_openapi::api::core::v1::Service;
use tracing::debug;

/// Copy of `service` publishing `url`, and `host` under the key named by
/// the service's `exposeHostNameAs` annotation
pub fn with_published(service: &Service, url: &str, host: &str) -> Service {
    let mut published = service.clone();
    let target = published.metadata.annotations.get_or_insert_with(Default::default);
    target.insert(annotations::EXPOSE_URL.to_string(), url.to_string());
    if let Some(key) = host_name_key(service) {
        target.insert(key, host.to_string());
    }
    published
}

/// Copy of `service` without the published annotations, `None` when there
/// was nothing to remove
pub fn without_published(service: &Service) -> Option<Service> {
    let mut cleaned = service.clone();
    let target = cleaned.metadata.annotations.as_mut()?;
    let mut removed = target.remove(annotations::EXPOSE_URL).is_some();
    if let Some(key) = host_name_key(service) {
        removed |= target.remove(&key).is_some();
    }
    removed.then_some(cleaned)
}

fn host_name_key(service: &Service) -> Option<String> {
    service
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::EXPOSE_HOST_NAME_AS))
        .map(|key| key.trim())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

/// Send the merge patch from `observed` to `desired`, if any.
///
/// Returns whether a write was issued.
pub async fn apply_service_patch<C: ClusterApi + ?Sized>(
    cluster: &C,
    observed: &Service,
    desired: &Service,
) -> Result<bool> {
    let Some(patch) = service_patch(observed, desired)? else {
        debug!("Service {} is up to date", ServiceKey::of(observed));
        return Ok(false);
    };
    let namespace = observed.metadata.namespace.as_deref().unwrap_or_default();
    let name = observed.metadata.name.as_deref().unwrap_or_default();
    debug!("Patching service {}/{}: {}", namespace, name, patch);
    cluster.patch_service(namespace, name, &patch).await?;
    Ok(true)
}
