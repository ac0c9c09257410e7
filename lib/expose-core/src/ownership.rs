//! Ownership of generated routing resources

use expose_api::annotations;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::fmt;

/// Identifies a service as `namespace/name`
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceKey(String);

impl ServiceKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self(format!("{}/{}", namespace, name))
    }

    pub fn of(service: &Service) -> Self {
        Self::new(
            service.metadata.namespace.as_deref().unwrap_or_default(),
            service.metadata.name.as_deref().unwrap_or_default(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who a routing resource belongs to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Not generated by the controller, must never be touched
    Unowned,
    /// Generated, but without exactly one owning service
    Ambiguous,
    /// Generated for this service
    OwnedBy(ServiceKey),
}

/// Classify a routing resource from its markers and owner references
pub fn classify(ingress: &Ingress) -> Ownership {
    let meta = &ingress.metadata;
    if !annotations::is_generated(meta.labels.as_ref(), meta.annotations.as_ref()) {
        return Ownership::Unowned;
    }

    let mut owners = meta
        .owner_references
        .iter()
        .flatten()
        .filter(|owner| owner.kind == "Service");

    match (owners.next(), owners.next()) {
        (Some(owner), None) => Ownership::OwnedBy(ServiceKey::new(
            meta.namespace.as_deref().unwrap_or_default(),
            &owner.name,
        )),
        _ => Ownership::Ambiguous,
    }
}

/// Owner reference pointing generated resources back at their service
pub fn service_owner_reference(service: &Service) -> OwnerReference {
    OwnerReference {
        api_version: "v1".to_string(),
        kind: "Service".to_string(),
        name: service.metadata.name.clone().unwrap_or_default(),
        uid: service.metadata.uid.clone().unwrap_or_default(),
        ..Default::default()
    }
}
