//! JSON merge patches (RFC 7386) between observed and desired objects
//!
//! Only the fields the controller manages are compared, so identity and
//! versioning fields (`resourceVersion`, `uid`, status) never end up in a
//! patch and an equivalent object produces no patch at all.

use crate::error::Result;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use serde_json::{json, Map, Value};

/// Compute the merge patch turning `observed` into `desired`.
///
/// Returns `None` when both are equivalent. Arrays are replaced wholesale,
/// keys missing from `desired` are removed with `null`.
pub fn diff(observed: &Value, desired: &Value) -> Option<Value> {
    match (observed, desired) {
        (Value::Object(observed), Value::Object(desired)) => {
            let mut patch = Map::new();
            for (key, desired_value) in desired {
                match observed.get(key) {
                    Some(observed_value) => {
                        if let Some(change) = diff(observed_value, desired_value) {
                            patch.insert(key.clone(), change);
                        }
                    }
                    None if is_empty(desired_value) => {}
                    None => {
                        patch.insert(key.clone(), desired_value.clone());
                    }
                }
            }
            for (key, observed_value) in observed {
                if !desired.contains_key(key) && !observed_value.is_null() {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            if patch.is_empty() {
                None
            } else {
                Some(Value::Object(patch))
            }
        }
        (observed, desired) if observed == desired => None,
        (observed, desired) if is_empty(observed) && is_empty(desired) => None,
        (_, desired) => Some(desired.clone()),
    }
}

/// Apply a merge patch in place
pub fn apply(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                apply(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Patch for the managed fields of a routing resource: labels,
/// annotations, owner references, rules and TLS
pub fn ingress_patch(observed: &Ingress, desired: &Ingress) -> Result<Option<Value>> {
    Ok(diff(&project_ingress(observed)?, &project_ingress(desired)?))
}

fn project_ingress(ingress: &Ingress) -> Result<Value> {
    let meta = &ingress.metadata;
    let spec = ingress.spec.as_ref();
    Ok(json!({
        "metadata": {
            "labels": meta.labels.clone().unwrap_or_default(),
            "annotations": meta.annotations.clone().unwrap_or_default(),
            "ownerReferences": meta.owner_references.clone().unwrap_or_default(),
        },
        "spec": {
            "rules": serde_json::to_value(spec.and_then(|s| s.rules.clone()).unwrap_or_default())?,
            "tls": serde_json::to_value(spec.and_then(|s| s.tls.clone()).unwrap_or_default())?,
        },
    }))
}

/// Patch for the fields a strategy may change on a service: annotations,
/// type and external IPs
pub fn service_patch(observed: &Service, desired: &Service) -> Result<Option<Value>> {
    Ok(diff(&project_service(observed), &project_service(desired)))
}

fn project_service(service: &Service) -> Value {
    let spec = service.spec.as_ref();
    json!({
        "metadata": {
            "annotations": service.metadata.annotations.clone().unwrap_or_default(),
        },
        "spec": {
            "type": spec.and_then(|s| s.type_.clone()),
            "externalIPs": spec.and_then(|s| s.external_ips.clone()).unwrap_or_default(),
        },
    })
}
