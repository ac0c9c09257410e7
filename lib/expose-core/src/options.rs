//! Typed view of the exposure annotations on a service

use crate::error::{ExposeError, Result};
use crate::ownership::ServiceKey;
use expose_api::annotations;
use expose_api::PathMode;
use k8s_openapi::api::core::v1::Service;
use serde_yaml::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors in the embedded `ingress.annotations` document
#[derive(Error, Debug)]
pub enum AnnotationBlockError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("expected a mapping of annotations")]
    NotAMapping,

    #[error("annotation keys must be scalars")]
    InvalidKey,

    #[error("value of annotation '{0}' must be a scalar")]
    NonScalarValue(String),
}

/// Exposure settings requested by a service
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExposeOptions {
    /// Backend port to route to
    pub port: Option<i32>,
    /// Routing resource name override
    pub ingress_name: Option<String>,
    /// Replaces the service placeholder of the URL template
    pub host_name: Option<String>,
    pub path: Option<String>,
    pub path_mode: Option<PathMode>,
    pub use_internal_domain: bool,
    /// Extra annotation key receiving the bare host
    pub host_name_as: Option<String>,
    /// Parsed embedded annotations, merged into the routing resource
    pub extra_annotations: BTreeMap<String, String>,
}

impl ExposeOptions {
    /// Parse every recognized key, ignoring the others
    pub fn from_service(service: &Service) -> Result<Self> {
        let empty = BTreeMap::new();
        let service_annotations = service.metadata.annotations.as_ref().unwrap_or(&empty);
        let get = |key: &str| {
            service_annotations
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let port = get(annotations::EXPOSE_PORT)
            .map(|value| {
                value.parse::<i32>().map_err(|_| ExposeError::InvalidPort {
                    service: ServiceKey::of(service).to_string(),
                    value: value.to_string(),
                })
            })
            .transpose()?;

        let extra_annotations = service_annotations
            .get(annotations::INGRESS_ANNOTATIONS)
            .map(|block| parse_annotation_block(block))
            .transpose()
            .map_err(|source| ExposeError::MalformedAnnotations {
                service: ServiceKey::of(service).to_string(),
                source,
            })?
            .unwrap_or_default();

        Ok(Self {
            port,
            ingress_name: get(annotations::INGRESS_NAME).map(str::to_string),
            host_name: get(annotations::HOST_NAME).map(str::to_string),
            path: get(annotations::INGRESS_PATH).map(str::to_string),
            path_mode: get(annotations::PATH_MODE).map(PathMode::from_annotation),
            use_internal_domain: get(annotations::USE_INTERNAL_DOMAIN) == Some("true"),
            host_name_as: get(annotations::EXPOSE_HOST_NAME_AS).map(str::to_string),
            extra_annotations,
        })
    }
}

/// Parse an embedded `key: value` YAML document.
///
/// Comments, quoted and block scalars are supported; booleans and numbers
/// keep their literal text.
pub fn parse_annotation_block(
    block: &str,
) -> std::result::Result<BTreeMap<String, String>, AnnotationBlockError> {
    let blank = block.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#')
    });
    if blank {
        return Ok(BTreeMap::new());
    }

    let document: Value = serde_yaml::from_str(block)?;
    let mapping = match document {
        Value::Null => return Ok(BTreeMap::new()),
        Value::Mapping(mapping) => mapping,
        _ => return Err(AnnotationBlockError::NotAMapping),
    };

    let mut parsed = BTreeMap::new();
    for (key, value) in mapping {
        let key = scalar_to_string(&key).ok_or(AnnotationBlockError::InvalidKey)?;
        let value =
            scalar_to_string(&value).ok_or_else(|| AnnotationBlockError::NonScalarValue(key.clone()))?;
        parsed.insert(key, value);
    }
    Ok(parsed)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}
