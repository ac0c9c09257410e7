//! Desired routing resource for an exposed service

use crate::error::{ExposeError, Result};
use crate::options::ExposeOptions;
use crate::ownership::{service_owner_reference, ServiceKey};
use expose_api::annotations::{self, generated, ingress as ingress_keys};
use expose_api::{PathMode, StrategyConfig, WildcardScope};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

const PATH_TYPE: &str = "ImplementationSpecific";

/// Routing resource and the address it makes reachable
#[derive(Clone, Debug)]
pub struct DesiredIngress {
    pub ingress: Ingress,
    pub name: String,
    pub host: String,
    pub path: String,
    /// Externally reachable URL to publish on the service
    pub url: String,
}

/// Build the routing resource a service asks for
pub fn build_ingress(
    service: &Service,
    options: &ExposeOptions,
    config: &StrategyConfig,
) -> Result<DesiredIngress> {
    let service_name = service.metadata.name.clone().unwrap_or_default();
    let namespace = service.metadata.namespace.clone().unwrap_or_default();
    let port = backend_port(service, options)?;

    let app = app_name(service, options);
    let name = match &options.ingress_name {
        Some(name) => name.clone(),
        None if config.name_prefix.is_empty() => app.clone(),
        None => format!("{}-{}", config.name_prefix, app),
    };

    let domain = if options.use_internal_domain && !config.internal_domain.is_empty() {
        config.internal_domain.as_str()
    } else {
        config.domain.as_str()
    };

    let path_mode = options.path_mode.unwrap_or(config.path_mode);
    let (host, path) = match path_mode {
        PathMode::Subdomain => {
            let placeholder = options.host_name.as_deref().unwrap_or(&app);
            let host = expand_url_template(&config.url_template, placeholder, &namespace, domain)?;
            let path = match options.path.as_deref() {
                Some(path) if !path.starts_with('/') => format!("/{}", path),
                Some(path) => path.to_string(),
                None => String::new(),
            };
            (host, path)
        }
        PathMode::Path => {
            let segment = options.path.as_deref().unwrap_or(&app);
            (domain.to_string(), shared_domain_path(&namespace, segment))
        }
    };

    let tls = config.tls_enabled().then(|| {
        let tls_host = if !config.tls_use_wildcard {
            host.clone()
        } else if path_mode == PathMode::Path || config.tls_wildcard_scope == WildcardScope::Domain {
            format!("*.{}", domain)
        } else {
            match host.split_once('.') {
                Some((_, parent)) => format!("*.{}", parent),
                None => format!("*.{}", host),
            }
        };
        let secret_name = if config.tls_secret_name.is_empty() {
            format!("tls-{}", app)
        } else {
            config.tls_secret_name.clone()
        };
        IngressTLS {
            hosts: Some(vec![tls_host]),
            secret_name: Some(secret_name),
        }
    });
    let scheme = if tls.is_some() { "https" } else { "http" };

    let mut ingress_annotations = BTreeMap::new();
    if let Some(class) = config.effective_ingress_class() {
        ingress_annotations.insert(ingress_keys::CLASS.to_string(), class.to_string());
        ingress_annotations.insert(ingress_keys::NGINX_CLASS.to_string(), class.to_string());
    }
    if config.tls_acme {
        ingress_annotations.insert(ingress_keys::TLS_ACME.to_string(), "true".to_string());
    }
    ingress_annotations.extend(options.extra_annotations.clone());
    ingress_annotations.insert(
        generated::GENERATED_BY.to_string(),
        generated::GENERATED_BY_VALUE.to_string(),
    );

    let labels = BTreeMap::from([(
        generated::PROVIDER_LABEL.to_string(),
        generated::PROVIDER_VALUE.to_string(),
    )]);

    let rule = IngressRule {
        host: Some(host.clone()),
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath {
                path: (!path.is_empty()).then(|| path.clone()),
                path_type: PATH_TYPE.to_string(),
                backend: IngressBackend {
                    service: Some(IngressServiceBackend {
                        name: service_name,
                        port: Some(ServiceBackendPort {
                            number: Some(port),
                            name: None,
                        }),
                    }),
                    resource: None,
                },
            }],
        }),
    };

    let ingress = Ingress {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace),
            labels: Some(labels),
            annotations: Some(ingress_annotations),
            owner_references: Some(vec![service_owner_reference(service)]),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![rule]),
            tls: tls.map(|tls| vec![tls]),
            ..Default::default()
        }),
        ..Default::default()
    };

    let url = format!("{}://{}{}", scheme, host, path);
    Ok(DesiredIngress {
        ingress,
        name,
        host,
        path,
        url,
    })
}

/// Name a service is routed under: the override, else the service name
/// without its Helm release prefix
pub fn app_name(service: &Service, options: &ExposeOptions) -> String {
    if let Some(name) = &options.ingress_name {
        return name.clone();
    }
    let name = service.metadata.name.clone().unwrap_or_default();
    let release = service
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(annotations::RELEASE_LABEL))
        .filter(|release| !release.is_empty());
    match release {
        Some(release) => name
            .strip_prefix(&format!("{}-", release))
            .filter(|stripped| !stripped.is_empty())
            .map(str::to_string)
            .unwrap_or(name),
        None => name,
    }
}

/// The override port when declared, else the first declared port
pub fn backend_port(service: &Service, options: &ExposeOptions) -> Result<i32> {
    let ports = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_deref())
        .unwrap_or_default();
    let first = ports.first().ok_or_else(|| ExposeError::NoPorts {
        service: ServiceKey::of(service).to_string(),
    })?;

    match options.port {
        None => Ok(first.port),
        Some(port) if ports.iter().any(|p| p.port == port) => Ok(port),
        Some(port) => Err(ExposeError::PortNotDeclared {
            service: ServiceKey::of(service).to_string(),
            port,
        }),
    }
}

/// `/<namespace>/<segment>/` with single slashes whatever the segment looks like
fn shared_domain_path(namespace: &str, segment: &str) -> String {
    let mut path = String::from("/");
    for part in [namespace, segment] {
        let part = part.trim_matches('/');
        if !part.is_empty() {
            path.push_str(part);
            path.push('/');
        }
    }
    path
}

/// Expand a host template.
///
/// Named placeholders are `{{.Service}}`, `{{.Namespace}}` and
/// `{{.Domain}}`; positional ones are `%[1]s`..`%[3]s` or sequential `%s`,
/// in the same order.
pub fn expand_url_template(
    template: &str,
    service: &str,
    namespace: &str,
    domain: &str,
) -> Result<String> {
    let invalid = |reason: &str| {
        ExposeError::InvalidConfiguration(format!("URL template '{}': {}", template, reason))
    };
    let values = [service, namespace, domain];
    let mut expanded = String::with_capacity(template.len() + service.len() + domain.len());
    let mut next = 0;
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '%']) {
        expanded.push_str(&rest[..pos]);
        rest = &rest[pos..];

        if let Some(after) = rest.strip_prefix("{{") {
            let end = after
                .find("}}")
                .ok_or_else(|| invalid("unterminated placeholder"))?;
            let value = match after[..end].trim() {
                ".Service" => service,
                ".Namespace" => namespace,
                ".Domain" => domain,
                other => return Err(invalid(&format!("unknown placeholder '{}'", other))),
            };
            expanded.push_str(value);
            rest = &after[end + 2..];
        } else if let Some(after) = rest.strip_prefix("%%") {
            expanded.push('%');
            rest = after;
        } else if let Some(after) = rest.strip_prefix("%s") {
            let value = values
                .get(next)
                .ok_or_else(|| invalid("too many %s verbs"))?;
            expanded.push_str(value);
            next += 1;
            rest = after;
        } else if let Some(after) = rest.strip_prefix("%[") {
            let end = after
                .find("]s")
                .ok_or_else(|| invalid("unterminated positional verb"))?;
            let index: usize = after[..end]
                .parse()
                .map_err(|_| invalid("positional index is not a number"))?;
            let value = index
                .checked_sub(1)
                .and_then(|i| values.get(i))
                .ok_or_else(|| invalid("positional index out of range"))?;
            expanded.push_str(value);
            next = index;
            rest = &after[end + 2..];
        } else if rest.starts_with('%') {
            return Err(invalid("unsupported verb, use %s or %[n]s"));
        } else {
            expanded.push('{');
            rest = &rest[1..];
        }
    }
    expanded.push_str(rest);
    Ok(expanded)
}
