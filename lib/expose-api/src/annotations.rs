//! Annotation and label keys of the exposure protocol

use std::collections::BTreeMap;

/// Opt-in marker, must be [`EXPOSE_VALUE`] to enable exposure
pub const EXPOSE: &str = "fabric8.io/expose";
/// Value of the opt-in marker
pub const EXPOSE_VALUE: &str = "true";
/// Legacy opt-in label, same value as the annotation
pub const EXPOSE_LABEL: &str = "expose";

/// Published externally reachable URL
pub const EXPOSE_URL: &str = "fabric8.io/exposeUrl";
/// Names an extra annotation key receiving the bare host name
pub const EXPOSE_HOST_NAME_AS: &str = "fabric8.io/exposeHostNameAs";
/// Backend port to route to
pub const EXPOSE_PORT: &str = "fabric8.io/exposePort";

/// Routing resource name override
pub const INGRESS_NAME: &str = "fabric8.io/ingress.name";
/// Host name override, substituted for the service in the URL template
pub const HOST_NAME: &str = "fabric8.io/host.name";
/// Path override
pub const INGRESS_PATH: &str = "fabric8.io/ingress.path";
/// Path mode override, see [`crate::PathMode`]
pub const PATH_MODE: &str = "fabric8.io/path.mode";
/// Route against the internal domain when "true"
pub const USE_INTERNAL_DOMAIN: &str = "fabric8.io/use.internal.domain";
/// Embedded YAML document merged into the generated annotations
pub const INGRESS_ANNOTATIONS: &str = "fabric8.io/ingress.annotations";

/// Helm release label, stripped from service names
pub const RELEASE_LABEL: &str = "release";

/// Markers identifying resources generated by the controller
pub mod generated {
    /// Provider label key
    pub const PROVIDER_LABEL: &str = "provider";
    /// Provider label value
    pub const PROVIDER_VALUE: &str = "fabric8";
    /// Generator annotation key
    pub const GENERATED_BY: &str = "fabric8.io/generated-by";
    /// Generator annotation value
    pub const GENERATED_BY_VALUE: &str = "exposecontroller";
}

/// Annotations understood by ingress controllers
pub mod ingress {
    /// Generic ingress class annotation
    pub const CLASS: &str = "kubernetes.io/ingress.class";
    /// ingress-nginx specific class annotation
    pub const NGINX_CLASS: &str = "nginx.ingress.kubernetes.io/ingress.class";
    /// Requests an ACME certificate for the TLS hosts
    pub const TLS_ACME: &str = "kubernetes.io/tls-acme";
}

/// Node label overriding the discovered node address
pub const NODE_EXTERNAL_IP_LABEL: &str = "fabric8.io/externalIP";

/// Check whether a service opted in, through the annotation or the legacy label
pub fn is_exposed(
    annotations: Option<&BTreeMap<String, String>>,
    labels: Option<&BTreeMap<String, String>>,
) -> bool {
    let marked = |map: Option<&BTreeMap<String, String>>, key: &str| {
        map.and_then(|m| m.get(key))
            .map(|v| v == EXPOSE_VALUE)
            .unwrap_or(false)
    };
    marked(annotations, EXPOSE) || marked(labels, EXPOSE_LABEL)
}

/// Check whether a resource carries both generator markers
pub fn is_generated(
    labels: Option<&BTreeMap<String, String>>,
    annotations: Option<&BTreeMap<String, String>>,
) -> bool {
    let label = labels
        .and_then(|l| l.get(generated::PROVIDER_LABEL))
        .map(|v| v == generated::PROVIDER_VALUE)
        .unwrap_or(false);
    let annotation = annotations
        .and_then(|a| a.get(generated::GENERATED_BY))
        .map(|v| v == generated::GENERATED_BY_VALUE)
        .unwrap_or(false);
    label && annotation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_is_exposed_by_annotation_or_label() {
        let annotations = map(&[(EXPOSE, "true")]);
        let labels = map(&[(EXPOSE_LABEL, "true")]);
        assert!(is_exposed(Some(&annotations), None));
        assert!(is_exposed(None, Some(&labels)));
        assert!(!is_exposed(None, None));
        assert!(!is_exposed(Some(&map(&[(EXPOSE, "false")])), None));
    }

    #[test]
    fn test_is_generated_requires_both_markers() {
        let labels = map(&[(generated::PROVIDER_LABEL, generated::PROVIDER_VALUE)]);
        let annotations = map(&[(generated::GENERATED_BY, generated::GENERATED_BY_VALUE)]);
        assert!(is_generated(Some(&labels), Some(&annotations)));
        assert!(!is_generated(Some(&labels), None));
        assert!(!is_generated(None, Some(&annotations)));

        let other = map(&[(generated::GENERATED_BY, "not-exposecontroller")]);
        assert!(!is_generated(Some(&labels), Some(&other)));
    }
}
