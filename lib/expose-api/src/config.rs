//! Strategy configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default URL template, one subdomain per service and namespace
pub const DEFAULT_URL_TEMPLATE: &str = "{{.Service}}.{{.Namespace}}.{{.Domain}}";

/// Ingress class used by path mode when none is configured
pub const DEFAULT_PATH_MODE_INGRESS_CLASS: &str = "nginx";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown exposer '{0}', expected one of: ingress, nodeport, loadbalancer")]
    UnknownExposer(String),
}

/// Which strategy exposes the services
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposerKind {
    /// Host/path rules on an Ingress per service
    #[default]
    #[serde(alias = "Ingress")]
    Ingress,
    /// Service type NodePort, published on the node address
    #[serde(alias = "NodePort")]
    NodePort,
    /// Service type LoadBalancer, published on the balancer address
    #[serde(alias = "LoadBalancer")]
    LoadBalancer,
}

impl FromStr for ExposerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ingress" => Ok(Self::Ingress),
            "nodeport" => Ok(Self::NodePort),
            "loadbalancer" => Ok(Self::LoadBalancer),
            _ => Err(ConfigError::UnknownExposer(s.to_string())),
        }
    }
}

impl fmt::Display for ExposerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => write!(f, "ingress"),
            Self::NodePort => write!(f, "nodeport"),
            Self::LoadBalancer => write!(f, "loadbalancer"),
        }
    }
}

/// How services share the routing domain
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMode {
    /// One host per service, built from the URL template
    #[default]
    Subdomain,
    /// One shared host, one `/<namespace>/<service>/` path per service
    Path,
}

impl PathMode {
    /// Interpret the per-service annotation: "path" selects path mode,
    /// any other value selects subdomain mode
    pub fn from_annotation(value: &str) -> Self {
        if value == "path" {
            Self::Path
        } else {
            Self::Subdomain
        }
    }
}

/// Which name a wildcard TLS entry covers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WildcardScope {
    /// `*.<domain>`
    #[default]
    Domain,
    /// `*.<host without its leftmost label>`
    Parent,
}

/// Configuration shared by all strategies
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrategyConfig {
    pub exposer: ExposerKind,

    /// Namespace to watch and list routing resources in, all when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Public routing domain
    pub domain: String,

    /// Domain used by services annotated with `use.internal.domain`
    #[serde(alias = "internal-domain")]
    pub internal_domain: String,

    /// Host template, named (`{{.Service}}`) or positional (`%[1]s`)
    #[serde(alias = "urltemplate")]
    pub url_template: String,

    /// Prefix prepended to generated routing resource names
    #[serde(alias = "name-prefix")]
    pub name_prefix: String,

    #[serde(alias = "ingress-class")]
    pub ingress_class: String,

    /// Ask the certificate manager for ACME certificates
    #[serde(alias = "tls-acme")]
    pub tls_acme: bool,

    /// Existing secret holding the TLS certificate
    #[serde(alias = "tls-secret-name")]
    pub tls_secret_name: String,

    #[serde(alias = "tls-use-wildcard")]
    pub tls_use_wildcard: bool,

    #[serde(alias = "tls-wildcard-scope")]
    pub tls_wildcard_scope: WildcardScope,

    /// Default path mode, services may override it
    #[serde(alias = "path-mode")]
    pub path_mode: PathMode,

    /// Node address for the node port exposer, discovered when empty
    #[serde(alias = "node-ip")]
    pub node_ip: String,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            exposer: ExposerKind::default(),
            namespace: None,
            domain: String::new(),
            internal_domain: String::new(),
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            name_prefix: String::new(),
            ingress_class: String::new(),
            tls_acme: false,
            tls_secret_name: String::new(),
            tls_use_wildcard: false,
            tls_wildcard_scope: WildcardScope::default(),
            path_mode: PathMode::default(),
            node_ip: String::new(),
        }
    }
}

impl StrategyConfig {
    /// Parse a YAML configuration document
    pub fn from_yaml(document: &str) -> Result<Self, ConfigError> {
        if document.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(document)?;
        Ok(config.with_default_template())
    }

    /// Fall back to the default URL template when none is given
    pub fn with_default_template(mut self) -> Self {
        if self.url_template.trim().is_empty() {
            self.url_template = DEFAULT_URL_TEMPLATE.to_string();
        }
        self
    }

    /// TLS is on when certificates are requested or provided
    pub fn tls_enabled(&self) -> bool {
        self.tls_acme || !self.tls_secret_name.is_empty()
    }

    /// Ingress class to stamp on generated resources, if any.
    ///
    /// Path mode relies on nginx path handling, so it falls back to the
    /// nginx class when no class is configured.
    pub fn effective_ingress_class(&self) -> Option<&str> {
        if !self.ingress_class.is_empty() {
            Some(&self.ingress_class)
        } else if self.path_mode == PathMode::Path {
            Some(DEFAULT_PATH_MODE_INGRESS_CLASS)
        } else {
            None
        }
    }
}
