use crate::options::AnnotationBlockError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExposeError>;

#[derive(Error, Debug)]
pub enum ExposeError {
    #[error("service {service} has no ports")]
    NoPorts { service: String },

    #[error("service {service} has {count} ports, this exposer supports exactly one")]
    TooManyPorts { service: String, count: usize },

    #[error("service {service} has an invalid port annotation '{value}'")]
    InvalidPort { service: String, value: String },

    #[error("service {service} does not declare port {port}")]
    PortNotDeclared { service: String, port: i32 },

    #[error("service {service} has malformed ingress annotations: {source}")]
    MalformedAnnotations {
        service: String,
        #[source]
        source: AnnotationBlockError,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("cannot discover node address: {0}")]
    NodeAddress(String),

    #[error("{kind} {namespace}/{name} is not managed for service {service}")]
    NotManaged {
        kind: &'static str,
        namespace: String,
        name: String,
        service: String,
    },

    #[error("failed to {operation} {kind} {namespace}/{name}: {source}")]
    Api {
        operation: &'static str,
        kind: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to remove {} routing resource(s) of {service}: {}", .failures.len(), .failures.join("; "))]
    PartialClean {
        service: String,
        failures: Vec<String>,
    },

    #[error("sync could not delete {} ambiguous routing resource(s): {}", .failures.len(), .failures.join("; "))]
    SyncIncomplete { failures: Vec<String> },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ExposeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExposeError::Api { source: kube::Error::Api(resp), .. } if resp.code == 404)
    }

    /// Check if this is an optimistic concurrency conflict (409).
    ///
    /// Conflicts are worth re-queueing, the next Add reads a fresh object.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ExposeError::Api { source: kube::Error::Api(resp), .. } if resp.code == 409)
    }

    /// Configuration errors will not go away by retrying
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ExposeError::NoPorts { .. }
                | ExposeError::TooManyPorts { .. }
                | ExposeError::InvalidPort { .. }
                | ExposeError::PortNotDeclared { .. }
                | ExposeError::MalformedAnnotations { .. }
                | ExposeError::InvalidConfiguration(_)
                | ExposeError::NodeAddress(_)
        )
    }

    /// Build a mapper wrapping a kube error with the failed call's context
    pub(crate) fn api(
        operation: &'static str,
        kind: &'static str,
        namespace: &str,
        name: &str,
    ) -> impl FnOnce(kube::Error) -> ExposeError {
        let namespace = namespace.to_string();
        let name = name.to_string();
        move |source| ExposeError::Api {
            operation,
            kind,
            namespace,
            name,
            source,
        }
    }
}
