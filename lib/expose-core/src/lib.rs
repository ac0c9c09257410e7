//! Service exposure reconciliation engine
//!
//! Strategies turn services marked with `fabric8.io/expose` into routing
//! resources or node level ports and publish the resulting URL back onto
//! the service. All cluster access goes through [`ClusterApi`].

pub mod builder;
pub mod cluster;
pub mod error;
pub mod fake;
pub mod index;
pub mod node;
pub mod options;
pub mod ownership;
pub mod patch;
pub mod service;
pub mod strategy;

pub use builder::{build_ingress, DesiredIngress};
pub use cluster::{ClusterApi, KubeCluster};
pub use error::{ExposeError, Result};
pub use fake::{FakeCluster, FakeOperation, OperationCounts};
pub use index::ExistingIndex;
pub use options::{AnnotationBlockError, ExposeOptions};
pub use ownership::{classify, Ownership, ServiceKey};
pub use strategy::{
    new_strategy, ExposeStrategy, IngressStrategy, LoadBalancerStrategy, NodePortStrategy,
};
