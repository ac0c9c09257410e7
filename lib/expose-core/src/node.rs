//! Node address discovery for single node clusters

use crate::cluster::ClusterApi;
use crate::error::{ExposeError, Result};
use expose_api::annotations::NODE_EXTERNAL_IP_LABEL;
use k8s_openapi::api::core::v1::Node;
use tracing::info;

/// Address services are reachable on: the override when set, else the one
/// discovered on the cluster's only node
pub async fn resolve_node_address<C: ClusterApi + ?Sized>(
    cluster: &C,
    configured: &str,
) -> Result<String> {
    if !configured.is_empty() {
        return Ok(configured.to_string());
    }

    let nodes = cluster.list_nodes().await?;
    let [node] = nodes.as_slice() else {
        return Err(ExposeError::NodeAddress(format!(
            "node ports need a single node cluster, found {} nodes",
            nodes.len()
        )));
    };
    let address = node_address(node)?;
    info!(
        "Using address {} of node {}",
        address,
        node.metadata.name.as_deref().unwrap_or_default()
    );
    Ok(address)
}

/// Preferred address of a node: its externalIP label, then the first
/// `ExternalIP`, then the first `InternalIP`
pub fn node_address(node: &Node) -> Result<String> {
    let labelled = node
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(NODE_EXTERNAL_IP_LABEL))
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = labelled {
        return Ok(ip.clone());
    }

    let addresses = node
        .status
        .as_ref()
        .and_then(|status| status.addresses.as_deref())
        .unwrap_or_default();
    ["ExternalIP", "InternalIP"]
        .iter()
        .find_map(|kind| addresses.iter().find(|a| a.type_ == *kind))
        .map(|a| a.address.clone())
        .ok_or_else(|| {
            let known: Vec<String> = addresses
                .iter()
                .map(|a| format!("{}={}", a.type_, a.address))
                .collect();
            ExposeError::NodeAddress(format!(
                "host IP unknown, known addresses: [{}]",
                known.join(", ")
            ))
        })
}

/// `host:port`, with IPv6 hosts in brackets
pub fn join_host_port(host: &str, port: i32) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
