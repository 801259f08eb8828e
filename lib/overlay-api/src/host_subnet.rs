//! Node host subnet annotation parsing

use crate::annotations::NODE_HOST_SUBNETS;
use crate::{ApiError, Result};
use ipnetwork::IpNetwork;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Value of one network entry: older writers store a single CIDR,
/// dual-stack writers store a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum HostSubnets {
    Single(String),
    Multiple(Vec<String>),
}

/// Parse an `address/prefix` string, keeping the host bits of the address.
pub fn parse_ip_network(value: &str) -> Result<IpNetwork> {
    if !value.contains('/') {
        return Err(ApiError::InvalidCidr {
            value: value.to_string(),
            reason: "missing prefix length".to_string(),
        });
    }
    value.trim().parse::<IpNetwork>().map_err(|e| ApiError::InvalidCidr {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a CIDR and clear its host bits, so `10.1.2.5/24` becomes `10.1.2.0/24`.
pub fn parse_cidr(value: &str) -> Result<IpNetwork> {
    let network = parse_ip_network(value)?;
    IpNetwork::new(network.network(), network.prefix()).map_err(|e| ApiError::InvalidCidr {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Read the host subnets the primary SDN assigned to a node for `network`.
///
/// Returns the subnets in annotation order; callers that are not dual-stack
/// aware use the first entry.
pub fn parse_node_host_subnets(
    annotations: &BTreeMap<String, String>,
    network: &str,
) -> Result<Vec<IpNetwork>> {
    let raw = annotations
        .get(NODE_HOST_SUBNETS)
        .ok_or(ApiError::AnnotationNotSet(NODE_HOST_SUBNETS))?;

    let mut networks: HashMap<String, HostSubnets> =
        serde_json::from_str(raw).map_err(|e| ApiError::InvalidAnnotation {
            key: NODE_HOST_SUBNETS,
            reason: e.to_string(),
        })?;

    let entry = networks
        .remove(network)
        .ok_or_else(|| ApiError::MissingNetwork(network.to_string()))?;

    let values = match entry {
        HostSubnets::Single(cidr) => vec![cidr],
        HostSubnets::Multiple(cidrs) => cidrs,
    };
    if values.is_empty() {
        return Err(ApiError::BadData(format!(
            "empty host subnet list for network {}",
            network
        )));
    }

    values.iter().map(|v| parse_cidr(v)).collect()
}
