//! Network identity extraction
//!
//! Turns node and pod annotations into typed overlay facts. Resolution is
//! total: either every field of an identity resolves or the caller gets an
//! error, so nothing downstream programs a flow from half-known state.

use crate::object::{annotations, node_name, object_key, ObjectKind};
use crate::{OverlayError, Result};
use ipnetwork::IpNetwork;
use k8s_openapi::api::core::v1::{Node, Pod};
use overlay_api::annotations::{
    DEFAULT_NETWORK_NAME, HYBRID_OVERLAY_DR_MAC, HYBRID_OVERLAY_NODE_SUBNET,
};
use overlay_api::{parse_cidr, parse_node_host_subnets, unmarshal_pod_annotation, MacAddress};
use std::net::IpAddr;
use tracing::{debug, error, warn};

const INTERNAL_IP: &str = "InternalIP";

/// Overlay identity of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeNetworkIdentity {
    /// Pod subnet hosted by the node
    pub subnet: IpNetwork,
    /// First internal address; the tunnel endpoint
    pub internal_ip: IpAddr,
    /// Distributed router MAC of the primary SDN
    pub dr_mac: MacAddress,
}

/// Overlay identity of a pod on the default network
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodNetworkIdentity {
    /// Addresses with prefix, in annotation order
    pub ips: Vec<IpNetwork>,
    pub mac: MacAddress,
}

/// First `InternalIP` address reported in the node status.
pub fn node_internal_ip(node: &Node) -> Option<IpAddr> {
    let address = node
        .status
        .as_ref()
        .and_then(|status| status.addresses.as_ref())
        .and_then(|addresses| addresses.iter().find(|a| a.type_ == INTERNAL_IP))?;

    match address.address.parse() {
        Ok(ip) => Some(ip),
        Err(_) => {
            warn!(
                "Node {} reports unparseable internal IP {:?}",
                node_name(node),
                address.address
            );
            None
        }
    }
}

/// Resolve the node's overlay subnet and internal IP.
///
/// The primary SDN's host subnet annotation wins over the hybrid overlay
/// subnet annotation. Returns `None` unless both the subnet and the IP
/// resolve.
pub fn resolve_node_subnet_and_ip(node: &Node) -> Option<(IpNetwork, IpAddr)> {
    let name = node_name(node);
    let annotations = annotations(&node.metadata);

    let subnet = match parse_node_host_subnets(annotations, DEFAULT_NETWORK_NAME) {
        // Dual-stack nodes carry several subnets; the overlay only uses the first.
        Ok(subnets) if !subnets.is_empty() => subnets[0],
        _ => {
            let Some(raw) = annotations.get(HYBRID_OVERLAY_NODE_SUBNET) else {
                debug!("Missing node {:?} node subnet annotation", name);
                return None;
            };
            match parse_cidr(raw) {
                Ok(cidr) => cidr,
                Err(e) => {
                    error!("Error parsing node {:?} subnet {:?}: {}", name, raw, e);
                    return None;
                }
            }
        }
    };

    let Some(ip) = node_internal_ip(node) else {
        error!("Error getting node {:?} internal IP", name);
        return None;
    };

    Some((subnet, ip))
}

/// Resolve the full overlay identity of a node.
pub fn resolve_node_identity(node: &Node) -> Result<NodeNetworkIdentity> {
    let name = node_name(node);
    let (subnet, internal_ip) = resolve_node_subnet_and_ip(node)
        .ok_or_else(|| OverlayError::MissingAddressInfo(name.to_string()))?;

    let raw_mac = annotations(&node.metadata)
        .get(HYBRID_OVERLAY_DR_MAC)
        .ok_or_else(|| OverlayError::MissingAnnotation {
            kind: ObjectKind::Node,
            name: name.to_string(),
            key: HYBRID_OVERLAY_DR_MAC,
        })?;
    let dr_mac = raw_mac
        .parse::<MacAddress>()
        .map_err(|_| OverlayError::InvalidMac {
            node: name.to_string(),
            value: raw_mac.clone(),
        })?;

    Ok(NodeNetworkIdentity {
        subnet,
        internal_ip,
        dr_mac,
    })
}

/// Resolve a pod's addresses and MAC on the default network.
///
/// A pod that has not been assigned a network yet fails with
/// `MalformedPodAnnotation`; callers retry rather than treat it as fatal.
pub fn resolve_pod_identity(pod: &Pod) -> Result<PodNetworkIdentity> {
    let attachment = unmarshal_pod_annotation(annotations(&pod.metadata), DEFAULT_NETWORK_NAME)
        .map_err(|e| OverlayError::MalformedPodAnnotation {
            pod: object_key(&pod.metadata),
            reason: e.to_string(),
        })?;

    Ok(PodNetworkIdentity {
        ips: attachment.ips,
        mac: attachment.mac,
    })
}
