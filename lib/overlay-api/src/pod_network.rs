//! Pod network attachment annotation
//!
//! The primary SDN records each pod's addressing under the `POD_NETWORKS`
//! annotation as a JSON object keyed by network name:
//!
//! ```json
//! {"default": {"ip_addresses": ["10.1.2.5/24"], "mac_address": "0a:58:0a:01:02:05",
//!              "gateway_ips": ["10.1.2.1"], "routes": [{"dest": "10.96.0.0/16", "nextHop": "10.1.2.1"}]}}
//! ```
//!
//! Writers predating dual-stack use the singular `ip_address` / `gateway_ip`
//! fields instead of the lists.

use crate::annotations::POD_NETWORKS;
use crate::host_subnet::parse_ip_network;
use crate::{ApiError, MacAddress, Result};
use ipnetwork::IpNetwork;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

#[derive(Deserialize, Debug, Default)]
struct PodAnnotationRecord {
    #[serde(default)]
    ip_addresses: Vec<String>,
    #[serde(default)]
    mac_address: String,
    #[serde(default)]
    gateway_ips: Vec<String>,
    #[serde(default)]
    routes: Vec<PodRouteRecord>,
    #[serde(default)]
    ip_address: Option<String>,
    #[serde(default)]
    gateway_ip: Option<String>,
}

#[derive(Deserialize, Debug)]
struct PodRouteRecord {
    dest: String,
    #[serde(rename = "nextHop", default)]
    next_hop: String,
}

/// Decoded attachment of a pod to one network
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodAnnotation {
    /// Pod addresses with their subnet prefix, in annotation order
    pub ips: Vec<IpNetwork>,
    pub mac: MacAddress,
    pub gateways: Vec<IpAddr>,
    pub routes: Vec<PodRoute>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodRoute {
    pub dest: IpNetwork,
    pub next_hop: Option<IpAddr>,
}

/// Merge the legacy singular field into the list form, rejecting records
/// where both are set and disagree.
fn merge_legacy(
    list: Vec<String>,
    single: Option<String>,
    fields: (&str, &str),
) -> Result<Vec<String>> {
    let single = single.filter(|s| !s.is_empty());
    match (list.is_empty(), single) {
        (true, Some(value)) => Ok(vec![value]),
        (false, Some(value)) if value != list[0] => Err(ApiError::BadData(format!(
            "{} and {} conflict",
            fields.0, fields.1
        ))),
        _ => Ok(list),
    }
}

fn parse_ip(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .map_err(|_| ApiError::InvalidIpAddress(value.to_string()))
}

/// Decode the pod's attachment to `network` from its annotations.
pub fn unmarshal_pod_annotation(
    annotations: &BTreeMap<String, String>,
    network: &str,
) -> Result<PodAnnotation> {
    let raw = annotations
        .get(POD_NETWORKS)
        .ok_or(ApiError::AnnotationNotSet(POD_NETWORKS))?;

    let mut networks: HashMap<String, PodAnnotationRecord> =
        serde_json::from_str(raw).map_err(|e| ApiError::InvalidAnnotation {
            key: POD_NETWORKS,
            reason: e.to_string(),
        })?;

    let record = networks
        .remove(network)
        .ok_or_else(|| ApiError::MissingNetwork(network.to_string()))?;

    let mac: MacAddress = record.mac_address.parse()?;

    let ips = merge_legacy(record.ip_addresses, record.ip_address, ("ip_address", "ip_addresses"))?;
    if ips.is_empty() {
        return Err(ApiError::BadData(
            "neither ip_address nor ip_addresses is set".to_string(),
        ));
    }
    let ips = ips
        .iter()
        .map(|ip| parse_ip_network(ip))
        .collect::<Result<Vec<_>>>()?;

    let gateways = merge_legacy(record.gateway_ips, record.gateway_ip, ("gateway_ip", "gateway_ips"))?
        .iter()
        .map(|gw| parse_ip(gw))
        .collect::<Result<Vec<_>>>()?;

    let routes = record
        .routes
        .iter()
        .map(|route| {
            let next_hop = if route.next_hop.is_empty() {
                None
            } else {
                Some(parse_ip(&route.next_hop)?)
            };
            Ok(PodRoute {
                dest: parse_ip_network(&route.dest)?,
                next_hop,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PodAnnotation {
        ips,
        mac,
        gateways,
        routes,
    })
}
