//! Desired overlay state

use crate::flows::{dst_match, FlowRule, LOCAL_PORT, PRIORITY_MATCH, TABLE_CLASSIFY, TABLE_LOCAL, TUNNEL_PORT};
use ipnetwork::IpNetwork;
use overlay_api::MacAddress;
use overlay_core::{NodeNetworkIdentity, PodNetworkIdentity};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Local bridge and tunnel endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    pub subnet: IpNetwork,
    pub node_ip: IpAddr,
    pub dr_mac: MacAddress,
}

impl From<NodeNetworkIdentity> for BridgeConfig {
    fn from(identity: NodeNetworkIdentity) -> Self {
        Self {
            subnet: identity.subnet,
            node_ip: identity.internal_ip,
            dr_mac: identity.dr_mac,
        }
    }
}

/// Remote node reachable through the tunnel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TunnelPeer {
    pub subnet: IpNetwork,
    pub vtep: IpAddr,
    pub dr_mac: MacAddress,
}

impl From<NodeNetworkIdentity> for TunnelPeer {
    fn from(identity: NodeNetworkIdentity) -> Self {
        Self {
            subnet: identity.subnet,
            vtep: identity.internal_ip,
            dr_mac: identity.dr_mac,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalPod {
    pub ips: Vec<IpNetwork>,
    pub mac: MacAddress,
}

impl From<PodNetworkIdentity> for LocalPod {
    fn from(identity: PodNetworkIdentity) -> Self {
        Self {
            ips: identity.ips,
            mac: identity.mac,
        }
    }
}

/// Everything the bridge should be programmed with
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DesiredState {
    pub bridge: Option<BridgeConfig>,
    /// Peers keyed by node name
    pub peers: BTreeMap<String, TunnelPeer>,
    /// Local pods keyed by `namespace/name`
    pub pods: BTreeMap<String, LocalPod>,
}

impl DesiredState {
    /// Render the flow table, sorted. Nothing is rendered until the local
    /// bridge is known.
    pub fn render(&self) -> Vec<FlowRule> {
        let Some(bridge) = self.bridge else {
            return Vec::new();
        };

        let mut flows = vec![
            FlowRule::drop_all(TABLE_CLASSIFY),
            FlowRule::drop_all(TABLE_LOCAL),
            FlowRule::new(
                TABLE_CLASSIFY,
                PRIORITY_MATCH,
                format!(
                    "in_port={},{}",
                    TUNNEL_PORT,
                    dst_match(bridge.subnet.ip(), bridge.subnet)
                ),
                format!("goto_table:{}", TABLE_LOCAL),
            ),
        ];

        for peer in self.peers.values() {
            flows.push(FlowRule::new(
                TABLE_CLASSIFY,
                PRIORITY_MATCH,
                dst_match(peer.subnet.ip(), peer.subnet),
                format!(
                    "set_field:{}->eth_src,set_field:{}->eth_dst,set_field:{}->tun_dst,output:{}",
                    bridge.dr_mac, peer.dr_mac, peer.vtep, TUNNEL_PORT
                ),
            ));
        }

        for pod in self.pods.values() {
            for ip in &pod.ips {
                flows.push(FlowRule::new(
                    TABLE_LOCAL,
                    PRIORITY_MATCH,
                    dst_match(ip.ip(), ip.ip()),
                    format!(
                        "set_field:{}->eth_src,set_field:{}->eth_dst,output:{}",
                        bridge.dr_mac, pod.mac, LOCAL_PORT
                    ),
                ));
            }
        }

        flows.sort();
        flows
    }
}
