//! Well-known annotation and label keys

/// Name of the primary (cluster default) network in per-network annotations
pub const DEFAULT_NETWORK_NAME: &str = "default";

/// Host subnets assigned by the primary SDN, keyed by network name
pub const NODE_HOST_SUBNETS: &str = "k8s.ovn.org/node-subnets";

/// Subnet assigned to a node outside the primary SDN
pub const HYBRID_OVERLAY_NODE_SUBNET: &str = "k8s.ovn.org/hybrid-overlay-node-subnet";

/// MAC of the distributed router port facing the hybrid overlay
pub const HYBRID_OVERLAY_DR_MAC: &str = "k8s.ovn.org/hybrid-overlay-distributed-router-gateway-mac";

/// IP of the distributed router port facing the hybrid overlay
pub const HYBRID_OVERLAY_DR_IP: &str = "k8s.ovn.org/hybrid-overlay-distributed-router-gateway-ip";

/// Per-network pod attachment records
pub const POD_NETWORKS: &str = "k8s.ovn.org/pod-networks";

/// Label marking nodes that are excluded from host subnet allocation
pub const NO_HOST_SUBNET_LABEL: &str = "k8s.ovn.org/no-host-subnet";
