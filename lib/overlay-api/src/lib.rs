//! Hybrid overlay annotation formats for cluster nodes and pods
//!
//! This library defines the metadata the node agent reads:
//! - Annotation and label keys written by the primary SDN and hybrid overlay
//! - MacAddress: hardware address parsing
//! - Host subnet annotation: per-network node subnets
//! - Pod network annotation: per-network pod IPs, MAC, gateways and routes

pub mod annotations;
pub mod error;
pub mod host_subnet;
pub mod mac;
pub mod pod_network;

pub use error::{ApiError, Result};
pub use host_subnet::{parse_cidr, parse_ip_network, parse_node_host_subnets};
pub use mac::MacAddress;
pub use pod_network::{unmarshal_pod_annotation, PodAnnotation, PodRoute};
