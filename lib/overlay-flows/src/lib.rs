//! Flow-table backend for the hybrid overlay
//!
//! This library provides:
//! - Desired overlay state (local bridge, tunnel peers, local pods)
//! - Rendering of that state into an ordered flow table
//! - A programmer seam over the datapath, with an in-memory implementation
//! - Periodic flow sync that repairs drift between desired and live flows
pub mod backend;
pub mod flows;
pub mod metrics;
pub mod programmer;
pub mod state;

pub use backend::{FlowBackendConfig, FlowTableBackend};
pub use flows::FlowRule;
pub use metrics::FlowMetrics;
pub use programmer::{FlowProgrammer, InMemoryProgrammer};
pub use state::{BridgeConfig, DesiredState, LocalPod, TunnelPeer};
