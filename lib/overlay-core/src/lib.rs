//! Node-local reconciliation core for the hybrid overlay
//!
//! This library provides:
//! - Network identity extraction from node and pod annotations
//! - Change predicates that decide whether an update is network relevant
//! - The backend contract implemented by platform datapaths
//! - Event wiring between watch callbacks and the backend
//! - The node controller owning lifecycle and readiness

pub mod backend;
pub mod controller;
pub mod error;
pub mod events;
pub mod identity;
pub mod object;
pub mod predicates;
pub mod wiring;

pub use backend::NodeBackend;
pub use controller::{HybridOverlayNode, Phase, Threadiness};
pub use error::{OverlayError, Result};
pub use events::{EventHandler, EventHandlerFactory};
pub use identity::{NodeNetworkIdentity, PodNetworkIdentity};
pub use object::{ClusterObject, ObjectKind};
pub use wiring::{NodeHandler, PodHandler, ResourceHandler};
