//! Backend contract for platform datapaths

use crate::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use tokio_util::sync::CancellationToken;

/// Capability set the node controller drives. Implemented once per platform
/// and selected when the process is assembled.
///
/// Errors from the per-object callbacks go back to the event substrate,
/// which decides whether to retry.
#[async_trait]
pub trait NodeBackend: Send + Sync + 'static {
    async fn add_pod(&self, pod: &Pod) -> Result<()>;

    /// Also receives pods scheduled to other nodes; must be a no-op for pods
    /// the backend never programmed.
    async fn delete_pod(&self, pod: &Pod) -> Result<()>;

    async fn add_node(&self, node: &Node) -> Result<()>;

    async fn delete_node(&self, node: &Node) -> Result<()>;

    /// Set up the local overlay bridge and tunnel endpoint. Idempotent.
    async fn ensure_hybrid_overlay_bridge(&self, node: &Node) -> Result<()>;

    /// Periodically reconcile the live flow table with desired state until
    /// `shutdown` is cancelled.
    async fn run_flow_sync(&self, shutdown: CancellationToken);
}
