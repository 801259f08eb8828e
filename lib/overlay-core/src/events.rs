//! Event substrate seam
//!
//! The controller does not watch the cluster itself. A substrate creates one
//! event handler per watched kind, delivers add/update/delete callbacks in
//! per-object order, and owns the retry policy for failed callbacks.

use crate::object::ObjectKind;
use crate::wiring::ResourceHandler;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A running subscription to one object kind
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Deliver events with up to `threadiness` objects in flight until
    /// `shutdown` is cancelled.
    async fn run(&self, threadiness: usize, shutdown: CancellationToken) -> Result<()>;
}

/// Creates event handlers bound to a set of callbacks
pub trait EventHandlerFactory {
    fn create(
        &self,
        kind: ObjectKind,
        handler: Arc<dyn ResourceHandler>,
    ) -> Result<Arc<dyn EventHandler>>;
}
