//! Kubernetes-backed event handler factory

use crate::watch::{RetryPolicy, WatchEventHandler};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::{Api, Client};
use overlay_core::{EventHandler, EventHandlerFactory, ObjectKind, OverlayError, ResourceHandler, Result};
use std::sync::Arc;
use tracing::debug;

/// KubeEventHandlerFactory creates watch-backed handlers for nodes and pods
pub struct KubeEventHandlerFactory {
    client: Client,
    retry: RetryPolicy,
}

impl KubeEventHandlerFactory {
    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Create a factory using the in-cluster or kubeconfig client
    pub async fn try_default(retry: RetryPolicy) -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, retry))
    }

    /// Get the underlying Kubernetes client
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

impl EventHandlerFactory for KubeEventHandlerFactory {
    fn create(
        &self,
        kind: ObjectKind,
        handler: Arc<dyn ResourceHandler>,
    ) -> Result<Arc<dyn EventHandler>> {
        if handler.kind() != kind {
            return Err(OverlayError::UnexpectedObjectKind {
                expected: kind,
                found: handler.kind(),
            });
        }

        debug!("Creating {} event handler", kind);
        let events: Arc<dyn EventHandler> = match kind {
            ObjectKind::Node => Arc::new(WatchEventHandler::new(
                Api::<Node>::all(self.client.clone()),
                handler,
                self.retry.clone(),
            )),
            // Pods on every node are watched: deletes are forwarded regardless
            // of where the pod ran.
            ObjectKind::Pod => Arc::new(WatchEventHandler::new(
                Api::<Pod>::all(self.client.clone()),
                handler,
                self.retry.clone(),
            )),
        };
        Ok(events)
    }
}
