//! Event wiring between substrate callbacks and the backend

use crate::backend::NodeBackend;
use crate::object::{node_name, pod_node_name, ClusterObject, ObjectKind};
use crate::predicates::{node_changed, pod_changed};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

/// Callbacks registered with the event substrate for one object kind.
///
/// Updates that pass `update_filter` are delivered to `on_add` with the new
/// object.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn kind(&self) -> ObjectKind;

    async fn on_add(&self, obj: &ClusterObject) -> Result<()>;

    async fn on_delete(&self, obj: &ClusterObject) -> Result<()>;

    /// Never fails. Objects of the wrong kind pass so that `on_add` reports
    /// the wiring error.
    fn update_filter(&self, old: &ClusterObject, new: &ClusterObject) -> bool;
}

/// Node callbacks: every add and delete is forwarded
pub struct NodeHandler<B> {
    backend: Arc<B>,
}

impl<B: NodeBackend> NodeHandler<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: NodeBackend> ResourceHandler for NodeHandler<B> {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Node
    }

    async fn on_add(&self, obj: &ClusterObject) -> Result<()> {
        let node = obj.as_node()?;
        debug!("Adding node {}", node_name(node));
        self.backend.add_node(node).await
    }

    async fn on_delete(&self, obj: &ClusterObject) -> Result<()> {
        let node = obj.as_node()?;
        debug!("Deleting node {}", node_name(node));
        self.backend.delete_node(node).await
    }

    fn update_filter(&self, old: &ClusterObject, new: &ClusterObject) -> bool {
        match (old.as_node(), new.as_node()) {
            (Ok(old), Ok(new)) => node_changed(old, new),
            _ => true,
        }
    }
}

/// Pod callbacks: adds are limited to pods scheduled on this node, deletes
/// are always forwarded
pub struct PodHandler<B> {
    backend: Arc<B>,
    node_name: String,
}

impl<B: NodeBackend> PodHandler<B> {
    pub fn new(backend: Arc<B>, node_name: impl Into<String>) -> Self {
        Self {
            backend,
            node_name: node_name.into(),
        }
    }
}

#[async_trait]
impl<B: NodeBackend> ResourceHandler for PodHandler<B> {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Pod
    }

    async fn on_add(&self, obj: &ClusterObject) -> Result<()> {
        let pod = obj.as_pod()?;
        if pod_node_name(pod) != self.node_name {
            trace!("Ignoring pod {} scheduled to {:?}", obj.key(), pod_node_name(pod));
            return Ok(());
        }
        debug!("Adding pod {}", obj.key());
        self.backend.add_pod(pod).await
    }

    async fn on_delete(&self, obj: &ClusterObject) -> Result<()> {
        let pod = obj.as_pod()?;
        debug!("Deleting pod {}", obj.key());
        self.backend.delete_pod(pod).await
    }

    fn update_filter(&self, old: &ClusterObject, new: &ClusterObject) -> bool {
        match (old.as_pod(), new.as_pod()) {
            (Ok(old), Ok(new)) => pod_changed(old, new),
            _ => true,
        }
    }
}
