//! Cluster objects as delivered by the event substrate

use crate::{OverlayError, Result};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

static NO_ANNOTATIONS: BTreeMap<String, String> = BTreeMap::new();

/// Kinds of objects the node controller subscribes to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Node,
    Pod,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Node => f.write_str("node"),
            ObjectKind::Pod => f.write_str("pod"),
        }
    }
}

/// An object handed to event callbacks. Callbacks registered for one kind
/// reject the other with `UnexpectedObjectKind`.
#[derive(Clone, Debug)]
pub enum ClusterObject {
    Node(Arc<Node>),
    Pod(Arc<Pod>),
}

impl ClusterObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ClusterObject::Node(_) => ObjectKind::Node,
            ClusterObject::Pod(_) => ObjectKind::Pod,
        }
    }

    /// Cache key: `namespace/name` for namespaced objects, `name` otherwise
    pub fn key(&self) -> String {
        let meta = match self {
            ClusterObject::Node(node) => &node.metadata,
            ClusterObject::Pod(pod) => &pod.metadata,
        };
        object_key(meta)
    }

    pub fn as_node(&self) -> Result<&Node> {
        match self {
            ClusterObject::Node(node) => Ok(node),
            other => Err(OverlayError::UnexpectedObjectKind {
                expected: ObjectKind::Node,
                found: other.kind(),
            }),
        }
    }

    pub fn as_pod(&self) -> Result<&Pod> {
        match self {
            ClusterObject::Pod(pod) => Ok(pod),
            other => Err(OverlayError::UnexpectedObjectKind {
                expected: ObjectKind::Pod,
                found: other.kind(),
            }),
        }
    }
}

impl From<Node> for ClusterObject {
    fn from(node: Node) -> Self {
        ClusterObject::Node(Arc::new(node))
    }
}

impl From<Pod> for ClusterObject {
    fn from(pod: Pod) -> Self {
        ClusterObject::Pod(Arc::new(pod))
    }
}

pub fn object_key(meta: &ObjectMeta) -> String {
    let name = meta.name.as_deref().unwrap_or_default();
    match meta.namespace.as_deref() {
        Some(namespace) if !namespace.is_empty() => format!("{}/{}", namespace, name),
        _ => name.to_string(),
    }
}

pub fn annotations(meta: &ObjectMeta) -> &BTreeMap<String, String> {
    meta.annotations.as_ref().unwrap_or(&NO_ANNOTATIONS)
}

pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

/// Name of the node a pod is scheduled to, empty when unscheduled
pub fn pod_node_name(pod: &Pod) -> &str {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .unwrap_or_default()
}
