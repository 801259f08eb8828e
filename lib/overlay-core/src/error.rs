use crate::object::ObjectKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OverlayError>;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("{kind} {name}: missing annotation {key}")]
    MissingAnnotation {
        kind: ObjectKind,
        name: String,
        key: &'static str,
    },

    #[error("node {node}: invalid distributed router MAC {value:?}")]
    InvalidMac { node: String, value: String },

    #[error("node {node}: invalid subnet {value:?}: {reason}")]
    InvalidCidr {
        node: String,
        value: String,
        reason: String,
    },

    #[error("node {0}: missing node subnet and/or node IP")]
    MissingAddressInfo(String),

    #[error("pod {pod}: malformed pod network annotation: {reason}")]
    MalformedPodAnnotation { pod: String, reason: String },

    #[error("object is not a {expected} (got {found})")]
    UnexpectedObjectKind {
        expected: ObjectKind,
        found: ObjectKind,
    },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Node controller already started")]
    AlreadyStarted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OverlayError {
    /// Conditions expected while upstream controllers are still populating
    /// an object; they resolve on a later event without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OverlayError::MissingAnnotation { .. }
                | OverlayError::MissingAddressInfo(_)
                | OverlayError::MalformedPodAnnotation { .. }
        )
    }
}
