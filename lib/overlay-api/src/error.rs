use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("annotation {0} not set")]
    AnnotationNotSet(&'static str),

    #[error("failed to unmarshal annotation {key}: {reason}")]
    InvalidAnnotation { key: &'static str, reason: String },

    #[error("no annotation entry for network {0}")]
    MissingNetwork(String),

    #[error("invalid MAC address {0:?}")]
    InvalidMacAddress(String),

    #[error("invalid CIDR {value:?}: {reason}")]
    InvalidCidr { value: String, reason: String },

    #[error("invalid IP address {0:?}")]
    InvalidIpAddress(String),

    #[error("bad annotation data: {0}")]
    BadData(String),
}
