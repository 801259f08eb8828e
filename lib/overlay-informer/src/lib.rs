//! Kubernetes watch substrate for the hybrid overlay node controller
pub mod cache;
pub mod client;
pub mod watch;

pub use cache::{Delta, ObjectCache};
pub use client::KubeEventHandlerFactory;
pub use watch::{RetryPolicy, WatchEventHandler};
