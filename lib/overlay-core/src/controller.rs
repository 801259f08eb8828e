//! Hybrid overlay node controller
//!
//! Composition root of the node agent: owns the node and pod subscriptions
//! and the backend's flow sync task, and reports readiness once all three
//! have been launched.

use crate::backend::NodeBackend;
use crate::events::{EventHandler, EventHandlerFactory};
use crate::object::ObjectKind;
use crate::wiring::{NodeHandler, PodHandler};
use crate::{OverlayError, Result};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Default number of node objects processed concurrently
pub const DEFAULT_NODE_THREADINESS: usize = 15;

/// Default number of pod objects processed concurrently
pub const DEFAULT_POD_THREADINESS: usize = 1;

/// Lifecycle of a node controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Created,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

/// Per-kind event processing parallelism
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Threadiness {
    pub nodes: usize,
    pub pods: usize,
}

impl Default for Threadiness {
    fn default() -> Self {
        Self {
            nodes: DEFAULT_NODE_THREADINESS,
            pods: DEFAULT_POD_THREADINESS,
        }
    }
}

struct Status {
    ready: bool,
    phase: Phase,
}

/// HybridOverlayNode drives one node's overlay participation
pub struct HybridOverlayNode<B> {
    node_name: String,
    backend: Arc<B>,
    node_events: Arc<dyn EventHandler>,
    pod_events: Arc<dyn EventHandler>,
    threadiness: Threadiness,
    status: Mutex<Status>,
}

impl<B: NodeBackend> HybridOverlayNode<B> {
    /// Register node and pod callbacks with the substrate behind `factory`.
    pub fn new(
        node_name: impl Into<String>,
        backend: B,
        factory: &dyn EventHandlerFactory,
        threadiness: Threadiness,
    ) -> Result<Self> {
        let node_name = node_name.into();
        let backend = Arc::new(backend);

        let node_events = factory.create(
            ObjectKind::Node,
            Arc::new(NodeHandler::new(backend.clone())),
        )?;
        let pod_events = factory.create(
            ObjectKind::Pod,
            Arc::new(PodHandler::new(backend.clone(), node_name.clone())),
        )?;

        Ok(Self {
            node_name,
            backend,
            node_events,
            pod_events,
            threadiness,
            status: Mutex::new(Status {
                ready: false,
                phase: Phase::Created,
            }),
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn is_ready(&self) -> bool {
        self.status().ready
    }

    pub fn phase(&self) -> Phase {
        self.status().phase
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        // The status is two plain fields; a panic elsewhere cannot leave it torn.
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_phase(&self, phase: Phase) {
        self.status().phase = phase;
    }

    /// Run the controller until `shutdown` is cancelled. Returns only after
    /// every worker has exited.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        {
            let mut status = self.status();
            if status.phase != Phase::Created {
                return Err(OverlayError::AlreadyStarted);
            }
            status.phase = Phase::Starting;
        }
        info!("Starting Hybrid Overlay Node Controller for {}", self.node_name);

        info!("Starting Hybrid Overlay Node workers");
        let workers = vec![
            spawn_worker(
                "node",
                run_events(
                    ObjectKind::Node,
                    self.node_events.clone(),
                    self.threadiness.nodes,
                    shutdown.clone(),
                ),
            ),
            spawn_worker(
                "pod",
                run_events(
                    ObjectKind::Pod,
                    self.pod_events.clone(),
                    self.threadiness.pods,
                    shutdown.clone(),
                ),
            ),
            spawn_worker("flow-sync", {
                let backend = self.backend.clone();
                let shutdown = shutdown.clone();
                async move { backend.run_flow_sync(shutdown).await }
            }),
        ];
        info!("Started Hybrid Overlay Node workers");

        {
            let mut status = self.status();
            status.ready = true;
            status.phase = Phase::Running;
        }

        shutdown.cancelled().await;
        self.set_phase(Phase::ShuttingDown);
        info!("Shutting down Hybrid Overlay Node workers");

        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("Hybrid overlay worker did not exit cleanly: {}", e);
            }
        }

        self.set_phase(Phase::Stopped);
        info!("Shut down Hybrid Overlay Node workers");
        Ok(())
    }
}

async fn run_events(
    kind: ObjectKind,
    events: Arc<dyn EventHandler>,
    threadiness: usize,
    shutdown: CancellationToken,
) {
    if let Err(e) = events.run(threadiness, shutdown).await {
        error!("{} event handler failed: {}", kind, e);
    }
}

/// Spawn a worker whose panics are logged at the task boundary instead of
/// tearing down its siblings.
fn spawn_worker<F>(name: &'static str, work: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
            error!(
                "Hybrid overlay {} worker panicked: {}",
                name,
                panic_message(panic.as_ref())
            );
        }
    })
}

/// Text of a caught panic payload
pub fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
