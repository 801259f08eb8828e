//! Flow-table implementation of the node backend

use crate::metrics::FlowMetrics;
use crate::programmer::FlowProgrammer;
use crate::state::{BridgeConfig, DesiredState, LocalPod, TunnelPeer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Pod};
use overlay_core::identity::{resolve_node_identity, resolve_pod_identity};
use overlay_core::object::{node_name, object_key};
use overlay_core::predicates::no_host_subnet;
use overlay_core::{NodeBackend, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Flow backend configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowBackendConfig {
    /// Name of the node this agent runs on
    pub node_name: String,
    /// Running on a node outside the primary SDN. When false, only nodes
    /// excluded from primary host subnet allocation become tunnel peers.
    pub hybrid_overlay_node: bool,
    pub sync_interval: Duration,
}

impl FlowBackendConfig {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            hybrid_overlay_node: true,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// FlowTableBackend keeps the desired overlay state and reconciles the
/// datapath against it
pub struct FlowTableBackend<P> {
    config: FlowBackendConfig,
    programmer: Arc<P>,
    state: RwLock<DesiredState>,
    metrics: FlowMetrics,
    resync: Notify,
    last_sync: RwLock<Option<DateTime<Utc>>>,
}

impl<P: FlowProgrammer> FlowTableBackend<P> {
    pub fn new(config: FlowBackendConfig, programmer: Arc<P>, metrics: FlowMetrics) -> Self {
        Self {
            config,
            programmer,
            state: RwLock::new(DesiredState::default()),
            metrics,
            resync: Notify::new(),
            last_sync: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &FlowBackendConfig {
        &self.config
    }

    pub fn metrics(&self) -> &FlowMetrics {
        &self.metrics
    }

    /// Copy of the current desired state
    pub async fn desired_state(&self) -> DesiredState {
        self.state.read().await.clone()
    }

    /// Completion time of the last successful flow sync
    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.read().await
    }

    /// Mutate the desired state and wake the flow sync when it changed.
    async fn update_state<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut DesiredState) -> bool,
    {
        let changed = mutate(&mut *self.state.write().await);
        if changed {
            self.resync.notify_one();
        }
        changed
    }

    async fn remove_peer(&self, name: &str) {
        if self.update_state(|state| state.peers.remove(name).is_some()).await {
            info!("Removed hybrid overlay peer {}", name);
        }
    }

    /// Bring the live flow table in line with desired state.
    ///
    /// Returns whether the live table had to be replaced.
    pub async fn sync_flows(&self) -> Result<bool> {
        let (desired, peers, pods) = {
            let state = self.state.read().await;
            (state.render(), state.peers.len(), state.pods.len())
        };
        self.metrics.sync_runs_total.inc();
        self.metrics.tunnel_peers.set(peers as i64);
        self.metrics.local_pods.set(pods as i64);

        let mut live = self.programmer.dump_flows().await?;
        live.sort();

        let replaced = live != desired;
        if replaced {
            debug!(
                "Flow table drifted: {} live flows, {} desired",
                live.len(),
                desired.len()
            );
            self.programmer.replace_flows(&desired).await?;
            self.metrics.drift_repairs_total.inc();
        }

        self.metrics.installed_flows.set(desired.len() as i64);
        *self.last_sync.write().await = Some(Utc::now());
        Ok(replaced)
    }
}

#[async_trait]
impl<P: FlowProgrammer> NodeBackend for FlowTableBackend<P> {
    async fn add_pod(&self, pod: &Pod) -> Result<()> {
        let key = object_key(&pod.metadata);
        let host_network = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.host_network)
            .unwrap_or(false);
        if host_network {
            trace!("Skipping host network pod {}", key);
            return Ok(());
        }

        let entry = LocalPod::from(resolve_pod_identity(pod)?);
        let changed = self
            .update_state(|state| state.pods.insert(key.clone(), entry.clone()).as_ref() != Some(&entry))
            .await;
        if changed {
            info!("Added pod {} to the hybrid overlay with IPs {:?}", key, entry.ips);
        }
        Ok(())
    }

    async fn delete_pod(&self, pod: &Pod) -> Result<()> {
        let key = object_key(&pod.metadata);
        if self.update_state(|state| state.pods.remove(&key).is_some()).await {
            info!("Removed pod {} from the hybrid overlay", key);
        } else {
            trace!("Pod {} was not attached to the hybrid overlay", key);
        }
        Ok(())
    }

    async fn add_node(&self, node: &Node) -> Result<()> {
        let name = node_name(node);
        if name == self.config.node_name {
            return self.ensure_hybrid_overlay_bridge(node).await;
        }

        if !self.config.hybrid_overlay_node && !no_host_subnet(node) {
            trace!("Node {} is managed by the primary SDN, not a tunnel peer", name);
            self.remove_peer(name).await;
            return Ok(());
        }

        let peer = match resolve_node_identity(node) {
            Ok(identity) => TunnelPeer::from(identity),
            Err(e) => {
                self.remove_peer(name).await;
                if e.is_transient() {
                    debug!("Node {} is not ready for the hybrid overlay: {}", name, e);
                    return Ok(());
                }
                error!("Cleaning up hybrid overlay peer {}: {}", name, e);
                return Err(e);
            }
        };

        let changed = self
            .update_state(|state| state.peers.insert(name.to_string(), peer) != Some(peer))
            .await;
        if changed {
            info!(
                "Hybrid overlay peer {}: subnet {} via {} (DR MAC {})",
                name, peer.subnet, peer.vtep, peer.dr_mac
            );
        }
        Ok(())
    }

    async fn delete_node(&self, node: &Node) -> Result<()> {
        let name = node_name(node);
        if name == self.config.node_name {
            if self.update_state(|state| state.bridge.take().is_some()).await {
                warn!("Local node {} deleted, tearing down hybrid overlay bridge", name);
            }
            return Ok(());
        }
        self.remove_peer(name).await;
        Ok(())
    }

    async fn ensure_hybrid_overlay_bridge(&self, node: &Node) -> Result<()> {
        let bridge = BridgeConfig::from(resolve_node_identity(node)?);
        let changed = self
            .update_state(|state| state.bridge.replace(bridge) != Some(bridge))
            .await;
        if changed {
            info!(
                "Hybrid overlay bridge configured: subnet {}, endpoint {}, DR MAC {}",
                bridge.subnet, bridge.node_ip, bridge.dr_mac
            );
        } else {
            trace!("Hybrid overlay bridge already up to date");
        }
        Ok(())
    }

    async fn run_flow_sync(&self, shutdown: CancellationToken) {
        info!(
            "Starting hybrid overlay flow sync every {:?}",
            self.config.sync_interval
        );
        let mut ticker = tokio::time::interval(self.config.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.resync.notified() => {}
            }

            match self.sync_flows().await {
                Ok(true) => info!("Repaired hybrid overlay flow table"),
                Ok(false) => trace!("Hybrid overlay flow table in sync"),
                Err(e) => {
                    self.metrics.sync_errors_total.inc();
                    warn!("Hybrid overlay flow sync failed: {}", e);
                }
            }
        }
        info!("Stopped hybrid overlay flow sync");
    }
}
