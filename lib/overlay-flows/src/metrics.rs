//! Prometheus metrics for the flow-table backend

use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Flow sync and desired state metrics
#[derive(Clone)]
pub struct FlowMetrics {
    /// Flow sync passes run
    pub sync_runs_total: IntCounter,
    /// Passes that found the live table out of date and replaced it
    pub drift_repairs_total: IntCounter,
    /// Passes that failed to read or write the live table
    pub sync_errors_total: IntCounter,
    pub tunnel_peers: IntGauge,
    pub local_pods: IntGauge,
    pub installed_flows: IntGauge,
    /// Prometheus registry for metrics
    pub registry: Arc<Registry>,
}

impl FlowMetrics {
    /// Create a new set of metrics in a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let sync_runs_total = IntCounter::new(
            "hybrid_overlay_flow_sync_runs_total",
            "Total flow sync passes",
        )?;
        let drift_repairs_total = IntCounter::new(
            "hybrid_overlay_flow_drift_repairs_total",
            "Flow sync passes that replaced a drifted flow table",
        )?;
        let sync_errors_total = IntCounter::new(
            "hybrid_overlay_flow_sync_errors_total",
            "Flow sync passes that failed",
        )?;
        let tunnel_peers = IntGauge::new(
            "hybrid_overlay_tunnel_peers",
            "Remote nodes reachable through the overlay tunnel",
        )?;
        let local_pods = IntGauge::new(
            "hybrid_overlay_local_pods",
            "Local pods attached to the overlay bridge",
        )?;
        let installed_flows = IntGauge::new(
            "hybrid_overlay_installed_flows",
            "Flows installed by the last successful sync",
        )?;

        registry.register(Box::new(sync_runs_total.clone()))?;
        registry.register(Box::new(drift_repairs_total.clone()))?;
        registry.register(Box::new(sync_errors_total.clone()))?;
        registry.register(Box::new(tunnel_peers.clone()))?;
        registry.register(Box::new(local_pods.clone()))?;
        registry.register(Box::new(installed_flows.clone()))?;

        Ok(Self {
            sync_runs_total,
            drift_repairs_total,
            sync_errors_total,
            tunnel_peers,
            local_pods,
            installed_flows,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_registered_metrics() {
        let metrics = FlowMetrics::new().unwrap();
        metrics.sync_runs_total.inc();
        metrics.tunnel_peers.set(3);

        let text = metrics.gather().unwrap();
        assert!(text.contains("hybrid_overlay_flow_sync_runs_total 1"));
        assert!(text.contains("hybrid_overlay_tunnel_peers 3"));
        assert!(text.contains("hybrid_overlay_flow_drift_repairs_total 0"));
    }

    #[test]
    fn test_clones_share_metrics() {
        let metrics = FlowMetrics::new().unwrap();
        let clone = metrics.clone();
        clone.drift_repairs_total.inc();
        assert_eq!(metrics.drift_repairs_total.get(), 1);
    }
}
