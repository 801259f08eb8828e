use anyhow::{Context, Result};
use overlay_core::HybridOverlayNode;
use overlay_flows::{FlowMetrics, FlowTableBackend, InMemoryProgrammer};
use overlay_informer::KubeEventHandlerFactory;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod health;

use config::{AgentConfig, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::from_env().context("loading configuration")?;
    init_tracing(config.log_format);

    info!("Starting hybrid-overlay-node on {}...", config.node_name);
    info!("  - Hybrid overlay node: {}", config.hybrid_overlay_node);
    info!("  - Flow sync interval: {:?}", config.flow_sync_interval);
    info!(
        "  - Threadiness: {} node, {} pod",
        config.threadiness.nodes, config.threadiness.pods
    );

    let factory = KubeEventHandlerFactory::try_default(config.retry_policy())
        .await
        .context("creating Kubernetes client")?;

    let metrics = FlowMetrics::new()?;
    let backend = FlowTableBackend::new(
        config.backend_config(),
        Arc::new(InMemoryProgrammer::new()),
        metrics.clone(),
    );
    let controller = Arc::new(HybridOverlayNode::new(
        config.node_name.clone(),
        backend,
        &factory,
        config.threadiness,
    )?);

    let shutdown = CancellationToken::new();

    let listener = TcpListener::bind(config.health_addr)
        .await
        .with_context(|| format!("binding health server to {}", config.health_addr))?;
    let ready: health::ReadyFn = {
        let controller = controller.clone();
        Arc::new(move || controller.is_ready())
    };
    let health_server = tokio::spawn(health::serve(listener, ready, metrics, shutdown.clone()));

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown signal received, stopping...");
            shutdown.cancel();
        }
    });

    let result = controller.run(shutdown.clone()).await;
    shutdown.cancel();
    if let Err(e) = health_server.await {
        error!("Health server task failed: {}", e);
    }

    result?;
    info!("hybrid-overlay-node stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
