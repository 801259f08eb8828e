//! Datapath programming seam

use crate::flows::FlowRule;
use async_trait::async_trait;
use overlay_core::Result;
use tokio::sync::RwLock;

/// Reads and writes the live bridge flow table
#[async_trait]
pub trait FlowProgrammer: Send + Sync + 'static {
    async fn dump_flows(&self) -> Result<Vec<FlowRule>>;

    /// Atomically replace the whole table with `flows`
    async fn replace_flows(&self, flows: &[FlowRule]) -> Result<()>;
}

/// Flow table held in memory; used for dry runs and tests
#[derive(Default)]
pub struct InMemoryProgrammer {
    flows: RwLock<Vec<FlowRule>>,
}

impl InMemoryProgrammer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn flow_count(&self) -> usize {
        self.flows.read().await.len()
    }
}

#[async_trait]
impl FlowProgrammer for InMemoryProgrammer {
    async fn dump_flows(&self) -> Result<Vec<FlowRule>> {
        Ok(self.flows.read().await.clone())
    }

    async fn replace_flows(&self, flows: &[FlowRule]) -> Result<()> {
        *self.flows.write().await = flows.to_vec();
        Ok(())
    }
}
