//! Agent configuration from the environment

use anyhow::{anyhow, Context, Result};
use overlay_core::Threadiness;
use overlay_flows::FlowBackendConfig;
use overlay_informer::RetryPolicy;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:9410";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow!("unknown log format {:?}, expected text or json", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub node_name: String,
    pub hybrid_overlay_node: bool,
    pub flow_sync_interval: Duration,
    pub health_addr: SocketAddr,
    pub threadiness: Threadiness,
    pub max_retries: u32,
    pub log_format: LogFormat,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let node_name = lookup("NODE_NAME")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| anyhow!("NODE_NAME must be set"))?;

        let defaults = Threadiness::default();
        let retry = RetryPolicy::default();

        let config = Self {
            node_name,
            hybrid_overlay_node: parse_var(&lookup, "HO_HYBRID_OVERLAY_NODE", true)?,
            flow_sync_interval: Duration::from_secs(parse_var(
                &lookup,
                "HO_FLOW_SYNC_INTERVAL_SECS",
                overlay_flows::backend::DEFAULT_SYNC_INTERVAL.as_secs(),
            )?),
            health_addr: parse_var(&lookup, "HO_HEALTH_ADDR", DEFAULT_HEALTH_ADDR.parse()?)?,
            threadiness: Threadiness {
                nodes: parse_var(&lookup, "HO_NODE_THREADINESS", defaults.nodes)?,
                pods: parse_var(&lookup, "HO_POD_THREADINESS", defaults.pods)?,
            },
            max_retries: parse_var(&lookup, "HO_MAX_RETRIES", retry.max_retries)?,
            log_format: parse_var(&lookup, "HO_LOG_FORMAT", LogFormat::Text)?,
        };

        if config.flow_sync_interval.is_zero() {
            return Err(anyhow!("HO_FLOW_SYNC_INTERVAL_SECS must be greater than zero"));
        }
        if config.threadiness.nodes == 0 || config.threadiness.pods == 0 {
            return Err(anyhow!("threadiness must be at least 1"));
        }
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }

    pub fn backend_config(&self) -> FlowBackendConfig {
        FlowBackendConfig {
            node_name: self.node_name.clone(),
            hybrid_overlay_node: self.hybrid_overlay_node,
            sync_interval: self.flow_sync_interval,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("invalid value {:?} for {}", value, key)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AgentConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("NODE_NAME", "win-1")]).unwrap();
        assert_eq!(config.node_name, "win-1");
        assert!(config.hybrid_overlay_node);
        assert_eq!(config.flow_sync_interval, Duration::from_secs(30));
        assert_eq!(config.threadiness, Threadiness { nodes: 15, pods: 1 });
        assert_eq!(config.max_retries, 15);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.health_addr.port(), 9410);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("NODE_NAME", "worker-1"),
            ("HO_HYBRID_OVERLAY_NODE", "false"),
            ("HO_FLOW_SYNC_INTERVAL_SECS", "5"),
            ("HO_POD_THREADINESS", "4"),
            ("HO_MAX_RETRIES", "3"),
            ("HO_LOG_FORMAT", "JSON"),
            ("HO_HEALTH_ADDR", "127.0.0.1:8080"),
        ])
        .unwrap();
        assert!(!config.hybrid_overlay_node);
        assert_eq!(config.backend_config().sync_interval, Duration::from_secs(5));
        assert_eq!(config.threadiness.pods, 4);
        assert_eq!(config.retry_policy().max_retries, 3);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.health_addr.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_invalid_values() {
        assert!(config(&[]).is_err());
        assert!(config(&[("NODE_NAME", "")]).is_err());

        let err = config(&[("NODE_NAME", "n"), ("HO_MAX_RETRIES", "many")]).unwrap_err();
        assert!(format!("{:#}", err).contains("HO_MAX_RETRIES"));

        assert!(config(&[("NODE_NAME", "n"), ("HO_FLOW_SYNC_INTERVAL_SECS", "0")]).is_err());
        assert!(config(&[("NODE_NAME", "n"), ("HO_NODE_THREADINESS", "0")]).is_err());
        assert!(config(&[("NODE_NAME", "n"), ("HO_LOG_FORMAT", "xml")]).is_err());
    }
}
