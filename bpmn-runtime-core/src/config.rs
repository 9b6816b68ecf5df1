//! Engine configuration.
//!
//! Reads from env vars:
//!   BPMN_WORKER_THREAD_PREFIX - worker thread name prefix (default: bpmn-worker)
//!   BPMN_WORKER_THREADS - worker pool size (default: 4)
//!   BPMN_AUDIT_ENABLED - forward audit events to the sink (default: true)

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub worker_thread_prefix: String,
    pub worker_threads: usize,
    pub audit_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_thread_prefix: "bpmn-worker".to_string(),
            worker_threads: 4,
            audit_enabled: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(prefix) = lookup("BPMN_WORKER_THREAD_PREFIX") {
            config.worker_thread_prefix = prefix;
        }
        if let Some(threads) = lookup("BPMN_WORKER_THREADS") {
            config.worker_threads = threads.parse().map_err(|_| {
                FlowError::Config(format!("BPMN_WORKER_THREADS is not a number: {threads}"))
            })?;
        }
        if let Some(audit) = lookup("BPMN_AUDIT_ENABLED") {
            config.audit_enabled = audit.parse().map_err(|_| {
                FlowError::Config(format!("BPMN_AUDIT_ENABLED is not a bool: {audit}"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| FlowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_thread_prefix.trim().is_empty() {
            return Err(FlowError::Config("worker_thread_prefix is empty".into()));
        }
        if self.worker_threads == 0 {
            return Err(FlowError::Config("worker_threads must be at least 1".into()));
        }
        Ok(())
    }
}
