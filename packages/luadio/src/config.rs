//! Runtime configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes:
//!
//! ```json
//! { "sample_rate": 48000, "lock_policy": "try_lock" }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// How the audio callback acquires the interpreter lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    /// Wait for the lock.
    #[default]
    Block,
    /// Give up immediately when the lock is held and output silence.
    TryLock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub sample_rate: u32,
    pub lock_policy: LockPolicy,
    /// VM instructions a single hook call may execute. `None` disables the check.
    pub instruction_budget: Option<u64>,
    pub max_logs_per_call: u32,
    pub log_history: usize,
    /// Initial snapshot buffer capacity in samples.
    pub snapshot_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            lock_policy: LockPolicy::Block,
            instruction_budget: Some(10_000_000),
            max_logs_per_call: crate::script_log::DEFAULT_MAX_LOGS_PER_CALL,
            log_history: crate::script_log::DEFAULT_LOG_HISTORY,
            snapshot_capacity: 4096,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("invalid runtime config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("in {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            anyhow::bail!("sample_rate must be positive");
        }
        if self.instruction_budget == Some(0) {
            anyhow::bail!("instruction_budget must be positive or null");
        }
        Ok(())
    }
}
