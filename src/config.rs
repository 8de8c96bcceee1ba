//! Configuration for the Floodgate engine.

use serde::{Deserialize, Serialize};

/// Engine-level tunables.
///
/// Rule definitions themselves live in the external rule store; this struct
/// only configures the engine's own machinery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often the state store sweep runs, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Upper bound on a single rule store fetch, in milliseconds.
    /// A fetch that exceeds this resolves to an allow (fail open).
    #[serde(default = "default_rule_fetch_timeout")]
    pub rule_fetch_timeout_ms: u64,

    /// Capacity of the audit dispatch queue. When the queue is full,
    /// records are dropped rather than delaying the decision path.
    #[serde(default = "default_audit_queue_capacity")]
    pub audit_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            rule_fetch_timeout_ms: default_rule_fetch_timeout(),
            audit_queue_capacity: default_audit_queue_capacity(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_rule_fetch_timeout() -> u64 {
    500
}

fn default_audit_queue_capacity() -> usize {
    1024
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::FloodgateError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sweep_interval_secs, 300);
        assert_eq!(config.rule_fetch_timeout_ms, 500);
        assert_eq!(config.audit_queue_capacity, 1024);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: EngineConfig = serde_yaml::from_str("sweep_interval_secs: 60").unwrap();
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.rule_fetch_timeout_ms, 500);
    }
}
