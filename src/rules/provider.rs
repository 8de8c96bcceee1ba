//! Rule providers.
//!
//! The engine reads rule definitions through the [`RuleProvider`] trait and
//! never writes back. Production deployments typically back this with the
//! administration database; [`StaticRuleProvider`] covers embedded setups
//! and tests with an in-memory snapshot that can be swapped at runtime.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use super::definition::RuleDefinition;
use crate::error::{FloodgateError, Result};

/// Read-only source of rule definitions.
#[async_trait]
pub trait RuleProvider: Send + Sync {
    /// All currently active rules.
    async fn active_rules(&self) -> Result<Vec<RuleDefinition>>;

    /// Look up a single rule by id, active or not.
    async fn rule_by_id(&self, id: Uuid) -> Result<Option<RuleDefinition>>;
}

/// YAML document shape accepted by [`StaticRuleProvider::from_yaml`].
#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RuleDefinition>,
}

/// In-memory rule snapshot.
///
/// The whole set is replaced atomically; readers always see either the old
/// snapshot or the new one, never a mix.
#[derive(Debug, Default)]
pub struct StaticRuleProvider {
    rules: RwLock<Vec<RuleDefinition>>,
}

impl StaticRuleProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider from validated definitions.
    pub fn with_rules(rules: Vec<RuleDefinition>) -> Result<Self> {
        for rule in &rules {
            rule.validate()?;
        }
        Ok(Self {
            rules: RwLock::new(rules),
        })
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading throttling rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: RuleFile = serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse rule file: {}", e)))?;
        Self::with_rules(file.rules)
    }

    /// Replace the entire rule set. Takes effect on the next fetch.
    pub fn replace(&self, rules: Vec<RuleDefinition>) -> Result<()> {
        for rule in &rules {
            rule.validate()?;
        }
        let count = rules.len();
        *self.rules.write() = rules;
        info!(rule_count = count, "Replaced throttling rule set");
        Ok(())
    }

    /// Number of rules currently held (active or not).
    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }
}

#[async_trait]
impl RuleProvider for StaticRuleProvider {
    async fn active_rules(&self) -> Result<Vec<RuleDefinition>> {
        Ok(self
            .rules
            .read()
            .iter()
            .filter(|r| r.active)
            .cloned()
            .collect())
    }

    async fn rule_by_id(&self, id: Uuid) -> Result<Option<RuleDefinition>> {
        Ok(self.rules.read().iter().find(|r| r.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Scope, Strategy};

    fn sample_rule(name: &str, active: bool) -> RuleDefinition {
        let mut rule = RuleDefinition::new(name, Strategy::FixedWindow, Scope::Ip, 10, 1000);
        rule.active = active;
        rule
    }

    #[tokio::test]
    async fn test_active_rules_filters_inactive() {
        let provider = StaticRuleProvider::with_rules(vec![
            sample_rule("on", true),
            sample_rule("off", false),
        ])
        .unwrap();

        let active = provider.active_rules().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "on");
    }

    #[tokio::test]
    async fn test_rule_by_id_finds_inactive_rules() {
        let rule = sample_rule("off", false);
        let id = rule.id;
        let provider = StaticRuleProvider::with_rules(vec![rule]).unwrap();

        let found = provider.rule_by_id(id).await.unwrap();
        assert!(found.is_some());
        assert!(!found.unwrap().active);

        let missing = provider.rule_by_id(Uuid::new_v4()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_replace_swaps_snapshot() {
        let provider = StaticRuleProvider::with_rules(vec![sample_rule("old", true)]).unwrap();
        provider
            .replace(vec![sample_rule("new-a", true), sample_rule("new-b", true)])
            .unwrap();

        let active = provider.active_rules().await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|r| r.name.starts_with("new-")));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
rules:
  - id: 9f0e2f9c-4b1c-4f52-a6ce-5a2ff9f2f001
    name: search-per-user
    strategy: sliding-window
    scope: user
    max_requests: 120
    window_ms: 60000
    priority: 10
  - id: 9f0e2f9c-4b1c-4f52-a6ce-5a2ff9f2f002
    name: login-per-ip
    strategy: token-bucket
    scope: ip
    max_requests: 5
    window_ms: 60000
    block_duration_ms: 300000
    endpoint_pattern: "^POST /auth/login$"
"#;
        let provider = StaticRuleProvider::from_yaml(yaml).unwrap();
        assert_eq!(provider.rule_count(), 2);
    }

    #[test]
    fn test_from_yaml_rejects_invalid_rule() {
        let yaml = r#"
rules:
  - id: 9f0e2f9c-4b1c-4f52-a6ce-5a2ff9f2f003
    name: broken
    strategy: fixed-window
    scope: ip
    max_requests: 0
    window_ms: 60000
"#;
        assert!(StaticRuleProvider::from_yaml(yaml).is_err());
    }
}
