//! Service configuration, loaded from TOML.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration:
//!
//! ```toml
//! [orchestrator]
//! max_parallelism = 4
//!
//! [executor]
//! max_retries = 3
//! capability_timeouts_ms = { fetch = 10000 }
//!
//! [safety.breaker]
//! risk_event_threshold = 1
//!
//! [[safety.rules]]
//! id = "confirm-irreversible"
//! verdict = "confirm"
//! match = { risk = "irreversible" }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::approval::ApprovalMode;
use crate::context::ContextConfig;
use crate::executor::ExecutorConfig;
use crate::gateway::GatewayConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::planner::PlannerConfig;
use crate::safety::{BreakerConfig, PolicySet, SafetyRule};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub breaker: BreakerConfig,
    /// How `confirm` verdicts are resolved.
    pub approval_mode: ApprovalMode,
    /// Ordered policy rules. Anything no rule matches is denied.
    pub rules: Vec<SafetyRule>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            approval_mode: ApprovalMode::Manual,
            rules: PolicySet::standard().rules,
        }
    }
}

impl SafetyConfig {
    pub fn policy(&self) -> PolicySet {
        PolicySet {
            rules: self.rules.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForemanConfig {
    pub orchestrator: OrchestratorConfig,
    pub executor: ExecutorConfig,
    pub gateway: GatewayConfig,
    pub safety: SafetyConfig,
    pub contexts: ContextConfig,
    pub planner: PlannerConfig,
}

impl ForemanConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.orchestrator.max_parallelism == Some(0) {
            return invalid("orchestrator.max_parallelism must be at least 1");
        }
        if self.orchestrator.max_retries == 0 {
            return invalid("orchestrator.max_retries must be at least 1");
        }
        if self.orchestrator.retained_runs == 0 {
            return invalid("orchestrator.retained_runs must be at least 1");
        }
        if self.executor.max_retries == 0 {
            return invalid("executor.max_retries must be at least 1");
        }
        if self.executor.timeout_ms == 0
            || self.executor.capability_timeouts_ms.values().any(|ms| *ms == 0)
        {
            return invalid("executor timeouts must be non-zero");
        }
        if self.gateway.invocation_timeout_ms == 0 || self.gateway.approval_timeout_ms == 0 {
            return invalid("gateway timeouts must be non-zero");
        }
        if self.gateway.history_window == 0 {
            return invalid("gateway.history_window must be at least 1");
        }
        if self.safety.breaker.risk_event_threshold == 0
            || self.safety.breaker.consecutive_failure_limit == 0
        {
            return invalid("safety.breaker thresholds must be at least 1");
        }
        if self.contexts.max_live == 0 {
            return invalid("contexts.max_live must be at least 1");
        }
        if self.contexts.quota.cpu_time_ms == 0 || self.contexts.quota.wall_clock_ms == 0 {
            return invalid("context quotas must be non-zero");
        }
        if self.planner.max_depth == 0 {
            return invalid("planner.max_depth must be at least 1");
        }

        let mut seen = HashSet::new();
        for rule in &self.safety.rules {
            if rule.id.trim().is_empty() {
                return invalid("safety rule ids must not be empty");
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate safety rule id '{}'",
                    rule.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::SafetyVerdict;

    #[test]
    fn test_empty_file_is_default() {
        let config = ForemanConfig::from_toml_str("").unwrap();
        assert_eq!(config, ForemanConfig::default());
        assert_eq!(config.safety.rules.len(), 3);
    }

    #[test]
    fn test_parse_sections() {
        let config = ForemanConfig::from_toml_str(
            r#"
            [orchestrator]
            max_parallelism = 4
            cancel_grace_ms = 1000

            [executor]
            capability_timeouts_ms = { fetch = 10000 }

            [safety]
            approval_mode = "auto_deny"

            [safety.breaker]
            risk_event_threshold = 2

            [[safety.rules]]
            id = "deny-mailer"
            priority = -10
            verdict = "deny"
            match = { tool = "mailer" }

            [contexts.quota]
            network = { mode = "allow_hosts", hosts = ["example.com"] }
            "#,
        )
        .unwrap();

        assert_eq!(config.orchestrator.max_parallelism, Some(4));
        assert_eq!(config.orchestrator.max_retries, 3);
        assert_eq!(config.executor.capability_timeouts_ms["fetch"], 10_000);
        assert_eq!(config.safety.approval_mode, ApprovalMode::AutoDeny);
        assert_eq!(config.safety.breaker.risk_event_threshold, 2);
        assert_eq!(config.safety.breaker.cool_down_ms, 30_000);
        assert_eq!(config.safety.rules.len(), 1);
        assert_eq!(config.safety.rules[0].verdict, SafetyVerdict::Deny);
        assert_eq!(config.contexts.quota.network.to_string(), "allow:example.com");
    }

    #[test]
    fn test_rejects_zero_parallelism() {
        let err = ForemanConfig::from_toml_str("[orchestrator]\nmax_parallelism = 0").unwrap_err();
        assert!(err.to_string().contains("max_parallelism"));
    }

    #[test]
    fn test_rejects_zero_budget() {
        let err = ForemanConfig::from_toml_str("[executor]\ntimeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_duplicate_rule_ids() {
        let err = ForemanConfig::from_toml_str(
            r#"
            [[safety.rules]]
            id = "a"
            verdict = "allow"

            [[safety.rules]]
            id = "a"
            verdict = "deny"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate safety rule id 'a'"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ForemanConfig::load("/nonexistent/foreman.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
