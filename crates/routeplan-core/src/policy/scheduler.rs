//! Scheduler policy: load balancing, health checks, error handling.
//!
//! These are defaults for an external scheduler. Nothing here runs a health
//! check or retries a request.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::assembly::PipelineTemplate;

/// Consecutive failures before a pipeline is marked unhealthy.
pub const UNHEALTHY_THRESHOLD: u32 = 3;

/// Automatic recovery attempts before giving up on a pipeline.
pub const MAX_RECOVERY_ATTEMPTS: u32 = 3;

/// Load-balancing weights from template priorities.
///
/// `weight = round(priority / Σpriority * 100)`. With a zero priority sum every
/// template gets an even share.
pub fn recompute_weights(templates: &[PipelineTemplate]) -> BTreeMap<String, u32> {
    let total: u64 = templates.iter().map(|t| u64::from(t.priority)).sum();

    templates
        .iter()
        .map(|t| {
            let weight = if total == 0 {
                100.0 / templates.len() as f64
            } else {
                f64::from(t.priority) / total as f64 * 100.0
            };
            (t.template_id.clone(), weight.round() as u32)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicConfig {
    pub name: String,
    pub version: String,
    pub max_pipelines: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancingPolicy {
    pub strategy: String,

    /// Template id → weight
    pub weights: BTreeMap<String, u32>,

    pub sticky_sessions: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckStrategy {
    Active,
    Passive,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthThresholds {
    pub unhealthy: u32,
    pub healthy: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoRecovery {
    pub enabled: bool,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckPolicy {
    pub strategy: HealthCheckStrategy,
    pub active_checks: bool,
    pub passive_checks: bool,
    pub interval_ms: u64,
    pub thresholds: HealthThresholds,
    pub auto_recovery: AutoRecovery,
}

impl HealthCheckPolicy {
    /// Active probing plus passive observation, with auto-recovery.
    pub fn hybrid() -> Self {
        Self {
            strategy: HealthCheckStrategy::Hybrid,
            active_checks: true,
            passive_checks: true,
            interval_ms: 30_000,
            thresholds: HealthThresholds {
                unhealthy: UNHEALTHY_THRESHOLD,
                healthy: 2,
            },
            auto_recovery: AutoRecovery {
                enabled: true,
                max_attempts: MAX_RECOVERY_ATTEMPTS,
            },
        }
    }

    /// Observation of live traffic only; nothing recovers automatically.
    pub fn passive() -> Self {
        Self {
            strategy: HealthCheckStrategy::Passive,
            active_checks: false,
            passive_checks: true,
            interval_ms: 0,
            thresholds: HealthThresholds {
                unhealthy: UNHEALTHY_THRESHOLD,
                healthy: 2,
            },
            auto_recovery: AutoRecovery {
                enabled: false,
                max_attempts: 0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    DestroyPipeline,
    BlacklistTemporary,
    EnterMaintenance,
    RetryWithBackoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Exponential,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorClassPolicy {
    pub action: ErrorAction,

    #[serde(default)]
    pub notify: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHandlingPolicy {
    pub enabled: bool,
    pub unrecoverable: ErrorClassPolicy,
    pub recoverable: ErrorClassPolicy,
    pub authentication: ErrorClassPolicy,
    pub network: ErrorClassPolicy,
}

impl ErrorHandlingPolicy {
    pub fn standard(enabled: bool) -> Self {
        Self {
            enabled,
            unrecoverable: ErrorClassPolicy {
                action: ErrorAction::DestroyPipeline,
                notify: true,
                backoff: None,
                duration_ms: None,
                max_retries: None,
            },
            recoverable: ErrorClassPolicy {
                action: ErrorAction::BlacklistTemporary,
                notify: false,
                backoff: Some(BackoffKind::Exponential),
                duration_ms: Some(60_000),
                max_retries: None,
            },
            authentication: ErrorClassPolicy {
                action: ErrorAction::EnterMaintenance,
                notify: true,
                backoff: Some(BackoffKind::Fixed),
                duration_ms: Some(300_000),
                max_retries: None,
            },
            network: ErrorClassPolicy {
                action: ErrorAction::RetryWithBackoff,
                notify: false,
                backoff: Some(BackoffKind::Exponential),
                duration_ms: None,
                max_retries: Some(3),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformancePolicy {
    pub enabled: bool,
    pub request_timeout_ms: u64,
    pub max_queue_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringPolicy {
    pub enabled: bool,
    pub metrics_interval_ms: u64,
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    pub enabled: bool,
    pub redact_keys_in_logs: bool,
    pub rate_limit_per_minute: u32,
}

/// Scheduler policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    pub basic_config: BasicConfig,
    pub load_balancing: LoadBalancingPolicy,
    pub health_check: HealthCheckPolicy,
    pub error_handling: ErrorHandlingPolicy,
    pub performance: PerformancePolicy,
    pub monitoring: MonitoringPolicy,
    pub security: SecurityPolicy,

    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

/// Which optional sections are switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionToggles {
    pub health_checks: bool,
    pub error_handling: bool,
    pub performance: bool,
    pub monitoring: bool,
    pub security: bool,
}

impl SchedulerConfig {
    pub fn build(version: &str, templates: &[PipelineTemplate], toggles: SectionToggles) -> Self {
        Self {
            basic_config: BasicConfig {
                name: "routeplan-scheduler".to_string(),
                version: version.to_string(),
                max_pipelines: templates.len(),
            },
            load_balancing: LoadBalancingPolicy {
                strategy: "weighted".to_string(),
                weights: recompute_weights(templates),
                sticky_sessions: false,
            },
            health_check: if toggles.health_checks {
                HealthCheckPolicy::hybrid()
            } else {
                HealthCheckPolicy::passive()
            },
            error_handling: ErrorHandlingPolicy::standard(toggles.error_handling),
            performance: PerformancePolicy {
                enabled: toggles.performance,
                request_timeout_ms: 30_000,
                max_queue_size: 1_000,
            },
            monitoring: MonitoringPolicy {
                enabled: toggles.monitoring,
                metrics_interval_ms: 60_000,
                log_level: "info".to_string(),
            },
            security: SecurityPolicy {
                enabled: toggles.security,
                redact_keys_in_logs: true,
                rate_limit_per_minute: 600,
            },
            extensions: BTreeMap::new(),
        }
    }

    /// Re-derive load-balancing weights after templates change.
    pub fn refresh_weights(&mut self, templates: &[PipelineTemplate]) {
        self.load_balancing.weights = recompute_weights(templates);
        self.basic_config.max_pipelines = templates.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{VirtualModelConfig, VirtualModelTarget};
    use proptest::prelude::*;

    fn templates(priorities: &[u32]) -> Vec<PipelineTemplate> {
        priorities
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let mut vm = VirtualModelConfig::new(
                    format!("vm{}", i),
                    vec![VirtualModelTarget::new("p", "m", 0)],
                );
                vm.priority = Some(i64::from(p));
                PipelineTemplate::for_virtual_model(&vm)
            })
            .collect()
    }

    const ALL_ON: SectionToggles = SectionToggles {
        health_checks: true,
        error_handling: true,
        performance: true,
        monitoring: true,
        security: true,
    };

    #[test]
    fn test_equal_priorities_split_evenly() {
        let weights = recompute_weights(&templates(&[1, 1, 1, 1, 1]));
        assert_eq!(weights.len(), 5);
        assert!(weights.values().all(|&w| w == 20));
    }

    #[test]
    fn test_weights_follow_priority() {
        let weights = recompute_weights(&templates(&[3, 1]));
        assert_eq!(weights["vm0-pipeline"], 75);
        assert_eq!(weights["vm1-pipeline"], 25);
    }

    #[test]
    fn test_zero_priorities_fall_back_to_even_split() {
        let weights = recompute_weights(&templates(&[0, 0]));
        assert_eq!(weights["vm0-pipeline"], 50);
    }

    #[test]
    fn test_no_templates_no_weights() {
        assert!(recompute_weights(&[]).is_empty());
    }

    #[test]
    fn test_health_checks_toggle() {
        let on = SchedulerConfig::build("1.0.0", &[], ALL_ON);
        assert_eq!(on.health_check.strategy, HealthCheckStrategy::Hybrid);
        assert_eq!(on.health_check.thresholds.unhealthy, 3);
        assert_eq!(on.health_check.auto_recovery.max_attempts, 3);

        let off = SchedulerConfig::build(
            "1.0.0",
            &[],
            SectionToggles {
                health_checks: false,
                ..ALL_ON
            },
        );
        assert_eq!(off.health_check.strategy, HealthCheckStrategy::Passive);
        assert!(!off.health_check.active_checks);
        assert!(!off.health_check.auto_recovery.enabled);
    }

    #[test]
    fn test_disabled_sections_are_present() {
        let config = SchedulerConfig::build(
            "1.0.0",
            &[],
            SectionToggles {
                health_checks: true,
                error_handling: false,
                performance: false,
                monitoring: false,
                security: false,
            },
        );
        let value = serde_json::to_value(&config).unwrap();
        for section in ["errorHandling", "performance", "monitoring", "security"] {
            assert_eq!(value[section]["enabled"], serde_json::json!(false), "{}", section);
        }
        assert_eq!(
            value["errorHandling"]["unrecoverable"]["action"],
            serde_json::json!("destroy_pipeline")
        );
    }

    #[test]
    fn test_refresh_weights() {
        let mut config = SchedulerConfig::build("1.0.0", &templates(&[1]), ALL_ON);
        assert_eq!(config.load_balancing.weights["vm0-pipeline"], 100);
        config.refresh_weights(&templates(&[1, 1]));
        assert_eq!(config.load_balancing.weights.len(), 2);
        assert_eq!(config.basic_config.max_pipelines, 2);
    }

    proptest! {
        #[test]
        fn prop_weights_sum_near_100(priorities in prop::collection::vec(1u32..=10, 1..12)) {
            let weights = recompute_weights(&templates(&priorities));
            let sum: u32 = weights.values().sum();
            let slack = priorities.len() as u32;
            prop_assert!(sum + slack >= 100 && sum <= 100 + slack);
        }
    }
}
