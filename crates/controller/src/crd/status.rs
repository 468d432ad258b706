//! # LLMInferenceService Status
//!
//! Status types and the condition set the readiness aggregator writes into.

use serde::{Deserialize, Serialize};

/// Condition types published on an LLMInferenceService.
pub mod condition_types {
    pub const READY: &str = "Ready";
    pub const PRESETS_COMBINED: &str = "PresetsCombined";
    pub const WORKLOAD_READY: &str = "WorkloadReady";
    pub const MAIN_WORKLOAD_READY: &str = "MainWorkloadReady";
    pub const WORKER_WORKLOAD_READY: &str = "WorkerWorkloadReady";
    pub const PREFILL_WORKLOAD_READY: &str = "PrefillWorkloadReady";
    pub const PREFILL_WORKER_WORKLOAD_READY: &str = "PrefillWorkerWorkloadReady";
    pub const ROUTER_READY: &str = "RouterReady";
    pub const SCHEDULER_WORKLOAD_READY: &str = "SchedulerWorkloadReady";
    pub const INFERENCE_POOL_READY: &str = "InferencePoolReady";
    pub const HTTP_ROUTES_READY: &str = "HTTPRoutesReady";
    pub const GATEWAYS_READY: &str = "GatewaysReady";
}

/// Status of the LLMInferenceService resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LLMInferenceServiceStatus {
    /// Preferred external URL; empty when none was discovered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// All discovered URLs, sorted lexicographically by URL string.
    #[serde(default)]
    pub addresses: Vec<Addressable>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Observed generation
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// A single reachable address of the service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Addressable {
    pub url: String,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Working set of conditions for one reconcile pass.
///
/// Carries the previous pass's conditions so `last_transition_time` is
/// preserved when a condition's status does not change.
#[derive(Debug, Clone, Default)]
pub struct ConditionSet {
    conditions: Vec<Condition>,
}

impl ConditionSet {
    #[must_use]
    pub fn from_existing(existing: &[Condition]) -> Self {
        Self {
            conditions: existing.to_vec(),
        }
    }

    /// Reset every known condition type to Unknown before the components
    /// run, so a pass that fails midway leaves an honest partial status.
    pub fn preprocess(&mut self, types: &[&str]) {
        for t in types {
            self.set(t, "Unknown", "Reconciling", "reconciliation in progress");
        }
    }

    pub fn mark_true(&mut self, r#type: &str, reason: &str, message: &str) {
        self.set(r#type, "True", reason, message);
    }

    pub fn mark_false(&mut self, r#type: &str, reason: &str, message: &str) {
        self.set(r#type, "False", reason, message);
    }

    pub fn mark_unknown(&mut self, r#type: &str, reason: &str, message: &str) {
        self.set(r#type, "Unknown", reason, message);
    }

    fn set(&mut self, r#type: &str, status: &str, reason: &str, message: &str) {
        let now = chrono::Utc::now().to_rfc3339();
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.r#type == r#type) {
            if existing.status != status {
                existing.last_transition_time = Some(now);
            }
            existing.status = status.to_string();
            existing.reason = Some(reason.to_string());
            existing.message = Some(message.to_string());
        } else {
            self.conditions.push(Condition {
                r#type: r#type.to_string(),
                status: status.to_string(),
                last_transition_time: Some(now),
                reason: Some(reason.to_string()),
                message: Some(message.to_string()),
            });
        }
    }

    pub fn remove(&mut self, r#type: &str) {
        self.conditions.retain(|c| c.r#type != r#type);
    }

    #[must_use]
    pub fn get(&self, r#type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    #[must_use]
    pub fn is_true(&self, r#type: &str) -> bool {
        self.get(r#type).is_some_and(Condition::is_true)
    }

    /// All conditions, sorted by type for a stable status representation.
    #[must_use]
    pub fn into_conditions(mut self) -> Vec<Condition> {
        self.conditions.sort_by(|a, b| a.r#type.cmp(&b.r#type));
        self.conditions
    }
}
