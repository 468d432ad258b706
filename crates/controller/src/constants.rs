//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default requeue interval for reconciliation errors (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Default resync interval after a successful reconcile (seconds)
/// Pod IP churn does not produce events on the LLMInferenceService, so the
/// certificate SAN set is re-derived on a timer.
pub const DEFAULT_RESYNC_SECS: u64 = 300;

/// Default exponential backoff starting value for watch errors (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value for watch errors (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Namespace holding well-known presets and the default ingress gateway
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "kserve";

/// Name of the default ingress gateway in the system namespace
pub const DEFAULT_INGRESS_GATEWAY: &str = "kserve-ingress-gateway";

/// Label substituted for the `*` of a wildcard listener hostname
pub const DEFAULT_WILDCARD_HOSTNAME_LABEL: &str = "inference";

/// Where the service CA certificate and key are read from
pub const DEFAULT_SIGNING_SECRET_NAME: &str = "signing-key";
pub const DEFAULT_SIGNING_SECRET_NAMESPACE: &str = "openshift-service-ca";

/// Image of the storage-initializer init container for download schemes
pub const DEFAULT_STORAGE_INITIALIZER_IMAGE: &str = "kserve/storage-initializer:latest";

/// Finalizer placed on every LLMInferenceService so cluster-scoped children
/// can be deleted explicitly before the owner goes away.
pub const FINALIZER: &str = "serving.kserve.io/llmisvc-finalizer";

/// Field-manager / event-reporter identity of this controller
pub const MANAGER_NAME: &str = "llmisvc-controller";

/// Preset names that may be resolved from the system namespace when absent
/// from the service's own namespace.
pub const WELL_KNOWN_PRESETS: &[&str] = &[
    "kserve-config-llm-model",
    "kserve-config-llm-router",
    "kserve-config-llm-workload",
    "kserve-config-llm-scheduler",
    "kserve-config-llm-worker-data-parallel",
    "kserve-config-llm-decode-worker-data-parallel",
    "kserve-config-llm-prefill-worker-data-parallel",
];

/// Controller name of the auth-policy controller in route parent statuses
pub const AUTH_POLICY_CONTROLLER_NAME: &str = "kuadrant.io/policy-controller";

/// Condition an auth-policy controller asserts on an affected route parent
pub const AUTH_POLICY_AFFECTED_CONDITION: &str = "kuadrant.io/AuthPolicyAffected";

/// API group and kind probed to decide whether AuthPolicy is installed
pub const AUTH_POLICY_GROUP: &str = "kuadrant.io";
pub const AUTH_POLICY_KIND: &str = "AuthPolicy";
