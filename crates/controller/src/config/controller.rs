//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::sync::Arc;

use crate::constants::*;

/// Shared, immutable controller configuration.
pub type SharedControllerConfig = Arc<ControllerConfig>;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment
/// variables. Environment variables are populated from a ConfigMap using
/// `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace holding well-known presets and the default ingress gateway
    pub system_namespace: String,
    /// Name of the default ingress gateway for managed default routes
    pub ingress_gateway_name: String,
    /// Label substituted for the `*` of a wildcard listener hostname
    /// during URL discovery
    pub wildcard_hostname_label: String,
    /// Secret holding the service CA certificate and key (`tls.crt`/`tls.key`)
    pub signing_secret_name: String,
    /// Namespace of the signing secret
    pub signing_secret_namespace: String,
    /// Image of the storage-initializer init container
    pub storage_initializer_image: String,
    /// HTTP server port for metrics and health probes
    pub metrics_port: u16,
    /// Suppress the top-level Ready condition when running under envtest,
    /// where deployment controllers are absent and workloads never become
    /// Available
    pub envtest_mode: bool,
    /// Requeue interval after a successful reconcile (seconds)
    pub resync_secs: u64,
    /// Requeue interval after a failed reconcile, before backoff (seconds)
    pub reconciliation_error_requeue_secs: u64,
    /// Exponential backoff starting value for watch errors (milliseconds)
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value for watch errors (milliseconds)
    pub backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after the stream ends normally (seconds)
    pub watch_restart_delay_after_end_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            system_namespace: DEFAULT_SYSTEM_NAMESPACE.to_string(),
            ingress_gateway_name: DEFAULT_INGRESS_GATEWAY.to_string(),
            wildcard_hostname_label: DEFAULT_WILDCARD_HOSTNAME_LABEL.to_string(),
            signing_secret_name: DEFAULT_SIGNING_SECRET_NAME.to_string(),
            signing_secret_namespace: DEFAULT_SIGNING_SECRET_NAMESPACE.to_string(),
            storage_initializer_image: DEFAULT_STORAGE_INITIALIZER_IMAGE.to_string(),
            metrics_port: DEFAULT_METRICS_PORT,
            envtest_mode: false,
            resync_secs: DEFAULT_RESYNC_SECS,
            reconciliation_error_requeue_secs: DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            system_namespace: env_var_or_default_str("SYSTEM_NAMESPACE", DEFAULT_SYSTEM_NAMESPACE),
            ingress_gateway_name: env_var_or_default_str(
                "INGRESS_GATEWAY_NAME",
                DEFAULT_INGRESS_GATEWAY,
            ),
            wildcard_hostname_label: env_var_or_default_str(
                "GATEWAY_API_WILDCARD_HOSTNAME",
                DEFAULT_WILDCARD_HOSTNAME_LABEL,
            ),
            signing_secret_name: env_var_or_default_str(
                "SERVICE_CA_SIGNING_SECRET_NAME",
                DEFAULT_SIGNING_SECRET_NAME,
            ),
            signing_secret_namespace: env_var_or_default_str(
                "SERVICE_CA_SIGNING_SECRET_NAMESPACE",
                DEFAULT_SIGNING_SECRET_NAMESPACE,
            ),
            storage_initializer_image: env_var_or_default_str(
                "STORAGE_INITIALIZER_IMAGE",
                DEFAULT_STORAGE_INITIALIZER_IMAGE,
            ),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            envtest_mode: std::env::var("ENVTEST_MODE")
                .is_ok_and(|v| v.eq_ignore_ascii_case("true")),
            resync_secs: env_var_or_default("RESYNC_SECS", DEFAULT_RESYNC_SECS),
            reconciliation_error_requeue_secs: env_var_or_default(
                "RECONCILIATION_ERROR_REQUEUE_SECS",
                DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            ),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_restart_delay_after_end_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
        }
    }
}

fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = ControllerConfig::default();
        assert_eq!(config.system_namespace, "kserve");
        assert_eq!(config.signing_secret_name, "signing-key");
        assert_eq!(config.signing_secret_namespace, "openshift-service-ca");
        assert_eq!(config.wildcard_hostname_label, "inference");
        assert!(!config.envtest_mode);
    }
}
