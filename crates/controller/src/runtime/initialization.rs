//! # Initialization
//!
//! Controller initialization: rustls setup, tracing, metrics, probe server
//! startup and Kubernetes client creation.

use std::sync::Arc;

use anyhow::{Context, Result};
use kube::api::Api;
use kube::Client;
use tracing::{info, warn};

use crate::config::{ControllerConfig, SharedControllerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::{LLMInferenceService, LLMInferenceServiceConfig};
use crate::observability;

/// Initialization result containing all components the watch loop needs.
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Cluster-wide API for LLMInferenceService
    pub services: Api<LLMInferenceService>,
    /// Cluster-wide API for LLMInferenceServiceConfig presets
    pub presets: Api<LLMInferenceServiceConfig>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    /// Shared controller configuration
    pub controller_config: SharedControllerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field(
                "server_ready",
                &self
                    .server_state
                    .is_ready
                    .load(std::sync::atomic::Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
pub async fn initialize() -> Result<InitializationResult> {
    // Configure rustls crypto provider FIRST, before any other operations.
    // Required for rustls 0.23+ when no default provider is set via features.
    rustls::crypto::ring::default_provider()
        .install_default()
        .unwrap_or_else(|_| panic!("Failed to install rustls crypto provider"));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "controller=info".into()),
        )
        .init();

    info!("Starting LLMInferenceService controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(std::sync::atomic::AtomicBool::new(true)),
    });

    let controller_config: SharedControllerConfig = Arc::new(ControllerConfig::from_env());
    info!(
        system_namespace = %controller_config.system_namespace,
        envtest_mode = controller_config.envtest_mode,
        "loaded controller configuration"
    );

    let server_state_for_http = server_state.clone();
    let metrics_port = controller_config.metrics_port;
    tokio::spawn(async move {
        if let Err(err) = start_server(metrics_port, server_state_for_http).await {
            warn!("metrics server exited: {err}");
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let services: Api<LLMInferenceService> = Api::all(client.clone());
    let presets: Api<LLMInferenceServiceConfig> = Api::all(client.clone());

    // Fail fast when our own CRD is not installed; everything downstream
    // would just spin otherwise.
    services
        .list(&kube::api::ListParams::default().limit(1))
        .await
        .context("LLMInferenceService CRD is not installed or not reachable")?;

    let reconciler = Arc::new(Reconciler::new(client.clone(), controller_config.clone()));

    Ok(InitializationResult {
        client,
        services,
        presets,
        reconciler,
        server_state,
        controller_config,
    })
}
