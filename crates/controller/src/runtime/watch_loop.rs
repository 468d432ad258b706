//! # Watch Loop
//!
//! Controller watch loop that monitors LLMInferenceService resources and
//! triggers reconciliation when they, their owned children, or a preset
//! they depend on change.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::Api;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use tracing::{debug, info, warn};

use crate::config::SharedControllerConfig;
use crate::controller::reconciler::{presets, reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::{LLMInferenceService, LLMInferenceServiceConfig};
use crate::gateway::HTTPRoute;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};

/// Run the controller watch loop
///
/// Watches LLMInferenceServices cluster-wide, owns the child kinds the
/// reconciler writes, and maps preset changes onto the services that
/// consume them. Handles graceful shutdown and automatic restart on watch
/// stream errors.
pub async fn run_watch_loop(
    services: Api<LLMInferenceService>,
    presets_api: Api<LLMInferenceServiceConfig>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    controller_config: SharedControllerConfig,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let server_state_shutdown = server_state.clone();
    let backoff_duration_ms = Arc::new(std::sync::atomic::AtomicU64::new(
        controller_config.backoff_start_ms,
    ));

    // Mark the server not ready on SIGTERM/SIGINT so the probe fails while
    // in-flight reconciliations drain.
    let shutdown_server_state = server_state_shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state
            .is_ready
            .store(false, std::sync::atomic::Ordering::Relaxed);
    });

    loop {
        if !server_state_shutdown
            .is_ready
            .load(std::sync::atomic::Ordering::Relaxed)
        {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let backoff_clone = backoff_duration_ms.clone();
        let config_for_filter = controller_config.clone();

        let controller = Controller::new(services.clone(), watcher::Config::default().any_semantic());
        let store = controller.store();
        let system_namespace = controller_config.system_namespace.clone();

        let controller_future = controller
            .owns(
                Api::<Deployment>::all(reconciler.client.clone()),
                watcher::Config::default(),
            )
            .owns(
                Api::<Service>::all(reconciler.client.clone()),
                watcher::Config::default(),
            )
            .owns(
                Api::<Secret>::all(reconciler.client.clone()),
                watcher::Config::default(),
            )
            .owns(
                Api::<HTTPRoute>::all(reconciler.client.clone()),
                watcher::Config::default(),
            )
            // Preset changes requeue the services that consume them: every
            // service for a system-namespace preset, same-namespace
            // consumers otherwise.
            .watches(
                presets_api.clone(),
                watcher::Config::default(),
                move |preset: LLMInferenceServiceConfig| {
                    let preset_namespace = preset
                        .metadata
                        .namespace
                        .clone()
                        .unwrap_or_default();
                    let preset_name = preset.metadata.name.clone().unwrap_or_default();
                    let state = store.state();
                    let targets = presets::preset_targets(
                        state.iter().map(Arc::as_ref),
                        &preset_namespace,
                        &preset_name,
                        &system_namespace,
                    );
                    debug!(
                        preset.namespace = %preset_namespace,
                        preset.name = %preset_name,
                        targets = targets.len(),
                        "preset changed, requeueing consumers"
                    );
                    targets
                        .into_iter()
                        .map(|(namespace, name)| {
                            ObjectRef::<LLMInferenceService>::new(&name).within(&namespace)
                        })
                        .collect::<Vec<_>>()
                },
            )
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, reconciler.clone())
            .filter_map(move |event| {
                let backoff = backoff_clone.clone();
                let config = config_for_filter.clone();
                async move {
                    match &event {
                        Ok(_) => {
                            backoff.store(
                                config.backoff_start_ms,
                                std::sync::atomic::Ordering::Relaxed,
                            );
                            debug!("watch.event.success");
                            Some(event)
                        }
                        Err(err) => {
                            let error_string = format!("{err:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                config.backoff_max_ms,
                                config.watch_restart_delay_secs,
                            )
                            .await
                            .map(|()| event)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()));

        controller_future.await;

        if !server_state_shutdown
            .is_ready
            .load(std::sync::atomic::Ordering::Relaxed)
        {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay_secs = controller_config.watch_restart_delay_after_end_secs;
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay_secs
        );
        tokio::time::sleep(std::time::Duration::from_secs(delay_secs)).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}
