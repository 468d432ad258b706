//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! Reconciliation errors requeue with per-resource Fibonacci backoff; watch
//! stream errors are classified and either tolerated or force a restart.

use std::sync::Arc;

use kube_runtime::controller::Action;
use kube::ResourceExt;
use tracing::{error, info, warn};

use crate::controller::reconciler::{BackoffState, ControllerError, Reconciler};
use crate::crd::LLMInferenceService;
use crate::observability;

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per resource so one failing service does not
/// slow down the others.
pub fn handle_reconciliation_error(
    obj: Arc<LLMInferenceService>,
    error: &ControllerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    error!(
        resource.name = %name,
        resource.namespace = %namespace,
        error = %error,
        "reconciliation failed"
    );
    observability::metrics::increment_reconciliation_errors();

    let resource_key = format!("{namespace}/{name}");
    let backoff_seconds = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(resource_key).or_insert_with(BackoffState::new);
            state.increment_error();
            state.backoff.next_backoff_seconds()
        }
        Err(err) => {
            warn!("failed to lock backoff states: {err}, using default backoff");
            ctx.config.reconciliation_error_requeue_secs
        }
    };

    info!(
        resource.name = %name,
        backoff_secs = backoff_seconds,
        "requeueing after error"
    );
    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(std::time::Duration::from_secs(backoff_seconds))
}

/// Reset the backoff state for a resource after a successful pass.
pub fn reset_backoff(ctx: &Reconciler, obj: &LLMInferenceService) {
    let key = format!(
        "{}/{}",
        obj.namespace().unwrap_or_else(|| "default".to_string()),
        obj.name_any()
    );
    if let Ok(mut states) = ctx.backoff_states.lock() {
        if let Some(state) = states.get_mut(&key) {
            state.reset();
        }
    }
}

/// Handle watch stream errors with appropriate classification and backoff
///
/// Returns `None` to filter out the error (allow restart) or `Some(())` to
/// continue.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<std::sync::atomic::AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay_secs: u64,
) -> Option<()> {
    // IMPORTANT: Check 404 BEFORE 401, as a 404 returned as plain text
    // causes a serde error that includes "WatchFailed" in the error chain.
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    let is_401 =
        (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found;
    let is_410 = error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone");
    let is_429 = error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests");

    if is_401 {
        error!(
            "watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired"
        );
        warn!(
            "waiting {}s before retrying watch (RBAC may need time to propagate)",
            watch_restart_delay_secs
        );
        tokio::time::sleep(std::time::Duration::from_secs(watch_restart_delay_secs)).await;
        None
    } else if is_410 {
        // Resource version expired - this is normal during pod restarts
        warn!(error_type = "410", "watch resource version expired, watch will restart");
        None
    } else if is_429 {
        let current_backoff = backoff.load(std::sync::atomic::Ordering::Relaxed);
        warn!(
            "API server storage reinitializing (429), backing off for {}ms before restart",
            current_backoff
        );
        tokio::time::sleep(std::time::Duration::from_millis(current_backoff)).await;
        let new_backoff = std::cmp::min(current_backoff * 2, max_backoff_ms);
        backoff.store(new_backoff, std::sync::atomic::Ordering::Relaxed);
        None
    } else if is_not_found {
        // Normal when a resource was deleted or an optional CRD is missing.
        warn!(
            "resource not found during watch (may be deleted, or a CRD is not installed): {}",
            error_string
        );
        Some(())
    } else {
        error!("controller stream error: {}", error_string);
        tokio::time::sleep(std::time::Duration::from_secs(watch_restart_delay_secs)).await;
        None
    }
}
