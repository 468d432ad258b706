//! # Reconciler
//!
//! The reconcile entry for LLMInferenceService objects. One pass runs
//! preprocess → preset composition → workloads → scheduler/pool → router →
//! certificates → readiness aggregation → status patch, matching the order
//! children depend on one another. Component logic lives in the submodules;
//! this module wires them together and owns the error taxonomy.

pub mod certs;
pub mod lifecycle;
pub mod model;
pub mod presets;
pub mod readiness;
pub mod router;
pub mod scheduler;
pub mod semantic;
pub mod urls;
pub mod validation;
pub mod workload;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::{Client, Resource, ResourceExt};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SharedControllerConfig;
use crate::constants::{FINALIZER, MANAGER_NAME};
use crate::controller::backoff::FibonacciBackoff;
use crate::crd::{
    condition_types::*, Addressable, ConditionSet, LLMInferenceService, LLMInferenceServiceStatus,
    PART_OF_VALUE,
};
use crate::gateway::Gateway;
use crate::observability;

use readiness::Readiness;
use urls::{ClusterResolver, GatewayResolver};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),
    #[error("{kind} API is not registered in this cluster")]
    KindUnavailable { kind: String },
    #[error("existing {kind} {name} is not controlled by this LLMInferenceService")]
    NotOwned { kind: String, name: String },
    #[error("preset {name} not found")]
    PresetNotFound { name: String },
    #[error("invalid effective spec: {0}")]
    InvalidSpec(String),
    #[error("no URLs discovered for HTTPRoute {route}")]
    NoUrlsDiscovered { route: String },
    #[error(
        "authentication is required but the AuthPolicy CRD is not installed; \
         install the policy operator or annotate the service with \
         security.opendatahub.io/enable-auth=false"
    )]
    AuthPolicyCrdMissing,
    #[error("certificate error: {0}")]
    Certificate(#[from] certs::CertError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReconcileError {
    /// Stable condition reason for this error.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Api(_) => "ApiError",
            Self::KindUnavailable { .. } => "KindUnavailable",
            Self::NotOwned { .. } => "ResourceNotOwned",
            Self::PresetNotFound { .. } => "PresetNotFound",
            Self::InvalidSpec(_) => "InvalidSpec",
            Self::NoUrlsDiscovered { .. } => "NoURLsDiscovered",
            Self::AuthPolicyCrdMissing => "AuthPolicyCrdMissing",
            Self::Certificate(_) => "CertificateError",
            Self::Serialization(_) => "SerializationError",
        }
    }
}

/// Error type surfaced to the controller runtime (reconcile wrapped in the
/// finalizer protocol).
pub type ControllerError = kube::runtime::finalizer::Error<ReconcileError>;

/// Per-resource backoff state used by the error policy.
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(5, 600),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared reconcile context.
#[derive(Clone)]
pub struct Reconciler {
    pub client: Client,
    pub config: SharedControllerConfig,
    pub recorder: Recorder,
    /// Backoff state per resource (namespace/name), consumed by the error
    /// policy layer.
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(client: Client, config: SharedControllerConfig) -> Self {
        let reporter = Reporter {
            controller: MANAGER_NAME.to_string(),
            instance: std::env::var("HOSTNAME").ok(),
        };
        let recorder = Recorder::new(client.clone(), reporter);
        Self {
            client,
            config,
            recorder,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Best-effort Normal event against the owner; never on the critical
    /// path.
    pub(crate) async fn record_event(&self, owner: &LLMInferenceService, reason: &str, note: &str) {
        self.publish(owner, EventType::Normal, reason, note).await;
    }

    pub(crate) async fn record_warning(
        &self,
        owner: &LLMInferenceService,
        reason: &str,
        note: &str,
    ) {
        self.publish(owner, EventType::Warning, reason, note).await;
    }

    async fn publish(
        &self,
        owner: &LLMInferenceService,
        type_: EventType,
        reason: &str,
        note: &str,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note.to_string()),
            action: "Reconciling".to_string(),
            secondary: None,
        };
        if let Err(err) = self.recorder.publish(&event, &owner.object_ref(&())).await {
            debug!(error = %err, "failed to publish event");
        }
    }
}

/// Labels every owned child carries: part-of, owner name, component role.
#[must_use]
pub fn child_labels(name: &str, component: &str) -> BTreeMap<String, String> {
    [
        ("app.kubernetes.io/part-of".to_string(), PART_OF_VALUE.to_string()),
        ("app.kubernetes.io/name".to_string(), name.to_string()),
        ("app.kubernetes.io/component".to_string(), component.to_string()),
    ]
    .into()
}

/// Canonical child names, derived from the owner name only.
pub mod names {
    #[must_use]
    pub fn main_deployment(name: &str) -> String {
        format!("{name}-kserve")
    }
    #[must_use]
    pub fn worker_deployment(name: &str) -> String {
        format!("{name}-kserve-worker")
    }
    #[must_use]
    pub fn prefill_deployment(name: &str) -> String {
        format!("{name}-kserve-prefill")
    }
    #[must_use]
    pub fn prefill_worker_deployment(name: &str) -> String {
        format!("{name}-kserve-prefill-worker")
    }
    #[must_use]
    pub fn workload_service(name: &str) -> String {
        format!("{name}-kserve-workload-svc")
    }
    #[must_use]
    pub fn scheduler_deployment(name: &str) -> String {
        format!("{name}-epp")
    }
    #[must_use]
    pub fn epp_service(name: &str) -> String {
        format!("{name}-epp-service")
    }
    #[must_use]
    pub fn epp_service_account(name: &str) -> String {
        format!("{name}-epp-sa")
    }
    #[must_use]
    pub fn epp_role(name: &str) -> String {
        format!("{name}-epp-role")
    }
    #[must_use]
    pub fn epp_role_binding(name: &str) -> String {
        format!("{name}-epp-rolebinding")
    }
    /// Cluster-scoped, so the namespace is part of the name.
    #[must_use]
    pub fn epp_auth_delegator(namespace: &str, name: &str) -> String {
        format!("{namespace}-{name}-epp-auth-delegator")
    }
    #[must_use]
    pub fn inference_pool(name: &str) -> String {
        format!("{name}-inference-pool")
    }
    #[must_use]
    pub fn managed_route(name: &str) -> String {
        format!("{name}-kserve-route")
    }
    #[must_use]
    pub fn certs_secret(name: &str) -> String {
        format!("{name}-kserve-self-signed-certs")
    }
}

/// Controller entry: wraps one pass in the finalizer protocol so the
/// cluster-scoped children are deleted before the owner goes away.
pub async fn reconcile(
    llmisvc: Arc<LLMInferenceService>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ControllerError> {
    let namespace = llmisvc.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<LLMInferenceService> = Api::namespaced(ctx.client.clone(), &namespace);
    finalizer(&api, FINALIZER, llmisvc, |event| async {
        match event {
            FinalizerEvent::Apply(obj) => apply(obj, ctx.clone()).await,
            FinalizerEvent::Cleanup(obj) => cleanup(obj, ctx.clone()).await,
        }
    })
    .await
}

fn mark(conditions: &mut ConditionSet, r#type: &str, readiness: &Readiness) {
    match readiness {
        Readiness::True => conditions.mark_true(r#type, r#type, "all checks passed"),
        Readiness::False { reason, message } => conditions.mark_false(r#type, reason, message),
        Readiness::Unknown { reason, message } => conditions.mark_unknown(r#type, reason, message),
    }
}

/// One full reconcile pass for a live object.
async fn apply(
    llmisvc: Arc<LLMInferenceService>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();
    observability::metrics::increment_reconciliations();
    let name = llmisvc.name_any();
    info!(resource.name = %name, resource.generation = llmisvc.metadata.generation, "reconciling");

    let mut conditions = ConditionSet::from_existing(
        llmisvc
            .status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default(),
    );
    conditions.preprocess(&[
        PRESETS_COMBINED,
        WORKLOAD_READY,
        MAIN_WORKLOAD_READY,
        ROUTER_READY,
        HTTP_ROUTES_READY,
        GATEWAYS_READY,
        READY,
    ]);

    // Compose presets into the effective spec.
    let effective = match presets::combine_base_refs(&ctx, &llmisvc).await {
        Ok(effective) => {
            conditions.mark_true(PRESETS_COMBINED, "PresetsCombined", "base refs merged");
            effective
        }
        Err(err) => {
            conditions.mark_false(PRESETS_COMBINED, err.reason(), &err.to_string());
            patch_status(&ctx, &llmisvc, conditions, Vec::new()).await?;
            return Err(err);
        }
    };

    if let Err(err) = validation::validate_effective_spec(&effective) {
        conditions.mark_false(WORKLOAD_READY, err.reason(), &err.to_string());
        patch_status(&ctx, &llmisvc, conditions, Vec::new()).await?;
        return Err(err);
    }

    // Workload topology: model-server deployments plus the workload service.
    let workloads = match workload::reconcile_workloads(&ctx, &llmisvc, &effective).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            conditions.mark_false(WORKLOAD_READY, err.reason(), &err.to_string());
            patch_status(&ctx, &llmisvc, conditions, Vec::new()).await?;
            return Err(err);
        }
    };
    let mut workload_pairs: Vec<(&str, Readiness)> = Vec::new();
    if let Some(main) = workloads.main.as_ref() {
        workload_pairs.push((MAIN_WORKLOAD_READY, readiness::deployment_ready(main)));
    }
    if workloads.topology.worker {
        let readiness = workloads
            .worker
            .as_ref()
            .map(readiness::deployment_ready)
            .unwrap_or(Readiness::Unknown {
                reason: "Progressing".into(),
                message: "worker deployment not observed yet".into(),
            });
        workload_pairs.push((WORKER_WORKLOAD_READY, readiness));
    } else {
        conditions.remove(WORKER_WORKLOAD_READY);
    }
    if workloads.topology.prefill {
        let readiness = workloads
            .prefill
            .as_ref()
            .map(readiness::deployment_ready)
            .unwrap_or(Readiness::Unknown {
                reason: "Progressing".into(),
                message: "prefill deployment not observed yet".into(),
            });
        workload_pairs.push((PREFILL_WORKLOAD_READY, readiness));
    } else {
        conditions.remove(PREFILL_WORKLOAD_READY);
    }
    if workloads.topology.prefill_worker {
        let readiness = workloads
            .prefill_worker
            .as_ref()
            .map(readiness::deployment_ready)
            .unwrap_or(Readiness::Unknown {
                reason: "Progressing".into(),
                message: "prefill worker deployment not observed yet".into(),
            });
        workload_pairs.push((PREFILL_WORKER_WORKLOAD_READY, readiness));
    } else {
        conditions.remove(PREFILL_WORKER_WORKLOAD_READY);
    }
    for (r#type, readiness) in &workload_pairs {
        mark(&mut conditions, r#type, readiness);
    }

    // Endpoint-picker scheduler stack and inference pool.
    let scheduler = match scheduler::reconcile_scheduler(&ctx, &llmisvc, &effective).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            conditions.mark_false(ROUTER_READY, err.reason(), &err.to_string());
            patch_status(&ctx, &llmisvc, conditions, Vec::new()).await?;
            return Err(err);
        }
    };
    if scheduler.managed {
        let readiness = scheduler
            .deployment
            .as_ref()
            .map(readiness::deployment_ready)
            .unwrap_or(Readiness::Unknown {
                reason: "Progressing".into(),
                message: "scheduler deployment not observed yet".into(),
            });
        mark(&mut conditions, SCHEDULER_WORKLOAD_READY, &readiness);
    } else {
        conditions.remove(SCHEDULER_WORKLOAD_READY);
    }
    if let Some(pool) = scheduler.pool.as_ref() {
        let readiness = readiness::inference_pool_ready(pool);
        mark(&mut conditions, INFERENCE_POOL_READY, &readiness);
    } else if scheduler.pool_name.is_some() {
        conditions.mark_unknown(
            INFERENCE_POOL_READY,
            "PoolNotAccepted",
            "referenced InferencePool not found",
        );
    } else {
        conditions.remove(INFERENCE_POOL_READY);
    }

    // HTTP routing.
    let router = match router::reconcile_router(
        &ctx,
        &llmisvc,
        &effective,
        scheduler.pool_name.as_deref(),
    )
    .await
    {
        Ok(snapshot) => snapshot,
        Err(err) => {
            conditions.mark_false(HTTP_ROUTES_READY, err.reason(), &err.to_string());
            conditions.mark_false(ROUTER_READY, err.reason(), &err.to_string());
            patch_status(&ctx, &llmisvc, conditions, Vec::new()).await?;
            return Err(err);
        }
    };

    let resolver = ClusterResolver {
        client: ctx.client.clone(),
    };

    // Route and gateway readiness over the evaluated set.
    if router.evaluated {
        let readiness =
            readiness::http_routes_ready(&router.routes, &router.missing, llmisvc.auth_enabled());
        mark(&mut conditions, HTTP_ROUTES_READY, &readiness);

        let gateways = resolve_parent_gateways(&router.routes, &resolver).await?;
        if gateways.is_empty() {
            conditions.mark_true(GATEWAYS_READY, "NothingToEvaluate", "no parent gateways");
        } else {
            let readiness = readiness::gateways_ready(&gateways);
            mark(&mut conditions, GATEWAYS_READY, &readiness);
        }
    } else {
        conditions.mark_true(HTTP_ROUTES_READY, "NothingToEvaluate", "no routes configured");
        conditions.mark_true(GATEWAYS_READY, "NothingToEvaluate", "no routes configured");
    }

    // URL discovery feeds status addresses.
    let mut addresses: Vec<Url> = Vec::new();
    let mut url_error = None;
    for route in &router.routes {
        match urls::discover_urls(
            route,
            &resolver,
            "https",
            &ctx.config.wildcard_hostname_label,
        )
        .await
        {
            Ok(urls) => addresses.extend(urls),
            Err(err @ ReconcileError::NoUrlsDiscovered { .. }) => {
                warn!(route = %route.name_any(), "no URLs discovered");
                url_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    addresses.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    addresses.dedup();
    if let Some(err) = url_error {
        if addresses.is_empty() && router.evaluated {
            conditions.mark_false(ROUTER_READY, err.reason(), &err.to_string());
            patch_status(&ctx, &llmisvc, conditions, Vec::new()).await?;
            return Err(err);
        }
    }

    // Certificates. Failure degrades workload readiness but the rest of
    // the pass continues.
    if let Err(err) = certs::reconcile_self_signed_certs(&ctx, &llmisvc, &scheduler).await {
        warn!(error = %err, "certificate reconciliation failed");
        conditions.mark_false(WORKLOAD_READY, "CertificateError", &err.to_string());
    } else {
        if let Some((cond_type, readiness)) = workload_pairs.iter().find(|(_, r)| !r.is_true()) {
            let message = format!("{cond_type} is not ready");
            match readiness {
                Readiness::False { reason, .. } => {
                    conditions.mark_false(WORKLOAD_READY, reason, &message);
                }
                _ => conditions.mark_unknown(WORKLOAD_READY, "Progressing", &message),
            }
        } else {
            conditions.mark_true(WORKLOAD_READY, "WorkloadReady", "all workloads available");
        }
    }

    // RouterReady folds scheduler, pool, routes and gateways.
    let router_parts = [
        SCHEDULER_WORKLOAD_READY,
        INFERENCE_POOL_READY,
        HTTP_ROUTES_READY,
        GATEWAYS_READY,
    ];
    let router_ready = router_parts
        .iter()
        .filter(|t| conditions.get(t).is_some())
        .all(|t| conditions.is_true(t));
    if router_ready {
        conditions.mark_true(ROUTER_READY, "RouterReady", "routing is configured");
    } else {
        let blocking = router_parts
            .iter()
            .find(|t| conditions.get(t).is_some() && !conditions.is_true(t))
            .copied()
            .unwrap_or(HTTP_ROUTES_READY);
        let reason = conditions
            .get(blocking)
            .and_then(|c| c.reason.clone())
            .unwrap_or_else(|| "RouterNotReady".to_string());
        conditions.mark_false(ROUTER_READY, &reason, &format!("{blocking} is not ready"));
    }

    // Top-level Ready. Suppressed under envtest where deployment
    // controllers never mark anything Available.
    if ctx.config.envtest_mode {
        conditions.remove(READY);
    } else {
        let top = [PRESETS_COMBINED, WORKLOAD_READY, ROUTER_READY];
        if top.iter().all(|t| conditions.is_true(t)) {
            conditions.mark_true(READY, "Ready", "LLMInferenceService is ready");
        } else {
            let blocking = top
                .iter()
                .find(|t| !conditions.is_true(t))
                .copied()
                .unwrap_or(READY);
            let reason = conditions
                .get(blocking)
                .and_then(|c| c.reason.clone())
                .unwrap_or_else(|| "NotReady".to_string());
            conditions.mark_false(READY, &reason, &format!("{blocking} is not ready"));
        }
    }

    patch_status(&ctx, &llmisvc, conditions, addresses).await?;
    crate::runtime::error_policy::reset_backoff(&ctx, &llmisvc);
    observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    info!(
        resource.name = %name,
        duration_secs = start.elapsed().as_secs_f64(),
        "reconcile complete"
    );
    Ok(Action::requeue(Duration::from_secs(ctx.config.resync_secs)))
}

/// Finalization: namespaced children are garbage-collected via owner
/// references, but the cluster-scoped auth-delegator binding and the
/// unstructured v1 pool must go explicitly.
async fn cleanup(
    llmisvc: Arc<LLMInferenceService>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcileError> {
    info!(resource.name = %llmisvc.name_any(), "finalizing");
    scheduler::delete_scheduler_stack(&ctx, &llmisvc).await?;
    Ok(Action::await_change())
}

/// Unique parent gateways across the evaluated routes, resolved for
/// readiness.
async fn resolve_parent_gateways<R: GatewayResolver + Sync>(
    routes: &[crate::gateway::HTTPRoute],
    resolver: &R,
) -> Result<Vec<(String, Option<Gateway>)>, ReconcileError> {
    let mut seen: Vec<(String, String)> = Vec::new();
    for route in routes {
        let route_namespace = route.namespace().unwrap_or_else(|| "default".to_string());
        for parent in route.spec.parent_refs.as_deref().unwrap_or_default() {
            if parent.kind.as_deref().is_some_and(|k| k != "Gateway") {
                continue;
            }
            let namespace = parent
                .namespace
                .clone()
                .unwrap_or_else(|| route_namespace.clone());
            let key = (namespace, parent.name.clone());
            if !seen.contains(&key) {
                seen.push(key);
            }
        }
    }
    let mut gateways = Vec::with_capacity(seen.len());
    for (namespace, name) in seen {
        let gateway = resolver.gateway(&namespace, &name).await?;
        gateways.push((format!("{namespace}/{name}"), gateway));
    }
    Ok(gateways)
}

/// Write status: canonical URL (first external address), the sorted address
/// list, conditions, observed generation.
async fn patch_status(
    ctx: &Reconciler,
    llmisvc: &LLMInferenceService,
    conditions: ConditionSet,
    addresses: Vec<Url>,
) -> Result<(), ReconcileError> {
    let namespace = llmisvc.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<LLMInferenceService> = Api::namespaced(ctx.client.clone(), &namespace);
    let url = addresses
        .iter()
        .find(|u| urls::is_external_url(u))
        .map(|u| u.to_string());
    let status = LLMInferenceServiceStatus {
        url,
        addresses: addresses
            .into_iter()
            .map(|u| Addressable { url: u.to_string() })
            .collect(),
        conditions: conditions.into_conditions(),
        observed_generation: llmisvc.metadata.generation,
    };
    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &llmisvc.name_any(),
        &PatchParams::apply(MANAGER_NAME),
        &Patch::Merge(patch),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_labels_are_fully_determined_by_owner_and_role() {
        let labels = child_labels("test-llm", "workload");
        assert_eq!(
            labels.get("app.kubernetes.io/part-of").map(String::as_str),
            Some("llminferenceservice")
        );
        assert_eq!(
            labels.get("app.kubernetes.io/name").map(String::as_str),
            Some("test-llm")
        );
        assert_eq!(
            labels.get("app.kubernetes.io/component").map(String::as_str),
            Some("workload")
        );
    }

    #[test]
    fn child_names_follow_the_kserve_scheme() {
        assert_eq!(names::main_deployment("test-llm"), "test-llm-kserve");
        assert_eq!(names::inference_pool("test-llm"), "test-llm-inference-pool");
        assert_eq!(names::managed_route("test-llm"), "test-llm-kserve-route");
        assert_eq!(
            names::certs_secret("test-llm"),
            "test-llm-kserve-self-signed-certs"
        );
        assert_eq!(
            names::epp_auth_delegator("nn", "test-llm"),
            "nn-test-llm-epp-auth-delegator"
        );
    }

    #[test]
    fn error_reasons_are_stable() {
        assert_eq!(
            ReconcileError::PresetNotFound { name: "x".into() }.reason(),
            "PresetNotFound"
        );
        assert_eq!(ReconcileError::AuthPolicyCrdMissing.reason(), "AuthPolicyCrdMissing");
        assert_eq!(
            ReconcileError::NoUrlsDiscovered { route: "r".into() }.reason(),
            "NoURLsDiscovered"
        );
    }
}
