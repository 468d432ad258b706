//! # Router reconciliation
//!
//! Owns the managed HTTPRoute, or collects the user-referenced routes, and
//! binds managed routes to the requested Gateways. When auth is requested
//! but the cluster has no AuthPolicy CRD the managed route is torn down
//! rather than exposing unauthenticated traffic.

use kube::api::{Api, ObjectMeta};
use kube::{Client, ResourceExt};
use tracing::debug;

use crate::constants::{AUTH_POLICY_GROUP, AUTH_POLICY_KIND};
use crate::crd::{LLMInferenceService, LLMInferenceServiceSpec, RouteMode, UntypedObjectRef};
use crate::gateway::{
    HTTPBackendRef, HTTPPathMatch, HTTPRoute, HTTPRouteMatch, HTTPRouteRule, HTTPRouteSpec,
    ParentReference, GATEWAY_API_GROUP,
};
use crate::gateway::inference::INFERENCE_GROUP_ALPHA;

use super::lifecycle::{self, is_not_found};
use super::scheduler::COMPONENT_ROUTER_SCHEDULER;
use super::{child_labels, names, semantic, ReconcileError, Reconciler};

/// Routes of the current pass, fed to the readiness aggregator and the URL
/// discoverer.
#[derive(Debug, Clone, Default)]
pub struct RouterSnapshot {
    /// Routes to evaluate: the managed route, or the referenced set.
    pub routes: Vec<HTTPRoute>,
    /// Referenced routes that do not exist (by name).
    pub missing: Vec<String>,
    /// False when the spec has no route section at all; readiness then has
    /// nothing to evaluate and reports True.
    pub evaluated: bool,
}

/// Reconcile the route section of the effective spec.
pub async fn reconcile_router(
    reconciler: &Reconciler,
    llmisvc: &LLMInferenceService,
    effective: &LLMInferenceServiceSpec,
    pool_name: Option<&str>,
) -> Result<RouterSnapshot, ReconcileError> {
    let mode = effective
        .router
        .as_ref()
        .map_or(RouteMode::None, |r| r.route_mode());
    let namespace = llmisvc.namespace().unwrap_or_else(|| "default".to_string());

    match mode {
        RouteMode::None => {
            delete_managed_route(reconciler, llmisvc).await?;
            Ok(RouterSnapshot::default())
        }
        RouteMode::Referenced(refs) => {
            // The managed route always goes first; only the referenced set
            // is evaluated afterwards.
            delete_managed_route(reconciler, llmisvc).await?;
            let api: Api<HTTPRoute> = Api::namespaced(reconciler.client.clone(), &namespace);
            let mut snapshot = RouterSnapshot {
                evaluated: true,
                ..Default::default()
            };
            for route_ref in refs {
                // Referenced routes live in the service's namespace under
                // the referenced name.
                match api.get(&route_ref.name).await {
                    Ok(route) => snapshot.routes.push(route),
                    Err(err) if is_not_found(&err) => {
                        debug!(route = %route_ref.name, "referenced HTTPRoute not found");
                        snapshot.missing.push(route_ref.name.clone());
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            Ok(snapshot)
        }
        RouteMode::Managed(spec) => {
            let spec = with_gateway_parents(
                spec.clone(),
                effective.router.as_ref().and_then(|r| r.gateway_refs()),
                &namespace,
            );
            reconcile_managed_route(reconciler, llmisvc, spec).await
        }
        RouteMode::ManagedDefault => {
            let spec = default_route_spec(
                &reconciler.config.ingress_gateway_name,
                &reconciler.config.system_namespace,
                pool_name.map_or_else(
                    || names::inference_pool(&llmisvc.name_any()),
                    str::to_string,
                ),
            );
            let spec = with_gateway_parents(
                spec,
                effective.router.as_ref().and_then(|r| r.gateway_refs()),
                &namespace,
            );
            reconcile_managed_route(reconciler, llmisvc, spec).await
        }
    }
}

async fn reconcile_managed_route(
    reconciler: &Reconciler,
    llmisvc: &LLMInferenceService,
    spec: HTTPRouteSpec,
) -> Result<RouterSnapshot, ReconcileError> {
    // Never expose traffic unauthenticated when auth is requested: without
    // the policy CRD the managed route is withdrawn entirely.
    if llmisvc.auth_enabled() && !auth_policy_crd_present(&reconciler.client).await? {
        delete_managed_route(reconciler, llmisvc).await?;
        return Err(ReconcileError::AuthPolicyCrdMissing);
    }
    let name = llmisvc.name_any();
    let mut route = HTTPRoute::new(&names::managed_route(&name), spec);
    route.metadata.namespace = llmisvc.namespace();
    route.metadata.labels = Some(child_labels(&name, COMPONENT_ROUTER_SCHEDULER));
    let route =
        lifecycle::reconcile_child(reconciler, llmisvc, route, semantic::semantic_eq).await?;
    Ok(RouterSnapshot {
        routes: vec![route],
        missing: Vec::new(),
        evaluated: true,
    })
}

async fn delete_managed_route(
    reconciler: &Reconciler,
    llmisvc: &LLMInferenceService,
) -> Result<(), ReconcileError> {
    let mut stub = HTTPRoute::new(
        &names::managed_route(&llmisvc.name_any()),
        HTTPRouteSpec::default(),
    );
    stub.metadata = ObjectMeta {
        name: stub.metadata.name.clone(),
        namespace: llmisvc.namespace(),
        ..Default::default()
    };
    lifecycle::delete_child(reconciler, llmisvc, &stub).await
}

/// Overwrite the route's parent refs with the requested Gateways.
#[must_use]
pub(crate) fn with_gateway_parents(
    mut spec: HTTPRouteSpec,
    gateway_refs: Option<&[UntypedObjectRef]>,
    default_namespace: &str,
) -> HTTPRouteSpec {
    if let Some(refs) = gateway_refs {
        spec.parent_refs = Some(
            refs.iter()
                .map(|r| ParentReference {
                    group: Some(GATEWAY_API_GROUP.to_string()),
                    kind: Some("Gateway".to_string()),
                    namespace: Some(
                        r.namespace
                            .clone()
                            .unwrap_or_else(|| default_namespace.to_string()),
                    ),
                    name: r.name.clone(),
                    ..Default::default()
                })
                .collect(),
        );
    }
    spec
}

/// The managed default route: default ingress gateway as parent, the
/// managed inference pool as backend, everything under `/`.
#[must_use]
pub(crate) fn default_route_spec(
    gateway_name: &str,
    gateway_namespace: &str,
    pool_name: String,
) -> HTTPRouteSpec {
    HTTPRouteSpec {
        parent_refs: Some(vec![ParentReference {
            group: Some(GATEWAY_API_GROUP.to_string()),
            kind: Some("Gateway".to_string()),
            namespace: Some(gateway_namespace.to_string()),
            name: gateway_name.to_string(),
            ..Default::default()
        }]),
        hostnames: None,
        rules: Some(vec![HTTPRouteRule {
            matches: Some(vec![HTTPRouteMatch {
                path: Some(HTTPPathMatch {
                    r#type: Some("PathPrefix".to_string()),
                    value: Some("/".to_string()),
                }),
            }]),
            backend_refs: Some(vec![HTTPBackendRef {
                group: Some(INFERENCE_GROUP_ALPHA.to_string()),
                kind: Some("InferencePool".to_string()),
                name: pool_name,
                weight: Some(1),
                ..Default::default()
            }]),
        }]),
    }
}

/// Whether the AuthPolicy CRD is served by this cluster.
async fn auth_policy_crd_present(client: &Client) -> Result<bool, ReconcileError> {
    match kube::discovery::group(client, AUTH_POLICY_GROUP).await {
        Ok(group) => Ok(group
            .recommended_resources()
            .iter()
            .any(|(resource, _)| resource.kind == AUTH_POLICY_KIND)),
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
        Err(err) => Err(err.into()),
    }
}
