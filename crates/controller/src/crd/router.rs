//! # Router Spec
//!
//! Routing sub-spec of an LLMInferenceService: the HTTP route (managed or
//! referenced), the Gateways to bind it to, and the endpoint-picker
//! scheduler with its InferencePool.
//!
//! The reconciler never branches on nil-emptiness directly; it branches on
//! the [`RouteMode`] / [`PoolMode`] variants derived here.

use k8s_openapi::api::core::v1::PodSpec;
use serde::{Deserialize, Serialize};

use crate::gateway::inference::InferencePoolSpec;
use crate::gateway::HTTPRouteSpec;

/// Routing configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayRoutingSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerSpec>,
}

/// Route configuration; only HTTP routes are modeled.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpRouteOverride>,
}

/// Either a full managed HTTPRoute spec, references to user-owned routes, or
/// empty (managed default route).
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteOverride {
    /// Spec of the managed HTTPRoute. Mutually exclusive with `refs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<HTTPRouteSpec>,
    /// References to pre-existing HTTPRoutes in this namespace. When set the
    /// controller deletes its managed route and only evaluates these.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<Vec<UntypedObjectRef>>,
}

/// Gateways the managed route should attach to.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRoutingSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<Vec<UntypedObjectRef>>,
}

/// A name (+ optional namespace) reference to an object of a known kind.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UntypedObjectRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Endpoint-picker scheduler configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSpec {
    /// Pod spec of the scheduler deployment. Setting this makes the
    /// scheduler managed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PodSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolSpec>,
}

/// Either a managed InferencePool spec or a reference to a user-owned pool.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<InferencePoolSpec>,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub pool_ref: Option<LocalObjectRef>,
}

/// A same-namespace reference by name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectRef {
    pub name: String,
}

/// How the HTTP route of a service is to be reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode<'a> {
    /// No router/route/http section: nothing to route, delete any managed
    /// route.
    None,
    /// User points at pre-existing routes; the managed route is deleted and
    /// only the referenced set is evaluated.
    Referenced(&'a [UntypedObjectRef]),
    /// The controller owns a route with the given spec.
    Managed(&'a HTTPRouteSpec),
    /// `http: {}` — the controller owns a route pointing at the default
    /// gateway and the managed inference pool.
    ManagedDefault,
}

/// How the InferencePool of a service is to be reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode<'a> {
    /// The controller owns the pool; spec may be elided (defaulted).
    Managed(Option<&'a InferencePoolSpec>),
    /// User points at a pre-existing pool; all managed scheduler children
    /// are deleted.
    Referenced(&'a LocalObjectRef),
}

impl RouterSpec {
    /// Classify the route section into its reconcile mode.
    #[must_use]
    pub fn route_mode(&self) -> RouteMode<'_> {
        let Some(http) = self.route.as_ref().and_then(|r| r.http.as_ref()) else {
            return RouteMode::None;
        };
        if let Some(refs) = http.refs.as_deref() {
            if !refs.is_empty() {
                return RouteMode::Referenced(refs);
            }
        }
        if let Some(spec) = http.spec.as_ref() {
            return RouteMode::Managed(spec);
        }
        RouteMode::ManagedDefault
    }

    /// Classify the scheduler pool section into its reconcile mode.
    /// Returns `None` when no scheduler is configured at all.
    #[must_use]
    pub fn pool_mode(&self) -> Option<PoolMode<'_>> {
        let scheduler = self.scheduler.as_ref()?;
        if let Some(pool_ref) = scheduler.pool.as_ref().and_then(|p| p.pool_ref.as_ref()) {
            return Some(PoolMode::Referenced(pool_ref));
        }
        scheduler.template.as_ref()?;
        Some(PoolMode::Managed(
            scheduler.pool.as_ref().and_then(|p| p.spec.as_ref()),
        ))
    }

    /// Gateway refs the managed route should bind to, if any.
    #[must_use]
    pub fn gateway_refs(&self) -> Option<&[UntypedObjectRef]> {
        self.gateway
            .as_ref()
            .and_then(|g| g.refs.as_deref())
            .filter(|refs| !refs.is_empty())
    }
}
