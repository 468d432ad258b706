//! # Readiness evaluation
//!
//! Pure functions folding child statuses (Deployments, HTTPRoutes,
//! Gateways, InferencePools) into per-component readiness with stable
//! reasons. The top-level aggregation into `Ready` happens in the reconcile
//! entry; everything here operates on snapshots only.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition as MetaCondition;

use crate::constants::{AUTH_POLICY_AFFECTED_CONDITION, AUTH_POLICY_CONTROLLER_NAME};
use crate::gateway::inference::{InferencePool, POOL_CONDITION_ACCEPTED};
use crate::gateway::{Gateway, HTTPRoute, GATEWAY_CONDITION_PROGRAMMED, ROUTE_CONDITION_ACCEPTED};

/// Outcome of evaluating one readiness aspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    True,
    False { reason: String, message: String },
    Unknown { reason: String, message: String },
}

impl Readiness {
    fn not_ready(reason: &str, message: String) -> Self {
        Self::False {
            reason: reason.to_string(),
            message,
        }
    }

    fn unknown(reason: &str, message: String) -> Self {
        Self::Unknown {
            reason: reason.to_string(),
            message,
        }
    }

    #[must_use]
    pub fn is_true(&self) -> bool {
        matches!(self, Self::True)
    }
}

/// A condition observed at an older generation than the object's current
/// one is stale and never contributes True.
fn is_stale(condition: &MetaCondition, generation: Option<i64>) -> bool {
    let observed = condition.observed_generation.unwrap_or(0);
    observed > 0 && observed < generation.unwrap_or(0)
}

fn asserted(
    conditions: Option<&Vec<MetaCondition>>,
    generation: Option<i64>,
    r#type: &str,
) -> bool {
    conditions
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.type_ == r#type && c.status == "True" && !is_stale(c, generation)
            })
        })
        .unwrap_or(false)
}

/// Deployment readiness: the platform's `Available` condition, with
/// `Progressing`/unknown surfaced before it appears. An observed generation
/// behind the object generation counts as stale.
#[must_use]
pub fn deployment_ready(deployment: &Deployment) -> Readiness {
    let name = deployment
        .metadata
        .name
        .as_deref()
        .unwrap_or("unknown")
        .to_string();
    let Some(status) = deployment.status.as_ref() else {
        return Readiness::unknown(
            "Progressing",
            format!("deployment {name} has no status yet"),
        );
    };
    if status.observed_generation.unwrap_or(0) > 0
        && status.observed_generation < deployment.metadata.generation
    {
        return Readiness::unknown(
            "Progressing",
            format!("deployment {name} status is stale"),
        );
    }
    let available = status
        .conditions
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|c| c.type_ == "Available");
    match available {
        Some(c) if c.status == "True" => Readiness::True,
        Some(c) => Readiness::not_ready(
            "DeploymentNotReady",
            format!(
                "deployment {name} is not available: {}",
                c.message.as_deref().unwrap_or("")
            ),
        ),
        None => Readiness::unknown(
            "Progressing",
            format!("deployment {name} has not reported availability"),
        ),
    }
}

/// HTTPRoute readiness over the managed or referenced set.
///
/// Per parent: the auth-policy controller's parent must assert
/// `AuthPolicyAffected` when auth is enabled; any other parent must assert
/// the standard `Accepted`. A route with zero parent statuses is never
/// ready, and with auth enabled at least one parent must have asserted the
/// auth condition or readiness reports that authentication is not enforced.
#[must_use]
pub fn http_routes_ready(
    routes: &[HTTPRoute],
    missing: &[String],
    auth_enabled: bool,
) -> Readiness {
    if let Some(name) = missing.first() {
        return Readiness::not_ready(
            "RouteNotFound",
            format!("referenced HTTPRoute {name} does not exist"),
        );
    }
    if routes.is_empty() {
        return Readiness::not_ready("RouteNotFound", "no HTTPRoutes to evaluate".to_string());
    }
    for route in routes {
        let name = route.metadata.name.as_deref().unwrap_or("unknown");
        let generation = route.metadata.generation;
        let parents = route
            .status
            .as_ref()
            .map(|s| s.parents.as_slice())
            .unwrap_or_default();
        if parents.is_empty() {
            return Readiness::not_ready(
                "RouteNotAccepted",
                format!("HTTPRoute {name} has no parent statuses"),
            );
        }
        let mut auth_affected = false;
        for parent in parents {
            if parent.controller_name == AUTH_POLICY_CONTROLLER_NAME && auth_enabled {
                if asserted(
                    parent.conditions.as_ref(),
                    generation,
                    AUTH_POLICY_AFFECTED_CONDITION,
                ) {
                    auth_affected = true;
                }
            } else if !asserted(parent.conditions.as_ref(), generation, ROUTE_CONDITION_ACCEPTED)
            {
                return Readiness::not_ready(
                    "RouteNotAccepted",
                    format!(
                        "HTTPRoute {name} is not accepted by parent {}",
                        parent.parent_ref.name
                    ),
                );
            }
        }
        if auth_enabled && !auth_affected {
            return Readiness::not_ready(
                "AuthenticationNotEnforced",
                format!("Authentication is not enforced on HTTPRoute {name}"),
            );
        }
    }
    Readiness::True
}

/// Gateway readiness: `Programmed=True` is the authoritative signal.
#[must_use]
pub fn gateways_ready(gateways: &[(String, Option<Gateway>)]) -> Readiness {
    for (name, gateway) in gateways {
        let Some(gateway) = gateway else {
            return Readiness::not_ready(
                "GatewayNotFound",
                format!("parent Gateway {name} does not exist"),
            );
        };
        let programmed = asserted(
            gateway.status.as_ref().and_then(|s| s.conditions.as_ref()),
            gateway.metadata.generation,
            GATEWAY_CONDITION_PROGRAMMED,
        );
        if !programmed {
            return Readiness::not_ready(
                "GatewayNotProgrammed",
                format!("Gateway {name} is not programmed"),
            );
        }
    }
    Readiness::True
}

/// InferencePool readiness: every parent entry carries a non-stale
/// `Accepted=True`.
#[must_use]
pub fn inference_pool_ready(pool: &InferencePool) -> Readiness {
    let name = pool.metadata.name.as_deref().unwrap_or("unknown");
    let generation = pool.metadata.generation;
    let parents = pool
        .status
        .as_ref()
        .and_then(|s| s.parent.as_deref())
        .unwrap_or_default();
    if parents.is_empty() {
        return Readiness::unknown(
            "PoolNotAccepted",
            format!("InferencePool {name} has no parent statuses yet"),
        );
    }
    for parent in parents {
        if !asserted(parent.conditions.as_ref(), generation, POOL_CONDITION_ACCEPTED) {
            return Readiness::not_ready(
                "PoolNotAccepted",
                format!("InferencePool {name} is not accepted by all parents"),
            );
        }
    }
    Readiness::True
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::inference::{InferencePoolSpec, InferencePoolStatus, PoolParentStatus};
    use crate::gateway::{
        GatewaySpec, GatewayStatus, HTTPRouteSpec, HTTPRouteStatus, ParentReference,
        RouteParentStatus,
    };
    use k8s_openapi::api::apps::v1::{DeploymentCondition, DeploymentStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn condition(r#type: &str, status: &str, observed_generation: Option<i64>) -> MetaCondition {
        MetaCondition {
            type_: r#type.to_string(),
            status: status.to_string(),
            reason: "Test".to_string(),
            message: String::new(),
            observed_generation,
            last_transition_time: Time(chrono::Utc::now()),
        }
    }

    fn deployment(generation: i64, observed: i64, available: Option<&str>) -> Deployment {
        let mut d = Deployment::default();
        d.metadata.name = Some("test-llm-kserve".into());
        d.metadata.generation = Some(generation);
        d.status = Some(DeploymentStatus {
            observed_generation: Some(observed),
            conditions: available.map(|s| {
                vec![DeploymentCondition {
                    type_: "Available".into(),
                    status: s.into(),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        });
        d
    }

    fn route_with_parents(parents: Vec<RouteParentStatus>) -> HTTPRoute {
        let mut route = HTTPRoute::new("r", HTTPRouteSpec::default());
        route.metadata.generation = Some(1);
        route.status = Some(HTTPRouteStatus { parents });
        route
    }

    fn parent(controller: &str, conditions: Vec<MetaCondition>) -> RouteParentStatus {
        RouteParentStatus {
            parent_ref: ParentReference {
                name: "kserve-ingress-gateway".into(),
                ..Default::default()
            },
            controller_name: controller.to_string(),
            conditions: Some(conditions),
        }
    }

    #[test]
    fn deployment_available_is_ready() {
        assert!(deployment_ready(&deployment(1, 1, Some("True"))).is_true());
    }

    #[test]
    fn deployment_without_available_condition_is_unknown() {
        assert!(matches!(
            deployment_ready(&deployment(1, 1, None)),
            Readiness::Unknown { .. }
        ));
    }

    #[test]
    fn stale_deployment_status_is_not_ready() {
        // observedGeneration behind generation: stale, never True
        assert!(!deployment_ready(&deployment(3, 2, Some("True"))).is_true());
    }

    #[test]
    fn accepted_route_is_ready_when_auth_disabled() {
        let route = route_with_parents(vec![parent(
            "gateway.example/controller",
            vec![condition(ROUTE_CONDITION_ACCEPTED, "True", Some(1))],
        )]);
        assert!(http_routes_ready(&[route], &[], false).is_true());
    }

    #[test]
    fn auth_enabled_without_auth_parent_reports_not_enforced() {
        let route = route_with_parents(vec![parent(
            "gateway.example/controller",
            vec![condition(ROUTE_CONDITION_ACCEPTED, "True", Some(1))],
        )]);
        let readiness = http_routes_ready(&[route], &[], true);
        match readiness {
            Readiness::False { reason, message } => {
                assert_eq!(reason, "AuthenticationNotEnforced");
                assert!(message.contains("Authentication is not enforced"));
            }
            other => panic!("expected False, got {other:?}"),
        }
    }

    #[test]
    fn auth_parent_with_affected_condition_satisfies_auth() {
        let route = route_with_parents(vec![
            parent(
                "gateway.example/controller",
                vec![condition(ROUTE_CONDITION_ACCEPTED, "True", Some(1))],
            ),
            parent(
                AUTH_POLICY_CONTROLLER_NAME,
                vec![condition(AUTH_POLICY_AFFECTED_CONDITION, "True", Some(1))],
            ),
        ]);
        assert!(http_routes_ready(&[route], &[], true).is_true());
    }

    #[test]
    fn route_without_parents_is_never_ready() {
        let route = route_with_parents(vec![]);
        assert!(!http_routes_ready(&[route], &[], false).is_true());
    }

    #[test]
    fn stale_accepted_condition_does_not_count() {
        let mut route = route_with_parents(vec![parent(
            "gateway.example/controller",
            vec![condition(ROUTE_CONDITION_ACCEPTED, "True", Some(1))],
        )]);
        route.metadata.generation = Some(2);
        assert!(!http_routes_ready(&[route], &[], false).is_true());
    }

    #[test]
    fn missing_referenced_route_is_not_ready() {
        let readiness = http_routes_ready(&[], &["my-custom-route".to_string()], false);
        assert!(matches!(readiness, Readiness::False { .. }));
    }

    #[test]
    fn gateway_requires_programmed_condition() {
        let mut gw = Gateway::new("gw", GatewaySpec::default());
        gw.metadata.generation = Some(1);
        assert!(!gateways_ready(&[("gw".into(), Some(gw.clone()))]).is_true());
        gw.status = Some(GatewayStatus {
            addresses: None,
            conditions: Some(vec![condition(GATEWAY_CONDITION_PROGRAMMED, "True", Some(1))]),
        });
        assert!(gateways_ready(&[("gw".into(), Some(gw))]).is_true());
        assert!(!gateways_ready(&[("missing".into(), None)]).is_true());
    }

    #[test]
    fn stale_programmed_condition_is_not_ready() {
        let mut gw = Gateway::new("gw", GatewaySpec::default());
        gw.metadata.generation = Some(5);
        gw.status = Some(GatewayStatus {
            addresses: None,
            conditions: Some(vec![condition(GATEWAY_CONDITION_PROGRAMMED, "True", Some(3))]),
        });
        assert!(!gateways_ready(&[("gw".into(), Some(gw))]).is_true());
    }

    #[test]
    fn pool_requires_accepted_on_every_parent() {
        let mut pool = InferencePool::new("p", InferencePoolSpec::default());
        pool.metadata.generation = Some(1);
        assert!(matches!(
            inference_pool_ready(&pool),
            Readiness::Unknown { .. }
        ));
        pool.status = Some(InferencePoolStatus {
            parent: Some(vec![
                PoolParentStatus {
                    parent_ref: None,
                    conditions: Some(vec![condition(POOL_CONDITION_ACCEPTED, "True", Some(1))]),
                },
                PoolParentStatus {
                    parent_ref: None,
                    conditions: Some(vec![condition(POOL_CONDITION_ACCEPTED, "False", Some(1))]),
                },
            ]),
        });
        assert!(!inference_pool_ready(&pool).is_true());
    }
}
