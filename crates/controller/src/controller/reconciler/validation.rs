//! # Effective-spec validation
//!
//! Sanity checks on the composed spec before any child is written. These
//! catch contradictions the individual component reconcilers would only
//! surface halfway through a pass.

use crate::crd::LLMInferenceServiceSpec;

use super::model::MAIN_CONTAINER_NAME;
use super::ReconcileError;

/// Validate the composed spec. Returns the first violation as
/// [`ReconcileError::InvalidSpec`].
pub fn validate_effective_spec(spec: &LLMInferenceServiceSpec) -> Result<(), ReconcileError> {
    let invalid = |message: &str| Err(ReconcileError::InvalidSpec(message.to_string()));

    match spec.model.as_ref() {
        None => return invalid("model is required after composing presets"),
        Some(model) if model.uri.is_empty() => return invalid("model.uri must not be empty"),
        Some(_) => {}
    }

    let Some(template) = spec.template.as_ref() else {
        return invalid("template is required after composing presets");
    };
    if !template
        .containers
        .iter()
        .any(|c| c.name == MAIN_CONTAINER_NAME)
    {
        return invalid("template must declare a container named \"main\"");
    }

    if spec.replicas.is_some_and(|r| r < 0) {
        return invalid("replicas must not be negative");
    }
    if let Some(prefill) = spec.prefill.as_ref() {
        if prefill.replicas.is_some_and(|r| r < 0) {
            return invalid("prefill.replicas must not be negative");
        }
    }

    if let Some(router) = spec.router.as_ref() {
        if let Some(http) = router.route.as_ref().and_then(|r| r.http.as_ref()) {
            let has_refs = http.refs.as_deref().is_some_and(|r| !r.is_empty());
            if has_refs && http.spec.is_some() {
                return invalid("router.route.http.spec and router.route.http.refs are mutually exclusive");
            }
            if has_refs
                && http
                    .refs
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .any(|r| r.name.is_empty())
            {
                return invalid("router.route.http.refs entries must carry a name");
            }
        }
        if let Some(pool) = router.scheduler.as_ref().and_then(|s| s.pool.as_ref()) {
            if pool.spec.is_some() && pool.pool_ref.is_some() {
                return invalid(
                    "router.scheduler.pool.spec and router.scheduler.pool.ref are mutually exclusive",
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        HttpRouteOverride, LocalObjectRef, ModelSpec, PoolSpec, RouteSpec, RouterSpec,
        SchedulerSpec, UntypedObjectRef,
    };
    use crate::gateway::HTTPRouteSpec;
    use k8s_openapi::api::core::v1::{Container, PodSpec};

    fn valid_spec() -> LLMInferenceServiceSpec {
        LLMInferenceServiceSpec {
            model: Some(ModelSpec {
                uri: "hf://facebook/opt-125m".into(),
                name: None,
                criticality: None,
            }),
            template: Some(PodSpec {
                containers: vec![Container {
                    name: "main".into(),
                    image: Some("vllm/vllm-openai:latest".into()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn valid_spec_passes() {
        assert!(validate_effective_spec(&valid_spec()).is_ok());
    }

    #[test]
    fn missing_model_is_rejected() {
        let mut spec = valid_spec();
        spec.model = None;
        let err = validate_effective_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("model is required"));
    }

    #[test]
    fn missing_template_is_rejected() {
        let mut spec = valid_spec();
        spec.template = None;
        assert!(validate_effective_spec(&spec).is_err());
    }

    #[test]
    fn template_without_main_container_is_rejected() {
        let mut spec = valid_spec();
        spec.template.as_mut().unwrap().containers[0].name = "server".into();
        let err = validate_effective_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("main"));
    }

    #[test]
    fn negative_replicas_are_rejected() {
        let mut spec = valid_spec();
        spec.replicas = Some(-1);
        assert!(validate_effective_spec(&spec).is_err());
    }

    #[test]
    fn route_spec_and_refs_are_mutually_exclusive() {
        let mut spec = valid_spec();
        spec.router = Some(RouterSpec {
            route: Some(RouteSpec {
                http: Some(HttpRouteOverride {
                    spec: Some(HTTPRouteSpec::default()),
                    refs: Some(vec![UntypedObjectRef {
                        name: "my-route".into(),
                        namespace: None,
                    }]),
                }),
            }),
            ..Default::default()
        });
        let err = validate_effective_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn pool_spec_and_ref_are_mutually_exclusive() {
        let mut spec = valid_spec();
        spec.router = Some(RouterSpec {
            scheduler: Some(SchedulerSpec {
                template: None,
                pool: Some(PoolSpec {
                    spec: Some(Default::default()),
                    pool_ref: Some(LocalObjectRef { name: "pool".into() }),
                }),
            }),
            ..Default::default()
        });
        assert!(validate_effective_spec(&spec).is_err());
    }

    #[test]
    fn empty_ref_names_are_rejected() {
        let mut spec = valid_spec();
        spec.router = Some(RouterSpec {
            route: Some(RouteSpec {
                http: Some(HttpRouteOverride {
                    spec: None,
                    refs: Some(vec![UntypedObjectRef {
                        name: String::new(),
                        namespace: None,
                    }]),
                }),
            }),
            ..Default::default()
        });
        assert!(validate_effective_spec(&spec).is_err());
    }
}
