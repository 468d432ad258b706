//! # Preset composition
//!
//! Folds the ordered `baseRefs` of an LLMInferenceService into a single
//! effective spec. Each preset layer deep-merges into the accumulator; the
//! user's own spec is always the final layer. The merge is total and
//! deterministic: maps merge per key, slices are wholly replaced by a later
//! non-null slice, scalars are replaced by a later non-null value.

use kube::api::Api;
use kube::ResourceExt;
use serde_json::Value;
use tracing::debug;

use crate::constants::WELL_KNOWN_PRESETS;
use crate::crd::{LLMInferenceService, LLMInferenceServiceConfig, LLMInferenceServiceSpec};

use super::lifecycle::is_not_found;
use super::{ReconcileError, Reconciler};

/// Layered deep-merge of two spec values, `overlay` winning.
#[must_use]
pub fn merge_specs(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (base, Value::Null) => base,
        (base, Value::String(s)) if s.is_empty() => base,
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_specs(existing, value),
                    None => value,
                };
                if !merged.is_null() {
                    base.insert(key, merged);
                }
            }
            Value::Object(base)
        }
        // Slices and scalars: the later layer wholly replaces the earlier.
        (_, overlay) => overlay,
    }
}

/// Whether a preset name may be resolved from the system namespace.
#[must_use]
pub fn is_well_known_preset(name: &str) -> bool {
    WELL_KNOWN_PRESETS.contains(&name)
}

/// Load one preset: the service's namespace first, then the system
/// namespace for well-known names. A ref absent from both is a hard error.
async fn load_preset(
    reconciler: &Reconciler,
    llmisvc: &LLMInferenceService,
    name: &str,
) -> Result<LLMInferenceServiceConfig, ReconcileError> {
    let namespace = llmisvc.namespace().unwrap_or_else(|| "default".to_string());
    let local: Api<LLMInferenceServiceConfig> =
        Api::namespaced(reconciler.client.clone(), &namespace);
    match local.get(name).await {
        Ok(preset) => return Ok(preset),
        Err(err) if is_not_found(&err) => {}
        Err(err) => return Err(err.into()),
    }
    if is_well_known_preset(name) {
        let system: Api<LLMInferenceServiceConfig> = Api::namespaced(
            reconciler.client.clone(),
            &reconciler.config.system_namespace,
        );
        match system.get(name).await {
            Ok(preset) => return Ok(preset),
            Err(err) if is_not_found(&err) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Err(ReconcileError::PresetNotFound {
        name: name.to_string(),
    })
}

/// Pure composition: fold the preset layers in order, then the user spec as
/// the final layer.
pub fn compose(
    layers: &[LLMInferenceServiceSpec],
    user: &LLMInferenceServiceSpec,
) -> Result<LLMInferenceServiceSpec, ReconcileError> {
    let mut accumulator = Value::Object(serde_json::Map::new());
    for layer in layers {
        accumulator = merge_specs(accumulator, serde_json::to_value(layer)?);
    }
    accumulator = merge_specs(accumulator, serde_json::to_value(user)?);
    Ok(serde_json::from_value(accumulator)?)
}

/// Compose the effective spec: load each base ref in order and fold it with
/// the user spec.
pub async fn combine_base_refs(
    reconciler: &Reconciler,
    llmisvc: &LLMInferenceService,
) -> Result<LLMInferenceServiceSpec, ReconcileError> {
    let mut layers = Vec::new();
    for base_ref in llmisvc.spec.base_refs.as_deref().unwrap_or_default() {
        let preset = load_preset(reconciler, llmisvc, &base_ref.name).await?;
        debug!(
            preset.name = %base_ref.name,
            preset.namespace = %preset.namespace().unwrap_or_default(),
            "merging preset layer"
        );
        layers.push(preset.spec.0);
    }
    compose(&layers, &llmisvc.spec)
}

/// Which LLMInferenceServices a preset change must requeue: everything in
/// the cluster for a system-namespace preset, otherwise the services in the
/// preset's namespace that reference it by name.
#[must_use]
pub fn preset_targets<'a>(
    services: impl IntoIterator<Item = &'a LLMInferenceService>,
    preset_namespace: &str,
    preset_name: &str,
    system_namespace: &str,
) -> Vec<(String, String)> {
    services
        .into_iter()
        .filter(|svc| {
            if preset_namespace == system_namespace {
                return true;
            }
            svc.namespace().as_deref() == Some(preset_namespace)
                && svc
                    .spec
                    .base_refs
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .any(|r| r.name == preset_name)
        })
        .map(|svc| {
            (
                svc.namespace().unwrap_or_default(),
                svc.name_any(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BaseRef, ModelSpec};
    use serde_json::json;

    #[test]
    fn later_map_keys_override_earlier() {
        let base = json!({"model": {"uri": "hf://a", "name": "a"}});
        let overlay = json!({"model": {"uri": "hf://b"}});
        let merged = merge_specs(base, overlay);
        assert_eq!(merged["model"]["uri"], "hf://b");
        assert_eq!(merged["model"]["name"], "a");
    }

    #[test]
    fn later_slice_wholly_replaces() {
        let base = json!({"template": {"containers": [{"name": "main"}, {"name": "side"}]}});
        let overlay = json!({"template": {"containers": [{"name": "main", "image": "x"}]}});
        let merged = merge_specs(base, overlay);
        assert_eq!(
            merged["template"]["containers"],
            json!([{"name": "main", "image": "x"}])
        );
    }

    #[test]
    fn null_overlay_keeps_base() {
        let base = json!({"replicas": 3});
        let merged = merge_specs(base, Value::Null);
        assert_eq!(merged["replicas"], 3);
        let merged = merge_specs(json!({"replicas": 3}), json!({"replicas": null}));
        assert_eq!(merged["replicas"], 3);
    }

    #[test]
    fn empty_string_overlay_keeps_base() {
        let merged = merge_specs(json!({"model": {"uri": "hf://a"}}), json!({"model": {"uri": ""}}));
        assert_eq!(merged["model"]["uri"], "hf://a");
    }

    #[test]
    fn scalar_overlay_wins() {
        let merged = merge_specs(json!({"replicas": 1}), json!({"replicas": 4}));
        assert_eq!(merged["replicas"], 4);
    }

    #[test]
    fn merge_order_matters() {
        let a = json!({"replicas": 1, "model": {"uri": "hf://a"}});
        let b = json!({"replicas": 2});
        let ab = merge_specs(a.clone(), b.clone());
        let ba = merge_specs(b, a);
        assert_eq!(ab["replicas"], 2);
        assert_eq!(ba["replicas"], 1);
    }

    #[test]
    fn well_known_names_recognized() {
        assert!(is_well_known_preset("kserve-config-llm-router"));
        assert!(!is_well_known_preset("my-preset"));
    }

    #[test]
    fn three_preset_layers_compose_into_one_effective_spec() {
        use crate::crd::{HttpRouteOverride, RouteSpec, RouterSpec, SchedulerSpec};
        use k8s_openapi::api::core::v1::{Container, PodSpec};

        let model_preset = LLMInferenceServiceSpec {
            model: Some(ModelSpec {
                uri: "hf://facebook/opt-125m".into(),
                name: Some("facebook/opt-125m".into()),
                criticality: None,
            }),
            ..Default::default()
        };
        let router_preset = LLMInferenceServiceSpec {
            router: Some(RouterSpec {
                route: Some(RouteSpec {
                    http: Some(HttpRouteOverride::default()),
                }),
                scheduler: Some(SchedulerSpec {
                    template: Some(PodSpec {
                        containers: vec![Container {
                            name: "main".into(),
                            image: Some("epp:latest".into()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    pool: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let workload_preset = LLMInferenceServiceSpec {
            template: Some(PodSpec {
                containers: vec![Container {
                    name: "main".into(),
                    image: Some("vllm/vllm-openai:v0.6.0".into()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        };
        let user = LLMInferenceServiceSpec {
            replicas: Some(1),
            ..Default::default()
        };

        let effective =
            compose(&[model_preset, router_preset, workload_preset], &user).unwrap();
        assert_eq!(
            effective.model.as_ref().unwrap().uri,
            "hf://facebook/opt-125m"
        );
        assert_eq!(effective.replicas, Some(1));
        assert_eq!(
            effective.template.as_ref().unwrap().containers[0]
                .image
                .as_deref(),
            Some("vllm/vllm-openai:v0.6.0")
        );
        let router = effective.router.as_ref().unwrap();
        assert!(router.scheduler.as_ref().unwrap().template.is_some());
    }

    #[test]
    fn user_layer_always_wins() {
        let preset = LLMInferenceServiceSpec {
            replicas: Some(3),
            model: Some(ModelSpec {
                uri: "hf://preset/model".into(),
                name: None,
                criticality: None,
            }),
            ..Default::default()
        };
        let user = LLMInferenceServiceSpec {
            replicas: Some(1),
            model: Some(ModelSpec {
                uri: "hf://user/model".into(),
                name: None,
                criticality: None,
            }),
            ..Default::default()
        };
        let effective = compose(&[preset], &user).unwrap();
        assert_eq!(effective.replicas, Some(1));
        assert_eq!(effective.model.as_ref().unwrap().uri, "hf://user/model");
    }

    fn svc(namespace: &str, name: &str, refs: &[&str]) -> LLMInferenceService {
        let mut svc = LLMInferenceService::new(
            name,
            LLMInferenceServiceSpec {
                base_refs: Some(
                    refs.iter()
                        .map(|r| BaseRef {
                            name: (*r).to_string(),
                        })
                        .collect(),
                ),
                model: Some(ModelSpec {
                    uri: "hf://m".into(),
                    name: None,
                    criticality: None,
                }),
                ..Default::default()
            },
        );
        svc.metadata.namespace = Some(namespace.to_string());
        svc
    }

    #[test]
    fn system_namespace_preset_targets_everything() {
        let services = [svc("a", "one", &[]), svc("b", "two", &["p"])];
        let targets = preset_targets(services.iter(), "kserve", "p", "kserve");
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn user_namespace_preset_targets_referencing_services_only() {
        let services = [
            svc("a", "one", &["p"]),
            svc("a", "two", &["q"]),
            svc("b", "three", &["p"]),
        ];
        let targets = preset_targets(services.iter(), "a", "p", "kserve");
        assert_eq!(targets, vec![("a".to_string(), "one".to_string())]);
    }
}
