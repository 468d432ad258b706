//! # Scheduler & InferencePool
//!
//! Reconciles the endpoint-picker (EPP) stack: ServiceAccount, RBAC, the
//! scheduler Deployment with its generated `--config-text` plugin pipeline,
//! the EPP Service, the InferencePool (published in both wire versions) and
//! the InferenceModel binding.
//!
//! Everything here is deleted again when the service is stopped or when the
//! pool is referenced rather than managed.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PodSpec, Service, ServiceAccount, ServicePort, ServiceSpec};
use k8s_openapi::api::rbac::v1::{
    ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, warn};

use crate::crd::{
    Criticality, LLMInferenceService, LLMInferenceServiceSpec, PoolMode,
};
use crate::gateway::inference::{
    ExtensionRef, InferenceModel, InferenceModelSpec, InferencePool, InferencePoolSpec,
    PoolObjectRef, INFERENCE_GROUP_ALPHA, INFERENCE_GROUP_V1,
};

use super::lifecycle::{self, is_kind_unregistered, is_not_found};
use super::model::MAIN_CONTAINER_NAME;
use super::workload::COMPONENT_WORKLOAD;
use super::{child_labels, names, semantic, ReconcileError, Reconciler};

pub const COMPONENT_ROUTER_SCHEDULER: &str = "router-scheduler";

/// Port names the EPP Service exposes when declared on the scheduler pod.
const EPP_PORT_NAMES: [&str; 4] = ["grpc", "grpc-health", "metrics", "zmq"];

/// Live scheduler state of the current pass, fed to the readiness
/// aggregator and the certificate manager.
#[derive(Debug, Clone, Default)]
pub struct SchedulerSnapshot {
    /// Whether this controller manages the scheduler stack.
    pub managed: bool,
    pub deployment: Option<Deployment>,
    /// The pool relevant for readiness: managed or referenced.
    pub pool: Option<InferencePool>,
    /// Name of that pool, when known.
    pub pool_name: Option<String>,
}

/// Reconcile (or tear down) the scheduler stack.
pub async fn reconcile_scheduler(
    reconciler: &Reconciler,
    llmisvc: &LLMInferenceService,
    effective: &LLMInferenceServiceSpec,
) -> Result<SchedulerSnapshot, ReconcileError> {
    let pool_mode = effective.router.as_ref().and_then(|r| r.pool_mode());

    match pool_mode {
        Some(PoolMode::Managed(pool_spec)) if !llmisvc.is_stopped() => {
            reconcile_managed(reconciler, llmisvc, effective, pool_spec).await
        }
        Some(PoolMode::Referenced(pool_ref)) => {
            delete_scheduler_stack(reconciler, llmisvc).await?;
            let namespace = llmisvc.namespace().unwrap_or_else(|| "default".to_string());
            let api: Api<InferencePool> = Api::namespaced(reconciler.client.clone(), &namespace);
            let pool = match api.get(&pool_ref.name).await {
                Ok(pool) => Some(pool),
                Err(err) if is_not_found(&err) || is_kind_unregistered(&err) => None,
                Err(err) => return Err(err.into()),
            };
            Ok(SchedulerSnapshot {
                managed: false,
                deployment: None,
                pool_name: Some(pool_ref.name.clone()),
                pool,
            })
        }
        _ => {
            // No scheduler configured, or the service is stopped.
            delete_scheduler_stack(reconciler, llmisvc).await?;
            Ok(SchedulerSnapshot::default())
        }
    }
}

async fn reconcile_managed(
    reconciler: &Reconciler,
    llmisvc: &LLMInferenceService,
    effective: &LLMInferenceServiceSpec,
    pool_spec: Option<&InferencePoolSpec>,
) -> Result<SchedulerSnapshot, ReconcileError> {
    let name = llmisvc.name_any();
    let namespace = llmisvc.namespace().unwrap_or_else(|| "default".to_string());
    let template = effective
        .router
        .as_ref()
        .and_then(|r| r.scheduler.as_ref())
        .and_then(|s| s.template.clone())
        .unwrap_or_default();
    let sa_name = template
        .service_account_name
        .clone()
        .unwrap_or_else(|| names::epp_service_account(&name));

    lifecycle::reconcile_child(
        reconciler,
        llmisvc,
        expected_service_account(llmisvc, &sa_name),
        semantic::semantic_eq,
    )
    .await?;
    reconcile_auth_delegator(reconciler, llmisvc, &sa_name, &namespace).await?;
    lifecycle::reconcile_child(
        reconciler,
        llmisvc,
        expected_role(llmisvc),
        semantic::semantic_eq,
    )
    .await?;
    lifecycle::reconcile_child(
        reconciler,
        llmisvc,
        expected_role_binding(llmisvc, &sa_name),
        semantic::semantic_eq,
    )
    .await?;

    let deployment = expected_scheduler_deployment(llmisvc, effective, template, &sa_name);
    let deployment =
        lifecycle::reconcile_child(reconciler, llmisvc, deployment, semantic::semantic_eq).await?;

    let service = expected_epp_service(llmisvc, &deployment);
    lifecycle::reconcile_child(reconciler, llmisvc, service, semantic::semantic_eq).await?;

    let pool = expected_inference_pool(llmisvc, pool_spec);
    let pool_name = pool.name_any();
    let pool =
        lifecycle::reconcile_child(reconciler, llmisvc, pool, semantic::semantic_eq).await?;

    // Dual-version publish: failure to write the v1 shape is logged, never
    // fatal (the v1 CRD is optional in this cluster generation).
    if let Err(err) = publish_pool_v1(reconciler, llmisvc, &pool).await {
        warn!(
            pool = %pool_name,
            error = %err,
            "failed to publish v1 InferencePool; continuing with v1alpha2 only"
        );
    }

    lifecycle::reconcile_child(
        reconciler,
        llmisvc,
        expected_inference_model(llmisvc, effective, &pool_name),
        semantic::semantic_eq,
    )
    .await?;

    Ok(SchedulerSnapshot {
        managed: true,
        deployment: Some(deployment),
        pool_name: Some(pool_name),
        pool: Some(pool),
    })
}

fn expected_service_account(llmisvc: &LLMInferenceService, sa_name: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(sa_name.to_string()),
            namespace: llmisvc.namespace(),
            labels: Some(child_labels(&llmisvc.name_any(), COMPONENT_ROUTER_SCHEDULER)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// The scheduler forwards subject-access reviews, so its ServiceAccount
/// needs the platform auth-delegator cluster role. Cluster-scoped: no owner
/// reference possible, deleted explicitly on teardown and finalization.
async fn reconcile_auth_delegator(
    reconciler: &Reconciler,
    llmisvc: &LLMInferenceService,
    sa_name: &str,
    namespace: &str,
) -> Result<(), ReconcileError> {
    let binding_name = names::epp_auth_delegator(namespace, &llmisvc.name_any());
    let expected = ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(binding_name.clone()),
            labels: Some(child_labels(&llmisvc.name_any(), COMPONENT_ROUTER_SCHEDULER)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: "system:auth-delegator".to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: sa_name.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    };
    let api: Api<ClusterRoleBinding> = Api::all(reconciler.client.clone());
    match api.get(&binding_name).await {
        Ok(current) => {
            if !semantic::semantic_eq(&expected, &current) {
                let mut expected = expected;
                expected.metadata.resource_version = current.resource_version();
                api.replace(&binding_name, &PostParams::default(), &expected)
                    .await?;
            }
            Ok(())
        }
        Err(err) if is_not_found(&err) => {
            api.create(&PostParams::default(), &expected).await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn expected_role(llmisvc: &LLMInferenceService) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(names::epp_role(&llmisvc.name_any())),
            namespace: llmisvc.namespace(),
            labels: Some(child_labels(&llmisvc.name_any(), COMPONENT_ROUTER_SCHEDULER)),
            ..Default::default()
        },
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["pods".to_string()]),
                verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec!["discovery.k8s.io".to_string()]),
                resources: Some(vec!["endpointslices".to_string()]),
                verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec![
                    INFERENCE_GROUP_ALPHA.to_string(),
                    INFERENCE_GROUP_V1.to_string(),
                ]),
                resources: Some(vec![
                    "inferencepools".to_string(),
                    "inferencemodels".to_string(),
                ]),
                verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
                ..Default::default()
            },
        ]),
    }
}

fn expected_role_binding(llmisvc: &LLMInferenceService, sa_name: &str) -> RoleBinding {
    let name = llmisvc.name_any();
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(names::epp_role_binding(&name)),
            namespace: llmisvc.namespace(),
            labels: Some(child_labels(&name, COMPONENT_ROUTER_SCHEDULER)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: names::epp_role(&name),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: sa_name.to_string(),
            namespace: llmisvc.namespace(),
            ..Default::default()
        }]),
    }
}

fn expected_scheduler_deployment(
    llmisvc: &LLMInferenceService,
    effective: &LLMInferenceServiceSpec,
    mut pod: PodSpec,
    sa_name: &str,
) -> Deployment {
    let name = llmisvc.name_any();
    let labels = child_labels(&name, COMPONENT_ROUTER_SCHEDULER);
    pod.service_account_name = Some(sa_name.to_string());
    inject_scheduler_config(&mut pod, effective.prefill.is_some());
    Deployment {
        metadata: ObjectMeta {
            name: Some(names::scheduler_deployment(&name)),
            namespace: llmisvc.namespace(),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(k8s_openapi::api::apps::v1::DeploymentSpec {
            replicas: Some(1),
            selector: k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: k8s_openapi::api::core::v1::PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Append `--config-text <yaml>` to the scheduler container unless the user
/// already provided a config override.
fn inject_scheduler_config(pod: &mut PodSpec, prefill: bool) {
    let idx = pod
        .containers
        .iter()
        .position(|c| c.name == MAIN_CONTAINER_NAME)
        .unwrap_or(0);
    let Some(container) = pod.containers.get_mut(idx) else {
        return;
    };
    let args = container.args.get_or_insert_default();
    if args
        .iter()
        .any(|a| a == "--config-text" || a == "--config-file")
    {
        debug!("scheduler container already carries a config override");
        return;
    }
    args.push("--config-text".to_string());
    args.push(scheduler_config_yaml(prefill));
}

/// The endpoint-picker plugin pipeline. With disaggregated prefill the
/// scheduler runs a prefill/decode profile pair; otherwise a single default
/// profile mixing prefix-cache affinity and load awareness.
#[must_use]
pub(crate) fn scheduler_config_yaml(prefill: bool) -> String {
    let config = if prefill {
        let profile_plugins = json!([
            {"pluginRef": "queue-scorer"},
            {"pluginRef": "prefix-cache-scorer"},
            {"pluginRef": "max-score-picker"},
        ]);
        json!({
            "apiVersion": "inference.networking.x-k8s.io/v1alpha1",
            "kind": "EndpointPickerConfig",
            "plugins": [
                {"type": "queue-scorer"},
                {"type": "prefix-cache-scorer"},
                {"type": "max-score-picker"},
                {"type": "pd-profile-handler", "parameters": {"threshold": 0}},
            ],
            "schedulingProfiles": [
                {"name": "prefill", "plugins": profile_plugins.clone()},
                {"name": "decode", "plugins": profile_plugins},
            ],
        })
    } else {
        json!({
            "apiVersion": "inference.networking.x-k8s.io/v1alpha1",
            "kind": "EndpointPickerConfig",
            "plugins": [
                {"type": "prefix-cache-scorer"},
                {"type": "load-aware-scorer"},
                {"type": "max-score-picker"},
            ],
            "schedulingProfiles": [
                {"name": "default", "plugins": [
                    {"pluginRef": "prefix-cache-scorer", "weight": 2},
                    {"pluginRef": "load-aware-scorer", "weight": 1},
                    {"pluginRef": "max-score-picker"},
                ]},
            ],
        })
    };
    serde_yaml::to_string(&config).unwrap_or_default()
}

/// EPP Service: ports mirror the scheduler container's declared port names,
/// filtered to the known EPP set and sorted by name.
fn expected_epp_service(llmisvc: &LLMInferenceService, scheduler: &Deployment) -> Service {
    let name = llmisvc.name_any();
    let labels = child_labels(&name, COMPONENT_ROUTER_SCHEDULER);
    let mut ports: Vec<ServicePort> = scheduler
        .spec
        .as_ref()
        .map(|s| &s.template)
        .and_then(|t| t.spec.as_ref())
        .map(|pod| {
            pod.containers
                .iter()
                .flat_map(|c| c.ports.as_deref().unwrap_or_default())
                .filter(|p| {
                    p.name
                        .as_deref()
                        .is_some_and(|n| EPP_PORT_NAMES.contains(&n))
                })
                .map(|p| ServicePort {
                    name: p.name.clone(),
                    port: p.container_port,
                    target_port: Some(IntOrString::Int(p.container_port)),
                    protocol: p.protocol.clone(),
                    ..Default::default()
                })
                .collect()
        })
        .unwrap_or_default();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    ports.dedup_by(|a, b| a.name == b.name);
    Service {
        metadata: ObjectMeta {
            name: Some(names::epp_service(&name)),
            namespace: llmisvc.namespace(),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: (!ports.is_empty()).then_some(ports),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The managed pool: user-provided spec, or a default selecting the main
/// workload pods with the EPP service as extension.
fn expected_inference_pool(
    llmisvc: &LLMInferenceService,
    pool_spec: Option<&InferencePoolSpec>,
) -> InferencePool {
    let name = llmisvc.name_any();
    let spec = pool_spec.cloned().unwrap_or_else(|| InferencePoolSpec {
        selector: child_labels(&name, COMPONENT_WORKLOAD),
        target_port_number: 8000,
        extension_ref: Some(ExtensionRef {
            name: names::epp_service(&name),
            ..Default::default()
        }),
    });
    let mut pool = InferencePool::new(&names::inference_pool(&name), spec);
    pool.metadata.namespace = llmisvc.namespace();
    pool.metadata.labels = Some(child_labels(&name, COMPONENT_ROUTER_SCHEDULER));
    pool
}

/// Translate the v1alpha2 pool shape into the stable v1 group:
/// `targetPortNumber` becomes `targetPorts[].number`, the flat selector
/// becomes `selector.matchLabels`, and `extensionRef` becomes
/// `endpointPickerRef` with an explicit port number (the pool's target port
/// unless the extension declared one).
#[must_use]
pub(crate) fn inference_pool_v1_payload(spec: &InferencePoolSpec) -> serde_json::Value {
    let mut payload = json!({
        "selector": {"matchLabels": spec.selector},
        "targetPorts": [{"number": spec.target_port_number}],
    });
    if let Some(ext) = spec.extension_ref.as_ref() {
        payload["endpointPickerRef"] = json!({
            "group": ext.group.clone().unwrap_or_default(),
            "kind": ext.kind.clone().unwrap_or_else(|| "Service".to_string()),
            "name": ext.name,
            "port": {"number": ext.port_number.unwrap_or(spec.target_port_number)},
        });
    }
    payload
}

fn pool_v1_api(reconciler: &Reconciler, namespace: &str) -> Api<DynamicObject> {
    let gvk = GroupVersionKind::gvk(INFERENCE_GROUP_V1, "v1", "InferencePool");
    let resource = ApiResource::from_gvk(&gvk);
    Api::namespaced_with(reconciler.client.clone(), namespace, &resource)
}

/// Materialize the pool as an unstructured v1 object. Errors bubble up to
/// the caller which only logs them.
async fn publish_pool_v1(
    reconciler: &Reconciler,
    llmisvc: &LLMInferenceService,
    pool: &InferencePool,
) -> Result<(), ReconcileError> {
    let namespace = llmisvc.namespace().unwrap_or_else(|| "default".to_string());
    let api = pool_v1_api(reconciler, &namespace);
    let name = pool.name_any();
    let gvk = GroupVersionKind::gvk(INFERENCE_GROUP_V1, "v1", "InferencePool");
    let resource = ApiResource::from_gvk(&gvk);

    let mut expected = DynamicObject::new(&name, &resource);
    expected.metadata.namespace = Some(namespace);
    expected.metadata.labels = pool.metadata.labels.clone();
    expected.metadata.owner_references = llmisvc.controller_owner_ref(&()).map(|r| vec![r]);
    expected.data = json!({"spec": inference_pool_v1_payload(&pool.spec)});

    match api.get(&name).await {
        Ok(current) => {
            let expected_value = serde_json::to_value(&expected.data)?;
            let current_value = serde_json::to_value(&current.data)?;
            if semantic::is_derivative(&expected_value, &current_value)
                && semantic::is_map_subset(
                    expected.metadata.labels.as_ref(),
                    current.metadata.labels.as_ref(),
                )
            {
                return Ok(());
            }
            expected.metadata.resource_version = current.metadata.resource_version;
            api.replace(&name, &PostParams::default(), &expected).await?;
            Ok(())
        }
        Err(err) if is_not_found(&err) => {
            api.create(&PostParams::default(), &expected).await?;
            Ok(())
        }
        Err(err) if is_kind_unregistered(&err) => Err(ReconcileError::KindUnavailable {
            kind: "InferencePool.v1".to_string(),
        }),
        Err(err) => Err(err.into()),
    }
}

/// Bind a model name to the pool. Criticality defaults to Critical.
fn expected_inference_model(
    llmisvc: &LLMInferenceService,
    effective: &LLMInferenceServiceSpec,
    pool_name: &str,
) -> InferenceModel {
    let name = llmisvc.name_any();
    let model = effective.model.as_ref();
    let mut inference_model = InferenceModel::new(
        &name,
        InferenceModelSpec {
            model_name: model
                .and_then(|m| m.name.clone())
                .unwrap_or_else(|| name.clone()),
            criticality: Some(
                model
                    .and_then(|m| m.criticality)
                    .unwrap_or(Criticality::Critical),
            ),
            pool_ref: PoolObjectRef {
                group: Some(INFERENCE_GROUP_ALPHA.to_string()),
                kind: Some("InferencePool".to_string()),
                name: pool_name.to_string(),
            },
        },
    );
    inference_model.metadata.namespace = llmisvc.namespace();
    inference_model.metadata.labels =
        Some(child_labels(&name, COMPONENT_ROUTER_SCHEDULER));
    inference_model
}

/// Delete every managed scheduler child, including the cluster-scoped
/// auth-delegator binding and the v1 pool shape.
pub async fn delete_scheduler_stack(
    reconciler: &Reconciler,
    llmisvc: &LLMInferenceService,
) -> Result<(), ReconcileError> {
    let name = llmisvc.name_any();
    let namespace = llmisvc.namespace().unwrap_or_else(|| "default".to_string());

    delete_stub::<Deployment>(reconciler, llmisvc, &names::scheduler_deployment(&name)).await?;
    delete_stub::<Service>(reconciler, llmisvc, &names::epp_service(&name)).await?;
    let mut model_stub = InferenceModel::new(&name, InferenceModelSpec::default());
    model_stub.metadata.namespace = llmisvc.namespace();
    lifecycle::delete_child(reconciler, llmisvc, &model_stub).await?;
    let mut pool_stub =
        InferencePool::new(&names::inference_pool(&name), InferencePoolSpec::default());
    pool_stub.metadata.namespace = llmisvc.namespace();
    lifecycle::delete_child(reconciler, llmisvc, &pool_stub).await?;
    delete_stub::<RoleBinding>(reconciler, llmisvc, &names::epp_role_binding(&name)).await?;
    delete_stub::<Role>(reconciler, llmisvc, &names::epp_role(&name)).await?;
    delete_stub::<ServiceAccount>(reconciler, llmisvc, &names::epp_service_account(&name)).await?;

    // The v1 pool and the cluster binding carry no owner reference, so they
    // are deleted even while the owner is terminating.
    let api = pool_v1_api(reconciler, &namespace);
    match api
        .delete(&names::inference_pool(&name), &DeleteParams::default())
        .await
    {
        Ok(_) => {}
        Err(err) if is_not_found(&err) || is_kind_unregistered(&err) => {}
        Err(err) => return Err(err.into()),
    }
    lifecycle::delete_cluster_scoped::<ClusterRoleBinding>(
        reconciler,
        llmisvc,
        &names::epp_auth_delegator(&namespace, &name),
    )
    .await
}

async fn delete_stub<K>(
    reconciler: &Reconciler,
    llmisvc: &LLMInferenceService,
    name: &str,
) -> Result<(), ReconcileError>
where
    K: kube::Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + serde::Serialize
        + std::fmt::Debug
        + Default,
{
    let mut stub = K::default();
    stub.meta_mut().name = Some(name.to_string());
    stub.meta_mut().namespace = llmisvc.namespace();
    lifecycle::delete_child(reconciler, llmisvc, &stub).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, ContainerPort};

    #[test]
    fn default_pipeline_weights_prefix_cache_over_load() {
        let yaml = scheduler_config_yaml(false);
        assert!(yaml.contains("prefix-cache-scorer"));
        assert!(yaml.contains("load-aware-scorer"));
        assert!(yaml.contains("max-score-picker"));
        assert!(yaml.contains("weight: 2"));
        assert!(yaml.contains("name: default"));
        assert!(!yaml.contains("pd-profile-handler"));
    }

    #[test]
    fn prefill_pipeline_has_two_profiles_and_zero_threshold() {
        let yaml = scheduler_config_yaml(true);
        assert!(yaml.contains("name: prefill"));
        assert!(yaml.contains("name: decode"));
        assert!(yaml.contains("pd-profile-handler"));
        assert!(yaml.contains("threshold: 0"));
        assert!(yaml.contains("queue-scorer"));
    }

    #[test]
    fn config_injection_respects_user_override() {
        let mut pod = PodSpec {
            containers: vec![Container {
                name: "main".into(),
                args: Some(vec!["--config-file".into(), "/etc/epp.yaml".into()]),
                ..Default::default()
            }],
            ..Default::default()
        };
        inject_scheduler_config(&mut pod, false);
        assert_eq!(pod.containers[0].args.as_deref().unwrap().len(), 2);

        let mut pod = PodSpec {
            containers: vec![Container {
                name: "main".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        inject_scheduler_config(&mut pod, false);
        let args = pod.containers[0].args.as_deref().unwrap();
        assert_eq!(args[0], "--config-text");
        assert!(args[1].contains("EndpointPickerConfig"));
    }

    #[test]
    fn epp_service_ports_filtered_and_sorted_by_name() {
        let mut svc = LLMInferenceService::new("test-llm", LLMInferenceServiceSpec::default());
        svc.metadata.namespace = Some("nn".into());
        let pod = PodSpec {
            containers: vec![Container {
                name: "main".into(),
                ports: Some(vec![
                    ContainerPort {
                        name: Some("metrics".into()),
                        container_port: 9090,
                        ..Default::default()
                    },
                    ContainerPort {
                        name: Some("grpc".into()),
                        container_port: 9002,
                        ..Default::default()
                    },
                    ContainerPort {
                        name: Some("debug".into()),
                        container_port: 6060,
                        ..Default::default()
                    },
                    ContainerPort {
                        name: Some("grpc-health".into()),
                        container_port: 9003,
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }],
            ..Default::default()
        };
        let deployment = expected_scheduler_deployment(
            &svc,
            &LLMInferenceServiceSpec::default(),
            pod,
            "test-llm-epp-sa",
        );
        let service = expected_epp_service(&svc, &deployment);
        let ports = service.spec.as_ref().unwrap().ports.as_deref().unwrap();
        let names: Vec<_> = ports.iter().map(|p| p.name.as_deref().unwrap()).collect();
        assert_eq!(names, ["grpc", "grpc-health", "metrics"]);
        assert_eq!(ports[0].port, 9002);
    }

    #[test]
    fn v1_payload_translates_field_names() {
        let spec = InferencePoolSpec {
            selector: [("app".to_string(), "llm".to_string())].into(),
            target_port_number: 8000,
            extension_ref: Some(ExtensionRef {
                name: "test-llm-epp-service".into(),
                ..Default::default()
            }),
        };
        let payload = inference_pool_v1_payload(&spec);
        assert_eq!(payload["selector"]["matchLabels"]["app"], "llm");
        assert_eq!(payload["targetPorts"][0]["number"], 8000);
        assert_eq!(payload["endpointPickerRef"]["name"], "test-llm-epp-service");
        assert_eq!(payload["endpointPickerRef"]["kind"], "Service");
        // port follows the pool's target port unless the extension pins one
        assert_eq!(payload["endpointPickerRef"]["port"]["number"], 8000);
        assert!(payload.get("targetPortNumber").is_none());
    }

    #[test]
    fn default_pool_selects_main_workload() {
        let mut svc = LLMInferenceService::new("test-llm", LLMInferenceServiceSpec::default());
        svc.metadata.namespace = Some("nn".into());
        let pool = expected_inference_pool(&svc, None);
        assert_eq!(pool.metadata.name.as_deref(), Some("test-llm-inference-pool"));
        assert_eq!(
            pool.spec
                .selector
                .get("app.kubernetes.io/component")
                .map(String::as_str),
            Some(COMPONENT_WORKLOAD)
        );
        assert_eq!(pool.spec.target_port_number, 8000);
    }

    #[test]
    fn inference_model_defaults_name_and_criticality() {
        let mut svc = LLMInferenceService::new("test-llm", LLMInferenceServiceSpec::default());
        svc.metadata.namespace = Some("nn".into());
        let model =
            expected_inference_model(&svc, &LLMInferenceServiceSpec::default(), "test-llm-inference-pool");
        assert_eq!(model.spec.model_name, "test-llm");
        assert_eq!(model.spec.criticality, Some(Criticality::Critical));
        assert_eq!(model.spec.pool_ref.name, "test-llm-inference-pool");
    }
}
