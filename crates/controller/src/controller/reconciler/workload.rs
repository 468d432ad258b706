//! # Workload topology engine
//!
//! Derives the set of Deployments a service needs from its effective spec
//! (single-node, multi-node worker, prefill, prefill worker), reconciles the
//! required ones and deletes the rest in the same pass. Topology exactness
//! is the correctness property: after any pass the deployments present equal
//! exactly the required set.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, ObjectMeta};
use kube::ResourceExt;
use tracing::debug;

use crate::crd::{LLMInferenceService, LLMInferenceServiceSpec};

use super::lifecycle::{self, is_kind_unregistered, is_not_found};
use super::model::attach_model_artifacts;
use super::{child_labels, names, semantic, ReconcileError, Reconciler};

pub const COMPONENT_WORKLOAD: &str = "workload";
pub const COMPONENT_WORKLOAD_WORKER: &str = "workload-worker";
pub const COMPONENT_WORKLOAD_PREFILL: &str = "workload-prefill";
pub const COMPONENT_WORKLOAD_PREFILL_WORKER: &str = "workload-prefill-worker";

/// Which deployments the effective spec demands. The main deployment is
/// always required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Topology {
    pub worker: bool,
    pub prefill: bool,
    pub prefill_worker: bool,
}

#[must_use]
pub fn required_topology(spec: &LLMInferenceServiceSpec) -> Topology {
    let prefill = spec.prefill.as_ref();
    Topology {
        worker: spec.worker.is_some(),
        prefill: prefill.is_some(),
        prefill_worker: prefill.is_some_and(|p| p.worker.is_some()),
    }
}

/// Live deployments of the current pass, fed to the readiness aggregator.
#[derive(Debug, Clone, Default)]
pub struct WorkloadSnapshot {
    pub main: Option<Deployment>,
    pub worker: Option<Deployment>,
    pub prefill: Option<Deployment>,
    pub prefill_worker: Option<Deployment>,
    pub topology: Topology,
}

/// Reconcile every required deployment and delete every superfluous one,
/// plus the workload Service backing intra-service DNS.
pub async fn reconcile_workloads(
    reconciler: &Reconciler,
    llmisvc: &LLMInferenceService,
    effective: &LLMInferenceServiceSpec,
) -> Result<WorkloadSnapshot, ReconcileError> {
    let topology = required_topology(effective);
    let name = llmisvc.name_any();
    debug!(resource.name = %name, topology = ?topology, "reconciling workload topology");

    let main_template = effective.template.clone().ok_or_else(|| {
        ReconcileError::InvalidSpec("effective spec has no workload template".to_string())
    })?;
    let prefill = effective.prefill.as_ref();
    let prefill_template = prefill
        .and_then(|p| p.template.clone())
        .unwrap_or_else(|| main_template.clone());

    let mut snapshot = WorkloadSnapshot {
        topology,
        ..Default::default()
    };

    let image = reconciler.config.storage_initializer_image.clone();

    let main = expected_deployment(
        llmisvc,
        effective,
        &names::main_deployment(&name),
        COMPONENT_WORKLOAD,
        effective.replicas,
        main_template,
        &image,
    );
    snapshot.main = Some(reconcile_deployment(reconciler, llmisvc, main).await?);

    let worker_name = names::worker_deployment(&name);
    if topology.worker {
        let worker = expected_deployment(
            llmisvc,
            effective,
            &worker_name,
            COMPONENT_WORKLOAD_WORKER,
            effective.replicas,
            effective.worker.clone().unwrap_or_default(),
            &image,
        );
        snapshot.worker = Some(reconcile_deployment(reconciler, llmisvc, worker).await?);
    } else {
        delete_deployment(reconciler, llmisvc, &worker_name).await?;
    }

    let prefill_name = names::prefill_deployment(&name);
    if topology.prefill {
        let deployment = expected_deployment(
            llmisvc,
            effective,
            &prefill_name,
            COMPONENT_WORKLOAD_PREFILL,
            prefill.and_then(|p| p.replicas),
            prefill_template.clone(),
            &image,
        );
        snapshot.prefill = Some(reconcile_deployment(reconciler, llmisvc, deployment).await?);
    } else {
        delete_deployment(reconciler, llmisvc, &prefill_name).await?;
    }

    let prefill_worker_name = names::prefill_worker_deployment(&name);
    if topology.prefill_worker {
        let deployment = expected_deployment(
            llmisvc,
            effective,
            &prefill_worker_name,
            COMPONENT_WORKLOAD_PREFILL_WORKER,
            prefill.and_then(|p| p.replicas),
            prefill.and_then(|p| p.worker.clone()).unwrap_or_default(),
            &image,
        );
        snapshot.prefill_worker =
            Some(reconcile_deployment(reconciler, llmisvc, deployment).await?);
    } else {
        delete_deployment(reconciler, llmisvc, &prefill_worker_name).await?;
    }

    let service = expected_workload_service(llmisvc);
    lifecycle::reconcile_child(reconciler, llmisvc, service, semantic::semantic_eq).await?;

    Ok(snapshot)
}

/// Canonical deployment for one workload role. Labels are fully determined
/// by (component role, owner name); the selector equals the labels.
pub(crate) fn expected_deployment(
    llmisvc: &LLMInferenceService,
    effective: &LLMInferenceServiceSpec,
    deployment_name: &str,
    component: &str,
    replicas: Option<i32>,
    mut pod: PodSpec,
    storage_initializer_image: &str,
) -> Deployment {
    let labels = child_labels(&llmisvc.name_any(), component);
    if let Some(model) = effective.model.as_ref() {
        attach_model_artifacts(&mut pod, model, storage_initializer_image);
    }
    Deployment {
        metadata: ObjectMeta {
            name: Some(deployment_name.to_string()),
            namespace: llmisvc.namespace(),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas.unwrap_or(1)),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
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

/// Reconcile one deployment, recreating it when the (immutable) selector of
/// the live object differs from the expected one.
async fn reconcile_deployment(
    reconciler: &Reconciler,
    llmisvc: &LLMInferenceService,
    expected: Deployment,
) -> Result<Deployment, ReconcileError> {
    let namespace = llmisvc.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Deployment> = Api::namespaced(reconciler.client.clone(), &namespace);
    let name = expected.name_any();
    match api.get(&name).await {
        Ok(current) => {
            if selector_of(&current) != selector_of(&expected) {
                debug!(
                    deployment = %name,
                    "selector changed; deleting and recreating (selector is immutable)"
                );
                lifecycle::delete_child(reconciler, llmisvc, &current).await?;
                lifecycle::create_child(reconciler, llmisvc, &api, expected, semantic::semantic_eq)
                    .await
            } else {
                lifecycle::update_child(
                    reconciler,
                    llmisvc,
                    &api,
                    current,
                    expected,
                    semantic::semantic_eq,
                )
                .await
            }
        }
        Err(err) if is_not_found(&err) => {
            lifecycle::create_child(reconciler, llmisvc, &api, expected, semantic::semantic_eq).await
        }
        Err(err) if is_kind_unregistered(&err) => Err(ReconcileError::KindUnavailable {
            kind: "Deployment".to_string(),
        }),
        Err(err) => Err(err.into()),
    }
}

async fn delete_deployment(
    reconciler: &Reconciler,
    llmisvc: &LLMInferenceService,
    name: &str,
) -> Result<(), ReconcileError> {
    let stub = Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: llmisvc.namespace(),
            ..Default::default()
        },
        ..Default::default()
    };
    lifecycle::delete_child(reconciler, llmisvc, &stub).await
}

fn selector_of(deployment: &Deployment) -> Option<&BTreeMap<String, String>> {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.selector.match_labels.as_ref())
}

/// ClusterIP Service selecting the main workload pods; backs the internal
/// DNS name used in the self-signed certificate SANs.
#[must_use]
pub fn expected_workload_service(llmisvc: &LLMInferenceService) -> Service {
    let name = llmisvc.name_any();
    let labels = child_labels(&name, COMPONENT_WORKLOAD);
    Service {
        metadata: ObjectMeta {
            name: Some(names::workload_service(&name)),
            namespace: llmisvc.namespace(),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: 8000,
                target_port: Some(IntOrString::Int(8000)),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::PrefillSpec;

    fn spec(worker: bool, prefill: bool, prefill_worker: bool) -> LLMInferenceServiceSpec {
        LLMInferenceServiceSpec {
            template: Some(PodSpec::default()),
            worker: worker.then(PodSpec::default),
            prefill: prefill.then(|| PrefillSpec {
                worker: prefill_worker.then(PodSpec::default),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn topology_truth_table() {
        let cases = [
            ((false, false, false), Topology { worker: false, prefill: false, prefill_worker: false }),
            ((true, false, false), Topology { worker: true, prefill: false, prefill_worker: false }),
            ((false, true, false), Topology { worker: false, prefill: true, prefill_worker: false }),
            ((true, true, false), Topology { worker: true, prefill: true, prefill_worker: false }),
            ((false, true, true), Topology { worker: false, prefill: true, prefill_worker: true }),
            ((true, true, true), Topology { worker: true, prefill: true, prefill_worker: true }),
        ];
        for ((worker, prefill, prefill_worker), expected) in cases {
            assert_eq!(
                required_topology(&spec(worker, prefill, prefill_worker)),
                expected,
                "worker={worker} prefill={prefill} prefill_worker={prefill_worker}"
            );
        }
    }

    #[test]
    fn prefill_worker_requires_prefill() {
        // a worker spec alone never demands the prefill-worker deployment
        let topology = required_topology(&spec(true, false, false));
        assert!(!topology.prefill_worker);
    }

    #[test]
    fn deployment_builder_defaults_one_replica_with_selector_equal_to_labels() {
        let mut svc = LLMInferenceService::new("test-llm", spec(false, false, false));
        svc.metadata.namespace = Some("nn".to_string());
        let effective = spec(false, false, false);
        let deployment = expected_deployment(
            &svc,
            &effective,
            "test-llm-kserve",
            COMPONENT_WORKLOAD,
            None,
            PodSpec::default(),
            "init:img",
        );
        assert_eq!(deployment.metadata.name.as_deref(), Some("test-llm-kserve"));
        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(
            spec.selector.match_labels.as_ref(),
            deployment.metadata.labels.as_ref()
        );
        assert_eq!(
            spec.template.metadata.as_ref().unwrap().labels.as_ref(),
            deployment.metadata.labels.as_ref()
        );
    }

    #[test]
    fn workload_service_selects_main_workload() {
        let mut svc = LLMInferenceService::new("test-llm", spec(false, false, false));
        svc.metadata.namespace = Some("nn".to_string());
        let service = expected_workload_service(&svc);
        assert_eq!(
            service.metadata.name.as_deref(),
            Some("test-llm-kserve-workload-svc")
        );
        let selector = service.spec.as_ref().unwrap().selector.as_ref().unwrap();
        assert_eq!(
            selector.get("app.kubernetes.io/component").map(String::as_str),
            Some(COMPONENT_WORKLOAD)
        );
    }
}
