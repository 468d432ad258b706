//! # LLMInferenceService Spec
//!
//! Main CRD specification types and default values.

use k8s_openapi::api::core::v1::PodSpec;
use serde::{Deserialize, Serialize};

use crate::crd::router::RouterSpec;

/// LLMInferenceService Custom Resource Definition
///
/// An `LLMInferenceService` declares a large-language-model serving topology.
/// The controller materializes it into model-server Deployments (single-node,
/// multi-node worker, or prefill/decode disaggregation), an endpoint-picker
/// scheduler, an InferencePool binding, Gateway API routing and a self-signed
/// certificate chain for intra-service TLS.
///
/// # Example
///
/// ```yaml
/// apiVersion: serving.kserve.io/v1alpha1
/// kind: LLMInferenceService
/// metadata:
///   name: test-llm
///   namespace: nn
/// spec:
///   baseRefs:
///     - name: kserve-config-llm-model
///     - name: kserve-config-llm-router
///     - name: kserve-config-llm-workload
///   model:
///     uri: hf://facebook/opt-125m
///     name: facebook/opt-125m
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "LLMInferenceService",
    group = "serving.kserve.io",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::LLMInferenceServiceStatus",
    shortname = "llmisvc",
    printcolumn = r#"{"name":"URL", "type":"string", "jsonPath":".status.url"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LLMInferenceServiceSpec {
    /// Named presets merged into this spec, in order. Later refs override
    /// earlier ones; the user's own spec is always the final layer.
    /// Refs resolve in this resource's namespace first; well-known names fall
    /// back to the system namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_refs: Option<Vec<BaseRef>>,
    /// The model artifact to serve. Optional here because presets carry
    /// partial specs; the composed effective spec must have it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSpec>,
    /// Replica count for the main (and multi-node worker) deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Pod spec of the main model-server workload. The container named
    /// `main` receives the model mount and positional model-path argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PodSpec>,
    /// Pod spec for the multi-node worker role. Setting this switches the
    /// topology to multi-node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<PodSpec>,
    /// Disaggregated prefill configuration. Setting this adds a prefill
    /// deployment (and optionally a prefill worker deployment).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefill: Option<PrefillSpec>,
    /// Routing: HTTPRoute, Gateway bindings and the endpoint-picker
    /// scheduler with its InferencePool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterSpec>,
}

/// A reference to a named `LLMInferenceServiceConfig` preset.
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BaseRef {
    /// Preset name.
    pub name: String,
}

/// Model artifact location and identity.
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    /// Artifact URI. The scheme decides how the artifact is attached to the
    /// workload pod: `pvc://`, `oci://`, `hf://`, `s3://`, `gs://`,
    /// `http(s)://`. Unrecognized schemes leave the pod spec untouched.
    pub uri: String,
    /// Served model name. Defaults to the LLMInferenceService name when the
    /// InferenceModel binding is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Criticality of the served model, propagated to the InferenceModel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criticality: Option<Criticality>,
}

/// Criticality of a served model, as understood by the inference gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum Criticality {
    Critical,
    Standard,
    Sheddable,
}

/// Disaggregated prefill: prompt-processing pods separate from
/// token-generation pods.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrefillSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PodSpec>,
    /// Pod spec for the prefill worker role (multi-node prefill).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<PodSpec>,
}

/// LLMInferenceServiceConfig preset
///
/// A reusable partial spec, merged into LLMInferenceServices via `baseRefs`.
/// Presets in the system namespace apply to any LLMInferenceService; presets
/// in a user namespace apply only there. Same shape as the service spec, no
/// status.
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "LLMInferenceServiceConfig",
    group = "serving.kserve.io",
    version = "v1alpha1",
    namespaced,
    shortname = "llmisvccfg"
)]
#[serde(transparent)]
pub struct LLMInferenceServiceConfigSpec(pub LLMInferenceServiceSpec);
