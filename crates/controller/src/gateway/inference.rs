//! # Inference extension types
//!
//! `inference.networking.x-k8s.io/v1alpha2` InferencePool and InferenceModel.
//! The stable `inference.networking.k8s.io/v1` pool shape is never typed; it
//! is published as an unstructured object by the scheduler reconciler.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use serde::{Deserialize, Serialize};

use crate::crd::Criticality;

pub const INFERENCE_GROUP_ALPHA: &str = "inference.networking.x-k8s.io";
pub const INFERENCE_GROUP_V1: &str = "inference.networking.k8s.io";

/// Condition asserted by the gateway on each pool parent when the pool is
/// usable for routing.
pub const POOL_CONDITION_ACCEPTED: &str = "Accepted";

/// InferencePool (legacy wire version)
#[derive(
    kube::CustomResource, Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema
)]
#[kube(
    kind = "InferencePool",
    group = "inference.networking.x-k8s.io",
    version = "v1alpha2",
    namespaced,
    status = "InferencePoolStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct InferencePoolSpec {
    /// Pod selector for the pooled model servers.
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    /// Port the model servers accept inference traffic on.
    #[serde(default)]
    pub target_port_number: i32,
    /// The endpoint-picker extension consulted for routing decisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_ref: Option<ExtensionRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_number: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_mode: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InferencePoolStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Vec<PoolParentStatus>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolParentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ref: Option<PoolParentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolParentRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

/// InferenceModel
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "InferenceModel",
    group = "inference.networking.x-k8s.io",
    version = "v1alpha2",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct InferenceModelSpec {
    /// Name clients use to address the model.
    #[serde(default)]
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criticality: Option<Criticality>,
    /// The pool serving this model.
    #[serde(default)]
    pub pool_ref: PoolObjectRef,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolObjectRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: String,
}
