//! # Child lifecycle primitives
//!
//! Generic create / update / delete / reconcile over any typed child of an
//! LLMInferenceService. All writes are gated on ownership (the child must be
//! controlled by the owner) and on semantic derivative equality (see
//! [`super::semantic`]), so a pass over an unchanged spec emits no writes.
//!
//! "Kind not registered" and "object not found" are different error families
//! and are never collapsed: optional CRDs (InferencePool v1, AuthPolicy)
//! make the former a normal condition in some clusters.

use std::fmt::Debug;
use std::time::Duration;

use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::crd::LLMInferenceService;

use super::{ReconcileError, Reconciler};

/// Bounded retries for version conflicts on update.
const UPDATE_CONFLICT_RETRIES: usize = 3;

/// Brief retries for the read after a `Create` raced an `AlreadyExists`;
/// the API server has eventual read-your-writes.
const POST_CREATE_READ_RETRIES: usize = 2;

/// Whether the error means the resource *kind* is not served by the cluster
/// (an optional CRD is not installed). Distinct from an individual object
/// being absent.
#[must_use]
pub fn is_kind_unregistered(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(resp) => {
            resp.code == 404
                && resp
                    .message
                    .contains("the server could not find the requested resource")
        }
        _ => false,
    }
}

/// Whether the error means the individual object is absent.
#[must_use]
pub fn is_not_found(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(resp) => resp.code == 404 && !is_kind_unregistered(err),
        _ => false,
    }
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "Conflict")
}

fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists")
}

/// Whether `current` carries a controller owner-reference pointing at the
/// given LLMInferenceService.
#[must_use]
pub fn is_controlled_by<K: Resource<DynamicType = ()>>(
    current: &K,
    owner: &LLMInferenceService,
) -> bool {
    let owner_uid = owner.meta().uid.as_deref().unwrap_or_default();
    current
        .meta()
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|o| o.controller == Some(true) && o.uid == owner_uid)
}

fn namespaced_api<K>(reconciler: &Reconciler, owner: &LLMInferenceService, child: &K) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + DeserializeOwned + Debug,
{
    let namespace = child
        .meta()
        .namespace
        .clone()
        .or_else(|| owner.namespace())
        .unwrap_or_else(|| "default".to_string());
    Api::namespaced(reconciler.client.clone(), &namespace)
}

fn with_owner_reference<K>(owner: &LLMInferenceService, mut expected: K) -> K
where
    K: Resource<DynamicType = ()>,
{
    if let Some(owner_ref) = owner.controller_owner_ref(&()) {
        let refs = expected.meta_mut().owner_references.get_or_insert_default();
        if !refs.iter().any(|o| o.uid == owner_ref.uid) {
            refs.push(owner_ref);
        }
    }
    expected
}

/// Get + (create or update) a namespaced child.
pub async fn reconcile_child<K>(
    reconciler: &Reconciler,
    owner: &LLMInferenceService,
    expected: K,
    sem_eq: impl Fn(&K, &K) -> bool,
) -> Result<K, ReconcileError>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug,
{
    let api = namespaced_api(reconciler, owner, &expected);
    let name = expected.name_any();
    match api.get(&name).await {
        Ok(current) => update_child(reconciler, owner, &api, current, expected, sem_eq).await,
        Err(err) if is_not_found(&err) => {
            create_child(reconciler, owner, &api, expected, sem_eq).await
        }
        Err(err) if is_kind_unregistered(&err) => Err(ReconcileError::KindUnavailable {
            kind: K::kind(&()).into_owned(),
        }),
        Err(err) => Err(err.into()),
    }
}

/// Create a namespaced child with an owner reference. `AlreadyExists` is
/// converted into the update path (refetch + update).
pub async fn create_child<K>(
    reconciler: &Reconciler,
    owner: &LLMInferenceService,
    api: &Api<K>,
    expected: K,
    sem_eq: impl Fn(&K, &K) -> bool,
) -> Result<K, ReconcileError>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug,
{
    let expected = with_owner_reference(owner, expected);
    let name = expected.name_any();
    match api.create(&PostParams::default(), &expected).await {
        Ok(created) => {
            info!(
                child.kind = %K::kind(&()),
                child.name = %name,
                "created child resource"
            );
            reconciler
                .record_event(owner, "Created", &format!("Created {} {}", K::kind(&()), name))
                .await;
            Ok(created)
        }
        Err(err) if is_already_exists(&err) => {
            // Lost a create race; fall through to the update path. The read
            // may briefly miss the winner's write.
            let mut attempt = 0;
            let current = loop {
                match api.get(&name).await {
                    Ok(current) => break current,
                    Err(err) if is_not_found(&err) && attempt < POST_CREATE_READ_RETRIES => {
                        attempt += 1;
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                    Err(err) => return Err(err.into()),
                }
            };
            update_child(reconciler, owner, api, current, expected, sem_eq).await
        }
        Err(err) if is_kind_unregistered(&err) => Err(ReconcileError::KindUnavailable {
            kind: K::kind(&()).into_owned(),
        }),
        Err(err) => Err(err.into()),
    }
}

/// Update a namespaced child. Refuses when `current` is not controlled by
/// `owner`; no-ops when `expected` is a semantic derivative of `current`.
/// Version conflicts are retried with bounded backoff.
pub async fn update_child<K>(
    reconciler: &Reconciler,
    owner: &LLMInferenceService,
    api: &Api<K>,
    current: K,
    expected: K,
    sem_eq: impl Fn(&K, &K) -> bool,
) -> Result<K, ReconcileError>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug,
{
    let name = expected.name_any();
    let mut current = current;
    let mut expected = with_owner_reference(owner, expected);
    let mut attempt = 0;
    loop {
        if !is_controlled_by(&current, owner) {
            reconciler
                .record_warning(
                    owner,
                    "NotOwned",
                    &format!(
                        "existing {} {} is not controlled by this LLMInferenceService",
                        K::kind(&()),
                        name
                    ),
                )
                .await;
            return Err(ReconcileError::NotOwned {
                kind: K::kind(&()).into_owned(),
                name,
            });
        }
        if sem_eq(&expected, &current) {
            debug!(
                child.kind = %K::kind(&()),
                child.name = %name,
                "child is a semantic derivative, skipping update"
            );
            return Ok(current);
        }
        expected.meta_mut().resource_version = current.meta().resource_version.clone();
        match api.replace(&name, &PostParams::default(), &expected).await {
            Ok(updated) => {
                info!(
                    child.kind = %K::kind(&()),
                    child.name = %name,
                    "updated child resource"
                );
                reconciler
                    .record_event(
                        owner,
                        "Updated",
                        &format!("Updated {} {}", K::kind(&()), name),
                    )
                    .await;
                return Ok(updated);
            }
            Err(err) if is_conflict(&err) && attempt < UPDATE_CONFLICT_RETRIES => {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                current = api.get(&name).await?;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Best-effort delete of a namespaced child. "Not found" and "kind not
/// registered" both count as success, and the whole call is a no-op while
/// the owner itself is terminating (platform GC takes over then).
pub async fn delete_child<K>(
    reconciler: &Reconciler,
    owner: &LLMInferenceService,
    expected: &K,
) -> Result<(), ReconcileError>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug,
{
    if owner.meta().deletion_timestamp.is_some() {
        return Ok(());
    }
    let api = namespaced_api(reconciler, owner, expected);
    delete_via(reconciler, owner, &api, &expected.name_any()).await
}

/// Delete a cluster-scoped child. Cluster-scoped objects cannot carry an
/// owner reference to a namespaced owner, so this runs even while the owner
/// is terminating (it is what finalization is for).
pub async fn delete_cluster_scoped<K>(
    reconciler: &Reconciler,
    owner: &LLMInferenceService,
    name: &str,
) -> Result<(), ReconcileError>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::ClusterResourceScope>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug,
{
    let api: Api<K> = Api::all(reconciler.client.clone());
    delete_via(reconciler, owner, &api, name).await
}

async fn delete_via<K>(
    reconciler: &Reconciler,
    owner: &LLMInferenceService,
    api: &Api<K>,
    name: &str,
) -> Result<(), ReconcileError>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!(child.kind = %K::kind(&()), child.name = %name, "deleted child resource");
            reconciler
                .record_event(
                    owner,
                    "Deleted",
                    &format!("Deleted {} {}", K::kind(&()), name),
                )
                .await;
            Ok(())
        }
        Err(err) if is_not_found(&err) => Ok(()),
        Err(err) if is_kind_unregistered(&err) => {
            debug!(
                child.kind = %K::kind(&()),
                "kind not registered in this cluster, nothing to delete"
            );
            Ok(())
        }
        Err(err) => {
            warn!(child.kind = %K::kind(&()), child.name = %name, error = %err, "delete failed");
            Err(err.into())
        }
    }
}
