//! # Model artifact attachment
//!
//! Translates `model.uri` schemes into pod-spec mutations: volumes, init
//! containers, a modelcar sidecar for OCI artifacts, and the positional
//! model-path argument on the container named `main`.

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec,
    ResourceRequirements, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use url::Url;

use crate::crd::ModelSpec;

/// Where the model artifact is mounted inside workload containers.
pub const MODEL_MOUNT_PATH: &str = "/mnt/models";

/// The model-server container every workload pod is expected to carry.
pub const MAIN_CONTAINER_NAME: &str = "main";

const PVC_VOLUME: &str = "model";
const OCI_VOLUME: &str = "model-storage";
const CACHE_VOLUME: &str = "model-cache";

/// Mutate `pod` so the model artifact described by `model` is available at
/// [`MODEL_MOUNT_PATH`] in the `main` container. Unrecognized schemes leave
/// the pod spec intact and only append the model *name* as a positional
/// argument for backward compatibility.
pub fn attach_model_artifacts(pod: &mut PodSpec, model: &ModelSpec, storage_initializer_image: &str) {
    match model.uri.split_once("://").map(|(scheme, _)| scheme) {
        Some("pvc") => attach_pvc(pod, &model.uri),
        Some("oci") => attach_oci(pod, &model.uri),
        Some("hf" | "s3" | "gs" | "http" | "https") => {
            attach_storage_initializer(pod, &model.uri, storage_initializer_image);
        }
        _ => {
            if let Some(name) = model.name.as_deref() {
                append_main_arg(pod, name);
            }
        }
    }
}

/// `pvc://<claim>/<subpath>`: mount the claim read-only at the fixed model
/// path.
fn attach_pvc(pod: &mut PodSpec, uri: &str) {
    let Ok(parsed) = Url::parse(uri) else { return };
    let Some(claim) = parsed.host_str().map(str::to_string) else {
        return;
    };
    let sub_path = parsed.path().trim_start_matches('/').to_string();
    pod.volumes.get_or_insert_default().push(Volume {
        name: PVC_VOLUME.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim,
            read_only: Some(true),
        }),
        ..Default::default()
    });
    if let Some(main) = main_container(pod) {
        main.volume_mounts.get_or_insert_default().push(VolumeMount {
            name: PVC_VOLUME.to_string(),
            mount_path: MODEL_MOUNT_PATH.to_string(),
            read_only: Some(true),
            sub_path: (!sub_path.is_empty()).then_some(sub_path),
            ..Default::default()
        });
    }
    append_main_arg(pod, MODEL_MOUNT_PATH);
}

/// `oci://<image>`: a prefetch init container warms the image, a modelcar
/// sidecar keeps the artifact readable through a shared process namespace,
/// and the main container consumes it read-only with async init.
fn attach_oci(pod: &mut PodSpec, uri: &str) {
    let image = uri.trim_start_matches("oci://").to_string();
    pod.share_process_namespace = Some(true);
    pod.volumes.get_or_insert_default().push(Volume {
        name: OCI_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    });
    pod.init_containers.get_or_insert_default().push(Container {
        name: "oci-model-prefetch".to_string(),
        image: Some(image.clone()),
        command: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cp -r /models/. {MODEL_MOUNT_PATH}/ 2>/dev/null || true"),
        ]),
        resources: Some(modelcar_resources()),
        volume_mounts: Some(vec![VolumeMount {
            name: OCI_VOLUME.to_string(),
            mount_path: MODEL_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    pod.containers.push(Container {
        name: "modelcar".to_string(),
        image: Some(image),
        command: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            "sleep infinity".to_string(),
        ]),
        resources: Some(modelcar_resources()),
        volume_mounts: Some(vec![VolumeMount {
            name: OCI_VOLUME.to_string(),
            mount_path: MODEL_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    if let Some(main) = main_container(pod) {
        main.volume_mounts.get_or_insert_default().push(VolumeMount {
            name: OCI_VOLUME.to_string(),
            mount_path: MODEL_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
        main.env.get_or_insert_default().push(EnvVar {
            name: "MODEL_INIT_MODE".to_string(),
            value: Some("async".to_string()),
            ..Default::default()
        });
    }
    append_main_arg(pod, MODEL_MOUNT_PATH);
}

/// Download schemes (`hf://`, `s3://`, `gs://`, `http(s)://`): a
/// storage-initializer init container downloads into an emptyDir shared with
/// the main container.
fn attach_storage_initializer(pod: &mut PodSpec, uri: &str, image: &str) {
    pod.volumes.get_or_insert_default().push(Volume {
        name: CACHE_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    });
    pod.init_containers.get_or_insert_default().push(Container {
        name: "storage-initializer".to_string(),
        image: Some(image.to_string()),
        args: Some(vec![uri.to_string(), MODEL_MOUNT_PATH.to_string()]),
        volume_mounts: Some(vec![VolumeMount {
            name: CACHE_VOLUME.to_string(),
            mount_path: MODEL_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    if let Some(main) = main_container(pod) {
        main.volume_mounts.get_or_insert_default().push(VolumeMount {
            name: CACHE_VOLUME.to_string(),
            mount_path: MODEL_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }
    append_main_arg(pod, MODEL_MOUNT_PATH);
}

fn modelcar_resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(
            [
                ("cpu".to_string(), Quantity("100m".to_string())),
                ("memory".to_string(), Quantity("100Mi".to_string())),
            ]
            .into(),
        ),
        limits: Some(
            [
                ("cpu".to_string(), Quantity("1".to_string())),
                ("memory".to_string(), Quantity("1Gi".to_string())),
            ]
            .into(),
        ),
        ..Default::default()
    }
}

fn main_container(pod: &mut PodSpec) -> Option<&mut Container> {
    pod.containers
        .iter_mut()
        .find(|c| c.name == MAIN_CONTAINER_NAME)
}

fn append_main_arg(pod: &mut PodSpec, arg: &str) {
    if let Some(main) = main_container(pod) {
        main.args.get_or_insert_default().push(arg.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_with_main() -> PodSpec {
        PodSpec {
            containers: vec![Container {
                name: "main".to_string(),
                image: Some("vllm/vllm-openai:latest".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn model(uri: &str) -> ModelSpec {
        ModelSpec {
            uri: uri.to_string(),
            name: Some("opt-125m".to_string()),
            criticality: None,
        }
    }

    #[test]
    fn pvc_uri_mounts_claim_read_only_with_subpath() {
        let mut pod = pod_with_main();
        attach_model_artifacts(&mut pod, &model("pvc://facebook-models/opt-125m"), "init:img");

        let volume = &pod.volumes.as_deref().unwrap()[0];
        let pvc = volume.persistent_volume_claim.as_ref().unwrap();
        assert_eq!(pvc.claim_name, "facebook-models");
        assert_eq!(pvc.read_only, Some(true));

        let main = &pod.containers[0];
        let mount = &main.volume_mounts.as_deref().unwrap()[0];
        assert_eq!(mount.mount_path, MODEL_MOUNT_PATH);
        assert_eq!(mount.read_only, Some(true));
        assert_eq!(mount.sub_path.as_deref(), Some("opt-125m"));
        assert_eq!(main.args.as_deref().unwrap(), [MODEL_MOUNT_PATH]);
    }

    #[test]
    fn oci_uri_adds_modelcar_sidecar_and_async_init() {
        let mut pod = pod_with_main();
        attach_model_artifacts(&mut pod, &model("oci://registry.io/user/repo:tag"), "init:img");

        assert_eq!(pod.share_process_namespace, Some(true));
        let init = &pod.init_containers.as_deref().unwrap()[0];
        assert_eq!(init.name, "oci-model-prefetch");
        let resources = init.resources.as_ref().unwrap();
        assert!(resources.limits.as_ref().unwrap().contains_key("cpu"));
        assert!(resources.limits.as_ref().unwrap().contains_key("memory"));

        let modelcar = pod.containers.iter().find(|c| c.name == "modelcar").unwrap();
        assert_eq!(modelcar.image.as_deref(), Some("registry.io/user/repo:tag"));
        let modelcar_mount = &modelcar.volume_mounts.as_deref().unwrap()[0];
        assert_ne!(modelcar_mount.read_only, Some(true));

        let main = pod.containers.iter().find(|c| c.name == "main").unwrap();
        let mount = &main.volume_mounts.as_deref().unwrap()[0];
        assert_eq!(mount.read_only, Some(true));
        let env = main.env.as_deref().unwrap();
        assert!(env
            .iter()
            .any(|e| e.name == "MODEL_INIT_MODE" && e.value.as_deref() == Some("async")));
    }

    #[test]
    fn download_schemes_inject_storage_initializer() {
        for uri in ["hf://facebook/opt-125m", "s3://bucket/key", "gs://b/k", "https://host/m"] {
            let mut pod = pod_with_main();
            attach_model_artifacts(&mut pod, &model(uri), "kserve/storage-initializer:latest");
            let init = &pod.init_containers.as_deref().unwrap()[0];
            assert_eq!(init.name, "storage-initializer");
            assert_eq!(
                init.args.as_deref().unwrap(),
                [uri, MODEL_MOUNT_PATH],
                "{uri}"
            );
            let main = &pod.containers[0];
            assert_eq!(main.args.as_deref().unwrap(), [MODEL_MOUNT_PATH]);
        }
    }

    #[test]
    fn unrecognized_scheme_appends_model_name_only() {
        let mut pod = pod_with_main();
        attach_model_artifacts(&mut pod, &model("weird://thing"), "init:img");
        assert!(pod.volumes.is_none());
        assert!(pod.init_containers.is_none());
        assert_eq!(pod.containers[0].args.as_deref().unwrap(), ["opt-125m"]);
    }
}
