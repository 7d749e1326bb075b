//! Model artifact initializer injection
//!
//! Prepackaged servers read model files from [`DEFAULT_MODEL_LOCAL_MOUNT_PATH`].
//! An initializer wires whatever is needed to populate that path before the
//! serving container starts. The compiler only depends on the
//! [`ModelInitializer`] trait; [`StorageInitializer`] is the default, which
//! adds a downloading init container and a shared emptyDir volume.

#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::workload::{
    Container, ContainerExt, Deployment, DeploymentExt, EmptyDirVolumeSource, EnvFromSource,
    PodSpecExt, SecretEnvSource, Volume, VolumeMount,
};
use crate::{Error, Result, DEFAULT_MODEL_LOCAL_MOUNT_PATH};

/// Default storage initializer image
pub const DEFAULT_STORAGE_INITIALIZER_IMAGE: &str = "gcr.io/kfserving/storage-initializer:0.2.0";

/// Identity the initializer uses to reach the artifact store
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdentityRefs {
    /// Service account for the pod
    pub service_account_name: Option<String>,
    /// Secret whose keys become env vars of the init container
    pub env_secret_ref_name: Option<String>,
}

/// Wires model artifact download into a Deployment
///
/// Implementations must be idempotent: injecting twice with the same arguments
/// leaves the Deployment as it was after the first call.
#[cfg_attr(test, automock)]
pub trait ModelInitializer: Send + Sync {
    /// Make `model_uri` available at the model mount path of `container`
    ///
    /// An empty `model_uri` means there is nothing to download.
    fn inject(
        &self,
        deployment: &mut Deployment,
        container: &str,
        model_uri: &str,
        identity: &IdentityRefs,
    ) -> Result<()>;
}

/// Initializer that downloads artifacts with an init container
#[derive(Clone, Debug)]
pub struct StorageInitializer {
    image: String,
}

impl StorageInitializer {
    /// Create an initializer using the given image
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }

    /// Init container image
    pub fn image(&self) -> &str {
        &self.image
    }
}

impl Default for StorageInitializer {
    fn default() -> Self {
        Self::new(DEFAULT_STORAGE_INITIALIZER_IMAGE)
    }
}

impl ModelInitializer for StorageInitializer {
    fn inject(
        &self,
        deployment: &mut Deployment,
        container: &str,
        model_uri: &str,
        identity: &IdentityRefs,
    ) -> Result<()> {
        if model_uri.is_empty() {
            return Ok(());
        }

        let volume_name = format!("{}-provision-location", container);
        let init_name = format!("{}-model-initializer", container);
        let deployment_name = deployment.name().to_string();
        let pod = deployment.pod_spec_mut();

        let target = pod.container_mut(container).ok_or_else(|| {
            Error::initializer(
                container,
                format!("container not found in deployment {}", deployment_name),
            )
        })?;
        if !target.has_volume_mount(&volume_name) {
            target
                .volume_mounts
                .get_or_insert_with(Vec::new)
                .push(VolumeMount {
                    name: volume_name.clone(),
                    mount_path: DEFAULT_MODEL_LOCAL_MOUNT_PATH.to_string(),
                    read_only: Some(true),
                    ..Default::default()
                });
        }

        if !pod.has_volume(&volume_name) {
            pod.volumes.get_or_insert_with(Vec::new).push(Volume {
                name: volume_name.clone(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            });
        }

        if !pod.has_init_container(&init_name) {
            debug!(deployment = %deployment_name, container, "adding model initializer");
            let mut init = Container::named(&init_name);
            init.image = Some(self.image.clone());
            init.args = Some(vec![
                model_uri.to_string(),
                DEFAULT_MODEL_LOCAL_MOUNT_PATH.to_string(),
            ]);
            init.volume_mounts = Some(vec![VolumeMount {
                name: volume_name,
                mount_path: DEFAULT_MODEL_LOCAL_MOUNT_PATH.to_string(),
                ..Default::default()
            }]);
            if let Some(secret) = &identity.env_secret_ref_name {
                init.env_from = Some(vec![EnvFromSource {
                    secret_ref: Some(SecretEnvSource {
                        name: secret.clone().into(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]);
            }
            pod.init_containers.get_or_insert_with(Vec::new).push(init);
        }

        if pod.service_account_name.is_none() {
            pod.service_account_name = identity.service_account_name.clone();
        }

        Ok(())
    }
}
