//! Workload types for synthesized inference graphs
//!
//! The graph compiler reads and writes the upstream Kubernetes types from
//! `k8s-openapi`, so user component specs pass through with every field they
//! were written with. This module adds:
//! - name-keyed lookups on pod specs, containers and Deployments
//! - [`Components`], the accumulator one synthesis pass builds
//!
//! For synthesis itself, use [`crate::compiler::GraphCompiler`].

use std::collections::BTreeMap;

pub use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
pub use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvFromSource, EnvVar, PodSpec,
    PodTemplateSpec, SecretEnvSource, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
pub use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Label carrying the Seldon id on every synthesized resource
pub const SELDON_DEPLOYMENT_ID_LABEL: &str = "seldon-deployment-id";

/// Label naming the Service that exposes a container
pub const SELDON_APP_SVC_LABEL: &str = "seldon-app-svc";

/// Label carrying the owning Deployment name on pod templates
pub const APP_LABEL: &str = "app";

/// Metadata with a name and namespace set
pub fn object_meta(name: impl Into<String>, namespace: impl Into<String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(namespace.into()),
        ..Default::default()
    }
}

/// Deployment with one replica, the given selector and an empty pod template
///
/// The selector labels are also set on the pod template.
pub fn deployment(metadata: ObjectMeta, selector: BTreeMap<String, String>) -> Deployment {
    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(PodSpec::default()),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Empty maps are left unset so they are not serialized
pub(crate) fn non_empty(map: BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    Some(map).filter(|m| !m.is_empty())
}

// =============================================================================
// Container
// =============================================================================

/// Name-keyed access to a container's env, ports and mounts
pub trait ContainerExt {
    /// Create a container with only a name set
    fn named(name: impl Into<String>) -> Self;

    /// Returns true if an env var with this name is present
    fn has_env(&self, name: &str) -> bool;

    /// Literal value of the first env var with this name
    ///
    /// `None` for variables sourced through `valueFrom`.
    fn env_value(&self, name: &str) -> Option<&str>;

    /// Append an env var unless one with the same name exists
    ///
    /// Returns true if the variable was added.
    fn set_env_if_absent(&mut self, name: &str, value: impl Into<String>) -> bool;

    /// Declared ports, empty if none
    fn container_ports(&self) -> &[ContainerPort];

    /// Returns true if a volume mount with this name exists
    fn has_volume_mount(&self, name: &str) -> bool;
}

impl ContainerExt for Container {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn has_env(&self, name: &str) -> bool {
        self.env.iter().flatten().any(|e| e.name == name)
    }

    fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .flatten()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    fn set_env_if_absent(&mut self, name: &str, value: impl Into<String>) -> bool {
        if self.has_env(name) {
            return false;
        }
        self.env.get_or_insert_with(Vec::new).push(EnvVar {
            name: name.to_string(),
            value: Some(value.into()),
            ..Default::default()
        });
        true
    }

    fn container_ports(&self) -> &[ContainerPort] {
        self.ports.as_deref().unwrap_or_default()
    }

    fn has_volume_mount(&self, name: &str) -> bool {
        self.volume_mounts.iter().flatten().any(|m| m.name == name)
    }
}

/// TCP container port with an optional name
pub fn tcp_port(port: i32, name: Option<&str>) -> ContainerPort {
    ContainerPort {
        name: name.map(str::to_string),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

// =============================================================================
// Pod Spec
// =============================================================================

/// Name-keyed access to a pod spec's containers and volumes
pub trait PodSpecExt {
    /// Find a container by name
    fn container(&self, name: &str) -> Option<&Container>;

    /// Find a container by name, mutably
    fn container_mut(&mut self, name: &str) -> Option<&mut Container>;

    /// Returns true if a volume with this name exists
    fn has_volume(&self, name: &str) -> bool;

    /// Returns true if an init container with this name exists
    fn has_init_container(&self, name: &str) -> bool;
}

impl PodSpecExt for PodSpec {
    fn container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }

    fn container_mut(&mut self, name: &str) -> Option<&mut Container> {
        self.containers.iter_mut().find(|c| c.name == name)
    }

    fn has_volume(&self, name: &str) -> bool {
        self.volumes.iter().flatten().any(|v| v.name == name)
    }

    fn has_init_container(&self, name: &str) -> bool {
        self.init_containers.iter().flatten().any(|c| c.name == name)
    }
}

// =============================================================================
// Deployment
// =============================================================================

/// Access to the pod template of a Deployment
pub trait DeploymentExt {
    /// Deployment name, empty if unset
    fn name(&self) -> &str;

    /// Pod spec of the template
    fn pod_spec(&self) -> Option<&PodSpec>;

    /// Mutable pod spec of the template, created if missing
    fn pod_spec_mut(&mut self) -> &mut PodSpec;

    /// Labels of the pod template
    fn pod_labels(&self) -> Option<&BTreeMap<String, String>>;

    /// Mutable labels of the pod template, created if missing
    fn pod_labels_mut(&mut self) -> &mut BTreeMap<String, String>;

    /// Containers of the pod template, in order
    fn containers(&self) -> &[Container];

    /// Find a container of the pod template by name
    fn container(&self, name: &str) -> Option<&Container>;

    /// Find a container of the pod template by name, mutably
    fn container_mut(&mut self, name: &str) -> Option<&mut Container>;
}

impl DeploymentExt for Deployment {
    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }

    fn pod_spec_mut(&mut self) -> &mut PodSpec {
        self.spec
            .get_or_insert_with(Default::default)
            .template
            .spec
            .get_or_insert_with(Default::default)
    }

    fn pod_labels(&self) -> Option<&BTreeMap<String, String>> {
        self.spec
            .as_ref()
            .and_then(|s| s.template.metadata.as_ref())
            .and_then(|m| m.labels.as_ref())
    }

    fn pod_labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.spec
            .get_or_insert_with(Default::default)
            .template
            .metadata
            .get_or_insert_with(Default::default)
            .labels
            .get_or_insert_with(BTreeMap::new)
    }

    fn containers(&self) -> &[Container] {
        self.pod_spec()
            .map(|p| p.containers.as_slice())
            .unwrap_or_default()
    }

    fn container(&self, name: &str) -> Option<&Container> {
        self.pod_spec().and_then(|p| p.container(name))
    }

    fn container_mut(&mut self, name: &str) -> Option<&mut Container> {
        self.spec
            .as_mut()
            .and_then(|s| s.template.spec.as_mut())
            .and_then(|p| p.container_mut(name))
    }
}

// =============================================================================
// Service
// =============================================================================

/// Accessors for synthesized Services
pub trait ServiceExt {
    /// Service name, empty if unset
    fn name(&self) -> &str;

    /// First port of the Service
    fn port(&self) -> Option<&ServicePort>;
}

impl ServiceExt for Service {
    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn port(&self) -> Option<&ServicePort> {
        self.spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .and_then(|p| p.first())
    }
}

// =============================================================================
// Synthesis Accumulator
// =============================================================================

/// Deployments and Services built by one synthesis pass
///
/// Seeded by the caller with what already exists for the SeldonDeployment, so
/// units that share a Deployment name land in the same Deployment and nothing
/// is created twice.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Components {
    /// Deployments, in registration order
    pub deployments: Vec<Deployment>,
    /// Services, in creation order
    pub services: Vec<Service>,
}

impl Components {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an accumulator seeded from live state
    pub fn seeded(deployments: Vec<Deployment>, services: Vec<Service>) -> Self {
        Self {
            deployments,
            services,
        }
    }

    /// Index of the Deployment with this exact name
    pub fn find_deployment(&self, name: &str) -> Option<usize> {
        self.deployments.iter().position(|d| d.name() == name)
    }

    /// Service with this exact name
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name() == name)
    }

    /// Check if nothing has been accumulated
    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty() && self.services.is_empty()
    }

    /// Total count of accumulated resources
    pub fn resource_count(&self) -> usize {
        self.deployments.len() + self.services.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment_with(name: &str, containers: Vec<Container>) -> Deployment {
        let mut deploy = deployment(object_meta(name, "default"), BTreeMap::new());
        deploy.pod_spec_mut().containers = containers;
        deploy
    }

    // =========================================================================
    // Story: Containers Are Found By Name
    // =========================================================================

    #[test]
    fn story_container_lookup_by_name() {
        let mut deploy = deployment_with(
            "dep",
            vec![Container::named("a"), Container::named("b")],
        );

        assert!(deploy.container("b").is_some());
        assert!(deploy.container("c").is_none());

        deploy.container_mut("a").unwrap().image = Some("img:1".to_string());
        assert_eq!(deploy.containers()[0].image.as_deref(), Some("img:1"));
    }

    #[test]
    fn story_env_is_set_once() {
        let mut c = Container::named("model");
        assert!(c.set_env_if_absent("KEY", "first"));
        assert!(!c.set_env_if_absent("KEY", "second"));

        assert_eq!(c.env.as_ref().map(Vec::len), Some(1));
        assert_eq!(c.env_value("KEY"), Some("first"));
    }

    /// Story: a secret-backed variable counts as present but has no literal value
    #[test]
    fn story_value_from_env_is_present_without_value() {
        let mut c: Container = serde_json::from_value(serde_json::json!({
            "name": "model",
            "env": [{"name": "DB_PASSWORD", "valueFrom": {"secretKeyRef": {"name": "db", "key": "password"}}}]
        }))
        .unwrap();

        assert!(c.has_env("DB_PASSWORD"));
        assert_eq!(c.env_value("DB_PASSWORD"), None);
        assert!(!c.set_env_if_absent("DB_PASSWORD", "plain"));
    }

    #[test]
    fn test_empty_deployment_has_no_containers() {
        let d = Deployment::default();
        assert!(d.containers().is_empty());
        assert!(d.container("x").is_none());
        assert_eq!(d.name(), "");
    }

    // =========================================================================
    // Story: Accumulator Lookup
    // =========================================================================

    #[test]
    fn story_accumulator_finds_deployment_by_exact_name() {
        let components = Components::seeded(
            vec![
                deployment_with("dep-a", vec![]),
                deployment_with("dep-b", vec![]),
            ],
            vec![],
        );

        assert_eq!(components.find_deployment("dep-b"), Some(1));
        assert_eq!(components.find_deployment("dep"), None);
        assert_eq!(components.resource_count(), 2);
        assert!(Components::new().is_empty());
    }

    #[test]
    fn story_deployment_serializes_with_kubernetes_field_names() {
        let mut c = Container::named("model");
        c.image_pull_policy = Some("IfNotPresent".to_string());
        let deploy = deployment_with("dep", vec![c]);

        let json = serde_json::to_value(&deploy).unwrap();
        assert_eq!(json["apiVersion"], "apps/v1");
        assert_eq!(json["kind"], "Deployment");
        assert_eq!(
            json["spec"]["template"]["spec"]["containers"][0]["imagePullPolicy"],
            "IfNotPresent"
        );
        // Unset optional fields are omitted
        assert!(json["spec"]["template"]["spec"]["containers"][0]
            .get("image")
            .is_none());
    }

    #[test]
    fn story_live_deployment_parses() {
        let yaml = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: live
spec:
  selector:
    matchLabels:
      app: live
  template:
    spec:
      containers:
        - name: classifier
          image: user/classifier:2.0
          readinessProbe:
            tcpSocket:
              port: 9000
status:
  replicas: 3
"#;
        let deploy: Deployment = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(deploy.name(), "live");
        let c = deploy.container("classifier").unwrap();
        assert_eq!(c.image.as_deref(), Some("user/classifier:2.0"));
        assert!(c.readiness_probe.is_some());
    }
}
