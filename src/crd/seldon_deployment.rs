//! SeldonDeployment Custom Resource Definition
//!
//! A SeldonDeployment holds one or more predictors. Each predictor is an
//! inference graph plus the hand-authored pod specs ("component specs") that
//! provide containers for user-authored units.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::PredictiveUnit;
use crate::workload::{ObjectMeta, PodSpec, PodSpecExt};

/// Longest name Kubernetes accepts for a label value or DNS-1123 label
pub const MAX_NAME_LENGTH: usize = 63;

/// Specification for a SeldonDeployment
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "machinelearning.seldon.io",
    version = "v1alpha2",
    kind = "SeldonDeployment",
    plural = "seldondeployments",
    shortname = "sdep",
    namespaced,
    status = "SeldonDeploymentStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SeldonDeploymentSpec {
    /// Deployment name, used as the prefix of every generated resource
    #[serde(default)]
    pub name: String,

    /// Predictors, in declaration order
    pub predictors: Vec<PredictorSpec>,

    /// Annotations copied onto generated Deployments
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// One inference pipeline of a SeldonDeployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictorSpec {
    /// Predictor name, unique within the SeldonDeployment
    pub name: String,

    /// Root of the inference graph
    pub graph: PredictiveUnit,

    /// Hand-authored pod specs providing containers for graph units
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub component_specs: Vec<SeldonPodSpec>,

    /// Replicas of every Deployment generated for this predictor
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Labels added to generated Deployments
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations added to generated Deployments
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

fn default_replicas() -> i32 {
    1
}

impl PredictorSpec {
    /// Component spec that holds a container named after the unit
    ///
    /// Units without one share the predictor's default Deployment.
    pub fn pod_spec_for_unit(&self, unit_name: &str) -> Option<&SeldonPodSpec> {
        self.component_specs
            .iter()
            .find(|ps| ps.spec.container(unit_name).is_some())
    }

    /// Returns true if any component spec holds a container with this name
    pub fn has_container(&self, name: &str) -> bool {
        self.pod_spec_for_unit(name).is_some()
    }
}

/// A hand-authored pod spec with optional metadata
///
/// Both halves are the upstream Kubernetes types, so every field a user
/// writes survives into the synthesized Deployment.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeldonPodSpec {
    /// `name` overrides the generated Deployment name; labels and annotations
    /// are copied onto the pod template
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Pod spec
    pub spec: PodSpec,
}

/// Status of a SeldonDeployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeldonDeploymentStatus {
    /// Overall state (Creating, Available, Failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Human-readable description of the state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// =============================================================================
// Naming
// =============================================================================

impl SeldonDeployment {
    /// Namespace generated resources are placed in
    pub fn namespace_or_default(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// Id shared by every resource generated for this SeldonDeployment
    pub fn seldon_id(&self) -> String {
        let object_name = self.metadata.name.as_deref().unwrap_or_default();
        format!("{}-{}", self.spec.name, object_name)
    }

    /// Name of the Deployment that hosts units grouped under `pod_spec`
    ///
    /// A named pod spec wins. Otherwise the name is built from `spec.name`,
    /// the predictor name and every container of the pod spec, so units with
    /// no pod spec share one Deployment per predictor.
    pub fn deployment_name(
        &self,
        predictor: &PredictorSpec,
        pod_spec: Option<&SeldonPodSpec>,
    ) -> String {
        if let Some(name) = pod_spec
            .and_then(|ps| ps.metadata.name.as_deref())
            .filter(|n| !n.is_empty())
        {
            return name.to_string();
        }

        let mut name = format!("{}-{}", self.spec.name, predictor.name);
        if let Some(ps) = pod_spec {
            for c in &ps.spec.containers {
                name.push('-');
                name.push_str(&c.name);
            }
        }
        kubernetes_name(name)
    }

    /// Name of the Service exposing `container_name` of `predictor`
    pub fn container_service_name(&self, predictor: &PredictorSpec, container_name: &str) -> String {
        kubernetes_name(format!(
            "{}-{}-{}",
            self.spec.name, predictor.name, container_name
        ))
    }
}

/// Return `name` unchanged if it fits a DNS-1123 label, else a stable hash of it
pub fn kubernetes_name(name: String) -> String {
    if name.len() <= MAX_NAME_LENGTH {
        name
    } else {
        format!("seldon-{}", deterministic_hash(&name))
    }
}

/// 16-char hex digest of the input (truncated SHA-256)
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest::{digest, SHA256};
    use std::fmt::Write;

    let hash = digest(&SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            let _ = write!(s, "{:02x}", b);
            s
        })
}
