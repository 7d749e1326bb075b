//! inference-graph - lowers SeldonDeployment inference graphs into Kubernetes workloads
//!
//! A SeldonDeployment describes one or more predictors, each a tree of
//! predictive units (models, routers, combiners, transformers). This crate
//! turns that tree into the Deployments and Services that run it, and checks
//! at admission time that a submitted graph is consistent enough to be lowered.
//!
//! # Architecture
//!
//! - Admission: the webhook decodes the SeldonDeployment and runs
//!   [`crd::SeldonDeploymentSpec::validate`], rejecting early.
//! - Reconcile: the caller seeds a [`workload::Components`] accumulator from
//!   live cluster state and hands it to [`compiler::GraphCompiler`], which
//!   returns the desired Deployments and Services. Feeding that output back in
//!   as the seed yields the same output.
//!
//! # Modules
//!
//! - [`crd`] - SeldonDeployment CRD, predictive unit graph types, validation
//! - [`workload`] - Kubernetes workload vocabulary and the synthesis accumulator
//! - [`compiler`] - Graph synthesizer and prepackaged-server wiring
//! - [`initializer`] - Model artifact initializer injection
//! - [`webhook`] - Validating admission webhook
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod compiler;
pub mod crd;
pub mod error;
pub mod initializer;
pub mod webhook;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Fixed Conventions
// =============================================================================
// These values are shared with the inference runtime images and must match
// them exactly.

/// Name of the routing (engine) container injected next to the graph
pub const ENGINE_CONTAINER_NAME: &str = "seldon-container-engine";

/// Name of the TensorFlow Serving sidecar container
///
/// The runtime images address the sidecar by this exact name.
pub const TFSERVING_CONTAINER_NAME: &str = "tfserving";

/// Containers that belong to the serving infrastructure rather than the graph.
///
/// These never get a Service of their own.
pub const INFRASTRUCTURE_CONTAINERS: [&str; 2] = [ENGINE_CONTAINER_NAME, TFSERVING_CONTAINER_NAME];

/// Local path the artifact initializer downloads model files into
pub const DEFAULT_MODEL_LOCAL_MOUNT_PATH: &str = "/mnt/models";

/// Environment variable carrying a unit's encoded parameters
pub const PU_PARAMETER_ENVVAR: &str = "PREDICTIVE_UNIT_PARAMETERS";

/// Environment variable carrying the port a unit listens on
pub const PU_SERVICE_PORT_ENVVAR: &str = "PREDICTIVE_UNIT_SERVICE_PORT";

/// Environment variable carrying the unit's name
pub const PU_ID_ENVVAR: &str = "PREDICTIVE_UNIT_ID";

/// First port handed to a predictive unit whose endpoint does not name one
pub const DEFAULT_UNIT_PORT: i32 = 9000;

/// Returns true if `name` is one of the reserved infrastructure containers
pub fn is_infrastructure_container(name: &str) -> bool {
    INFRASTRUCTURE_CONTAINERS.contains(&name)
}
