//! Custom Resource Definitions for inference graphs
//!
//! This module contains the SeldonDeployment CRD, the predictive unit graph
//! it carries, and the admission-time consistency checks over that graph.

mod seldon_deployment;
mod types;
mod validation;

pub use seldon_deployment::{
    deterministic_hash, kubernetes_name, PredictorSpec, SeldonDeployment, SeldonDeploymentSpec,
    SeldonDeploymentStatus, SeldonPodSpec, MAX_NAME_LENGTH,
};
pub use types::{
    Endpoint, EndpointType, Parameter, ParameterType, PredictiveUnit,
    PredictiveUnitImplementation, PredictiveUnitMethod, PredictiveUnitType,
};
