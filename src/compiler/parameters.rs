//! Parameter codec
//!
//! A unit's parameters reach its container as a JSON array in the
//! `PREDICTIVE_UNIT_PARAMETERS` env var. The variable is written once; an
//! existing value, user-set or synthesized, is never replaced.
//!
//! Values are carried as the strings they were written as. The inference
//! runtime coerces them to their declared type, so no spelling is rejected
//! here.

use tracing::debug;

use crate::crd::Parameter;
use crate::workload::{Container, ContainerExt};
use crate::{Result, PU_PARAMETER_ENVVAR};

/// Encode parameters in the order given
pub fn encode_parameters<'a>(params: impl IntoIterator<Item = &'a Parameter>) -> Result<String> {
    let params: Vec<&Parameter> = params.into_iter().collect();
    Ok(serde_json::to_string(&params)?)
}

/// Decode an encoded parameter list
pub fn decode_parameters(encoded: &str) -> Result<Vec<Parameter>> {
    Ok(serde_json::from_str(encoded)?)
}

/// Write the unit's parameters plus `extra` into the container env
///
/// Returns true if the variable was written.
pub fn set_parameters_env(
    container: &mut Container,
    params: &[Parameter],
    extra: &[Parameter],
) -> Result<bool> {
    if container.has_env(PU_PARAMETER_ENVVAR) {
        debug!(container = %container.name, "parameters env already set");
        return Ok(false);
    }
    let encoded = encode_parameters(params.iter().chain(extra))?;
    Ok(container.set_env_if_absent(PU_PARAMETER_ENVVAR, encoded))
}

/// Parameters currently encoded on the container, empty if none
pub fn container_parameters(container: &Container) -> Result<Vec<Parameter>> {
    match container.env_value(PU_PARAMETER_ENVVAR) {
        Some(v) => decode_parameters(v),
        None => Ok(Vec::new()),
    }
}
