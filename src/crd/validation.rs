//! Admission-time consistency checks for SeldonDeployments
//!
//! These run before any synthesis and never look at live cluster state. The
//! first problem found is reported; nothing is aggregated.

use std::collections::HashSet;

use super::seldon_deployment::{PredictorSpec, SeldonDeploymentSpec};
use super::types::{PredictiveUnit, PredictiveUnitType};
use crate::{Error, Result};

impl SeldonDeploymentSpec {
    /// Check predictor names and every graph, returning the first rejection
    pub fn validate(&self) -> Result<()> {
        self.check_predictor_names()?;
        for predictor in &self.predictors {
            predictor.validate()?;
        }
        Ok(())
    }

    fn check_predictor_names(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for p in &self.predictors {
            if !seen.insert(p.name.as_str()) {
                return Err(Error::validation(format!(
                    "Duplicate Predictor Name {}",
                    p.name
                )));
            }
        }
        Ok(())
    }
}

impl PredictorSpec {
    /// Validate every unit of this predictor's graph, pre-order
    pub fn validate(&self) -> Result<()> {
        self.check_unit(&self.graph)
    }

    fn check_unit(&self, unit: &PredictiveUnit) -> Result<()> {
        if unit.implementation.is_unknown() {
            if !self.has_container(&unit.name) {
                return Err(Error::validation(format!(
                    "Can't find container for Predictive Unit {}",
                    unit.name
                )));
            }
            if unit.type_ == PredictiveUnitType::UnknownType && !unit.has_methods() {
                return Err(Error::validation(format!(
                    "Predictive Unit {} has no implementation methods defined. \
                     Change to a known type or add what methods it defines",
                    unit.name
                )));
            }
        }

        for child in &unit.children {
            self.check_unit(child)?;
        }
        Ok(())
    }
}
