//! Graph Compiler for SeldonDeployments
//!
//! This module lowers a predictor's inference graph into the Deployments and
//! Services that run it.
//!
//! # Architecture
//!
//! The GraphCompiler walks the graph pre-order and, for each unit:
//! 1. Names the Deployment the unit belongs to (see
//!    [`SeldonDeployment::deployment_name`])
//! 2. Finds that Deployment in the accumulator or starts a new one from the
//!    unit's component spec
//! 3. Wires prepackaged server containers ([`prepackaged`])
//! 4. For a new Deployment, exposes every graph container ([`exposure`]) and
//!    registers the Deployment if it holds a real workload
//!
//! # Usage
//!
//! ```text
//! let initializer = StorageInitializer::default();
//! let compiler = GraphCompiler::new(&initializer);
//! let output = compiler.compile(&sdep, &sdep.spec.predictors[0], &live)?;
//! // output.predictor, output.components
//! ```
//!
//! Compilation is build-then-commit: the caller's seed is cloned, and on error
//! the partial candidate is dropped.

pub mod defaults;
pub mod exposure;
pub mod parameters;
pub mod prepackaged;

use tracing::{debug, info};

use std::collections::BTreeMap;

use crate::crd::{PredictiveUnit, PredictorSpec, SeldonDeployment, SeldonPodSpec};
use crate::initializer::ModelInitializer;
use crate::workload::{
    deployment, non_empty, object_meta, Components, Deployment, DeploymentExt, ServiceExt,
    APP_LABEL, SELDON_DEPLOYMENT_ID_LABEL,
};
use crate::{is_infrastructure_container, Result};

pub use prepackaged::Mutation;

/// Output of compiling one predictor
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledPredictor {
    /// Predictor with server units defaulted (role MODEL, endpoint REST)
    pub predictor: PredictorSpec,
    /// Seed plus everything synthesized for this predictor
    pub components: Components,
}

/// Output of compiling every predictor of a SeldonDeployment
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledDeployment {
    /// Predictors in declaration order, defaulted as in [`CompiledPredictor`]
    pub predictors: Vec<PredictorSpec>,
    /// Seed plus everything synthesized for all predictors
    pub components: Components,
}

/// Compiles predictor graphs into Deployments and Services
pub struct GraphCompiler<'a> {
    initializer: &'a dyn ModelInitializer,
}

/// What stays fixed while walking one predictor
struct WalkContext<'a> {
    sdep: &'a SeldonDeployment,
    predictor: &'a PredictorSpec,
    seldon_id: String,
}

impl<'a> GraphCompiler<'a> {
    /// Create a compiler that wires model downloads with `initializer`
    pub fn new(initializer: &'a dyn ModelInitializer) -> Self {
        Self { initializer }
    }

    /// Compile one predictor against the `existing` Deployments and Services
    ///
    /// `existing` is not modified. Feeding the returned components back in as
    /// `existing` produces the same components again.
    pub fn compile(
        &self,
        sdep: &SeldonDeployment,
        predictor: &PredictorSpec,
        existing: &Components,
    ) -> Result<CompiledPredictor> {
        let ctx = WalkContext {
            sdep,
            predictor,
            seldon_id: sdep.seldon_id(),
        };
        let mut components = existing.clone();
        let mut graph = predictor.graph.clone();

        self.compile_unit(&ctx, &mut graph, &mut components)?;

        info!(
            seldon_id = %ctx.seldon_id,
            predictor = %predictor.name,
            deployments = components.deployments.len(),
            services = components.services.len(),
            "compiled predictor"
        );

        let mut predictor = predictor.clone();
        predictor.graph = graph;
        Ok(CompiledPredictor {
            predictor,
            components,
        })
    }

    /// Compile every predictor, threading the accumulator through them in order
    pub fn compile_all(
        &self,
        sdep: &SeldonDeployment,
        existing: &Components,
    ) -> Result<CompiledDeployment> {
        let mut components = existing.clone();
        let mut predictors = Vec::with_capacity(sdep.spec.predictors.len());

        for predictor in &sdep.spec.predictors {
            let compiled = self.compile(sdep, predictor, &components)?;
            predictors.push(compiled.predictor);
            components = compiled.components;
        }

        Ok(CompiledDeployment {
            predictors,
            components,
        })
    }

    fn compile_unit(
        &self,
        ctx: &WalkContext<'_>,
        unit: &mut PredictiveUnit,
        components: &mut Components,
    ) -> Result<()> {
        let pod_spec = ctx.predictor.pod_spec_for_unit(&unit.name);
        let name = ctx.sdep.deployment_name(ctx.predictor, pod_spec);

        match components.find_deployment(&name) {
            Some(idx) => {
                let mutation =
                    prepackaged::apply(unit, &mut components.deployments[idx], self.initializer)?;
                debug!(unit = %unit.name, deployment = %name, ?mutation, "reused deployment");
            }
            None => {
                let mut deployment = new_deployment(ctx, &name, pod_spec);
                let mutation = prepackaged::apply(unit, &mut deployment, self.initializer)?;
                debug!(unit = %unit.name, deployment = %name, ?mutation, "created deployment");
                self.register(ctx, deployment, components);
            }
        }

        for child in &mut unit.children {
            self.compile_unit(ctx, child, components)?;
        }
        Ok(())
    }

    /// Expose a newly built Deployment's containers and add it to the accumulator
    fn register(
        &self,
        ctx: &WalkContext<'_>,
        mut deployment: Deployment,
        components: &mut Components,
    ) {
        let exposed: Vec<String> = deployment
            .containers()
            .iter()
            .map(|c| c.name.clone())
            .filter(|n| !n.is_empty() && !is_infrastructure_container(n))
            .collect();

        for container in &exposed {
            let service =
                exposure::expose_container(ctx.sdep, ctx.predictor, &mut deployment, container);
            if components.service(service.name()).is_none() {
                components.services.push(service);
            }
        }

        match deployment.containers().first() {
            Some(first) if !first.name.is_empty() => {
                components.deployments.push(deployment);
            }
            _ => debug!(deployment = %deployment.name(), "dropping deployment without workload"),
        }
    }
}

/// Start a Deployment from the unit's component spec, or empty if it has none
fn new_deployment(
    ctx: &WalkContext<'_>,
    name: &str,
    pod_spec: Option<&SeldonPodSpec>,
) -> Deployment {
    let predictor = ctx.predictor;
    let selector = BTreeMap::from([
        (SELDON_DEPLOYMENT_ID_LABEL.to_string(), ctx.seldon_id.clone()),
        (APP_LABEL.to_string(), name.to_string()),
    ]);

    let mut labels = selector.clone();
    for (k, v) in &predictor.labels {
        labels.entry(k.clone()).or_insert_with(|| v.clone());
    }
    let mut annotations = BTreeMap::new();
    for (k, v) in predictor.annotations.iter().chain(&ctx.sdep.spec.annotations) {
        annotations.entry(k.clone()).or_insert_with(|| v.clone());
    }

    let mut metadata = object_meta(name, ctx.sdep.namespace_or_default());
    metadata.labels = Some(labels);
    metadata.annotations = non_empty(annotations);

    let mut deployment = deployment(metadata, selector);
    let Some(spec) = deployment.spec.as_mut() else {
        return deployment;
    };
    spec.replicas = Some(predictor.replicas);

    if let Some(ps) = pod_spec {
        let template = &mut spec.template;
        template.spec = Some(ps.spec.clone());
        let template_meta = template.metadata.get_or_insert_with(Default::default);
        let pod_labels = template_meta.labels.get_or_insert_with(BTreeMap::new);
        for (k, v) in ps.metadata.labels.iter().flatten() {
            pod_labels.entry(k.clone()).or_insert_with(|| v.clone());
        }
        template_meta.annotations = ps.metadata.annotations.clone();
    }
    deployment
}

// =============================================================================
// Tests
// =============================================================================
