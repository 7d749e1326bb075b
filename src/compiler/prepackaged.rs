//! Prepackaged model server wiring
//!
//! Units with a recognised server implementation get their containers
//! manufactured here. Existing containers are reused by name and only empty
//! fields are filled, so a user's image or env always wins.

use tracing::debug;

use super::defaults::{
    apply_container_defaults, merge, ContainerField, MergePolicy, PULL_ALWAYS,
    PULL_IF_NOT_PRESENT,
};
use super::parameters::set_parameters_env;
use crate::crd::{
    Endpoint, EndpointType, Parameter, PredictiveUnit, PredictiveUnitImplementation,
    PredictiveUnitType,
};
use crate::initializer::{IdentityRefs, ModelInitializer};
use crate::workload::{tcp_port, Container, ContainerExt, Deployment, DeploymentExt};
use crate::{Result, DEFAULT_MODEL_LOCAL_MOUNT_PATH, TFSERVING_CONTAINER_NAME};

/// TensorFlow Serving image run as the sidecar
pub const TFSERVING_IMAGE: &str = "tensorflow/serving:latest";

/// Proxy image fronting TensorFlow Serving over REST
pub const TFPROXY_REST_IMAGE: &str = "seldonio/tfserving-proxy_rest:0.3";

/// Proxy image fronting TensorFlow Serving over gRPC
pub const TFPROXY_GRPC_IMAGE: &str = "seldonio/tfserving-proxy_grpc:0.3";

/// gRPC port of the TensorFlow Serving sidecar
pub const TFSERVING_GRPC_PORT: i32 = 2000;

/// REST port of the TensorFlow Serving sidecar
pub const TFSERVING_REST_PORT: i32 = 2001;

/// Parameter pointing a model server at its local artifact directory
pub const MODEL_URI_PARAMETER: &str = "model_uri";

/// Parameter pointing the REST proxy at the sidecar
pub const REST_ENDPOINT_PARAMETER: &str = "rest_endpoint";

/// Parameter pointing the gRPC proxy at the sidecar
pub const GRPC_ENDPOINT_PARAMETER: &str = "grpc_endpoint";

/// Outcome of running the prepackaged wiring for one unit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mutation {
    /// The unit's containers were created or updated
    Mutated,
    /// The unit is not a prepackaged server
    NotApplicable,
}

/// Default image for a generic model server, by implementation and protocol
pub fn model_server_image(
    implementation: PredictiveUnitImplementation,
    endpoint: EndpointType,
) -> Option<&'static str> {
    use EndpointType::*;
    use PredictiveUnitImplementation::*;

    match (implementation, endpoint) {
        (SklearnServer, Rest) => Some("seldonio/sklearnserver_rest:0.1"),
        (SklearnServer, Grpc) => Some("seldonio/sklearnserver_grpc:0.1"),
        (XgboostServer, Rest) => Some("seldonio/xgboostserver_rest:0.1"),
        (XgboostServer, Grpc) => Some("seldonio/xgboostserver_grpc:0.1"),
        _ => None,
    }
}

/// Wire the containers of a prepackaged server unit into `deployment`
pub fn apply(
    unit: &mut PredictiveUnit,
    deployment: &mut Deployment,
    initializer: &dyn ModelInitializer,
) -> Result<Mutation> {
    use PredictiveUnitImplementation::*;

    match unit.implementation {
        SklearnServer | XgboostServer => {
            mutate_model_server(unit, deployment, initializer)?;
            Ok(Mutation::Mutated)
        }
        TensorflowServer => {
            mutate_tensorflow_server(unit, deployment, initializer)?;
            Ok(Mutation::Mutated)
        }
        UnknownImplementation | SimpleModel | SimpleRouter | RandomAbTest | AverageCombiner => {
            Ok(Mutation::NotApplicable)
        }
    }
}

/// Force the server unit's role and protocol defaults
fn default_server_unit(unit: &mut PredictiveUnit) {
    unit.type_ = PredictiveUnitType::Model;
    if unit.endpoint.is_none() {
        unit.endpoint = Some(Endpoint::rest());
    }
}

fn identity_of(unit: &PredictiveUnit) -> IdentityRefs {
    IdentityRefs {
        service_account_name: unit.service_account_name.clone(),
        env_secret_ref_name: unit.env_secret_ref_name.clone(),
    }
}

/// Run `f` on the named container, appending it first if it does not exist
fn upsert_container<F>(deployment: &mut Deployment, name: &str, f: F) -> Result<()>
where
    F: FnOnce(&mut Container, bool) -> Result<()>,
{
    let containers = &mut deployment.pod_spec_mut().containers;
    match containers.iter_mut().find(|c| c.name == name) {
        Some(existing) => f(existing, false),
        None => {
            let mut created = Container::named(name);
            f(&mut created, true)?;
            containers.push(created);
            Ok(())
        }
    }
}

fn image_is_unset(container: &Container) -> bool {
    container.image.as_deref().map_or(true, str::is_empty)
}

fn mutate_model_server(
    unit: &mut PredictiveUnit,
    deployment: &mut Deployment,
    initializer: &dyn ModelInitializer,
) -> Result<()> {
    default_server_unit(unit);
    let protocol = unit.endpoint_type();

    upsert_container(deployment, &unit.name, |c, _| {
        if image_is_unset(c) {
            c.image = model_server_image(unit.implementation, protocol).map(str::to_string);
        }
        set_parameters_env(
            c,
            &unit.parameters,
            &[Parameter::string(
                MODEL_URI_PARAMETER,
                DEFAULT_MODEL_LOCAL_MOUNT_PATH,
            )],
        )?;
        apply_container_defaults(c);
        Ok(())
    })?;

    debug!(unit = %unit.name, implementation = %unit.implementation, "wired model server");
    initializer.inject(
        deployment,
        &unit.name,
        unit.model_uri.as_deref().unwrap_or_default(),
        &identity_of(unit),
    )
}

fn mutate_tensorflow_server(
    unit: &mut PredictiveUnit,
    deployment: &mut Deployment,
    initializer: &dyn ModelInitializer,
) -> Result<()> {
    default_server_unit(unit);
    let protocol = unit.endpoint_type();

    upsert_container(deployment, &unit.name, |c, _| {
        let mut extra = Vec::new();
        if image_is_unset(c) {
            let (image, param) = match protocol {
                EndpointType::Rest => (
                    TFPROXY_REST_IMAGE,
                    Parameter::string(
                        REST_ENDPOINT_PARAMETER,
                        format!("http://0.0.0.0:{}", TFSERVING_REST_PORT),
                    ),
                ),
                EndpointType::Grpc => (
                    TFPROXY_GRPC_IMAGE,
                    Parameter::string(
                        GRPC_ENDPOINT_PARAMETER,
                        format!("0.0.0.0:{}", TFSERVING_GRPC_PORT),
                    ),
                ),
            };
            c.image = Some(image.to_string());
            extra.push(param);
            merge(c, ContainerField::ImagePullPolicy, MergePolicy::Overwrite, PULL_ALWAYS);
        }
        set_parameters_env(c, &unit.parameters, &extra)?;
        apply_container_defaults(c);
        Ok(())
    })?;

    upsert_container(deployment, TFSERVING_CONTAINER_NAME, |c, created| {
        if created {
            c.image = Some(TFSERVING_IMAGE.to_string());
            c.args = Some(vec![
                "/usr/bin/tensorflow_model_server".to_string(),
                format!("--port={}", TFSERVING_GRPC_PORT),
                format!("--rest_api_port={}", TFSERVING_REST_PORT),
                format!("--model_name={}", unit.name),
                format!("--model_base_path={}", DEFAULT_MODEL_LOCAL_MOUNT_PATH),
            ]);
            c.ports = Some(vec![
                tcp_port(TFSERVING_GRPC_PORT, None),
                tcp_port(TFSERVING_REST_PORT, None),
            ]);
            c.image_pull_policy = Some(PULL_IF_NOT_PRESENT.to_string());
        }
        apply_container_defaults(c);
        Ok(())
    })?;

    debug!(unit = %unit.name, protocol = %protocol, "wired tensorflow proxy and sidecar");
    initializer.inject(
        deployment,
        TFSERVING_CONTAINER_NAME,
        unit.model_uri.as_deref().unwrap_or_default(),
        &identity_of(unit),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parameters::container_parameters;
    use crate::initializer::MockModelInitializer;
    use crate::workload::{deployment, object_meta};
    use crate::Error;
    use std::collections::BTreeMap;

    fn empty_deployment() -> Deployment {
        deployment(object_meta("iris-main", "default"), BTreeMap::new())
    }

    fn passthrough_initializer() -> MockModelInitializer {
        let mut init = MockModelInitializer::new();
        init.expect_inject().returning(|_, _, _, _| Ok(()));
        init
    }

    // =========================================================================
    // Story: Generic Model Servers
    // =========================================================================

    #[test]
    fn story_sklearn_unit_gets_default_container() {
        let mut unit = PredictiveUnit::new("classifier", PredictiveUnitImplementation::SklearnServer);
        unit.model_uri = Some("gs://models/iris".to_string());
        let mut d = empty_deployment();

        let mut init = MockModelInitializer::new();
        init.expect_inject()
            .withf(|_, container, uri, _| container == "classifier" && uri == "gs://models/iris")
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        assert_eq!(apply(&mut unit, &mut d, &init).unwrap(), Mutation::Mutated);

        assert_eq!(unit.type_, PredictiveUnitType::Model);
        assert_eq!(unit.endpoint, Some(Endpoint::rest()));

        let c = d.container("classifier").unwrap();
        assert_eq!(c.image.as_deref(), Some("seldonio/sklearnserver_rest:0.1"));
        assert_eq!(c.image_pull_policy.as_deref(), Some("IfNotPresent"));
        let params = container_parameters(c).unwrap();
        assert!(params.contains(&Parameter::string("model_uri", "/mnt/models")));
    }

    #[test]
    fn test_image_table() {
        use EndpointType::*;
        use PredictiveUnitImplementation::*;

        assert_eq!(
            model_server_image(XgboostServer, Grpc),
            Some("seldonio/xgboostserver_grpc:0.1")
        );
        assert_eq!(
            model_server_image(SklearnServer, Grpc),
            Some("seldonio/sklearnserver_grpc:0.1")
        );
        assert_eq!(model_server_image(TensorflowServer, Rest), None);
    }

    /// Story: a user's image and env survive rewiring
    #[test]
    fn story_user_image_is_kept() {
        let mut unit = PredictiveUnit::new("classifier", PredictiveUnitImplementation::XgboostServer);
        let mut d = empty_deployment();
        let mut user = Container::named("classifier");
        user.image = Some("me/xgb:custom".to_string());
        d.pod_spec_mut().containers.push(user);

        apply(&mut unit, &mut d, &passthrough_initializer()).unwrap();
        apply(&mut unit, &mut d, &passthrough_initializer()).unwrap();

        assert_eq!(d.containers().len(), 1);
        assert_eq!(
            d.container("classifier").unwrap().image.as_deref(),
            Some("me/xgb:custom")
        );
    }

    #[test]
    fn story_initializer_failure_propagates() {
        let mut unit = PredictiveUnit::new("classifier", PredictiveUnitImplementation::SklearnServer);
        let mut d = empty_deployment();
        let mut init = MockModelInitializer::new();
        init.expect_inject()
            .returning(|_, c, _, _| Err(Error::initializer(c, "store unreachable")));

        let err = apply(&mut unit, &mut d, &init).unwrap_err();
        assert!(matches!(err, Error::Initializer { .. }));
    }

    // =========================================================================
    // Story: TensorFlow Serving
    // =========================================================================

    #[test]
    fn story_tensorflow_grpc_gets_proxy_and_sidecar() {
        let mut unit = PredictiveUnit::new("mnist", PredictiveUnitImplementation::TensorflowServer);
        unit.endpoint = Some(Endpoint::grpc());
        let mut d = empty_deployment();

        let mut init = MockModelInitializer::new();
        init.expect_inject()
            .withf(|_, container, _, _| container == "tfserving")
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        apply(&mut unit, &mut d, &init).unwrap();

        assert_eq!(d.containers().len(), 2);
        let proxy = d.container("mnist").unwrap();
        assert_eq!(proxy.image.as_deref(), Some(TFPROXY_GRPC_IMAGE));
        assert_eq!(proxy.image_pull_policy.as_deref(), Some("Always"));
        assert!(container_parameters(proxy)
            .unwrap()
            .contains(&Parameter::string("grpc_endpoint", "0.0.0.0:2000")));

        let sidecar = d.container("tfserving").unwrap();
        assert_eq!(sidecar.image.as_deref(), Some(TFSERVING_IMAGE));
        assert_eq!(sidecar.container_ports().len(), 2);
        assert!(sidecar
            .args
            .as_ref()
            .unwrap()
            .contains(&"--model_name=mnist".to_string()));
    }

    #[test]
    fn story_tensorflow_rest_uses_rest_proxy() {
        let mut unit = PredictiveUnit::new("mnist", PredictiveUnitImplementation::TensorflowServer);
        let mut d = empty_deployment();

        apply(&mut unit, &mut d, &passthrough_initializer()).unwrap();

        let proxy = d.container("mnist").unwrap();
        assert_eq!(proxy.image.as_deref(), Some(TFPROXY_REST_IMAGE));
        assert!(container_parameters(proxy)
            .unwrap()
            .contains(&Parameter::string("rest_endpoint", "http://0.0.0.0:2001")));
    }

    /// Story: a user-set proxy image gets no synthesized endpoint parameter
    #[test]
    fn test_custom_proxy_image_gets_only_unit_parameters() {
        let mut unit = PredictiveUnit::new("mnist", PredictiveUnitImplementation::TensorflowServer);
        unit.parameters = vec![Parameter::string("signature_name", "predict")];
        let mut d = empty_deployment();
        let mut user = Container::named("mnist");
        user.image = Some("me/proxy:1".to_string());
        d.pod_spec_mut().containers.push(user);

        apply(&mut unit, &mut d, &passthrough_initializer()).unwrap();

        let proxy = d.container("mnist").unwrap();
        assert_eq!(proxy.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert_eq!(
            container_parameters(proxy).unwrap(),
            vec![Parameter::string("signature_name", "predict")]
        );
    }

    #[test]
    fn test_engine_served_units_are_not_applicable() {
        for imp in [
            PredictiveUnitImplementation::UnknownImplementation,
            PredictiveUnitImplementation::SimpleModel,
            PredictiveUnitImplementation::RandomAbTest,
        ] {
            let mut unit = PredictiveUnit::new("u", imp);
            let mut d = empty_deployment();
            let init = MockModelInitializer::new();

            assert_eq!(apply(&mut unit, &mut d, &init).unwrap(), Mutation::NotApplicable);
            assert!(d.containers().is_empty());
            assert_eq!(unit.type_, PredictiveUnitType::UnknownType);
        }
    }
}
