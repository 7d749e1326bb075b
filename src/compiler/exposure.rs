//! Service construction for synthesized containers

use std::collections::{BTreeMap, BTreeSet};

use crate::crd::{EndpointType, PredictorSpec, SeldonDeployment};
use crate::workload::{
    object_meta, tcp_port, ContainerExt, Deployment, DeploymentExt, IntOrString, Service,
    ServicePort, ServiceSpec, SELDON_APP_SVC_LABEL, SELDON_DEPLOYMENT_ID_LABEL,
};
use crate::{DEFAULT_UNIT_PORT, PU_ID_ENVVAR, PU_SERVICE_PORT_ENVVAR};

/// Port name used for a protocol, on both the container and the Service
pub fn port_name(protocol: EndpointType) -> &'static str {
    match protocol {
        EndpointType::Rest => "http",
        EndpointType::Grpc => "grpc",
    }
}

/// Lowest port from [`DEFAULT_UNIT_PORT`] up that no container of the pod declares
pub fn next_free_port(deployment: &Deployment) -> i32 {
    let used: BTreeSet<i32> = deployment
        .containers()
        .iter()
        .flat_map(|c| c.container_ports())
        .map(|p| p.container_port)
        .collect();

    (DEFAULT_UNIT_PORT..)
        .find(|p| !used.contains(p))
        .unwrap_or(DEFAULT_UNIT_PORT)
}

/// Expose `container_name` of `deployment` through a ClusterIP Service
///
/// The port is the unit's declared port, else a port the container already
/// names for its protocol, else the next port no container of the pod uses.
/// The container gains that port and the unit env vars if it lacks them, and
/// the pod template gains the label the Service selects on.
pub fn expose_container(
    sdep: &SeldonDeployment,
    predictor: &PredictorSpec,
    deployment: &mut Deployment,
    container_name: &str,
) -> Service {
    let svc_name = sdep.container_service_name(predictor, container_name);
    let unit = predictor.graph.find(container_name);
    let protocol = unit.map(|u| u.endpoint_type()).unwrap_or_default();
    let name = port_name(protocol);

    let declared = unit
        .and_then(|u| u.endpoint.as_ref())
        .map(|e| e.service_port)
        .filter(|p| *p > 0);

    let port = declared
        .or_else(|| {
            deployment
                .container(container_name)
                .and_then(|c| {
                    c.container_ports()
                        .iter()
                        .find(|p| p.name.as_deref() == Some(name))
                })
                .map(|p| p.container_port)
        })
        .unwrap_or_else(|| next_free_port(deployment));

    if let Some(c) = deployment.container_mut(container_name) {
        if !c.container_ports().iter().any(|p| p.container_port == port) {
            c.ports
                .get_or_insert_with(Vec::new)
                .push(tcp_port(port, Some(name)));
        }
        c.set_env_if_absent(PU_SERVICE_PORT_ENVVAR, port.to_string());
        c.set_env_if_absent(PU_ID_ENVVAR, container_name);
    }

    deployment
        .pod_labels_mut()
        .insert(svc_name.clone(), "true".to_string());

    let mut metadata = object_meta(&svc_name, sdep.namespace_or_default());
    metadata.labels = Some(BTreeMap::from([
        (SELDON_APP_SVC_LABEL.to_string(), svc_name.clone()),
        (SELDON_DEPLOYMENT_ID_LABEL.to_string(), sdep.seldon_id()),
    ]));

    Service {
        metadata,
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(svc_name, "true".to_string())])),
            ports: Some(vec![ServicePort {
                name: Some(name.to_string()),
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Endpoint, PredictiveUnit, PredictiveUnitImplementation, SeldonDeploymentSpec};
    use crate::workload::{deployment, Container, ServiceExt};

    fn fixture(graph: PredictiveUnit) -> (SeldonDeployment, PredictorSpec) {
        let predictor = PredictorSpec {
            name: "main".to_string(),
            graph,
            replicas: 1,
            ..Default::default()
        };
        let sdep = SeldonDeployment::new(
            "iris-sdep",
            SeldonDeploymentSpec {
                name: "iris".to_string(),
                predictors: vec![predictor.clone()],
                ..Default::default()
            },
        );
        (sdep, predictor)
    }

    fn deployment_with(containers: Vec<Container>) -> Deployment {
        let mut d = deployment(object_meta("iris-main", "default"), BTreeMap::new());
        d.pod_spec_mut().containers = containers;
        d
    }

    #[test]
    fn story_rest_unit_exposed_on_default_port() {
        let unit = PredictiveUnit::new("classifier", PredictiveUnitImplementation::SklearnServer);
        let (sdep, predictor) = fixture(unit);
        let mut d = deployment_with(vec![Container::named("classifier")]);

        let svc = expose_container(&sdep, &predictor, &mut d, "classifier");

        assert_eq!(svc.name(), "iris-main-classifier");
        assert_eq!(svc.metadata.namespace.as_deref(), Some("default"));
        let port = svc.port().unwrap();
        assert_eq!(port.port, 9000);
        assert_eq!(port.target_port, Some(IntOrString::Int(9000)));
        assert_eq!(port.name.as_deref(), Some("http"));
        assert_eq!(
            svc.metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(SELDON_DEPLOYMENT_ID_LABEL)),
            Some(&"iris-iris-sdep".to_string())
        );
        assert_eq!(
            d.pod_labels().and_then(|l| l.get("iris-main-classifier")),
            Some(&"true".to_string())
        );

        let c = d.container("classifier").unwrap();
        assert_eq!(c.container_ports()[0].container_port, 9000);
        assert_eq!(c.env_value(PU_SERVICE_PORT_ENVVAR), Some("9000"));
        assert_eq!(c.env_value(PU_ID_ENVVAR), Some("classifier"));
    }

    #[test]
    fn story_declared_grpc_port_wins() {
        let mut unit = PredictiveUnit::new("classifier", PredictiveUnitImplementation::SklearnServer);
        unit.endpoint = Some(Endpoint {
            service_port: 5001,
            ..Endpoint::grpc()
        });
        let (sdep, predictor) = fixture(unit);
        let mut d = deployment_with(vec![Container::named("classifier")]);

        let svc = expose_container(&sdep, &predictor, &mut d, "classifier");

        assert_eq!(svc.port().unwrap().port, 5001);
        assert_eq!(svc.port().unwrap().name.as_deref(), Some("grpc"));
    }

    /// Story: a user container that already names its port keeps it
    #[test]
    fn story_existing_named_port_is_reused() {
        let unit = PredictiveUnit::new("root", PredictiveUnitImplementation::SimpleRouter);
        let (sdep, predictor) = fixture(unit);
        let mut c = Container::named("sidekick");
        c.ports = Some(vec![tcp_port(8080, Some("http"))]);
        let mut d = deployment_with(vec![c]);

        let svc = expose_container(&sdep, &predictor, &mut d, "sidekick");

        assert_eq!(svc.port().unwrap().port, 8080);
        assert_eq!(d.container("sidekick").unwrap().container_ports().len(), 1);
    }

    /// Story: two units in one pod never bind the same port
    #[test]
    fn story_units_sharing_a_pod_get_distinct_ports() {
        let unit = PredictiveUnit::new("root", PredictiveUnitImplementation::SimpleRouter);
        let (sdep, predictor) = fixture(unit);
        let mut d = deployment_with(vec![
            Container::named("transformer"),
            Container::named("classifier"),
        ]);

        let first = expose_container(&sdep, &predictor, &mut d, "transformer");
        let second = expose_container(&sdep, &predictor, &mut d, "classifier");

        assert_eq!(first.port().unwrap().port, 9000);
        assert_eq!(second.port().unwrap().port, 9001);
        assert_eq!(
            d.container("classifier").unwrap().env_value(PU_SERVICE_PORT_ENVVAR),
            Some("9001")
        );
    }

    #[test]
    fn test_next_free_port_skips_ports_in_use() {
        let mut sidecar = Container::named("sidecar");
        sidecar.ports = Some(vec![tcp_port(9000, None), tcp_port(9001, Some("metrics"))]);
        let d = deployment_with(vec![sidecar, Container::named("model")]);

        assert_eq!(next_free_port(&d), 9002);
        assert_eq!(next_free_port(&Deployment::default()), DEFAULT_UNIT_PORT);
    }
}
