//! Predictive unit graph types for the SeldonDeployment CRD

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How a predictive unit is implemented
///
/// Prepackaged servers are wired automatically by the graph compiler.
/// `UnknownImplementation` units are user-authored and must ship their own
/// container in the predictor's component specs.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictiveUnitImplementation {
    /// User-authored component
    #[default]
    UnknownImplementation,
    /// Built-in stub model served by the engine
    SimpleModel,
    /// Built-in stub router served by the engine
    SimpleRouter,
    /// Built-in random A/B test router served by the engine
    #[serde(rename = "RANDOM_ABTEST")]
    RandomAbTest,
    /// Built-in averaging combiner served by the engine
    AverageCombiner,
    /// Prepackaged scikit-learn model server
    SklearnServer,
    /// Prepackaged XGBoost model server
    XgboostServer,
    /// Prepackaged TensorFlow Serving proxy and sidecar
    TensorflowServer,
}

impl PredictiveUnitImplementation {
    /// Returns true if this is a user-authored component
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::UnknownImplementation)
    }
}

impl std::fmt::Display for PredictiveUnitImplementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownImplementation => write!(f, "UNKNOWN_IMPLEMENTATION"),
            Self::SimpleModel => write!(f, "SIMPLE_MODEL"),
            Self::SimpleRouter => write!(f, "SIMPLE_ROUTER"),
            Self::RandomAbTest => write!(f, "RANDOM_ABTEST"),
            Self::AverageCombiner => write!(f, "AVERAGE_COMBINER"),
            Self::SklearnServer => write!(f, "SKLEARN_SERVER"),
            Self::XgboostServer => write!(f, "XGBOOST_SERVER"),
            Self::TensorflowServer => write!(f, "TENSORFLOW_SERVER"),
        }
    }
}

/// Role a predictive unit plays in the graph
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictiveUnitType {
    /// Role not declared
    #[default]
    UnknownType,
    /// Routes requests to one child
    Router,
    /// Combines the outputs of all children
    Combiner,
    /// Produces predictions
    Model,
    /// Transforms the request before it reaches children
    Transformer,
    /// Transforms the response on the way back
    OutputTransformer,
}

/// Request-handling methods a user component implements
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictiveUnitMethod {
    /// Transform the incoming request
    TransformInput,
    /// Transform the outgoing response
    TransformOutput,
    /// Pick a child to route to
    Route,
    /// Aggregate children's outputs
    Aggregate,
    /// Accept feedback
    SendFeedback,
}

/// Wire protocol a unit serves
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointType {
    /// HTTP/JSON
    #[default]
    Rest,
    /// gRPC
    Grpc,
}

impl std::fmt::Display for EndpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rest => write!(f, "REST"),
            Self::Grpc => write!(f, "GRPC"),
        }
    }
}

/// Where and how a unit is reached
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Host the unit is reached on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_host: Option<String>,

    /// Port the unit listens on; 0 means "pick a default"
    #[serde(default, skip_serializing_if = "is_zero")]
    pub service_port: i32,

    /// Protocol
    #[serde(rename = "type", default)]
    pub type_: EndpointType,
}

fn is_zero(port: &i32) -> bool {
    *port == 0
}

impl Endpoint {
    /// REST endpoint with no host or port
    pub fn rest() -> Self {
        Self::default()
    }

    /// gRPC endpoint with no host or port
    pub fn grpc() -> Self {
        Self {
            type_: EndpointType::Grpc,
            ..Default::default()
        }
    }
}

/// Declared type of a parameter value
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParameterType {
    /// 64-bit integer
    Int,
    /// Single precision float
    Float,
    /// Double precision float
    Double,
    /// Free text
    String,
    /// `true` or `false`
    Bool,
}

/// A named, typed value passed to a unit at startup
///
/// Names need not be unique; the list is passed through in order.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Parameter {
    /// Parameter name
    pub name: String,
    /// Value, encoded as text
    pub value: String,
    /// Declared type of the value
    #[serde(rename = "type")]
    pub type_: ParameterType,
}

impl Parameter {
    /// String-typed parameter
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            type_: ParameterType::String,
        }
    }
}

/// One node of a predictor's inference graph
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictiveUnit {
    /// Unit name, unique within its predictor
    pub name: String,

    /// Child units, in routing order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "children_schema")]
    pub children: Vec<PredictiveUnit>,

    /// Role in the graph
    #[serde(rename = "type", default)]
    pub type_: PredictiveUnitType,

    /// Implementation
    #[serde(default)]
    pub implementation: PredictiveUnitImplementation,

    /// Methods a user component implements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<PredictiveUnitMethod>>,

    /// Endpoint; REST when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,

    /// Startup parameters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,

    /// Location of the model artifact, e.g. `gs://bucket/model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_uri: Option<String>,

    /// Service account used to fetch the artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Secret holding artifact store credentials as env vars
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_secret_ref_name: Option<String>,
}

/// Schema for nested units
///
/// CRD schemas cannot hold references, so the recursive part of the graph is
/// left to the apiserver as unvalidated objects.
fn children_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    use schemars::schema::{ArrayValidation, InstanceType, Schema, SchemaObject};

    let mut item = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    item.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );

    SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(Schema::Object(item).into()),
            ..Default::default()
        })),
        ..Default::default()
    }
    .into()
}

impl PredictiveUnit {
    /// Create a unit with the given name and implementation
    pub fn new(name: impl Into<String>, implementation: PredictiveUnitImplementation) -> Self {
        Self {
            name: name.into(),
            implementation,
            ..Default::default()
        }
    }

    /// Protocol of this unit, REST when no endpoint is set
    pub fn endpoint_type(&self) -> EndpointType {
        self.endpoint
            .as_ref()
            .map(|e| e.type_)
            .unwrap_or_default()
    }

    /// Returns true if the unit declares at least one method
    pub fn has_methods(&self) -> bool {
        self.methods.as_ref().is_some_and(|m| !m.is_empty())
    }

    /// Find a unit by name in this subtree, pre-order
    pub fn find(&self, name: &str) -> Option<&PredictiveUnit> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }
}
