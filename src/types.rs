//! Core types for specification import.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocols that belong to the asynchronous messaging family.
///
/// Compatibility between a system and an imported specification is decided by
/// membership in this set, not by comparing enum values.
pub const ASYNC_FAMILY: &[Protocol] = &[
    Protocol::Async,
    Protocol::Amqp,
    Protocol::Mqtt,
    Protocol::Kafka,
    Protocol::Redis,
    Protocol::Nats,
];

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Protocol family of a specification or a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Soap,
    Graphql,
    Grpc,
    Async,
    Amqp,
    Mqtt,
    Kafka,
    Redis,
    Nats,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Soap => "SOAP",
            Protocol::Graphql => "GRAPHQL",
            Protocol::Grpc => "GRPC",
            Protocol::Async => "ASYNC",
            Protocol::Amqp => "AMQP",
            Protocol::Mqtt => "MQTT",
            Protocol::Kafka => "KAFKA",
            Protocol::Redis => "REDIS",
            Protocol::Nats => "NATS",
        }
    }

    /// Parse a protocol name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        let protocol = match s.trim().to_ascii_uppercase().as_str() {
            "HTTP" => Protocol::Http,
            "SOAP" => Protocol::Soap,
            "GRAPHQL" => Protocol::Graphql,
            "GRPC" => Protocol::Grpc,
            "ASYNC" | "ASYNCAPI" => Protocol::Async,
            "AMQP" => Protocol::Amqp,
            "MQTT" => Protocol::Mqtt,
            "KAFKA" => Protocol::Kafka,
            "REDIS" => Protocol::Redis,
            "NATS" => Protocol::Nats,
            _ => return None,
        };
        Some(protocol)
    }

    /// Map an AsyncAPI `protocol` value (e.g. `kafka-secure`, `amqps`) to a
    /// sub-protocol. Unknown values fall back to generic [`Protocol::Async`].
    pub fn from_async_protocol(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "amqp" | "amqps" | "amqp1" => Protocol::Amqp,
            "mqtt" | "mqtts" | "secure-mqtt" | "mqtt5" => Protocol::Mqtt,
            "kafka" | "kafka-secure" => Protocol::Kafka,
            "redis" | "rediss" => Protocol::Redis,
            "nats" => Protocol::Nats,
            _ => Protocol::Async,
        }
    }

    pub fn is_async(&self) -> bool {
        ASYNC_FAMILY.contains(self)
    }

    /// Lowercase name stored as a system's extended protocol.
    pub fn extended_name(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a message relative to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    /// Create direction from a request flag (true = Request, false = Response).
    pub fn from_request_flag(is_request: bool) -> Self {
        if is_request {
            Direction::Request
        } else {
            Direction::Response
        }
    }
}

/// One normalized callable unit: REST endpoint, SOAP operation, RPC method,
/// channel action or GraphQL root field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Always `{specificationId}-{operationId}`.
    pub id: String,
    pub name: String,
    pub method: String,
    pub path: String,
    /// Protocol-specific metadata.
    #[serde(default)]
    pub specification: Value,
    /// Request schemas keyed by content type.
    #[serde(default)]
    pub request_schema: Value,
    /// Response schemas keyed by status, then content type.
    #[serde(default)]
    pub response_schemas: Value,
}

impl Operation {
    pub fn new(
        specification_id: &str,
        operation_id: &str,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id: operation_id_for(specification_id, operation_id),
            name: operation_id.to_string(),
            method: method.into(),
            path: path.into(),
            specification: Value::Object(Map::new()),
            request_schema: Value::Object(Map::new()),
            response_schemas: Value::Object(Map::new()),
        }
    }
}

/// Build the globally unique id of an operation.
pub fn operation_id_for(specification_id: &str, operation_id: &str) -> String {
    format!("{}-{}", specification_id, operation_id)
}

/// A file taking part in an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecificationSource {
    pub id: String,
    pub name: String,
    pub source_hash: String,
    pub file_name: String,
    pub main_source: bool,
}

/// One API version inside a specification group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Specification {
    pub id: String,
    pub name: String,
    pub version: String,
    pub parent_id: String,
    pub source: Option<String>,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub specification_sources: Vec<SpecificationSource>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Named collection of specifications belonging to one system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecificationGroup {
    pub id: String,
    pub name: String,
    pub parent_id: String,
    #[serde(default)]
    pub synchronization: bool,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl SpecificationGroup {
    /// Group ids are deterministic so a re-import targets the same group.
    pub fn id_for(system_id: &str, name: &str) -> String {
        format!("{}-{}", system_id, name)
    }

    pub fn new(system_id: &str, name: &str) -> Self {
        Self {
            id: Self::id_for(system_id, name),
            name: name.to_string(),
            parent_id: system_id.to_string(),
            synchronization: false,
            labels: Vec::new(),
        }
    }
}

/// Deployment kind of an integration system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SystemKind {
    #[default]
    External,
    Internal,
    Implemented,
}

/// A configured runtime address plus connection properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub is_active: bool,
}

fn default_source_type() -> String {
    "MANUAL".to_string()
}

impl Environment {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            address: address.into(),
            source_type: default_source_type(),
            properties: BTreeMap::new(),
            labels: Vec::new(),
            is_active: false,
        }
    }
}

/// The system that owns specification groups and environments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationSystem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kind: SystemKind,
    #[serde(default)]
    pub protocol: Option<Protocol>,
    #[serde(default)]
    pub extended_protocol: Option<String>,
    #[serde(default)]
    pub environments: Vec<Environment>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl IntegrationSystem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: SystemKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            protocol: None,
            extended_protocol: None,
            environments: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn active_environment(&self) -> Option<&Environment> {
        self.environments.iter().find(|env| env.is_active)
    }

    /// Mark one environment active and every other inactive.
    ///
    /// Returns false if no environment has the given id.
    pub fn activate_environment(&mut self, id: &str) -> bool {
        if !self.environments.iter().any(|env| env.id == id) {
            return false;
        }
        for env in &mut self.environments {
            env.is_active = env.id == id;
        }
        true
    }

    /// Remove an environment. Removing the active one promotes the first
    /// remaining environment, if any.
    pub fn remove_environment(&mut self, id: &str) -> Option<Environment> {
        let index = self.environments.iter().position(|env| env.id == id)?;
        let removed = self.environments.remove(index);
        if removed.is_active {
            if let Some(first) = self.environments.first_mut() {
                first.is_active = true;
            }
        }
        Some(removed)
    }
}

/// A file uploaded for import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    #[serde(default)]
    pub content: Vec<u8>,
    #[serde(default, rename = "type")]
    pub content_type: Option<String>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            content_type: None,
        }
    }

    /// Content decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// Request to import files into a new (or same-named) specification group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub system_id: String,
    pub name: String,
    pub files: Vec<UploadedFile>,
}

/// Request to import files into an existing specification group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportToGroupRequest {
    pub specification_group_id: String,
    pub system_id: String,
    pub files: Vec<UploadedFile>,
}

/// Caller-visible result of an import. Always returned, never thrown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub id: String,
    pub specification_group_id: String,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning_message: Option<String>,
}

/// Storage layout and defaults used by the import orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    /// File suffix of integration system records.
    pub system_suffix: String,
    /// File suffix of specification group records.
    pub group_suffix: String,
    /// File suffix of specification records.
    pub specification_suffix: String,
    /// `$schema` written into group records.
    pub group_schema: String,
    /// `$schema` written into specification records.
    pub specification_schema: String,
    /// Timeout, in milliseconds, attached to derived environments.
    pub environment_timeout_ms: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            system_suffix: ".service.qip.yaml".to_string(),
            group_suffix: ".specification-group.qip.yaml".to_string(),
            specification_suffix: ".specification.qip.yaml".to_string(),
            group_schema: "http://qubership.org/schemas/product/qip/specification-group"
                .to_string(),
            specification_schema: "http://qubership.org/schemas/product/qip/specification"
                .to_string(),
            environment_timeout_ms: 30_000,
        }
    }
}

impl ImportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout attached to derived environments.
    pub fn environment_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.environment_timeout_ms = timeout_ms;
        self
    }

    /// Set the `$schema` URLs of group and specification records.
    pub fn schemas(mut self, group: impl Into<String>, specification: impl Into<String>) -> Self {
        self.group_schema = group.into();
        self.specification_schema = specification.into();
        self
    }

    /// Set the record suffixes for systems, groups and specifications.
    pub fn suffixes(
        mut self,
        system: impl Into<String>,
        group: impl Into<String>,
        specification: impl Into<String>,
    ) -> Self {
        self.system_suffix = system.into();
        self.group_suffix = group.into();
        self.specification_suffix = specification.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parse_is_case_insensitive() {
        assert_eq!(Protocol::parse("kafka"), Some(Protocol::Kafka));
        assert_eq!(Protocol::parse("GraphQL"), Some(Protocol::Graphql));
        assert_eq!(Protocol::parse("ftp"), None);
    }

    #[test]
    fn async_family_membership() {
        assert!(Protocol::Kafka.is_async());
        assert!(Protocol::Async.is_async());
        assert!(!Protocol::Http.is_async());
        assert!(!Protocol::Grpc.is_async());
    }

    #[test]
    fn async_protocol_aliases() {
        assert_eq!(Protocol::from_async_protocol("kafka-secure"), Protocol::Kafka);
        assert_eq!(Protocol::from_async_protocol("AMQPS"), Protocol::Amqp);
        assert_eq!(Protocol::from_async_protocol("ws"), Protocol::Async);
    }

    #[test]
    fn protocol_serializes_uppercase() {
        let json = serde_json::to_string(&Protocol::Graphql).unwrap();
        assert_eq!(json, r#""GRAPHQL""#);
    }

    #[test]
    fn operation_id_prefixes_specification() {
        let op = Operation::new("spec-1", "getPets", "GET", "/pets");
        assert_eq!(op.id, "spec-1-getPets");
        assert_eq!(op.name, "getPets");
    }

    #[test]
    fn group_id_is_deterministic() {
        let group = SpecificationGroup::new("sys1", "petstore");
        assert_eq!(group.id, "sys1-petstore");
        assert_eq!(SpecificationGroup::id_for("sys1", "petstore"), group.id);
    }

    #[test]
    fn removing_active_environment_promotes_first() {
        let mut system = IntegrationSystem::new("sys", "Sys", SystemKind::External);
        let a = Environment::new("a", "https://a");
        let b = Environment::new("b", "https://b");
        let c = Environment::new("c", "https://c");
        let (a_id, b_id, c_id) = (a.id.clone(), b.id.clone(), c.id.clone());
        system.environments = vec![a, b, c];
        assert!(system.activate_environment(&b_id));

        system.remove_environment(&b_id);
        assert_eq!(system.active_environment().map(|e| e.id.as_str()), Some(a_id.as_str()));

        system.remove_environment(&c_id);
        assert_eq!(system.active_environment().map(|e| e.id.as_str()), Some(a_id.as_str()));

        system.remove_environment(&a_id);
        assert!(system.active_environment().is_none());
    }

    #[test]
    fn import_config_builder() {
        let config = ImportConfig::new()
            .environment_timeout_ms(5_000)
            .suffixes(".sys.yaml", ".grp.yaml", ".spec.yaml");
        assert_eq!(config.environment_timeout_ms, 5_000);
        assert_eq!(config.group_suffix, ".grp.yaml");
        assert_eq!(ImportConfig::default().specification_suffix, ".specification.qip.yaml");
    }

    #[test]
    fn removing_inactive_environment_keeps_active() {
        let mut system = IntegrationSystem::new("sys", "Sys", SystemKind::External);
        let a = Environment::new("a", "https://a");
        let b = Environment::new("b", "https://b");
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        system.environments = vec![a, b];
        system.activate_environment(&b_id);
        system.remove_environment(&a_id);
        assert_eq!(system.active_environment().map(|e| e.id.as_str()), Some(b_id.as_str()));
    }
}
