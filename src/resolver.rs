//! Format resolvers - turn raw API descriptions into operations with JSON Schema.
//!
//! Each resolver consumes a main document plus auxiliary documents and yields
//! an [`IntermediateRepresentation`] together with the extracted
//! [`Operation`]s. Dispatch happens exactly once, by detected protocol.

mod asyncapi;
mod graphql;
mod lexer;
mod openapi;
mod proto;
mod swagger;
mod wsdl;
pub(crate) mod xml;
mod xsd;

use std::collections::HashSet;

use serde_json::Value;

use crate::error::ResolveError;
use crate::types::{Operation, Protocol, UploadedFile};

pub use asyncapi::{AsyncApiData, AsyncOperation};
pub use graphql::{GraphQlArgument, GraphQlData, GraphQlField, GraphQlType, TypeKind, TypeRef};
pub use openapi::OpenApiData;
pub use proto::{ProtoData, ProtoMethod, ProtoService};
pub use swagger::convert_swagger;
pub use wsdl::{
    AuxiliaryDocuments, DocumentResolver, MessagePart, MessageRef, OperationDetail,
    WsdlEndpoint, WsdlParseResult, WsdlVersion,
};

/// A named text document handed to a resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub name: String,
    pub text: String,
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

impl From<&UploadedFile> for SourceDocument {
    fn from(file: &UploadedFile) -> Self {
        Self::new(file.name.clone(), file.text())
    }
}

/// Format-specific parse result.
#[derive(Debug, Clone)]
pub enum IntermediateRepresentation {
    Wsdl(WsdlParseResult),
    Proto(ProtoData),
    OpenApi(OpenApiData),
    AsyncApi(AsyncApiData),
    GraphQl(GraphQlData),
}

impl IntermediateRepresentation {
    pub fn kind(&self) -> &'static str {
        match self {
            IntermediateRepresentation::Wsdl(_) => "WSDL",
            IntermediateRepresentation::Proto(_) => "PROTO",
            IntermediateRepresentation::OpenApi(_) => "OPENAPI",
            IntermediateRepresentation::AsyncApi(_) => "ASYNCAPI",
            IntermediateRepresentation::GraphQl(_) => "GRAPHQL",
        }
    }

    /// Version declared by the document itself (`info.version`), if any.
    pub fn version(&self) -> Option<String> {
        let info = match self {
            IntermediateRepresentation::OpenApi(data) => data.document.get("info"),
            IntermediateRepresentation::AsyncApi(data) => Some(&data.info),
            _ => None,
        }?;
        match info.get("version")? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Runtime addresses discovered in the document, in document order.
    pub fn addresses(&self) -> Vec<String> {
        match self {
            IntermediateRepresentation::Wsdl(data) => data
                .endpoints
                .iter()
                .map(|endpoint| endpoint.address.clone())
                .collect(),
            IntermediateRepresentation::OpenApi(data) => data.server_urls(),
            IntermediateRepresentation::AsyncApi(data) => data.addresses(),
            IntermediateRepresentation::Proto(_) | IntermediateRepresentation::GraphQl(_) => {
                Vec::new()
            }
        }
    }
}

/// Output of one resolver run.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub ir: IntermediateRepresentation,
    pub operations: Vec<Operation>,
}

/// Resolve a main document (plus auxiliaries) for an already detected protocol.
///
/// # Errors
///
/// Returns `ResolveError` when the main document is malformed or fails the
/// format's structural check. Unresolvable references inside a valid
/// document do not fail; they degrade to placeholder definitions.
pub fn resolve_documents(
    protocol: Protocol,
    specification_id: &str,
    main: &SourceDocument,
    auxiliary: &[SourceDocument],
) -> Result<Resolved, ResolveError> {
    tracing::debug!(%protocol, document = %main.name, "resolving document");
    let (ir, operations) = match protocol {
        Protocol::Soap => {
            let (data, ops) = wsdl::resolve(specification_id, main, auxiliary)?;
            (IntermediateRepresentation::Wsdl(data), ops)
        }
        Protocol::Grpc => {
            let (data, ops) = proto::resolve(specification_id, main, auxiliary)?;
            (IntermediateRepresentation::Proto(data), ops)
        }
        Protocol::Http => {
            let (data, ops) = openapi::resolve(specification_id, main)?;
            (IntermediateRepresentation::OpenApi(data), ops)
        }
        Protocol::Graphql => {
            let (data, ops) = graphql::resolve(specification_id, main, auxiliary)?;
            (IntermediateRepresentation::GraphQl(data), ops)
        }
        Protocol::Async
        | Protocol::Amqp
        | Protocol::Mqtt
        | Protocol::Kafka
        | Protocol::Redis
        | Protocol::Nats => {
            let (data, ops) = asyncapi::resolve(specification_id, main)?;
            (IntermediateRepresentation::AsyncApi(data), ops)
        }
    };
    tracing::debug!(
        kind = ir.kind(),
        operations = operations.len(),
        "document resolved"
    );
    Ok(Resolved { ir, operations })
}

/// Ordered operation list that skips duplicate ids (first occurrence wins).
#[derive(Debug, Default)]
pub(crate) struct OperationSet {
    seen: HashSet<String>,
    operations: Vec<Operation>,
}

impl OperationSet {
    pub(crate) fn push(&mut self, operation: Operation) {
        if self.seen.insert(operation.id.clone()) {
            self.operations.push(operation);
        } else {
            tracing::debug!(id = %operation.id, "skipping duplicate operation");
        }
    }

    pub(crate) fn into_vec(self) -> Vec<Operation> {
        self.operations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_set_keeps_first_duplicate() {
        let mut set = OperationSet::default();
        let mut first = Operation::new("s", "op", "GET", "/a");
        first.specification = serde_json::json!({ "n": 1 });
        set.push(first);
        set.push(Operation::new("s", "op", "GET", "/b"));
        set.push(Operation::new("s", "other", "GET", "/c"));

        let ops = set.into_vec();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].path, "/a");
    }

    #[test]
    fn dispatch_by_protocol() {
        let main = SourceDocument::new(
            "api.yaml",
            "openapi: 3.0.0\ninfo: {title: Pets, version: 2.0.0}\npaths:\n  /pets:\n    get:\n      operationId: listPets\n      responses: {'200': {description: ok}}\n",
        );
        let resolved = resolve_documents(Protocol::Http, "spec", &main, &[]).unwrap();
        assert_eq!(resolved.ir.kind(), "OPENAPI");
        assert_eq!(resolved.ir.version().as_deref(), Some("2.0.0"));
        assert_eq!(resolved.operations.len(), 1);
    }
}
