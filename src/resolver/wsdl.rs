//! WSDL 1.1 and 2.0 resolution.
//!
//! The main document and everything reachable through `import`/`include`
//! (WSDL `location`, XSD `schemaLocation`) is loaded into a registry first.
//! Operations, messages and endpoints are then read from every WSDL document
//! in the registry, and schemas from every embedded or standalone XSD.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::xml::{parse_document, QualifiedName, XmlElement};
use super::xsd::{SchemaIndex, XsdCompiler};
use super::{OperationSet, SourceDocument};
use crate::error::ResolveError;
use crate::schema::{reference_closure, with_definitions};
use crate::types::Operation;

const XML_CONTENT_TYPE: &str = "application/xml";

/// Looks up documents referenced by `import`/`include` elements.
pub trait DocumentResolver {
    /// Find the document at `location`, as referenced from `importer`.
    fn resolve(&self, location: &str, importer: &str) -> Option<&SourceDocument>;
}

/// Resolves imports against the auxiliary files of an upload.
///
/// Lookup order: exact name, path relative to the importer's directory, bare
/// file name.
pub struct AuxiliaryDocuments<'a> {
    documents: Vec<&'a SourceDocument>,
}

impl<'a> AuxiliaryDocuments<'a> {
    pub fn new(main: &'a SourceDocument, auxiliary: &'a [SourceDocument]) -> Self {
        let mut documents = vec![main];
        documents.extend(auxiliary.iter());
        Self { documents }
    }

    fn find(&self, name: &str) -> Option<&'a SourceDocument> {
        self.documents.iter().copied().find(|doc| doc.name == name)
    }
}

impl DocumentResolver for AuxiliaryDocuments<'_> {
    fn resolve(&self, location: &str, importer: &str) -> Option<&SourceDocument> {
        let location = location.trim();
        if location.is_empty() {
            return None;
        }
        if let Some(doc) = self.find(location) {
            return Some(doc);
        }

        let directory = importer.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        let relative = normalize_path(&format!("{}/{}", directory, location));
        if let Some(doc) = self.find(&relative) {
            return Some(doc);
        }

        let bare = file_name(location);
        self.documents
            .iter()
            .copied()
            .find(|doc| file_name(&doc.name) == bare)
    }
}

fn file_name(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Collapse `.` and `..` segments of a slash-separated path.
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if path.starts_with('/') {
        format!("/{}", joined)
    } else {
        joined
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WsdlVersion {
    #[serde(rename = "1.1")]
    V11,
    #[serde(rename = "2.0")]
    V20,
}

impl WsdlVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            WsdlVersion::V11 => "1.1",
            WsdlVersion::V20 => "2.0",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WsdlEndpoint {
    pub service: String,
    pub port: String,
    pub address: String,
}

/// Input, output or fault payload of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageRef {
    /// WSDL 1.1 `message` attribute.
    Message(QualifiedName),
    /// WSDL 2.0 `element` attribute.
    Element(QualifiedName),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperationDetail {
    pub name: String,
    pub input: Option<MessageRef>,
    pub output: Option<MessageRef>,
    pub faults: Vec<(String, MessageRef)>,
    pub soap_action: Option<String>,
    pub documentation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePart {
    pub name: String,
    pub element: Option<QualifiedName>,
    pub type_name: Option<QualifiedName>,
}

#[derive(Debug, Clone)]
pub struct WsdlParseResult {
    pub version: WsdlVersion,
    pub target_namespace: String,
    /// Operation names, deduplicated, in document order.
    pub operations: Vec<String>,
    pub endpoints: Vec<WsdlEndpoint>,
    pub operation_details: HashMap<String, OperationDetail>,
    /// Parts keyed by the message's `namespace#localName`.
    pub messages: HashMap<String, Vec<MessagePart>>,
    pub schemas: Vec<XmlElement>,
}

pub(super) fn resolve(
    specification_id: &str,
    main: &SourceDocument,
    auxiliary: &[SourceDocument],
) -> Result<(WsdlParseResult, Vec<Operation>), ResolveError> {
    let resolver = AuxiliaryDocuments::new(main, auxiliary);
    let result = parse_wsdl(main, &resolver)?;
    let operations = build_operations(specification_id, &result);
    Ok((result, operations))
}

/// Load the main WSDL and its import graph, then extract the parse result.
///
/// # Errors
///
/// Returns `ResolveError::InvalidXml` for malformed documents and
/// `ResolveError::InvalidStructure` when the root is not a WSDL document.
pub fn parse_wsdl(
    main: &SourceDocument,
    resolver: &dyn DocumentResolver,
) -> Result<WsdlParseResult, ResolveError> {
    let root = parse_document(&main.name, &main.text)?;
    let version = if root.is("definitions") {
        WsdlVersion::V11
    } else if root.is("description") {
        WsdlVersion::V20
    } else {
        return Err(ResolveError::structure(
            "WSDL",
            format!(
                "root element must be definitions or description, found {}",
                root.local_name
            ),
        ));
    };
    let target_namespace = root.attr("targetNamespace").unwrap_or("").to_string();

    let registry = load_registry(&main.name, root, resolver)?;
    tracing::debug!(documents = registry.len(), version = version.as_str(), "WSDL registry loaded");

    let mut result = WsdlParseResult {
        version,
        target_namespace,
        operations: Vec::new(),
        endpoints: Vec::new(),
        operation_details: HashMap::new(),
        messages: HashMap::new(),
        schemas: Vec::new(),
    };

    for document in &registry {
        if document.is("schema") {
            result.schemas.push(document.clone());
            continue;
        }
        if let Some(types) = document.child("types") {
            result
                .schemas
                .extend(types.children_named("schema").cloned());
        }
        match version {
            WsdlVersion::V11 => read_v11(document, &mut result),
            WsdlVersion::V20 => read_v20(document, &mut result),
        }
    }

    Ok(result)
}

fn load_registry(
    main_name: &str,
    root: XmlElement,
    resolver: &dyn DocumentResolver,
) -> Result<Vec<XmlElement>, ResolveError> {
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(main_name.to_string());
    let mut queue = VecDeque::from([(main_name.to_string(), root)]);
    let mut registry = Vec::new();

    while let Some((name, document)) = queue.pop_front() {
        let mut links = Vec::new();
        document.descendants("import", &mut links);
        document.descendants("include", &mut links);
        document.descendants("redefine", &mut links);

        for link in links {
            let Some(location) = link.attr("location").or_else(|| link.attr("schemaLocation"))
            else {
                continue;
            };
            match resolver.resolve(location, &name) {
                Some(found) => {
                    if seen.insert(found.name.clone()) {
                        let parsed = parse_document(&found.name, &found.text)?;
                        queue.push_back((found.name.clone(), parsed));
                    }
                }
                None => tracing::warn!(%location, importer = %name, "import not found among uploaded files"),
            }
        }
        registry.push(document);
    }
    Ok(registry)
}

fn record_operation(result: &mut WsdlParseResult, detail: OperationDetail) {
    match result.operation_details.get_mut(&detail.name) {
        Some(existing) => {
            if existing.soap_action.is_none() {
                existing.soap_action = detail.soap_action;
            }
        }
        None => {
            result.operations.push(detail.name.clone());
            result.operation_details.insert(detail.name.clone(), detail);
        }
    }
}

fn read_v11(document: &XmlElement, result: &mut WsdlParseResult) {
    let tns = document.attr("targetNamespace").unwrap_or("");

    for message in document.children_named("message") {
        let Some(name) = message.attr("name") else {
            continue;
        };
        let parts = message
            .children_named("part")
            .map(|part| MessagePart {
                name: part.attr("name").unwrap_or("part").to_string(),
                element: part.attr("element").map(|e| part.resolve_qname(e)),
                type_name: part.attr("type").map(|t| part.resolve_qname(t)),
            })
            .collect();
        result
            .messages
            .insert(QualifiedName::new(tns, name).key(), parts);
    }

    let port_types: Vec<&XmlElement> = document.children_named("portType").collect();
    let find_abstract = |name: &str| {
        port_types
            .iter()
            .copied()
            .flat_map(|pt| pt.children_named("operation"))
            .find(|op| op.attr("name") == Some(name))
    };

    let mut bound = false;
    for binding in document.children_named("binding") {
        for operation in binding.children_named("operation") {
            let Some(name) = operation.attr("name") else {
                continue;
            };
            bound = true;
            let mut detail = find_abstract(name)
                .map(abstract_v11)
                .unwrap_or_else(|| OperationDetail {
                    name: name.to_string(),
                    ..OperationDetail::default()
                });
            detail.soap_action = operation
                .child("operation")
                .and_then(|soap| soap.attr("soapAction"))
                .filter(|action| !action.is_empty())
                .map(str::to_string);
            record_operation(result, detail);
        }
    }

    if !bound {
        for operation in port_types
            .iter()
            .copied()
            .flat_map(|pt| pt.children_named("operation"))
        {
            if operation.attr("name").is_some() {
                record_operation(result, abstract_v11(operation));
            }
        }
    }

    for service in document.children_named("service") {
        let service_name = service.attr("name").unwrap_or("");
        for port in service.children_named("port") {
            if let Some(location) = port.child("address").and_then(|a| a.attr("location")) {
                result.endpoints.push(WsdlEndpoint {
                    service: service_name.to_string(),
                    port: port.attr("name").unwrap_or("").to_string(),
                    address: location.to_string(),
                });
            }
        }
    }
}

fn abstract_v11(operation: &XmlElement) -> OperationDetail {
    let message = |direction: &str| {
        operation
            .child(direction)
            .and_then(|el| el.attr("message").map(|m| MessageRef::Message(el.resolve_qname(m))))
    };
    OperationDetail {
        name: operation.attr("name").unwrap_or("").to_string(),
        input: message("input"),
        output: message("output"),
        faults: operation
            .children_named("fault")
            .filter_map(|fault| {
                let message = fault.attr("message")?;
                let name = fault.attr("name").unwrap_or("fault").to_string();
                Some((name, MessageRef::Message(fault.resolve_qname(message))))
            })
            .collect(),
        soap_action: None,
        documentation: operation.child("documentation").map(|d| d.text.trim().to_string()),
    }
}

fn read_v20(document: &XmlElement, result: &mut WsdlParseResult) {
    let interfaces: Vec<&XmlElement> = document.children_named("interface").collect();
    let find_abstract = |name: &str| {
        interfaces.iter().find_map(|interface| {
            interface
                .children_named("operation")
                .find(|op| op.attr("name") == Some(name))
                .map(|op| abstract_v20(interface, op))
        })
    };

    let mut bound = false;
    for binding in document.children_named("binding") {
        for operation in binding.children_named("operation") {
            let Some(reference) = operation.attr("ref") else {
                continue;
            };
            bound = true;
            let name = operation.resolve_qname(reference).local;
            let mut detail = find_abstract(&name).unwrap_or_else(|| OperationDetail {
                name: name.clone(),
                ..OperationDetail::default()
            });
            detail.soap_action = attr_local(operation, "action").map(str::to_string);
            record_operation(result, detail);
        }
    }

    if !bound {
        for interface in &interfaces {
            for operation in interface.children_named("operation") {
                if operation.attr("name").is_some() {
                    record_operation(result, abstract_v20(interface, operation));
                }
            }
        }
    }

    for service in document.children_named("service") {
        let service_name = service.attr("name").unwrap_or("");
        for endpoint in service.children_named("endpoint") {
            if let Some(address) = endpoint.attr("address") {
                result.endpoints.push(WsdlEndpoint {
                    service: service_name.to_string(),
                    port: endpoint.attr("name").unwrap_or("").to_string(),
                    address: address.to_string(),
                });
            }
        }
    }
}

fn abstract_v20(interface: &XmlElement, operation: &XmlElement) -> OperationDetail {
    let element = |el: &XmlElement| {
        el.attr("element")
            .filter(|e| !e.starts_with('#'))
            .map(|e| MessageRef::Element(el.resolve_qname(e)))
    };
    let faults = operation
        .children
        .iter()
        .filter(|c| c.is("outfault") || c.is("infault"))
        .filter_map(|fault| {
            let local = fault.resolve_qname(fault.attr("ref")?).local;
            let declared = interface
                .children_named("fault")
                .find(|f| f.attr("name") == Some(local.as_str()))?;
            Some((local, element(declared)?))
        })
        .collect();

    OperationDetail {
        name: operation.attr("name").unwrap_or("").to_string(),
        input: operation.child("input").and_then(element),
        output: operation.child("output").and_then(element),
        faults,
        soap_action: None,
        documentation: operation.child("documentation").map(|d| d.text.trim().to_string()),
    }
}

/// Attribute lookup ignoring the prefix (`wsoap:action` matches `action`).
fn attr_local<'e>(element: &'e XmlElement, local: &str) -> Option<&'e str> {
    element
        .attributes
        .iter()
        .find(|(key, _)| key.rsplit(':').next() == Some(local))
        .map(|(_, value)| value.as_str())
}

/// Build one operation per WSDL operation, each with its own definitions.
pub fn build_operations(specification_id: &str, result: &WsdlParseResult) -> Vec<Operation> {
    let index = SchemaIndex::build(&result.schemas);
    tracing::debug!(declarations = index.declaration_count(), "XSD index built");

    let mut operations = OperationSet::default();
    for name in &result.operations {
        let Some(detail) = result.operation_details.get(name) else {
            continue;
        };
        let mut compiler = XsdCompiler::new(&index);

        let input = detail
            .input
            .as_ref()
            .map(|r| message_schema(&mut compiler, result, r));
        let output = detail
            .output
            .as_ref()
            .map(|r| message_schema(&mut compiler, result, r));
        let faults: Vec<Value> = detail
            .faults
            .iter()
            .map(|(_, r)| message_schema(&mut compiler, result, r))
            .collect();
        let definitions = compiler.into_definitions();

        let root = |schema: Value| {
            let closure = reference_closure(&[&schema], &definitions);
            json!({ XML_CONTENT_TYPE: with_definitions(schema, closure) })
        };

        let mut operation = Operation::new(specification_id, name, "POST", name.as_str());
        if let Some(input) = input {
            operation.request_schema = root(input);
        }
        let mut responses = Map::new();
        if let Some(output) = output {
            responses.insert("200".into(), root(output));
        }
        let fault = match faults.len() {
            0 => None,
            1 => faults.into_iter().next(),
            _ => Some(json!({ "anyOf": faults })),
        };
        if let Some(fault) = fault {
            responses.insert("500".into(), root(fault));
        }
        operation.response_schemas = Value::Object(responses);
        operation.specification = operation_metadata(result, detail);
        operations.push(operation);
    }
    operations.into_vec()
}

fn operation_metadata(result: &WsdlParseResult, detail: &OperationDetail) -> Value {
    let name_of = |r: &Option<MessageRef>| match r {
        Some(MessageRef::Message(q)) | Some(MessageRef::Element(q)) => json!(q.local),
        None => Value::Null,
    };
    let mut metadata = Map::new();
    metadata.insert("operation".into(), json!(detail.name));
    metadata.insert("input".into(), name_of(&detail.input));
    metadata.insert("output".into(), name_of(&detail.output));
    if !detail.faults.is_empty() {
        let faults: Vec<&str> = detail.faults.iter().map(|(n, _)| n.as_str()).collect();
        metadata.insert("faults".into(), json!(faults));
    }
    if let Some(action) = &detail.soap_action {
        metadata.insert("soapAction".into(), json!(action));
    }
    if let Some(doc) = detail.documentation.as_ref().filter(|d| !d.is_empty()) {
        metadata.insert("documentation".into(), json!(doc));
    }
    metadata.insert("wsdlVersion".into(), json!(result.version.as_str()));
    Value::Object(metadata)
}

/// Object schema wrapping the parts of a message, or the single element of a
/// WSDL 2.0 payload.
fn message_schema(
    compiler: &mut XsdCompiler<'_, '_>,
    result: &WsdlParseResult,
    reference: &MessageRef,
) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    match reference {
        MessageRef::Element(element) => {
            properties.insert(element.local.clone(), compiler.element_schema(element));
            required.push(element.local.clone());
        }
        MessageRef::Message(message) => {
            let parts = result.messages.get(&message.key()).or_else(|| {
                result
                    .messages
                    .iter()
                    .find(|(key, _)| key.rsplit('#').next() == Some(message.local.as_str()))
                    .map(|(_, parts)| parts)
            });
            let Some(parts) = parts else {
                let error = ResolveError::UnresolvedReference {
                    reference: message.to_string(),
                };
                tracing::warn!(%error, "message has no parts");
                return json!({ "type": "object", "properties": {} });
            };
            for part in parts {
                let (name, schema) = match (&part.element, &part.type_name) {
                    (Some(element), _) => (element.local.clone(), compiler.element_schema(element)),
                    (None, Some(type_name)) => (part.name.clone(), compiler.type_schema(type_name)),
                    (None, None) => (part.name.clone(), json!({ "type": "string" })),
                };
                required.push(name.clone());
                properties.insert(name, schema);
            }
        }
    }

    let mut schema = Map::new();
    schema.insert("type".into(), json!("object"));
    schema.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".into(), json!(required));
    }
    Value::Object(schema)
}
