//! Protocol Buffers IDL resolution.
//!
//! Every uploaded `.proto` file is parsed; messages and enums from all of them
//! go into one table keyed by fully-qualified name. Each RPC carries only the
//! transitive closure of definitions its request and response types reach.

use std::collections::HashSet;

use serde_json::{json, Map, Value};

use super::lexer::{CommentStyle, Cursor, TokenKind};
use super::{OperationSet, SourceDocument};
use crate::error::ResolveError;
use crate::schema::{definition_ref, reference_closure, with_definitions};
use crate::types::Operation;

const GRPC_CONTENT_TYPE: &str = "application/grpc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoMethod {
    pub name: String,
    /// Fully-qualified request type.
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoService {
    /// Fully-qualified service name.
    pub name: String,
    pub methods: Vec<ProtoMethod>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtoData {
    pub package_name: Option<String>,
    pub java_package: Option<String>,
    pub services: Vec<ProtoService>,
    /// JSON Schema per fully-qualified message/enum, plus scalar definitions.
    pub type_definitions: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Syntax tree
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ProtoFile {
    syntax: Option<String>,
    package: Option<String>,
    imports: Vec<String>,
    java_package: Option<String>,
    messages: Vec<MessageDef>,
    enums: Vec<EnumDef>,
    services: Vec<ServiceDef>,
}

#[derive(Debug, Default)]
struct MessageDef {
    name: String,
    fields: Vec<FieldDef>,
    messages: Vec<MessageDef>,
    enums: Vec<EnumDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Singular,
    Optional,
    Repeated,
    Required,
}

#[derive(Debug)]
enum FieldType {
    Named(String),
    Map { value: String },
}

#[derive(Debug)]
struct FieldDef {
    name: String,
    label: Label,
    kind: FieldType,
    oneof: Option<String>,
}

#[derive(Debug)]
struct EnumDef {
    name: String,
    values: Vec<String>,
}

#[derive(Debug)]
struct ServiceDef {
    name: String,
    rpcs: Vec<RpcDef>,
}

#[derive(Debug)]
struct RpcDef {
    name: String,
    input: String,
    input_stream: bool,
    output: String,
    output_stream: bool,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Parser<'a> {
    fn new(document: &'a SourceDocument) -> Result<Self, ResolveError> {
        Ok(Parser {
            cursor: Cursor::new(&document.name, &document.text, CommentStyle::CFamily)?,
        })
    }

    fn parse_file(&mut self) -> Result<ProtoFile, ResolveError> {
        let mut file = ProtoFile::default();
        while !self.cursor.at_eof() {
            if self.cursor.eat_punct(';') {
                continue;
            }
            let keyword = self.cursor.expect_ident()?;
            match keyword.as_str() {
                "syntax" | "edition" => {
                    self.cursor.expect_punct('=')?;
                    file.syntax = Some(self.cursor.expect_string()?);
                    self.cursor.expect_punct(';')?;
                }
                "package" => {
                    file.package = Some(self.type_name()?);
                    self.cursor.expect_punct(';')?;
                }
                "import" => {
                    if self.cursor.is_keyword("public") || self.cursor.is_keyword("weak") {
                        self.cursor.advance();
                    }
                    file.imports.push(self.cursor.expect_string()?);
                    self.cursor.expect_punct(';')?;
                }
                "option" => {
                    let (name, value) = self.option_body()?;
                    if name == "java_package" {
                        file.java_package = value;
                    }
                }
                "message" => file.messages.push(self.message()?),
                "enum" => file.enums.push(self.enumeration()?),
                "service" => file.services.push(self.service()?),
                "extend" => {
                    self.type_name()?;
                    self.cursor.skip_balanced('{', '}')?;
                }
                other => {
                    return Err(self
                        .cursor
                        .error(format!("unexpected top-level statement '{}'", other)))
                }
            }
        }
        Ok(file)
    }

    /// Dotted name with an optional leading dot.
    fn type_name(&mut self) -> Result<String, ResolveError> {
        let mut name = String::new();
        if self.cursor.eat_punct('.') {
            name.push('.');
        }
        name.push_str(&self.cursor.expect_ident()?);
        while self.cursor.eat_punct('.') {
            name.push('.');
            name.push_str(&self.cursor.expect_ident()?);
        }
        Ok(name)
    }

    /// Parse `name = value;` after the `option` keyword. Aggregate values are
    /// skipped and reported as `None`.
    fn option_body(&mut self) -> Result<(String, Option<String>), ResolveError> {
        let mut name = String::new();
        while !self.cursor.is_punct('=') {
            match self.cursor.advance() {
                TokenKind::Ident(part) => name.push_str(&part),
                TokenKind::Punct(c) => name.push(c),
                TokenKind::Eof => return Err(self.cursor.unexpected("'='")),
                _ => return Err(self.cursor.unexpected("option name")),
            }
        }
        self.cursor.expect_punct('=')?;
        let value = if self.cursor.is_punct('{') {
            self.cursor.skip_balanced('{', '}')?;
            None
        } else {
            match self.cursor.advance() {
                TokenKind::StringLit(s) | TokenKind::Ident(s) | TokenKind::Number(s) => Some(s),
                _ => return Err(self.cursor.unexpected("option value")),
            }
        };
        self.cursor.expect_punct(';')?;
        Ok((name, value))
    }

    fn skip_statement(&mut self) -> Result<(), ResolveError> {
        loop {
            match self.cursor.advance() {
                TokenKind::Punct(';') => return Ok(()),
                TokenKind::Eof => return Err(self.cursor.unexpected("';'")),
                _ => {}
            }
        }
    }

    fn message(&mut self) -> Result<MessageDef, ResolveError> {
        let mut message = MessageDef {
            name: self.cursor.expect_ident()?,
            ..MessageDef::default()
        };
        self.cursor.expect_punct('{')?;
        loop {
            if self.cursor.eat_punct('}') {
                break;
            }
            if self.cursor.eat_punct(';') {
                continue;
            }
            if self.cursor.at_eof() {
                return Err(self.cursor.unexpected("'}'"));
            }

            if self.cursor.eat_keyword("message") {
                message.messages.push(self.message()?);
            } else if self.cursor.eat_keyword("enum") {
                message.enums.push(self.enumeration()?);
            } else if self.cursor.eat_keyword("option") {
                self.option_body()?;
            } else if self.cursor.is_keyword("reserved") || self.cursor.is_keyword("extensions") {
                self.skip_statement()?;
            } else if self.cursor.eat_keyword("extend") {
                self.type_name()?;
                self.cursor.skip_balanced('{', '}')?;
            } else if self.cursor.is_keyword("oneof")
                && matches!(self.cursor.peek_at(1), TokenKind::Ident(_))
                && matches!(self.cursor.peek_at(2), TokenKind::Punct('{'))
            {
                self.cursor.advance();
                let group = self.cursor.expect_ident()?;
                self.cursor.expect_punct('{')?;
                while !self.cursor.eat_punct('}') {
                    if self.cursor.eat_punct(';') {
                        continue;
                    }
                    if self.cursor.eat_keyword("option") {
                        self.option_body()?;
                        continue;
                    }
                    if let Some(field) = self.field(Some(group.clone()))? {
                        message.fields.push(field);
                    }
                }
            } else if let Some(field) = self.field(None)? {
                message.fields.push(field);
            }
        }
        Ok(message)
    }

    /// Parse one field declaration. Proto2 groups are skipped.
    fn field(&mut self, oneof: Option<String>) -> Result<Option<FieldDef>, ResolveError> {
        let label = if self.cursor.eat_keyword("repeated") {
            Label::Repeated
        } else if self.cursor.eat_keyword("optional") {
            Label::Optional
        } else if self.cursor.eat_keyword("required") {
            Label::Required
        } else {
            Label::Singular
        };

        let kind = if self.cursor.is_keyword("map") && matches!(self.cursor.peek_at(1), TokenKind::Punct('<')) {
            self.cursor.advance();
            self.cursor.expect_punct('<')?;
            self.type_name()?;
            self.cursor.expect_punct(',')?;
            let value = self.type_name()?;
            self.cursor.expect_punct('>')?;
            FieldType::Map { value }
        } else {
            FieldType::Named(self.type_name()?)
        };

        let name = self.cursor.expect_ident()?;
        self.cursor.expect_punct('=')?;
        match self.cursor.advance() {
            TokenKind::Number(_) => {}
            _ => return Err(self.cursor.error("expected field number")),
        }

        if matches!(&kind, FieldType::Named(t) if t == "group") {
            self.cursor.skip_balanced('{', '}')?;
            return Ok(None);
        }

        if self.cursor.is_punct('[') {
            self.cursor.skip_balanced('[', ']')?;
        }
        self.cursor.expect_punct(';')?;
        Ok(Some(FieldDef {
            name,
            label,
            kind,
            oneof,
        }))
    }

    fn enumeration(&mut self) -> Result<EnumDef, ResolveError> {
        let name = self.cursor.expect_ident()?;
        let mut values = Vec::new();
        self.cursor.expect_punct('{')?;
        while !self.cursor.eat_punct('}') {
            if self.cursor.eat_punct(';') {
                continue;
            }
            if self.cursor.eat_keyword("option") {
                self.option_body()?;
                continue;
            }
            if self.cursor.is_keyword("reserved") {
                self.skip_statement()?;
                continue;
            }
            let value = self.cursor.expect_ident()?;
            self.cursor.expect_punct('=')?;
            match self.cursor.advance() {
                TokenKind::Number(_) => {}
                _ => return Err(self.cursor.error("expected enum value number")),
            }
            if self.cursor.is_punct('[') {
                self.cursor.skip_balanced('[', ']')?;
            }
            self.cursor.expect_punct(';')?;
            values.push(value);
        }
        Ok(EnumDef { name, values })
    }

    fn service(&mut self) -> Result<ServiceDef, ResolveError> {
        let name = self.cursor.expect_ident()?;
        let mut rpcs = Vec::new();
        self.cursor.expect_punct('{')?;
        while !self.cursor.eat_punct('}') {
            if self.cursor.eat_punct(';') {
                continue;
            }
            if self.cursor.eat_keyword("option") {
                self.option_body()?;
                continue;
            }
            if !self.cursor.eat_keyword("rpc") {
                return Err(self.cursor.unexpected("'rpc'"));
            }
            let rpc_name = self.cursor.expect_ident()?;
            let (input_stream, input) = self.rpc_type()?;
            if !self.cursor.eat_keyword("returns") {
                return Err(self.cursor.unexpected("'returns'"));
            }
            let (output_stream, output) = self.rpc_type()?;
            if self.cursor.is_punct('{') {
                self.cursor.skip_balanced('{', '}')?;
                self.cursor.eat_punct(';');
            } else {
                self.cursor.expect_punct(';')?;
            }
            rpcs.push(RpcDef {
                name: rpc_name,
                input,
                input_stream,
                output,
                output_stream,
            });
        }
        Ok(ServiceDef { name, rpcs })
    }

    fn rpc_type(&mut self) -> Result<(bool, String), ResolveError> {
        self.cursor.expect_punct('(')?;
        let streaming = self.cursor.is_keyword("stream")
            && matches!(self.cursor.peek_at(1), TokenKind::Ident(_) | TokenKind::Punct('.'));
        if streaming {
            self.cursor.advance();
        }
        let name = self.type_name()?;
        self.cursor.expect_punct(')')?;
        Ok((streaming, name))
    }
}

// ---------------------------------------------------------------------------
// Type table
// ---------------------------------------------------------------------------

fn scalar_schema(name: &str) -> Option<Value> {
    let schema = match name {
        "int32" | "sint32" | "sfixed32" => json!({ "type": "integer", "format": "int32" }),
        "uint32" | "fixed32" => json!({ "type": "integer", "format": "int32", "minimum": 0 }),
        "int64" | "sint64" | "sfixed64" => json!({ "type": "integer", "format": "int64" }),
        "uint64" | "fixed64" => json!({ "type": "integer", "format": "int64", "minimum": 0 }),
        "double" => json!({ "type": "number", "format": "double" }),
        "float" => json!({ "type": "number", "format": "float" }),
        "bytes" => json!({ "type": "string", "contentEncoding": "base64" }),
        _ => return None,
    };
    Some(schema)
}

/// JSON mapping of the `google.protobuf` well-known types.
fn well_known_types() -> Vec<(&'static str, Value)> {
    vec![
        ("google.protobuf.Timestamp", json!({ "type": "string", "format": "date-time" })),
        ("google.protobuf.Duration", json!({ "type": "string", "pattern": "^-?[0-9]+(\\.[0-9]+)?s$" })),
        ("google.protobuf.Empty", json!({ "type": "object", "properties": {} })),
        (
            "google.protobuf.Any",
            json!({ "type": "object", "properties": { "@type": { "type": "string" } }, "additionalProperties": true }),
        ),
        ("google.protobuf.Struct", json!({ "type": "object", "additionalProperties": true })),
        ("google.protobuf.Value", json!({})),
        ("google.protobuf.ListValue", json!({ "type": "array", "items": {} })),
        ("google.protobuf.FieldMask", json!({ "type": "string" })),
        ("google.protobuf.StringValue", json!({ "type": "string" })),
        ("google.protobuf.BoolValue", json!({ "type": "boolean" })),
        ("google.protobuf.BytesValue", json!({ "type": "string", "contentEncoding": "base64" })),
        ("google.protobuf.Int32Value", json!({ "type": "integer", "format": "int32" })),
        ("google.protobuf.UInt32Value", json!({ "type": "integer", "format": "int32", "minimum": 0 })),
        ("google.protobuf.Int64Value", json!({ "type": "integer", "format": "int64" })),
        ("google.protobuf.UInt64Value", json!({ "type": "integer", "format": "int64", "minimum": 0 })),
        ("google.protobuf.DoubleValue", json!({ "type": "number", "format": "double" })),
        ("google.protobuf.FloatValue", json!({ "type": "number", "format": "float" })),
    ]
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

/// Resolve a type reference following protobuf scoping: innermost scope
/// first, then each enclosing scope out to the root.
fn resolve_name(name: &str, scope: &str, known: &HashSet<String>) -> Option<String> {
    if let Some(absolute) = name.strip_prefix('.') {
        return known.contains(absolute).then(|| absolute.to_string());
    }
    let mut scope = scope.to_string();
    loop {
        let candidate = qualify(&scope, name);
        if known.contains(&candidate) {
            return Some(candidate);
        }
        if scope.is_empty() {
            return None;
        }
        scope = scope
            .rsplit_once('.')
            .map(|(outer, _)| outer.to_string())
            .unwrap_or_default();
    }
}

struct TypeTable {
    known: HashSet<String>,
    definitions: Map<String, Value>,
}

impl TypeTable {
    fn new(files: &[ProtoFile]) -> Self {
        let mut known = HashSet::new();
        for (name, _) in well_known_types() {
            known.insert(name.to_string());
        }
        for file in files {
            let package = file.package.as_deref().unwrap_or("");
            collect_names(package, &file.messages, &file.enums, &mut known);
        }

        let mut definitions = Map::new();
        for (name, schema) in well_known_types() {
            definitions.insert(name.to_string(), schema);
        }
        TypeTable { known, definitions }
    }

    fn compile(&mut self, files: &[ProtoFile]) {
        for file in files {
            let package = file.package.as_deref().unwrap_or("");
            self.compile_scope(package, &file.messages, &file.enums);
        }
    }

    fn compile_scope(&mut self, scope: &str, messages: &[MessageDef], enums: &[EnumDef]) {
        for enumeration in enums {
            let name = qualify(scope, &enumeration.name);
            self.definitions
                .insert(name, json!({ "type": "string", "enum": enumeration.values }));
        }
        for message in messages {
            let name = qualify(scope, &message.name);
            let schema = self.message_schema(&name, message);
            if !self.definitions.contains_key(&name) || !name.starts_with("google.protobuf.") {
                self.definitions.insert(name.clone(), schema);
            }
            self.compile_scope(&name, &message.messages, &message.enums);
        }
    }

    fn message_schema(&mut self, scope: &str, message: &MessageDef) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &message.fields {
            let schema = match &field.kind {
                FieldType::Map { value } => json!({
                    "type": "object",
                    "additionalProperties": self.reference(value, scope),
                }),
                FieldType::Named(type_name) => {
                    let item = self.reference(type_name, scope);
                    if field.label == Label::Repeated {
                        json!({ "type": "array", "items": item })
                    } else {
                        item
                    }
                }
            };
            if field.label == Label::Required && field.oneof.is_none() {
                required.push(field.name.clone());
            }
            properties.insert(field.name.clone(), schema);
        }

        let mut schema = Map::new();
        schema.insert("type".into(), json!("object"));
        schema.insert("properties".into(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".into(), json!(required));
        }
        Value::Object(schema)
    }

    /// Schema for a type reference as written inside `scope`.
    fn reference(&mut self, type_name: &str, scope: &str) -> Value {
        match type_name {
            "string" => return json!({ "type": "string" }),
            "bool" => return json!({ "type": "boolean" }),
            _ => {}
        }
        if let Some(scalar) = scalar_schema(type_name) {
            self.definitions
                .entry(type_name.to_string())
                .or_insert(scalar);
            return definition_ref(type_name);
        }
        match resolve_name(type_name, scope, &self.known) {
            Some(qualified) => definition_ref(&qualified),
            None => {
                let placeholder = type_name.trim_start_matches('.').to_string();
                let error = ResolveError::UnresolvedReference {
                    reference: placeholder.clone(),
                };
                tracing::warn!(%error, "using placeholder definition");
                self.definitions.entry(placeholder.clone()).or_insert_with(|| {
                    json!({
                        "type": "object",
                        "description": format!("Unresolved type {}", placeholder),
                    })
                });
                definition_ref(&placeholder)
            }
        }
    }
}

fn collect_names(scope: &str, messages: &[MessageDef], enums: &[EnumDef], known: &mut HashSet<String>) {
    for enumeration in enums {
        known.insert(qualify(scope, &enumeration.name));
    }
    for message in messages {
        let name = qualify(scope, &message.name);
        collect_names(&name, &message.messages, &message.enums, known);
        known.insert(name);
    }
}

fn is_proto(document: &SourceDocument) -> bool {
    document.name.to_ascii_lowercase().ends_with(".proto")
}

pub(super) fn resolve(
    specification_id: &str,
    main: &SourceDocument,
    auxiliary: &[SourceDocument],
) -> Result<(ProtoData, Vec<Operation>), ResolveError> {
    let mut files = vec![Parser::new(main)?.parse_file()?];
    for document in auxiliary.iter().filter(|doc| is_proto(doc)) {
        files.push(Parser::new(document)?.parse_file()?);
    }
    tracing::debug!(
        files = files.len(),
        syntax = files[0].syntax.as_deref().unwrap_or("proto2"),
        imports = files.iter().map(|f| f.imports.len()).sum::<usize>(),
        "proto files parsed"
    );

    let mut table = TypeTable::new(&files);
    table.compile(&files);

    let mut services = Vec::new();
    let mut operations = OperationSet::default();
    for file in &files {
        let package = file.package.as_deref().unwrap_or("");
        for service in &file.services {
            let service_name = qualify(package, &service.name);
            let mut methods = Vec::new();
            for rpc in &service.rpcs {
                let input = table.reference(&rpc.input, package);
                let output = table.reference(&rpc.output, package);
                let method = ProtoMethod {
                    name: rpc.name.clone(),
                    input_type: type_of(&input, &rpc.input),
                    output_type: type_of(&output, &rpc.output),
                    client_streaming: rpc.input_stream,
                    server_streaming: rpc.output_stream,
                };

                let root = |schema: Value| {
                    let closure = reference_closure(&[&schema], &table.definitions);
                    json!({ GRPC_CONTENT_TYPE: with_definitions(schema, closure) })
                };
                let operation_id = format!("{}.{}", service_name, rpc.name);
                let mut operation = Operation::new(
                    specification_id,
                    &operation_id,
                    "POST",
                    format!("/{}/{}", service_name, rpc.name),
                );
                operation.request_schema = root(input);
                operation.response_schemas = json!({ "200": root(output) });
                operation.specification = json!({
                    "service": service_name,
                    "method": rpc.name,
                    "requestType": method.input_type,
                    "responseType": method.output_type,
                    "clientStreaming": rpc.input_stream,
                    "serverStreaming": rpc.output_stream,
                });
                operations.push(operation);
                methods.push(method);
            }
            services.push(ProtoService {
                name: service_name,
                methods,
            });
        }
    }

    let data = ProtoData {
        package_name: files[0].package.clone(),
        java_package: files[0].java_package.clone(),
        services,
        type_definitions: table.definitions,
    };
    Ok((data, operations.into_vec()))
}

fn type_of(reference: &Value, written: &str) -> String {
    reference
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(crate::schema::definition_name)
        .unwrap_or_else(|| written.to_string())
}
