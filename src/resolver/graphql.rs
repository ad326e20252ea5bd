//! GraphQL SDL resolution.
//!
//! Every field of a root type (query, mutation, subscription) becomes one
//! operation. Arguments turn into the request schema and the return type into
//! the response schema; named types are emitted as definitions.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde_json::{json, Map, Value};

use super::lexer::{CommentStyle, Cursor, TokenKind};
use super::{OperationSet, SourceDocument};
use crate::error::ResolveError;
use crate::schema::{definition_ref, reference_closure, with_definitions};
use crate::types::Operation;

const JSON_CONTENT_TYPE: &str = "application/json";
const SDL_EXTENSIONS: &[&str] = &[".graphql", ".graphqls", ".gql"];

/// Reference to a type, with list and non-null wrappers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeRef::NonNull(_))
    }

    /// Innermost named type.
    pub fn base_name(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.base_name(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::List(inner) => write!(f, "[{}]", inner),
            TypeRef::NonNull(inner) => write!(f, "{}!", inner),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphQlArgument {
    pub name: String,
    pub type_ref: TypeRef,
    pub default_value: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphQlField {
    pub name: String,
    pub arguments: Vec<GraphQlArgument>,
    pub type_ref: TypeRef,
    pub description: Option<String>,
}

impl GraphQlField {
    /// Printed signature, e.g. `pets(limit: Int = 10): [Pet!]!`.
    pub fn signature(&self) -> String {
        let mut out = self.name.clone();
        if !self.arguments.is_empty() {
            let args: Vec<String> = self
                .arguments
                .iter()
                .map(|arg| match &arg.default_value {
                    Some(default) => format!("{}: {} = {}", arg.name, arg.type_ref, default),
                    None => format!("{}: {}", arg.name, arg.type_ref),
                })
                .collect();
            out.push('(');
            out.push_str(&args.join(", "));
            out.push(')');
        }
        out.push_str(": ");
        out.push_str(&self.type_ref.to_string());
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Object,
    Interface,
    Input,
    Enum,
    Union,
}

/// A named, non-scalar type definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphQlType {
    pub name: String,
    pub kind: TypeKind,
    pub fields: Vec<GraphQlField>,
    /// Enum values or union members.
    pub members: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphQlData {
    /// SDL text of every parsed document, main first.
    pub schema: String,
    pub queries: Vec<GraphQlField>,
    pub mutations: Vec<GraphQlField>,
    pub subscriptions: Vec<GraphQlField>,
    /// Type definitions other than the root types.
    pub types: Vec<GraphQlType>,
    pub scalars: Vec<String>,
}

pub(super) fn resolve(
    specification_id: &str,
    main: &SourceDocument,
    auxiliary: &[SourceDocument],
) -> Result<(GraphQlData, Vec<Operation>), ResolveError> {
    let mut registry = Registry::default();
    let mut schema = main.text.clone();
    registry.parse(main)?;
    for document in auxiliary {
        if document.name == main.name {
            continue;
        }
        let lower = document.name.to_ascii_lowercase();
        if !SDL_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            tracing::debug!(document = %document.name, "skipping non-SDL auxiliary document");
            continue;
        }
        registry.parse(document)?;
        schema.push('\n');
        schema.push_str(&document.text);
    }

    let roots = registry.root_names();
    let root_fields = |kind: &str| -> Vec<GraphQlField> {
        roots
            .get(kind)
            .and_then(|name| registry.get(name))
            .map(|ty| ty.fields.clone())
            .unwrap_or_default()
    };
    let queries = root_fields("query");
    let mutations = root_fields("mutation");
    let subscriptions = root_fields("subscription");

    let root_set: HashSet<&str> = roots.values().map(String::as_str).collect();
    let types: Vec<GraphQlType> = registry
        .types
        .iter()
        .filter(|ty| !root_set.contains(ty.name.as_str()))
        .cloned()
        .collect();

    let mut operations = OperationSet::default();
    for (kind, fields) in [
        ("query", &queries),
        ("mutation", &mutations),
        ("subscription", &subscriptions),
    ] {
        for field in fields {
            operations.push(build_operation(specification_id, kind, field, &registry));
        }
    }

    let data = GraphQlData {
        schema,
        queries,
        mutations,
        subscriptions,
        types,
        scalars: registry.scalars.clone(),
    };
    Ok((data, operations.into_vec()))
}

fn build_operation(specification_id: &str, kind: &str, field: &GraphQlField, registry: &Registry) -> Operation {
    let mut compiler = TypeCompiler::new(registry);

    let mut properties = Map::new();
    let mut required = Vec::new();
    for argument in &field.arguments {
        let mut schema = compiler.type_schema(&argument.type_ref);
        if let (Some(description), Value::Object(map)) = (&argument.description, &mut schema) {
            map.insert("description".into(), json!(description));
        }
        properties.insert(argument.name.clone(), schema);
        if argument.type_ref.is_non_null() && argument.default_value.is_none() {
            required.push(json!(argument.name));
        }
    }
    let mut arguments = json!({ "type": "object", "properties": properties });
    if !required.is_empty() {
        arguments["required"] = Value::Array(required);
    }
    let result = compiler.type_schema(&field.type_ref);

    let mut operation = Operation::new(specification_id, &field.name, kind, field.name.as_str());
    operation.request_schema = json!({ JSON_CONTENT_TYPE: compiler.root(arguments) });
    operation.response_schemas = json!({ "200": { JSON_CONTENT_TYPE: compiler.root(result) } });

    let mut metadata = Map::new();
    metadata.insert("operation".into(), json!(kind));
    metadata.insert("body".into(), json!(field.signature()));
    if let Some(description) = &field.description {
        metadata.insert("description".into(), json!(description));
    }
    operation.specification = Value::Object(metadata);
    operation
}

/// Named types and root bindings collected from one or more SDL documents.
#[derive(Debug, Default)]
struct Registry {
    types: Vec<GraphQlType>,
    index: HashMap<String, usize>,
    scalars: Vec<String>,
    schema_roots: HashMap<String, String>,
}

impl Registry {
    fn get(&self, name: &str) -> Option<&GraphQlType> {
        self.index.get(name).map(|&i| &self.types[i])
    }

    /// Explicit `schema { ... }` bindings, else conventionally named types.
    fn root_names(&self) -> HashMap<String, String> {
        if !self.schema_roots.is_empty() {
            return self.schema_roots.clone();
        }
        [
            ("query", "Query"),
            ("mutation", "Mutation"),
            ("subscription", "Subscription"),
        ]
        .into_iter()
        .filter(|(_, name)| self.index.contains_key(*name))
        .map(|(kind, name)| (kind.to_string(), name.to_string()))
        .collect()
    }

    /// Insert a definition, or merge into an existing one of the same name.
    fn define(&mut self, definition: GraphQlType) {
        match self.index.get(&definition.name) {
            Some(&i) => {
                let existing = &mut self.types[i];
                existing.kind = definition.kind;
                if existing.description.is_none() {
                    existing.description = definition.description;
                }
                for field in definition.fields {
                    if !existing.fields.iter().any(|f| f.name == field.name) {
                        existing.fields.push(field);
                    }
                }
                for member in definition.members {
                    if !existing.members.contains(&member) {
                        existing.members.push(member);
                    }
                }
            }
            None => {
                self.index.insert(definition.name.clone(), self.types.len());
                self.types.push(definition);
            }
        }
    }

    fn parse(&mut self, document: &SourceDocument) -> Result<(), ResolveError> {
        let mut parser = Parser {
            source: &document.text,
            cursor: Cursor::new(&document.name, &document.text, CommentStyle::Hash)?,
        };
        while !parser.cursor.at_eof() {
            let description = parser.description();
            let extending = parser.cursor.eat_keyword("extend");
            let keyword = parser.cursor.expect_ident()?;
            match keyword.as_str() {
                "schema" => {
                    parser.directives()?;
                    for (kind, name) in parser.schema_block()? {
                        self.schema_roots.insert(kind, name);
                    }
                }
                "type" | "interface" | "input" => {
                    let kind = match keyword.as_str() {
                        "type" => TypeKind::Object,
                        "interface" => TypeKind::Interface,
                        _ => TypeKind::Input,
                    };
                    let name = parser.cursor.expect_ident()?;
                    parser.implements()?;
                    parser.directives()?;
                    let fields = if parser.cursor.is_punct('{') {
                        parser.fields(kind == TypeKind::Input)?
                    } else {
                        Vec::new()
                    };
                    self.define(GraphQlType {
                        name,
                        kind,
                        fields,
                        members: Vec::new(),
                        description,
                    });
                }
                "enum" => {
                    let name = parser.cursor.expect_ident()?;
                    parser.directives()?;
                    let members = parser.enum_values()?;
                    self.define(GraphQlType {
                        name,
                        kind: TypeKind::Enum,
                        fields: Vec::new(),
                        members,
                        description,
                    });
                }
                "union" => {
                    let name = parser.cursor.expect_ident()?;
                    parser.directives()?;
                    let members = parser.union_members()?;
                    self.define(GraphQlType {
                        name,
                        kind: TypeKind::Union,
                        fields: Vec::new(),
                        members,
                        description,
                    });
                }
                "scalar" => {
                    let name = parser.cursor.expect_ident()?;
                    parser.directives()?;
                    if !self.scalars.contains(&name) {
                        self.scalars.push(name);
                    }
                }
                "directive" if !extending => parser.directive_definition()?,
                _ => return Err(parser.cursor.error(format!("unexpected definition '{}'", keyword))),
            }
        }
        Ok(())
    }
}

struct Parser<'a> {
    source: &'a str,
    cursor: Cursor<'a>,
}

impl Parser<'_> {
    fn description(&mut self) -> Option<String> {
        match self.cursor.peek() {
            TokenKind::StringLit(text) => {
                let text = text.trim().to_string();
                self.cursor.advance();
                Some(text)
            }
            _ => None,
        }
    }

    fn directives(&mut self) -> Result<(), ResolveError> {
        while self.cursor.eat_punct('@') {
            self.cursor.expect_ident()?;
            if self.cursor.is_punct('(') {
                self.cursor.skip_balanced('(', ')')?;
            }
        }
        Ok(())
    }

    fn implements(&mut self) -> Result<(), ResolveError> {
        if self.cursor.eat_keyword("implements") {
            self.cursor.eat_punct('&');
            self.cursor.expect_ident()?;
            while self.cursor.eat_punct('&') {
                self.cursor.expect_ident()?;
            }
            // Legacy SDL separated interfaces by whitespace only.
            while matches!(self.cursor.peek(), TokenKind::Ident(_)) && !self.cursor.is_punct('{') {
                if matches!(self.cursor.peek_at(1), TokenKind::Punct(':')) {
                    break;
                }
                if self.at_definition_keyword() {
                    break;
                }
                self.cursor.advance();
            }
        }
        Ok(())
    }

    fn at_definition_keyword(&self) -> bool {
        [
            "type", "interface", "input", "enum", "union", "scalar", "schema", "extend",
            "directive",
        ]
        .iter()
        .any(|keyword| self.cursor.is_keyword(keyword))
    }

    fn schema_block(&mut self) -> Result<Vec<(String, String)>, ResolveError> {
        let mut roots = Vec::new();
        self.cursor.expect_punct('{')?;
        while !self.cursor.eat_punct('}') {
            let kind = self.cursor.expect_ident()?;
            self.cursor.expect_punct(':')?;
            let name = self.cursor.expect_ident()?;
            roots.push((kind, name));
        }
        Ok(roots)
    }

    fn fields(&mut self, input: bool) -> Result<Vec<GraphQlField>, ResolveError> {
        let mut fields = Vec::new();
        self.cursor.expect_punct('{')?;
        while !self.cursor.eat_punct('}') {
            let description = self.description();
            let name = self.cursor.expect_ident()?;
            let arguments = if self.cursor.is_punct('(') {
                self.arguments()?
            } else {
                Vec::new()
            };
            self.cursor.expect_punct(':')?;
            let type_ref = self.type_ref()?;
            if input && self.cursor.eat_punct('=') {
                self.value()?;
            }
            self.directives()?;
            fields.push(GraphQlField {
                name,
                arguments,
                type_ref,
                description,
            });
        }
        Ok(fields)
    }

    fn arguments(&mut self) -> Result<Vec<GraphQlArgument>, ResolveError> {
        let mut arguments = Vec::new();
        self.cursor.expect_punct('(')?;
        while !self.cursor.eat_punct(')') {
            let description = self.description();
            let name = self.cursor.expect_ident()?;
            self.cursor.expect_punct(':')?;
            let type_ref = self.type_ref()?;
            let default_value = if self.cursor.eat_punct('=') {
                Some(self.value()?)
            } else {
                None
            };
            self.directives()?;
            arguments.push(GraphQlArgument {
                name,
                type_ref,
                default_value,
                description,
            });
        }
        Ok(arguments)
    }

    fn type_ref(&mut self) -> Result<TypeRef, ResolveError> {
        let base = if self.cursor.eat_punct('[') {
            let inner = self.type_ref()?;
            self.cursor.expect_punct(']')?;
            TypeRef::List(Box::new(inner))
        } else {
            TypeRef::Named(self.cursor.expect_ident()?)
        };
        if self.cursor.eat_punct('!') {
            Ok(TypeRef::NonNull(Box::new(base)))
        } else {
            Ok(base)
        }
    }

    /// Consume a constant value and return its source text.
    fn value(&mut self) -> Result<String, ResolveError> {
        let start = self.cursor.span().start;
        match self.cursor.peek() {
            TokenKind::Punct('[') => self.cursor.skip_balanced('[', ']')?,
            TokenKind::Punct('{') => self.cursor.skip_balanced('{', '}')?,
            TokenKind::Eof => return Err(self.cursor.unexpected("value")),
            _ => {
                self.cursor.advance();
            }
        }
        let end = self.cursor.previous_end();
        Ok(self.source.get(start..end).unwrap_or_default().trim().to_string())
    }

    fn enum_values(&mut self) -> Result<Vec<String>, ResolveError> {
        let mut values = Vec::new();
        if !self.cursor.eat_punct('{') {
            return Ok(values);
        }
        while !self.cursor.eat_punct('}') {
            self.description();
            values.push(self.cursor.expect_ident()?);
            self.directives()?;
        }
        Ok(values)
    }

    fn union_members(&mut self) -> Result<Vec<String>, ResolveError> {
        let mut members = Vec::new();
        if !self.cursor.eat_punct('=') {
            return Ok(members);
        }
        self.cursor.eat_punct('|');
        members.push(self.cursor.expect_ident()?);
        while self.cursor.eat_punct('|') {
            members.push(self.cursor.expect_ident()?);
        }
        Ok(members)
    }

    fn directive_definition(&mut self) -> Result<(), ResolveError> {
        self.cursor.expect_punct('@')?;
        self.cursor.expect_ident()?;
        if self.cursor.is_punct('(') {
            self.cursor.skip_balanced('(', ')')?;
        }
        self.cursor.eat_keyword("repeatable");
        if !self.cursor.eat_keyword("on") {
            return Err(self.cursor.unexpected("'on'"));
        }
        self.cursor.eat_punct('|');
        self.cursor.expect_ident()?;
        while self.cursor.eat_punct('|') {
            self.cursor.expect_ident()?;
        }
        Ok(())
    }
}

/// Emits JSON Schema for type references, one definition per named type.
struct TypeCompiler<'r> {
    registry: &'r Registry,
    definitions: Map<String, Value>,
}

impl<'r> TypeCompiler<'r> {
    fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            definitions: Map::new(),
        }
    }

    fn type_schema(&mut self, type_ref: &TypeRef) -> Value {
        match type_ref {
            TypeRef::NonNull(inner) => self.type_schema(inner),
            TypeRef::List(inner) => json!({ "type": "array", "items": self.type_schema(inner) }),
            TypeRef::Named(name) => self.named(name),
        }
    }

    fn named(&mut self, name: &str) -> Value {
        if let Some(schema) = builtin_scalar(name) {
            return schema;
        }
        if self.registry.scalars.iter().any(|s| s == name) {
            return json!({ "type": "string", "description": format!("Custom scalar {}", name) });
        }
        if self.definitions.contains_key(name) {
            return definition_ref(name);
        }
        self.definitions.insert(name.to_string(), json!({}));

        let registry = self.registry;
        let body = match registry.get(name) {
            Some(definition) => self.definition_body(definition),
            None => {
                let error = ResolveError::UnresolvedReference {
                    reference: name.to_string(),
                };
                tracing::warn!(%error, "using placeholder definition");
                json!({
                    "type": "object",
                    "description": format!("Unresolved type {}", name),
                })
            }
        };
        self.definitions.insert(name.to_string(), body);
        definition_ref(name)
    }

    fn definition_body(&mut self, definition: &GraphQlType) -> Value {
        let mut body = match definition.kind {
            TypeKind::Enum => json!({ "type": "string", "enum": definition.members }),
            TypeKind::Union => {
                let members: Vec<Value> = definition
                    .members
                    .iter()
                    .map(|member| self.named(member))
                    .collect();
                json!({ "anyOf": members })
            }
            TypeKind::Object | TypeKind::Interface | TypeKind::Input => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in &definition.fields {
                    let mut schema = self.type_schema(&field.type_ref);
                    if let (Some(description), Value::Object(map)) = (&field.description, &mut schema) {
                        map.insert("description".into(), json!(description));
                    }
                    properties.insert(field.name.clone(), schema);
                    if field.type_ref.is_non_null() {
                        required.push(json!(field.name));
                    }
                }
                let mut body = json!({ "type": "object", "properties": properties });
                if !required.is_empty() {
                    body["required"] = Value::Array(required);
                }
                body
            }
        };
        if let Some(description) = &definition.description {
            body["description"] = json!(description);
        }
        body
    }

    fn root(&self, schema: Value) -> Value {
        let closure = reference_closure(&[&schema], &self.definitions);
        with_definitions(schema, closure)
    }
}

fn builtin_scalar(name: &str) -> Option<Value> {
    let schema = match name {
        "Int" => json!({ "type": "integer", "format": "int32" }),
        "Float" => json!({ "type": "number" }),
        "String" | "ID" => json!({ "type": "string" }),
        "Boolean" => json!({ "type": "boolean" }),
        _ => return None,
    };
    Some(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::dangling_refs;

    const PETS: &str = r#"
"""
Pet store.
"""
schema {
  query: Root
  mutation: Changes
}

scalar DateTime

type Root {
  "All pets"
  pets(limit: Int = 10, kind: Kind): [Pet!]!
  pet(id: ID!): Pet
}

type Changes {
  addPet(input: PetInput!): Pet!
}

type Pet implements Node & Named @key(fields: "id") {
  id: ID!
  name: String
  born: DateTime
  kind: Kind
  owner: Person
}

type Person {
  name: String!
  pets: [Pet]
}

input PetInput {
  name: String!
  tags: [String!] = []
}

enum Kind { DOG CAT }

union SearchResult = Pet | Person

directive @key(fields: String!) repeatable on OBJECT | INTERFACE
"#;

    fn resolve_pets() -> (GraphQlData, Vec<Operation>) {
        resolve("spec", &SourceDocument::new("pets.graphql", PETS), &[]).unwrap()
    }

    #[test]
    fn explicit_schema_roots() {
        let (data, ops) = resolve_pets();
        assert_eq!(data.queries.len(), 2);
        assert_eq!(data.mutations.len(), 1);
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].id, "spec-pets");
        assert_eq!(ops[0].method, "query");
        assert_eq!(ops[2].method, "mutation");
        assert_eq!(ops[0].specification["body"], "pets(limit: Int = 10, kind: Kind): [Pet!]!");
        assert_eq!(ops[0].specification["description"], "All pets");
    }

    #[test]
    fn roots_are_excluded_from_types() {
        let (data, _) = resolve_pets();
        let names: Vec<&str> = data.types.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Pet", "Person", "PetInput", "Kind", "SearchResult"]);
        assert_eq!(data.scalars, vec!["DateTime".to_string()]);
    }

    #[test]
    fn arguments_become_request_schema() {
        let (_, ops) = resolve_pets();
        let pet = &ops[1].request_schema[JSON_CONTENT_TYPE];
        assert_eq!(pet["properties"]["id"]["type"], "string");
        assert_eq!(pet["required"], json!(["id"]));

        let add = &ops[2].request_schema[JSON_CONTENT_TYPE];
        assert_eq!(add["properties"]["input"]["$ref"], "#/definitions/PetInput");
        assert_eq!(add["definitions"]["PetInput"]["required"], json!(["name"]));
    }

    #[test]
    fn recursive_types_close_over_definitions() {
        let (_, ops) = resolve_pets();
        let response = &ops[0].response_schemas["200"][JSON_CONTENT_TYPE];
        assert_eq!(response["type"], "array");
        assert_eq!(response["items"]["$ref"], "#/definitions/Pet");
        let definitions = response["definitions"].as_object().unwrap();
        assert!(definitions.contains_key("Person"));
        assert!(definitions.contains_key("Kind"));
        assert!(dangling_refs(response).is_empty());
        assert_eq!(definitions["Kind"]["enum"], json!(["DOG", "CAT"]));
    }

    #[test]
    fn default_roots_and_extensions() {
        let main = SourceDocument::new(
            "a.graphql",
            "type Query { hello: String }\n# comment\ntype Mutation { ping: Boolean }",
        );
        let aux = SourceDocument::new("b.graphqls", "extend type Query { world(n: Int!): [String] }");
        let skipped = SourceDocument::new("notes.txt", "not sdl at all {");
        let (data, ops) = resolve("s", &main, &[aux, skipped]).unwrap();
        assert_eq!(data.queries.len(), 2);
        assert_eq!(ops.iter().map(|op| op.path.as_str()).collect::<Vec<_>>(), vec!["hello", "world", "ping"]);
        assert!(data.types.is_empty());
    }

    #[test]
    fn unknown_types_become_placeholders() {
        let main = SourceDocument::new("a.graphql", "type Query { thing: Missing }");
        let (_, ops) = resolve("s", &main, &[]).unwrap();
        let response = &ops[0].response_schemas["200"][JSON_CONTENT_TYPE];
        assert_eq!(response["definitions"]["Missing"]["type"], "object");
    }

    #[test]
    fn syntax_errors_carry_offsets() {
        let main = SourceDocument::new("bad.graphql", "type Query { broken( }");
        let err = resolve("s", &main, &[]).unwrap_err();
        assert!(matches!(err, ResolveError::Syntax { .. }));
    }
}
