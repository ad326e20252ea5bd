//! OpenAPI 3 (and converted Swagger 2.0) resolution.
//!
//! Parameters stay inline. Body schemas go through [`SchemaExpander`], which
//! turns every `$ref` into a `#/definitions/<Name>` reference and expands each
//! referenced component exactly once.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use super::swagger::convert_swagger;
use super::{OperationSet, SourceDocument};
use crate::error::ResolveError;
use crate::loader::{navigate_fragment, parse_structured};
use crate::schema::{definition_ref, reference_closure, with_definitions, NameAllocator};
use crate::types::Operation;

const METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// Schema keywords whose value is a map of subschemas.
const SCHEMA_MAPS: &[&str] = &[
    "properties",
    "patternProperties",
    "dependentSchemas",
    "$defs",
];
/// Schema keywords whose value is a single subschema.
const SCHEMA_SINGLE: &[&str] = &[
    "items",
    "additionalProperties",
    "additionalItems",
    "not",
    "contains",
    "if",
    "then",
    "else",
    "propertyNames",
    "unevaluatedItems",
    "unevaluatedProperties",
    "contentSchema",
];
/// Schema keywords whose value is a list of subschemas.
const SCHEMA_LISTS: &[&str] = &["allOf", "anyOf", "oneOf", "prefixItems"];

/// An OpenAPI document, normalized to OpenAPI 3 shape.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenApiData {
    pub document: Value,
}

impl OpenApiData {
    /// `servers[*].url` with `{variable}` placeholders replaced by their defaults.
    pub fn server_urls(&self) -> Vec<String> {
        let Some(servers) = self.document.get("servers").and_then(Value::as_array) else {
            return Vec::new();
        };
        servers
            .iter()
            .filter_map(|server| {
                let mut url = server.get("url")?.as_str()?.to_string();
                if let Some(variables) = server.get("variables").and_then(Value::as_object) {
                    for (name, variable) in variables {
                        if let Some(default) = variable.get("default").and_then(Value::as_str) {
                            url = url.replace(&format!("{{{}}}", name), default);
                        }
                    }
                }
                Some(url)
            })
            .collect()
    }
}

/// Expands `$ref`s of one operation into a shared definitions table.
///
/// The reference-to-name entry is registered before the target is expanded,
/// so a component that refers back to itself collapses to a `$ref`.
pub(crate) struct SchemaExpander<'d> {
    document: &'d Value,
    names: HashMap<String, String>,
    definitions: Map<String, Value>,
    allocator: NameAllocator,
}

impl<'d> SchemaExpander<'d> {
    pub(crate) fn new(document: &'d Value) -> Self {
        Self {
            document,
            names: HashMap::new(),
            definitions: Map::new(),
            allocator: NameAllocator::new(),
        }
    }

    pub(crate) fn expand(&mut self, schema: &Value) -> Value {
        let Value::Object(map) = schema else {
            return schema.clone();
        };
        if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
            return self.expand_ref(reference);
        }

        let mut out = Map::new();
        for (key, value) in map {
            let expanded = match (key.as_str(), value) {
                (k, Value::Object(children)) if SCHEMA_MAPS.contains(&k) => Value::Object(
                    children
                        .iter()
                        .map(|(name, child)| (name.clone(), self.expand(child)))
                        .collect(),
                ),
                (k, Value::Object(_)) if SCHEMA_SINGLE.contains(&k) => self.expand(value),
                (k, Value::Array(items)) if SCHEMA_LISTS.contains(&k) || k == "items" => {
                    Value::Array(items.iter().map(|item| self.expand(item)).collect())
                }
                _ => value.clone(),
            };
            out.insert(key.clone(), expanded);
        }
        Value::Object(out)
    }

    fn expand_ref(&mut self, reference: &str) -> Value {
        if let Some(name) = self.names.get(reference) {
            return definition_ref(name);
        }

        let preferred = reference
            .rsplit('/')
            .next()
            .unwrap_or(reference)
            .replace("~1", "/")
            .replace("~0", "~");
        let name = self.allocator.allocate(&preferred);
        self.names.insert(reference.to_string(), name.clone());
        self.definitions.insert(name.clone(), json!({}));

        let document = self.document;
        let target = reference
            .starts_with('#')
            .then(|| navigate_fragment(document, reference))
            .flatten();
        let body = match target {
            Some(target) => self.expand(target),
            None => {
                let error = ResolveError::UnresolvedReference {
                    reference: reference.to_string(),
                };
                tracing::warn!(%error, "using placeholder definition");
                json!({
                    "type": "object",
                    "description": format!("Unresolved reference {}", reference),
                })
            }
        };
        self.definitions.insert(name.clone(), body);
        definition_ref(&name)
    }

    /// Expand `schema` and attach the closure of definitions it reaches.
    pub(crate) fn root(&mut self, schema: &Value) -> Value {
        let expanded = self.expand(schema);
        let closure = reference_closure(&[&expanded], &self.definitions);
        with_definitions(expanded, closure)
    }

    /// Follow a component `$ref` (parameter, request body, response) without
    /// turning it into a definition.
    pub(crate) fn follow<'v>(&self, value: &'v Value) -> &'v Value
    where
        'd: 'v,
    {
        let mut current = value;
        for _ in 0..16 {
            match current.get("$ref").and_then(Value::as_str) {
                Some(reference) => match navigate_fragment(self.document, reference) {
                    Some(target) => current = target,
                    None => break,
                },
                None => break,
            }
        }
        current
    }
}

pub(super) fn resolve(
    specification_id: &str,
    main: &SourceDocument,
) -> Result<(OpenApiData, Vec<Operation>), ResolveError> {
    let raw = parse_structured(&main.text)?;
    let document = if raw.get("swagger").is_some() {
        tracing::debug!(document = %main.name, "converting Swagger 2.0 document");
        convert_swagger(&raw)
    } else {
        raw
    };

    if document
        .get("info")
        .and_then(|info| info.get("title"))
        .and_then(Value::as_str)
        .is_none()
    {
        return Err(ResolveError::structure("OpenAPI", "info.title is required"));
    }

    let mut operations = OperationSet::default();
    if let Some(paths) = document.get("paths").and_then(Value::as_object) {
        for (path, item) in paths {
            for method in METHODS {
                if let Some(operation) = item.get(*method) {
                    operations.push(build_operation(
                        specification_id,
                        &document,
                        path,
                        method,
                        item,
                        operation,
                    ));
                }
            }
        }
    }

    Ok((OpenApiData { document }, operations.into_vec()))
}

/// Fallback id: `{method}_{path}` with every non-alphanumeric run collapsed
/// to one underscore.
fn default_operation_id(method: &str, path: &str) -> String {
    let raw = format!("{}_{}", method, path);
    let mut id = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c);
        } else if !id.ends_with('_') {
            id.push('_');
        }
    }
    id.trim_end_matches('_').to_string()
}

fn build_operation(
    specification_id: &str,
    document: &Value,
    path: &str,
    method: &str,
    item: &Value,
    source: &Value,
) -> Operation {
    let operation_id = source
        .get("operationId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| default_operation_id(method, path));
    let mut operation = Operation::new(
        specification_id,
        &operation_id,
        method.to_ascii_uppercase(),
        path,
    );
    let mut expander = SchemaExpander::new(document);

    let mut request = Map::new();
    let parameters = collect_parameters(&mut expander, item, source);
    if !parameters.is_empty() {
        request.insert("parameters".into(), Value::Array(parameters));
    }
    if let Some(body) = source.get("requestBody") {
        let body = expander.follow(body);
        if let Some(content) = body.get("content").and_then(Value::as_object) {
            for (content_type, media) in content {
                let schema = media.get("schema").cloned().unwrap_or_else(|| json!({}));
                request.insert(content_type.clone(), expander.root(&schema));
            }
        }
    }
    operation.request_schema = Value::Object(request);

    let mut responses = Map::new();
    if let Some(declared) = source.get("responses").and_then(Value::as_object) {
        for (status, response) in declared {
            let response = expander.follow(response);
            let mut by_type = Map::new();
            if let Some(content) = response.get("content").and_then(Value::as_object) {
                for (content_type, media) in content {
                    if let Some(schema) = media.get("schema") {
                        by_type.insert(content_type.clone(), expander.root(schema));
                    }
                }
            }
            responses.insert(status.clone(), Value::Object(by_type));
        }
    }
    operation.response_schemas = Value::Object(responses);

    let mut metadata = Map::new();
    for key in ["operationId", "summary", "description", "tags", "deprecated", "security"] {
        if let Some(value) = source.get(key) {
            metadata.insert(key.into(), value.clone());
        }
    }
    operation.specification = Value::Object(metadata);
    operation
}

/// Path-level and operation-level parameters; the operation wins on a
/// matching `(name, in)` pair.
fn collect_parameters(expander: &mut SchemaExpander<'_>, item: &Value, source: &Value) -> Vec<Value> {
    let listed = |value: &Value| -> Vec<Value> {
        value
            .get("parameters")
            .and_then(Value::as_array)
            .map(|params| params.iter().map(|p| expander.follow(p).clone()).collect())
            .unwrap_or_default()
    };
    let shared = listed(item);
    let own = listed(source);

    let key = |p: &Value| {
        (
            p.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
            p.get("in").and_then(Value::as_str).unwrap_or("").to_string(),
        )
    };
    let mut merged: Vec<Value> = shared
        .into_iter()
        .filter(|s| !own.iter().any(|o| key(o) == key(s)))
        .collect();
    merged.extend(own);

    merged
        .iter()
        .filter(|p| p.get("in").and_then(Value::as_str) != Some("body"))
        .map(|parameter| {
            let mut out = Map::new();
            for key in ["in", "name"] {
                out.insert(key.into(), parameter.get(key).cloned().unwrap_or(Value::Null));
            }
            let schema = parameter_schema(parameter);
            out.insert("schema".into(), expander.root(&schema));
            out.insert(
                "required".into(),
                json!(parameter.get("required").and_then(Value::as_bool).unwrap_or(false)),
            );
            if let Some(description) = parameter.get("description") {
                out.insert("description".into(), description.clone());
            }
            Value::Object(out)
        })
        .collect()
}

/// `schema`, or the schema of the first `content` entry.
fn parameter_schema(parameter: &Value) -> Value {
    parameter
        .get("schema")
        .or_else(|| {
            parameter
                .get("content")
                .and_then(Value::as_object)?
                .values()
                .find_map(|media| media.get("schema"))
        })
        .cloned()
        .unwrap_or_else(|| json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::dangling_refs;

    const PETSTORE: &str = r##"
openapi: 3.0.0
info:
  title: Petstore
  version: 2.0.0
servers:
  - url: https://{env}.example.com/v1/
    variables:
      env:
        default: api
paths:
  /pets:
    parameters:
      - name: limit
        in: query
        schema: { type: integer }
    get:
      summary: List pets
      responses:
        '200':
          description: ok
          content:
            application/json:
              schema:
                type: array
                items: { $ref: '#/components/schemas/Pet' }
    post:
      operationId: createPet
      requestBody:
        $ref: '#/components/requestBodies/PetBody'
      responses:
        '201': { description: created }
components:
  requestBodies:
    PetBody:
      content:
        application/json:
          schema: { $ref: '#/components/schemas/Pet' }
  schemas:
    Pet:
      type: object
      required: [name]
      properties:
        name: { type: string }
        owner: { $ref: '#/components/schemas/Owner' }
    Owner:
      type: object
      properties:
        pets:
          type: array
          items: { $ref: '#/components/schemas/Pet' }
    Unused:
      type: string
"##;

    fn resolve_petstore() -> (OpenApiData, Vec<Operation>) {
        resolve("spec", &SourceDocument::new("petstore.yaml", PETSTORE)).unwrap()
    }

    #[test]
    fn happy_path_operations() {
        let (data, ops) = resolve_petstore();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].id, "spec-get_pets");
        assert_eq!(ops[0].method, "GET");
        assert_eq!(ops[0].path, "/pets");
        assert_eq!(ops[1].id, "spec-createPet");
        assert_eq!(data.server_urls(), vec!["https://api.example.com/v1/".to_string()]);
    }

    #[test]
    fn parameters_stay_inline() {
        let (_, ops) = resolve_petstore();
        let params = ops[0].request_schema["parameters"].as_array().unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0]["in"], "query");
        assert_eq!(params[0]["required"], false);
        assert_eq!(params[0]["schema"]["type"], "integer");
    }

    #[test]
    fn cyclic_components_expand_once() {
        let (_, ops) = resolve_petstore();
        let root = &ops[0].response_schemas["200"]["application/json"];
        assert_eq!(root["items"], json!({ "$ref": "#/definitions/Pet" }));
        let definitions = root["definitions"].as_object().unwrap();
        let names: Vec<&String> = definitions.keys().collect();
        assert_eq!(names, vec!["Owner", "Pet"]);
        assert_eq!(
            definitions["Owner"]["properties"]["pets"]["items"],
            json!({ "$ref": "#/definitions/Pet" })
        );
        assert!(dangling_refs(root).is_empty());
    }

    #[test]
    fn request_body_ref_is_followed() {
        let (_, ops) = resolve_petstore();
        let body = &ops[1].request_schema["application/json"];
        assert_eq!(body["$ref"], "#/definitions/Pet");
        assert!(ops[1].response_schemas["201"].as_object().unwrap().is_empty());
    }

    #[test]
    fn missing_title_is_rejected() {
        let doc = SourceDocument::new("a.yaml", "openapi: 3.0.0\ninfo: {version: '1'}\npaths: {}\n");
        let err = resolve("s", &doc).unwrap_err();
        assert!(err.to_string().contains("info.title"));
    }

    #[test]
    fn unresolvable_ref_becomes_placeholder() {
        let doc = SourceDocument::new(
            "a.json",
            r##"{"openapi":"3.0.0","info":{"title":"t"},"paths":{"/a":{"get":{"responses":{"200":{"description":"","content":{"application/json":{"schema":{"$ref":"#/components/schemas/Nope"}}}}}}}}}"##,
        );
        let (_, ops) = resolve("s", &doc).unwrap();
        let root = &ops[0].response_schemas["200"]["application/json"];
        assert_eq!(root["$ref"], "#/definitions/Nope");
        assert_eq!(root["definitions"]["Nope"]["type"], "object");
    }

    #[test]
    fn swagger_documents_are_converted() {
        let doc = SourceDocument::new(
            "swagger.json",
            r##"{"swagger":"2.0","info":{"title":"t","version":"3.1"},"host":"h.io","paths":{"/x":{"post":{"parameters":[{"in":"body","name":"b","schema":{"$ref":"#/definitions/X"}}],"responses":{}}}},"definitions":{"X":{"type":"string"}}}"##,
        );
        let (data, ops) = resolve("s", &doc).unwrap();
        assert_eq!(data.server_urls(), vec!["https://h.io".to_string()]);
        assert_eq!(ops[0].request_schema["application/xml"]["definitions"]["X"]["type"], "string");
    }

    #[test]
    fn default_ids_are_sanitized() {
        assert_eq!(default_operation_id("get", "/pets"), "get_pets");
        assert_eq!(default_operation_id("delete", "/pets/{petId}/tags"), "delete_pets_petId_tags");
    }

    #[test]
    fn same_named_components_get_distinct_definitions() {
        let document = json!({
            "components": {
                "schemas": { "Item": { "type": "string" } },
                "responses": { "Item": { "type": "integer" } }
            }
        });
        let mut expander = SchemaExpander::new(&document);
        let root = expander.root(&json!({
            "properties": {
                "a": { "$ref": "#/components/schemas/Item" },
                "b": { "$ref": "#/components/responses/Item" }
            }
        }));
        assert_eq!(root["properties"]["b"]["$ref"], "#/definitions/Item_2");
        assert_eq!(root["definitions"]["Item_2"]["type"], "integer");
    }

    #[test]
    fn conditional_and_tuple_keywords_are_expanded() {
        let text = r##"
openapi: 3.1.0
info: { title: Shapes, version: '1' }
paths:
  /shapes:
    post:
      operationId: addShape
      requestBody:
        content:
          application/json:
            schema:
              type: object
              if: { $ref: '#/components/schemas/A' }
              then: { $ref: '#/components/schemas/B' }
              else: { propertyNames: { $ref: '#/components/schemas/Key' } }
              prefixItems: [{ $ref: '#/components/schemas/A' }]
              dependentSchemas:
                extra: { $ref: '#/components/schemas/B' }
      responses: {}
components:
  schemas:
    A: { type: object, required: [kind] }
    B: { type: object, properties: { size: { type: number } } }
    Key: { type: string, pattern: '^[a-z]+$' }
"##;
        let (_, ops) = resolve("s", &SourceDocument::new("shapes.yaml", text)).unwrap();
        let root = &ops[0].request_schema["application/json"];
        assert_eq!(root["if"], json!({ "$ref": "#/definitions/A" }));
        assert_eq!(root["then"], json!({ "$ref": "#/definitions/B" }));
        assert_eq!(root["else"]["propertyNames"], json!({ "$ref": "#/definitions/Key" }));
        assert_eq!(root["prefixItems"][0], json!({ "$ref": "#/definitions/A" }));
        assert_eq!(root["dependentSchemas"]["extra"], json!({ "$ref": "#/definitions/B" }));
        assert!(!root.to_string().contains("#/components"));
        assert!(dangling_refs(root).is_empty());
    }

    #[test]
    fn content_parameters_use_media_schema() {
        let text = r##"
openapi: 3.0.3
info: { title: Search, version: '1' }
paths:
  /search:
    get:
      operationId: search
      parameters:
        - name: filter
          in: query
          content:
            application/json:
              schema: { $ref: '#/components/schemas/Filter' }
      responses: {}
components:
  schemas:
    Filter: { type: object, properties: { term: { type: string } } }
"##;
        let (_, ops) = resolve("s", &SourceDocument::new("search.yaml", text)).unwrap();
        let schema = &ops[0].request_schema["parameters"][0]["schema"];
        assert_eq!(schema["$ref"], "#/definitions/Filter");
        assert_eq!(schema["definitions"]["Filter"]["properties"]["term"]["type"], "string");
    }
}
