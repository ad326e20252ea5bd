//! Swagger 2.0 to OpenAPI 3 normalization.

use serde_json::{json, Map, Value};

use crate::loader::navigate_fragment;

const JSON: &str = "application/json";
const XML: &str = "application/xml";
const METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch"];

/// Keys copied from a non-body Swagger parameter into its OpenAPI 3 schema.
const SCHEMA_KEYS: &[&str] = &[
    "type",
    "format",
    "items",
    "enum",
    "default",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "minLength",
    "maxLength",
    "pattern",
    "minItems",
    "maxItems",
    "uniqueItems",
    "multipleOf",
];

/// Convert a Swagger 2.0 document into OpenAPI 3 shape.
///
/// `host`, `schemes` and `basePath` become `servers[0]` (the first scheme
/// wins, `https` when none is declared). Body parameters become a request body
/// carrying one schema for both JSON and XML; form parameters are synthesized
/// into an object schema.
pub fn convert_swagger(swagger: &Value) -> Value {
    let mut out = Map::new();
    out.insert("openapi".into(), json!("3.0.3"));
    out.insert(
        "info".into(),
        swagger.get("info").cloned().unwrap_or_else(|| json!({})),
    );

    if let Some(url) = server_url(swagger) {
        out.insert("servers".into(), json!([{ "url": url }]));
    }

    let global_consumes = media_types(swagger.get("consumes"));
    let global_produces = media_types(swagger.get("produces"));

    let mut paths = Map::new();
    if let Some(source) = swagger.get("paths").and_then(Value::as_object) {
        for (path, item) in source {
            paths.insert(
                path.clone(),
                convert_path_item(swagger, item, &global_consumes, &global_produces),
            );
        }
    }
    out.insert("paths".into(), Value::Object(paths));

    let mut components = Map::new();
    if let Some(definitions) = swagger.get("definitions") {
        components.insert("schemas".into(), definitions.clone());
    }
    if let Some(responses) = swagger.get("responses").and_then(Value::as_object) {
        let converted: Map<String, Value> = responses
            .iter()
            .map(|(name, response)| (name.clone(), convert_response(response, &global_produces)))
            .collect();
        components.insert("responses".into(), Value::Object(converted));
    }
    if let Some(security) = swagger.get("securityDefinitions").and_then(Value::as_object) {
        let schemes: Map<String, Value> = security
            .iter()
            .map(|(name, scheme)| (name.clone(), convert_security_scheme(scheme)))
            .collect();
        components.insert("securitySchemes".into(), Value::Object(schemes));
    }
    if !components.is_empty() {
        out.insert("components".into(), Value::Object(components));
    }

    for key in ["security", "tags", "externalDocs"] {
        if let Some(value) = swagger.get(key) {
            out.insert(key.into(), value.clone());
        }
    }

    let mut converted = Value::Object(out);
    rewrite_refs(&mut converted);
    converted
}

fn server_url(swagger: &Value) -> Option<String> {
    let base_path = swagger
        .get("basePath")
        .and_then(Value::as_str)
        .unwrap_or("");
    match swagger.get("host").and_then(Value::as_str) {
        Some(host) => {
            let scheme = swagger
                .get("schemes")
                .and_then(Value::as_array)
                .and_then(|schemes| schemes.first())
                .and_then(Value::as_str)
                .unwrap_or("https");
            Some(format!("{}://{}{}", scheme, host, base_path))
        }
        None if !base_path.is_empty() => Some(base_path.to_string()),
        None => None,
    }
}

fn media_types(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|types| {
            types
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Inline a `#/parameters/X` reference; other values pass through.
fn inline_parameter<'a>(swagger: &'a Value, parameter: &'a Value) -> &'a Value {
    match parameter.get("$ref").and_then(Value::as_str) {
        Some(reference) if reference.starts_with("#/parameters/") => {
            navigate_fragment(swagger, reference).unwrap_or(parameter)
        }
        _ => parameter,
    }
}

fn convert_path_item(
    swagger: &Value,
    item: &Value,
    global_consumes: &[String],
    global_produces: &[String],
) -> Value {
    let shared: Vec<&Value> = item
        .get("parameters")
        .and_then(Value::as_array)
        .map(|params| params.iter().map(|p| inline_parameter(swagger, p)).collect())
        .unwrap_or_default();

    let mut out = Map::new();
    for key in ["summary", "description"] {
        if let Some(value) = item.get(key) {
            out.insert(key.into(), value.clone());
        }
    }
    for method in METHODS {
        if let Some(operation) = item.get(*method) {
            out.insert(
                (*method).to_string(),
                convert_operation(swagger, operation, &shared, global_consumes, global_produces),
            );
        }
    }
    Value::Object(out)
}

fn convert_operation(
    swagger: &Value,
    operation: &Value,
    shared: &[&Value],
    global_consumes: &[String],
    global_produces: &[String],
) -> Value {
    let mut out = Map::new();
    for key in [
        "operationId",
        "summary",
        "description",
        "tags",
        "deprecated",
        "security",
        "externalDocs",
    ] {
        if let Some(value) = operation.get(key) {
            out.insert(key.into(), value.clone());
        }
    }

    let consumes = match media_types(operation.get("consumes")) {
        own if !own.is_empty() => own,
        _ => global_consumes.to_vec(),
    };
    let produces = match media_types(operation.get("produces")) {
        own if !own.is_empty() => own,
        _ => global_produces.to_vec(),
    };

    // Operation-level parameters override path-level ones with the same name and location.
    let own: Vec<&Value> = operation
        .get("parameters")
        .and_then(Value::as_array)
        .map(|params| params.iter().map(|p| inline_parameter(swagger, p)).collect())
        .unwrap_or_default();
    let key = |p: &Value| {
        (
            p.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
            p.get("in").and_then(Value::as_str).unwrap_or("").to_string(),
        )
    };
    let mut parameters: Vec<&Value> = shared
        .iter()
        .copied()
        .filter(|s| !own.iter().any(|o| key(*o) == key(*s)))
        .collect();
    parameters.extend(own);

    let mut converted = Vec::new();
    let mut form = FormBody::default();
    for parameter in parameters {
        match parameter.get("in").and_then(Value::as_str) {
            Some("body") => {
                let schema = parameter.get("schema").cloned().unwrap_or_else(|| json!({}));
                let mut body = Map::new();
                if let Some(description) = parameter.get("description") {
                    body.insert("description".into(), description.clone());
                }
                body.insert(
                    "content".into(),
                    json!({ JSON: { "schema": schema }, XML: { "schema": schema } }),
                );
                if parameter.get("required") == Some(&Value::Bool(true)) {
                    body.insert("required".into(), json!(true));
                }
                out.insert("requestBody".into(), Value::Object(body));
            }
            Some("formData") => form.add(parameter),
            Some(_) => converted.push(convert_parameter(parameter)),
            None => {}
        }
    }
    if !converted.is_empty() {
        out.insert("parameters".into(), Value::Array(converted));
    }
    if !out.contains_key("requestBody") && !form.is_empty() {
        out.insert("requestBody".into(), form.into_request_body(&consumes));
    }

    if let Some(responses) = operation.get("responses").and_then(Value::as_object) {
        let converted: Map<String, Value> = responses
            .iter()
            .map(|(status, response)| (status.clone(), convert_response(response, &produces)))
            .collect();
        out.insert("responses".into(), Value::Object(converted));
    }

    Value::Object(out)
}

fn parameter_schema(parameter: &Value) -> Value {
    let mut schema = Map::new();
    for key in SCHEMA_KEYS {
        if let Some(value) = parameter.get(*key) {
            schema.insert((*key).to_string(), value.clone());
        }
    }
    if schema.get("type").and_then(Value::as_str) == Some("file") {
        schema.insert("type".into(), json!("string"));
        schema.insert("format".into(), json!("binary"));
    }
    Value::Object(schema)
}

fn convert_parameter(parameter: &Value) -> Value {
    let mut out = Map::new();
    for key in ["name", "in", "description", "required"] {
        if let Some(value) = parameter.get(key) {
            out.insert(key.into(), value.clone());
        }
    }
    out.insert("schema".into(), parameter_schema(parameter));
    Value::Object(out)
}

#[derive(Default)]
struct FormBody {
    properties: Map<String, Value>,
    required: Vec<String>,
    has_file: bool,
}

impl FormBody {
    fn add(&mut self, parameter: &Value) {
        let Some(name) = parameter.get("name").and_then(Value::as_str) else {
            return;
        };
        if parameter.get("type").and_then(Value::as_str) == Some("file") {
            self.has_file = true;
        }
        let mut schema = parameter_schema(parameter);
        if let (Some(description), Value::Object(map)) = (parameter.get("description"), &mut schema)
        {
            map.insert("description".into(), description.clone());
        }
        if parameter.get("required") == Some(&Value::Bool(true)) {
            self.required.push(name.to_string());
        }
        self.properties.insert(name.to_string(), schema);
    }

    fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    fn into_request_body(self, consumes: &[String]) -> Value {
        let content_type = if self.has_file {
            "multipart/form-data"
        } else if consumes.iter().any(|c| c == "multipart/form-data") {
            "multipart/form-data"
        } else {
            "application/x-www-form-urlencoded"
        };
        let mut schema = Map::new();
        schema.insert("type".into(), json!("object"));
        schema.insert("properties".into(), Value::Object(self.properties));
        if !self.required.is_empty() {
            schema.insert("required".into(), json!(self.required));
        }
        json!({ "content": { content_type: { "schema": schema } } })
    }
}

fn convert_response(response: &Value, produces: &[String]) -> Value {
    if response.get("$ref").is_some() {
        return response.clone();
    }
    let mut out = Map::new();
    out.insert(
        "description".into(),
        response.get("description").cloned().unwrap_or_else(|| json!("")),
    );
    if let Some(schema) = response.get("schema") {
        let mut content = Map::new();
        if produces.is_empty() {
            content.insert(JSON.into(), json!({ "schema": schema }));
        }
        for media_type in produces {
            content.insert(media_type.clone(), json!({ "schema": schema }));
        }
        out.insert("content".into(), Value::Object(content));
    }
    if let Some(headers) = response.get("headers").and_then(Value::as_object) {
        let converted: Map<String, Value> = headers
            .iter()
            .map(|(name, header)| {
                let mut out = Map::new();
                if let Some(description) = header.get("description") {
                    out.insert("description".into(), description.clone());
                }
                out.insert("schema".into(), parameter_schema(header));
                (name.clone(), Value::Object(out))
            })
            .collect();
        out.insert("headers".into(), Value::Object(converted));
    }
    Value::Object(out)
}

fn convert_security_scheme(scheme: &Value) -> Value {
    match scheme.get("type").and_then(Value::as_str) {
        Some("basic") => json!({ "type": "http", "scheme": "basic" }),
        Some("apiKey") => json!({
            "type": "apiKey",
            "name": scheme.get("name").cloned().unwrap_or(Value::Null),
            "in": scheme.get("in").cloned().unwrap_or(Value::Null),
        }),
        Some("oauth2") => {
            let flow = match scheme.get("flow").and_then(Value::as_str) {
                Some("implicit") => "implicit",
                Some("password") => "password",
                Some("application") => "clientCredentials",
                _ => "authorizationCode",
            };
            let mut details = Map::new();
            for key in ["authorizationUrl", "tokenUrl"] {
                if let Some(value) = scheme.get(key) {
                    details.insert(key.into(), value.clone());
                }
            }
            details.insert(
                "scopes".into(),
                scheme.get("scopes").cloned().unwrap_or_else(|| json!({})),
            );
            json!({ "type": "oauth2", "flows": { flow: details } })
        }
        _ => scheme.clone(),
    }
}

/// Rewrite Swagger component pointers to their OpenAPI 3 locations.
fn rewrite_refs(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get_mut("$ref") {
                if let Some(name) = reference.strip_prefix("#/definitions/") {
                    *reference = format!("#/components/schemas/{}", name);
                } else if let Some(name) = reference.strip_prefix("#/responses/") {
                    *reference = format!("#/components/responses/{}", name);
                }
            }
            for child in map.values_mut() {
                rewrite_refs(child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(rewrite_refs),
        _ => {}
    }
}
