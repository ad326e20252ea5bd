//! XSD to JSON Schema compilation.
//!
//! Named declarations are compiled at most once per root schema. Each one is
//! memoized by `namespace#localName` (element and type spaces kept apart) and
//! given a definition name; the cache entry and a placeholder definition are
//! registered before the body is compiled, so recursive types resolve to a
//! `$ref` to their own definition.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Map, Number, Value};

use super::xml::{QualifiedName, XmlElement, XSD_NAMESPACE};
use crate::error::ResolveError;
use crate::schema::{definition_name, definition_ref, NameAllocator};

/// A global declaration together with the target namespace of its schema.
#[derive(Debug, Clone, Copy)]
pub struct Declaration<'a> {
    pub element: &'a XmlElement,
    pub target_namespace: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Space {
    Element,
    ComplexType,
    SimpleType,
    Group,
    AttributeGroup,
}

impl Space {
    fn of(local_name: &str) -> Option<Self> {
        match local_name {
            "element" => Some(Space::Element),
            "complexType" => Some(Space::ComplexType),
            "simpleType" => Some(Space::SimpleType),
            "group" => Some(Space::Group),
            "attributeGroup" => Some(Space::AttributeGroup),
            _ => None,
        }
    }
}

/// In-memory index of all global declarations harvested from XSD documents.
#[derive(Debug, Default)]
pub struct SchemaIndex<'a> {
    declarations: HashMap<(Space, String), Declaration<'a>>,
    by_local_name: HashMap<(Space, String), Declaration<'a>>,
}

impl<'a> SchemaIndex<'a> {
    pub fn build(schemas: &'a [XmlElement]) -> Self {
        let mut index = SchemaIndex::default();
        for schema in schemas {
            let target_namespace = schema.attr("targetNamespace").unwrap_or("");
            for child in &schema.children {
                let (Some(space), Some(name)) = (Space::of(&child.local_name), child.attr("name"))
                else {
                    continue;
                };
                let declaration = Declaration {
                    element: child,
                    target_namespace,
                };
                let key = QualifiedName::new(target_namespace, name).key();
                index
                    .declarations
                    .entry((space, key))
                    .or_insert(declaration);
                index
                    .by_local_name
                    .entry((space, name.to_string()))
                    .or_insert(declaration);
            }
        }
        index
    }

    fn find(&self, space: Space, name: &QualifiedName) -> Option<Declaration<'a>> {
        self.declarations
            .get(&(space, name.key()))
            .or_else(|| self.by_local_name.get(&(space, name.local.clone())))
            .copied()
    }

    pub fn element(&self, name: &QualifiedName) -> Option<Declaration<'a>> {
        self.find(Space::Element, name)
    }

    pub fn type_definition(&self, name: &QualifiedName) -> Option<Declaration<'a>> {
        self.find(Space::ComplexType, name)
            .or_else(|| self.find(Space::SimpleType, name))
    }

    pub fn declaration_count(&self) -> usize {
        self.declarations.len()
    }
}

/// Accumulates the properties of one object schema.
#[derive(Debug, Default)]
struct ObjectBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
    choices: Vec<Vec<Value>>,
    all_of: Vec<Value>,
    open: bool,
}

impl ObjectBuilder {
    fn property(&mut self, name: String, schema: Value, required: bool) {
        if required && !self.required.contains(&name) {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
    }

    /// Fold an already compiled object schema (an extension base) into this one.
    fn merge(&mut self, base: &Map<String, Value>) {
        if let Some(Value::Object(props)) = base.get("properties") {
            for (name, schema) in props {
                self.properties.insert(name.clone(), schema.clone());
            }
        }
        if let Some(Value::Array(required)) = base.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if !self.required.iter().any(|r| r == name) {
                    self.required.push(name.to_string());
                }
            }
        }
        if let Some(Value::Array(branches)) = base.get("anyOf") {
            self.choices.push(branches.clone());
        }
        if let Some(Value::Array(parts)) = base.get("allOf") {
            self.all_of.extend(parts.iter().cloned());
        }
        if base.get("additionalProperties") == Some(&Value::Bool(true)) {
            self.open = true;
        }
    }

    fn into_schema(self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!("object"));
        schema.insert("properties".into(), Value::Object(self.properties));
        if !self.required.is_empty() {
            schema.insert("required".into(), json!(self.required));
        }
        let mut all_of = self.all_of;
        let mut choices = self.choices.into_iter();
        if let Some(first) = choices.next() {
            schema.insert("anyOf".into(), Value::Array(first));
        }
        all_of.extend(choices.map(|branches| json!({ "anyOf": branches })));
        if !all_of.is_empty() {
            schema.insert("allOf".into(), Value::Array(all_of));
        }
        if self.open {
            schema.insert("additionalProperties".into(), Value::Bool(true));
        }
        Value::Object(schema)
    }
}

/// Compiles XSD declarations into one root's JSON Schema definitions.
pub struct XsdCompiler<'i, 'a> {
    index: &'i SchemaIndex<'a>,
    cache: HashMap<String, Value>,
    definitions: Map<String, Value>,
    in_progress: HashSet<String>,
    names: NameAllocator,
    group_stack: Vec<String>,
}

impl<'i, 'a> XsdCompiler<'i, 'a> {
    pub fn new(index: &'i SchemaIndex<'a>) -> Self {
        Self {
            index,
            cache: HashMap::new(),
            definitions: Map::new(),
            in_progress: HashSet::new(),
            names: NameAllocator::new(),
            group_stack: Vec::new(),
        }
    }

    /// Definitions produced so far.
    pub fn into_definitions(self) -> Map<String, Value> {
        self.definitions
    }

    /// Schema of a global element (message part `element=`).
    pub fn element_schema(&mut self, name: &QualifiedName) -> Value {
        let key = format!("element:{}", name.key());
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let Some(declaration) = self.index.element(name) else {
            return self.unresolved(key, name, json!({ "type": "object" }));
        };
        let element = declaration.element;

        if let Some(type_name) = element.attr("type") {
            let schema = self.type_schema(&element.resolve_qname(type_name));
            self.cache.insert(key, schema.clone());
            return schema;
        }

        let reference = self.reserve(key, &name.local);
        let body = self.inline_element_type(element, declaration.target_namespace);
        self.fill(&reference, body);
        reference
    }

    /// Schema of a named type (message part `type=` or element `type=`).
    pub fn type_schema(&mut self, name: &QualifiedName) -> Value {
        if name.namespace == XSD_NAMESPACE {
            return Value::Object(primitive(&name.local));
        }

        let key = format!("type:{}", name.key());
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let Some(declaration) = self.index.type_definition(name) else {
            if let Some(builtin) = builtin(&name.local) {
                return Value::Object(builtin);
            }
            return self.unresolved(key, name, json!({ "type": "string" }));
        };

        let reference = self.reserve(key, &name.local);
        let body = if declaration.element.is("complexType") {
            self.complex_type(declaration.element, declaration.target_namespace)
        } else {
            self.simple_type(declaration.element, declaration.target_namespace)
        };
        self.fill(&reference, body);
        reference
    }

    /// Register the cache entry and a placeholder definition before the body
    /// is compiled.
    fn reserve(&mut self, key: String, preferred: &str) -> Value {
        let name = self.names.allocate(preferred);
        let reference = definition_ref(&name);
        self.cache.insert(key, reference.clone());
        self.definitions.insert(name.clone(), json!({}));
        self.in_progress.insert(name);
        reference
    }

    fn fill(&mut self, reference: &Value, body: Value) {
        if let Some(name) = reference_name(reference) {
            self.in_progress.remove(&name);
            self.definitions.insert(name, body);
        }
    }

    fn unresolved(&mut self, key: String, name: &QualifiedName, mut placeholder: Value) -> Value {
        let error = ResolveError::UnresolvedReference {
            reference: name.to_string(),
        };
        tracing::warn!(%error, "using placeholder definition");
        if let Value::Object(map) = &mut placeholder {
            map.insert(
                "description".into(),
                json!(format!("Unresolved reference {}", name)),
            );
        }
        let reference = self.reserve(key, &name.local);
        self.fill(&reference, placeholder);
        reference
    }

    /// Body of an already compiled definition, unless it is still being built.
    fn compiled_body(&self, reference: &Value) -> Option<Map<String, Value>> {
        let name = reference_name(reference)?;
        if self.in_progress.contains(&name) {
            return None;
        }
        self.definitions.get(&name)?.as_object().cloned()
    }

    fn inline_element_type(&mut self, element: &XmlElement, tns: &str) -> Value {
        let mut schema = if let Some(complex) = element.child("complexType") {
            self.complex_type(complex, tns)
        } else if let Some(simple) = element.child("simpleType") {
            self.simple_type(simple, tns)
        } else {
            json!({})
        };
        describe(&mut schema, element);
        schema
    }

    fn complex_type(&mut self, complex: &XmlElement, tns: &str) -> Value {
        let mut object = ObjectBuilder::default();
        self.complex_body(complex, tns, &mut object);
        let mut schema = object.into_schema();
        describe(&mut schema, complex);
        schema
    }

    fn complex_body(&mut self, parent: &XmlElement, tns: &str, object: &mut ObjectBuilder) {
        for child in &parent.children {
            match child.local_name.as_str() {
                "sequence" | "all" => self.content_model(child, tns, object, false),
                "choice" => self.choice(child, tns, object, false),
                "group" => self.group(child, tns, object, false),
                "attribute" => self.attribute(child, tns, object),
                "attributeGroup" => self.attribute_group(child, tns, object),
                "anyAttribute" => {}
                "complexContent" => self.complex_content(child, tns, object),
                "simpleContent" => self.simple_content(child, tns, object),
                _ => {}
            }
        }
    }

    fn content_model(
        &mut self,
        model: &XmlElement,
        tns: &str,
        object: &mut ObjectBuilder,
        optional: bool,
    ) {
        let optional = optional || min_occurs(model) == 0;
        for child in &model.children {
            match child.local_name.as_str() {
                "element" => {
                    let (name, schema, required) = self.particle(child, tns);
                    object.property(name, schema, required && !optional);
                }
                "sequence" | "all" => self.content_model(child, tns, object, optional),
                "choice" => self.choice(child, tns, object, optional),
                "group" => self.group(child, tns, object, optional),
                "any" => object.open = true,
                _ => {}
            }
        }
    }

    fn choice(&mut self, choice: &XmlElement, tns: &str, object: &mut ObjectBuilder, optional: bool) {
        let optional = optional || min_occurs(choice) == 0;
        let mut branches = Vec::new();
        for child in &choice.children {
            let mut branch = ObjectBuilder::default();
            match child.local_name.as_str() {
                "element" => {
                    let (name, schema, required) = self.particle(child, tns);
                    branch.property(name, schema, required && !optional);
                }
                "sequence" | "all" => self.content_model(child, tns, &mut branch, optional),
                "choice" => self.choice(child, tns, &mut branch, optional),
                "group" => self.group(child, tns, &mut branch, optional),
                "any" => branch.open = true,
                _ => continue,
            }
            branches.push(branch.into_schema());
        }
        if !branches.is_empty() {
            object.choices.push(branches);
        }
    }

    fn group(&mut self, group: &XmlElement, _tns: &str, object: &mut ObjectBuilder, optional: bool) {
        let Some(reference) = group.attr("ref") else {
            return;
        };
        let name = group.resolve_qname(reference);
        let key = name.key();
        if self.group_stack.contains(&key) {
            return;
        }
        let Some(declaration) = self.index.find(Space::Group, &name) else {
            let error = ResolveError::UnresolvedReference {
                reference: name.to_string(),
            };
            tracing::warn!(%error, "skipping model group");
            return;
        };

        let optional = optional || min_occurs(group) == 0;
        self.group_stack.push(key);
        for child in &declaration.element.children {
            match child.local_name.as_str() {
                "sequence" | "all" => {
                    self.content_model(child, declaration.target_namespace, object, optional)
                }
                "choice" => self.choice(child, declaration.target_namespace, object, optional),
                _ => {}
            }
        }
        self.group_stack.pop();
    }

    /// Compile a local element particle into `(property name, schema, required)`.
    fn particle(&mut self, element: &XmlElement, tns: &str) -> (String, Value, bool) {
        let (name, mut schema) = if let Some(reference) = element.attr("ref") {
            let qname = element.resolve_qname(reference);
            let schema = self.element_schema(&qname);
            (qname.local, schema)
        } else {
            let name = element.attr("name").unwrap_or("element").to_string();
            let schema = match element.attr("type") {
                Some(type_name) => self.type_schema(&element.resolve_qname(type_name)),
                None => self.inline_element_type(element, tns),
            };
            (name, schema)
        };

        if schema.get("$ref").is_none() {
            describe(&mut schema, element);
        }

        let required = min_occurs(element) > 0;
        let schema = match max_occurs(element) {
            Occurs::Unbounded => json!({ "type": "array", "items": schema }),
            Occurs::Bounded(max) if max > 1 => {
                json!({ "type": "array", "items": schema, "maxItems": max })
            }
            _ => schema,
        };
        (name, schema, required)
    }

    fn attribute(&mut self, attribute: &XmlElement, tns: &str, object: &mut ObjectBuilder) {
        let use_ = attribute.attr("use").unwrap_or("optional");
        if use_ == "prohibited" {
            return;
        }
        let name = match (attribute.attr("name"), attribute.attr("ref")) {
            (Some(name), _) => name.to_string(),
            (None, Some(reference)) => attribute.resolve_qname(reference).local,
            (None, None) => return,
        };
        let mut schema = if let Some(type_name) = attribute.attr("type") {
            self.type_schema(&attribute.resolve_qname(type_name))
        } else if let Some(simple) = attribute.child("simpleType") {
            self.simple_type(simple, tns)
        } else {
            json!({ "type": "string" })
        };
        if let (Some(default), Value::Object(map)) =
            (attribute.attr("default").or(attribute.attr("fixed")), &mut schema)
        {
            if !map.contains_key("$ref") {
                map.insert("default".into(), json!(default));
            }
        }
        object.property(name, schema, use_ == "required");
    }

    fn attribute_group(&mut self, group: &XmlElement, _tns: &str, object: &mut ObjectBuilder) {
        let Some(reference) = group.attr("ref") else {
            return;
        };
        let name = group.resolve_qname(reference);
        let key = format!("attributes:{}", name.key());
        if self.group_stack.contains(&key) {
            return;
        }
        let Some(declaration) = self.index.find(Space::AttributeGroup, &name) else {
            let error = ResolveError::UnresolvedReference {
                reference: name.to_string(),
            };
            tracing::warn!(%error, "skipping attribute group");
            return;
        };
        self.group_stack.push(key);
        for child in &declaration.element.children {
            match child.local_name.as_str() {
                "attribute" => self.attribute(child, declaration.target_namespace, object),
                "attributeGroup" => {
                    self.attribute_group(child, declaration.target_namespace, object)
                }
                _ => {}
            }
        }
        self.group_stack.pop();
    }

    fn complex_content(&mut self, content: &XmlElement, tns: &str, object: &mut ObjectBuilder) {
        if let Some(extension) = content.child("extension") {
            if let Some(base) = extension.attr("base") {
                let base = extension.resolve_qname(base);
                if !(base.namespace == XSD_NAMESPACE && base.local == "anyType") {
                    let reference = self.type_schema(&base);
                    match self.compiled_body(&reference) {
                        Some(body) => object.merge(&body),
                        // Base is still being compiled further up the stack.
                        None => object.all_of.push(reference),
                    }
                }
            }
            self.complex_body(extension, tns, object);
        } else if let Some(restriction) = content.child("restriction") {
            self.complex_body(restriction, tns, object);
        }
    }

    fn simple_content(&mut self, content: &XmlElement, tns: &str, object: &mut ObjectBuilder) {
        let Some(derivation) = content
            .child("extension")
            .or_else(|| content.child("restriction"))
        else {
            return;
        };

        let value = if derivation.is("restriction") {
            self.restriction(derivation, tns)
        } else {
            match derivation.attr("base") {
                Some(base) => self.type_schema(&derivation.resolve_qname(base)),
                None => json!({ "type": "string" }),
            }
        };

        match self.compiled_body(&value) {
            Some(body) if body.contains_key("properties") => object.merge(&body),
            _ => object.property("value".to_string(), value, true),
        }

        for child in &derivation.children {
            match child.local_name.as_str() {
                "attribute" => self.attribute(child, tns, object),
                "attributeGroup" => self.attribute_group(child, tns, object),
                _ => {}
            }
        }
    }

    fn simple_type(&mut self, simple: &XmlElement, tns: &str) -> Value {
        let mut schema = if let Some(restriction) = simple.child("restriction") {
            self.restriction(restriction, tns)
        } else if let Some(list) = simple.child("list") {
            let items = match list.attr("itemType") {
                Some(item) => self.type_schema(&list.resolve_qname(item)),
                None => match list.child("simpleType") {
                    Some(inline) => self.simple_type(inline, tns),
                    None => json!({ "type": "string" }),
                },
            };
            json!({ "type": "array", "items": items })
        } else if let Some(union) = simple.child("union") {
            let mut members: Vec<Value> = union
                .attr("memberTypes")
                .unwrap_or("")
                .split_whitespace()
                .map(|member| union.resolve_qname(member))
                .collect::<Vec<_>>()
                .iter()
                .map(|member| self.type_schema(member))
                .collect();
            for inline in union.children_named("simpleType") {
                members.push(self.simple_type(inline, tns));
            }
            json!({ "anyOf": members })
        } else {
            json!({ "type": "string" })
        };
        describe(&mut schema, simple);
        schema
    }

    fn restriction(&mut self, restriction: &XmlElement, tns: &str) -> Value {
        let base_schema = match restriction.attr("base") {
            Some(base) => self.type_schema(&restriction.resolve_qname(base)),
            None => match restriction.child("simpleType") {
                Some(inline) => self.simple_type(inline, tns),
                None => json!({ "type": "string" }),
            },
        };

        let mut schema = if base_schema.get("$ref").is_some() {
            match self.compiled_body(&base_schema) {
                Some(body) if !body.contains_key("properties") => body,
                _ => {
                    let mut wrapper = Map::new();
                    wrapper.insert("allOf".into(), json!([base_schema]));
                    wrapper
                }
            }
        } else {
            base_schema.as_object().cloned().unwrap_or_default()
        };
        schema.remove("description");

        let base_type = schema
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("string")
            .to_string();
        apply_facets(restriction, &base_type, &mut schema);
        Value::Object(schema)
    }
}

fn reference_name(reference: &Value) -> Option<String> {
    reference
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(definition_name)
}

fn describe(schema: &mut Value, element: &XmlElement) {
    if let (Some(text), Value::Object(map)) = (element.documentation(), schema) {
        map.entry("description").or_insert(json!(text));
    }
}

fn apply_facets(restriction: &XmlElement, base_type: &str, schema: &mut Map<String, Value>) {
    let mut enumeration = Vec::new();
    let mut patterns = Vec::new();

    for facet in &restriction.children {
        let Some(value) = facet.attr("value") else {
            continue;
        };
        match facet.local_name.as_str() {
            "enumeration" => enumeration.push(typed_literal(value, base_type)),
            "pattern" => patterns.push(value.to_string()),
            "length" => {
                if let Ok(n) = value.parse::<u64>() {
                    schema.insert("minLength".into(), json!(n));
                    schema.insert("maxLength".into(), json!(n));
                }
            }
            "minLength" | "maxLength" => {
                if let Ok(n) = value.parse::<u64>() {
                    schema.insert(facet.local_name.clone(), json!(n));
                }
            }
            "minInclusive" => insert_number(schema, "minimum", value),
            "maxInclusive" => insert_number(schema, "maximum", value),
            "minExclusive" => insert_number(schema, "exclusiveMinimum", value),
            "maxExclusive" => insert_number(schema, "exclusiveMaximum", value),
            _ => {}
        }
    }

    if !enumeration.is_empty() {
        schema.insert("enum".into(), Value::Array(enumeration));
    }
    match patterns.len() {
        0 => {}
        1 => {
            schema.insert("pattern".into(), json!(patterns.remove(0)));
        }
        _ => {
            schema.insert("pattern".into(), json!(patterns.join("|")));
        }
    }
}

fn insert_number(schema: &mut Map<String, Value>, key: &str, literal: &str) {
    if let Some(number) = parse_number(literal) {
        schema.insert(key.to_string(), Value::Number(number));
    }
}

fn parse_number(literal: &str) -> Option<Number> {
    let literal = literal.trim();
    if let Ok(n) = literal.parse::<i64>() {
        return Some(Number::from(n));
    }
    literal.parse::<f64>().ok().and_then(Number::from_f64)
}

fn typed_literal(literal: &str, base_type: &str) -> Value {
    match base_type {
        "integer" | "number" => parse_number(literal)
            .map(Value::Number)
            .unwrap_or_else(|| json!(literal)),
        "boolean" => match literal {
            "true" | "1" => json!(true),
            "false" | "0" => json!(false),
            _ => json!(literal),
        },
        _ => json!(literal),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occurs {
    Unbounded,
    Bounded(u64),
}

fn min_occurs(element: &XmlElement) -> u64 {
    element
        .attr("minOccurs")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(1)
}

fn max_occurs(element: &XmlElement) -> Occurs {
    match element.attr("maxOccurs").map(str::trim) {
        Some("unbounded") => Occurs::Unbounded,
        Some(value) => Occurs::Bounded(value.parse().unwrap_or(1)),
        None => Occurs::Bounded(1),
    }
}

/// JSON Schema for an XSD builtin type. Unknown names map to `string`.
pub fn primitive(local: &str) -> Map<String, Value> {
    builtin(local).unwrap_or_else(|| schema_map(json!({ "type": "string" })))
}

fn builtin(local: &str) -> Option<Map<String, Value>> {
    let schema = match local {
        "string" | "normalizedString" | "token" | "language" | "Name" | "NCName" | "NMTOKEN"
        | "NMTOKENS" | "ID" | "IDREF" | "IDREFS" | "ENTITY" | "ENTITIES" | "QName"
        | "NOTATION" | "hexBinary" | "duration" | "gYear" | "gYearMonth" | "gMonth"
        | "gMonthDay" | "gDay" | "anySimpleType" | "anyType" => json!({ "type": "string" }),
        "boolean" => json!({ "type": "boolean" }),
        "decimal" | "float" | "double" => json!({ "type": "number" }),
        "integer" | "int" | "long" | "short" | "byte" | "nonNegativeInteger"
        | "positiveInteger" | "nonPositiveInteger" | "negativeInteger" | "unsignedLong"
        | "unsignedInt" | "unsignedShort" | "unsignedByte" => json!({ "type": "integer" }),
        "date" => json!({ "type": "string", "format": "date" }),
        "dateTime" => json!({ "type": "string", "format": "date-time" }),
        "time" => json!({ "type": "string", "format": "time" }),
        "base64Binary" => json!({ "type": "string", "contentEncoding": "base64" }),
        "anyURI" => json!({ "type": "string", "format": "uri" }),
        _ => return None,
    };
    Some(schema_map(schema))
}

fn schema_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
