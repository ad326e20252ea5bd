//! JSON Schema helpers shared by the format resolvers.
//!
//! Every resolver emits self-contained roots: a schema plus a `definitions`
//! map holding exactly the definitions its `$ref`s reach.

use std::collections::{BTreeSet, HashSet};

use serde_json::{json, Map, Value};

/// Prefix of every reference the resolvers emit.
pub const DEFINITIONS_PREFIX: &str = "#/definitions/";

/// Build `{"$ref": "#/definitions/<name>"}`.
pub fn definition_ref(name: &str) -> Value {
    json!({ "$ref": format!("{}{}", DEFINITIONS_PREFIX, escape_pointer(name)) })
}

/// Extract the definition name from a `#/definitions/...` reference.
pub fn definition_name(reference: &str) -> Option<String> {
    reference
        .strip_prefix(DEFINITIONS_PREFIX)
        .map(|name| name.replace("~1", "/").replace("~0", "~"))
}

fn escape_pointer(name: &str) -> String {
    name.replace('~', "~0").replace('/', "~1")
}

/// Collect every definition name referenced anywhere inside `value`.
pub fn collect_refs(value: &Value, refs: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(name) = map
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(definition_name)
            {
                refs.insert(name);
            }
            for child in map.values() {
                collect_refs(child, refs);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_refs(item, refs);
            }
        }
        _ => {}
    }
}

/// Compute the transitive reference closure of `roots` over `table`.
///
/// Names referenced but missing from the table are ignored here; callers that
/// need placeholders add them before computing the closure.
pub fn reference_closure(roots: &[&Value], table: &Map<String, Value>) -> Map<String, Value> {
    let mut pending = BTreeSet::new();
    for root in roots {
        collect_refs(root, &mut pending);
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut order: Vec<String> = Vec::new();
    let mut queue: Vec<String> = pending.into_iter().collect();

    while let Some(name) = queue.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(body) = table.get(&name) {
            order.push(name);
            let mut nested = BTreeSet::new();
            collect_refs(body, &mut nested);
            queue.extend(nested.into_iter().filter(|n| !seen.contains(n)));
        }
    }

    order.sort();
    let mut closure = Map::new();
    for name in order {
        if let Some(body) = table.get(&name) {
            closure.insert(name, body.clone());
        }
    }
    closure
}

/// Attach `definitions` to a root schema. Empty maps are not attached.
pub fn with_definitions(schema: Value, definitions: Map<String, Value>) -> Value {
    if definitions.is_empty() {
        return schema;
    }
    match schema {
        Value::Object(mut map) => {
            map.insert("definitions".to_string(), Value::Object(definitions));
            Value::Object(map)
        }
        other => json!({ "allOf": [other], "definitions": definitions }),
    }
}

/// Names referenced inside `root` whose definition is missing from the root's
/// own `definitions` map.
pub fn dangling_refs(root: &Value) -> Vec<String> {
    let mut refs = BTreeSet::new();
    collect_refs(root, &mut refs);

    let defined = root.get("definitions").and_then(Value::as_object);
    refs.into_iter()
        .filter(|name| !defined.is_some_and(|d| d.contains_key(name)))
        .collect()
}

/// Generates collision-free definition names.
#[derive(Debug, Default)]
pub struct NameAllocator {
    used: HashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `preferred` if unused, otherwise `preferred_2`, `preferred_3`, ...
    pub fn allocate(&mut self, preferred: &str) -> String {
        let base = if preferred.is_empty() { "Anonymous" } else { preferred };
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
