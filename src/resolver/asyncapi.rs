//! AsyncAPI 2.x and 3.x resolution.

use serde_json::{json, Map, Value};

use super::openapi::SchemaExpander;
use super::{OperationSet, SourceDocument};
use crate::detect::async_protocol_of;
use crate::error::ResolveError;
use crate::loader::parse_structured;
use crate::types::{Operation, Protocol};

const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// One channel action as declared in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncOperation {
    pub operation_id: String,
    pub action: String,
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AsyncApiData {
    pub info: Value,
    pub channels: Value,
    pub servers: Value,
    pub components: Value,
    pub protocol: Protocol,
    pub operations: Vec<AsyncOperation>,
}

impl AsyncApiData {
    /// Server URLs, or the conventional local broker address for the protocol
    /// when the document declares none.
    pub fn addresses(&self) -> Vec<String> {
        let servers: Vec<&Value> = match &self.servers {
            Value::Object(map) => map.values().collect(),
            Value::Array(list) => list.iter().collect(),
            _ => Vec::new(),
        };
        let declared: Vec<String> = servers
            .into_iter()
            .filter_map(|server| {
                if let Some(url) = server.get("url").and_then(Value::as_str) {
                    return Some(url.to_string());
                }
                let host = server.get("host").and_then(Value::as_str)?;
                let path = server.get("pathname").and_then(Value::as_str).unwrap_or("");
                Some(format!("{}{}", host, path))
            })
            .collect();
        if !declared.is_empty() {
            return declared;
        }
        default_broker(self.protocol)
            .map(|address| vec![address.to_string()])
            .unwrap_or_default()
    }
}

fn default_broker(protocol: Protocol) -> Option<&'static str> {
    match protocol {
        Protocol::Kafka => Some("localhost:9092"),
        Protocol::Amqp => Some("amqp://localhost:5672"),
        Protocol::Mqtt => Some("tcp://localhost:1883"),
        Protocol::Redis => Some("redis://localhost:6379"),
        Protocol::Nats => Some("nats://localhost:4222"),
        _ => None,
    }
}

pub(super) fn resolve(
    specification_id: &str,
    main: &SourceDocument,
) -> Result<(AsyncApiData, Vec<Operation>), ResolveError> {
    let document = parse_structured(&main.text)?;
    let Some(version) = document.get("asyncapi").and_then(Value::as_str) else {
        return Err(ResolveError::structure("AsyncAPI", "asyncapi version is required"));
    };
    let Some(info) = document.get("info").filter(|info| info.is_object()) else {
        return Err(ResolveError::structure("AsyncAPI", "info is required"));
    };

    let default_content_type = document
        .get("defaultContentType")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    let mut declared = Vec::new();
    let mut operations = OperationSet::default();

    if version.starts_with('3') {
        read_v3(&document, specification_id, &default_content_type, &mut declared, &mut operations);
    } else {
        read_v2(&document, specification_id, &default_content_type, &mut declared, &mut operations);
    }

    let field = |key: &str| document.get(key).cloned().unwrap_or_else(|| json!({}));
    let data = AsyncApiData {
        info: info.clone(),
        channels: field("channels"),
        servers: field("servers"),
        components: field("components"),
        protocol: async_protocol_of(&document),
        operations: declared,
    };
    Ok((data, operations.into_vec()))
}

fn read_v2(
    document: &Value,
    specification_id: &str,
    default_content_type: &str,
    declared: &mut Vec<AsyncOperation>,
    operations: &mut OperationSet,
) {
    let Some(channels) = document.get("channels").and_then(Value::as_object) else {
        return;
    };
    for (channel, item) in channels {
        for action in ["publish", "subscribe"] {
            let Some(source) = item.get(action) else {
                continue;
            };
            let operation_id = source
                .get("operationId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}-{}", action, channel));

            let mut expander = SchemaExpander::new(document);
            let messages = source
                .get("message")
                .map(|message| {
                    let message = expander.follow(message);
                    match message.get("oneOf").and_then(Value::as_array) {
                        Some(variants) => variants.iter().map(|v| expander.follow(v).clone()).collect(),
                        None => vec![message.clone()],
                    }
                })
                .unwrap_or_default();

            let mut operation = Operation::new(specification_id, &operation_id, action, channel.as_str());
            operation.request_schema =
                message_schema(&mut expander, &messages, default_content_type);
            operation.specification = metadata(channel, action, source, &messages);
            operations.push(operation);
            declared.push(AsyncOperation {
                operation_id,
                action: action.to_string(),
                channel: channel.clone(),
            });
        }
    }
}

fn read_v3(
    document: &Value,
    specification_id: &str,
    default_content_type: &str,
    declared: &mut Vec<AsyncOperation>,
    operations: &mut OperationSet,
) {
    let Some(sources) = document.get("operations").and_then(Value::as_object) else {
        return;
    };
    for (operation_id, source) in sources {
        let mut expander = SchemaExpander::new(document);
        let source = expander.follow(source);
        let action = source
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("send")
            .to_string();

        let channel_ref = source.get("channel");
        let channel = channel_ref.map(|c| expander.follow(c));
        let channel_name = channel
            .and_then(|c| c.get("address"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                channel_ref
                    .and_then(|c| c.get("$ref"))
                    .and_then(Value::as_str)
                    .and_then(|r| r.rsplit('/').next())
                    .map(str::to_string)
            })
            .unwrap_or_default();

        // Operation-level messages narrow the channel's message set.
        let message_list = source
            .get("messages")
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| {
                channel
                    .and_then(|c| c.get("messages"))
                    .and_then(Value::as_object)
                    .map(|m| m.values().cloned().collect())
            })
            .unwrap_or_default();
        let messages: Vec<Value> = message_list
            .iter()
            .map(|m| expander.follow(m).clone())
            .collect();

        let mut operation = Operation::new(specification_id, operation_id, action.as_str(), channel_name.as_str());
        operation.request_schema = message_schema(&mut expander, &messages, default_content_type);
        operation.specification = metadata(&channel_name, &action, source, &messages);
        operations.push(operation);
        declared.push(AsyncOperation {
            operation_id: operation_id.clone(),
            action,
            channel: channel_name,
        });
    }
}

/// `{contentType: payload}` plus `headers` when any message declares them.
fn message_schema(
    expander: &mut SchemaExpander<'_>,
    messages: &[Value],
    default_content_type: &str,
) -> Value {
    let mut request = Map::new();
    let Some(first) = messages.first() else {
        return Value::Object(request);
    };
    let content_type = first
        .get("contentType")
        .and_then(Value::as_str)
        .unwrap_or(default_content_type)
        .to_string();

    let payloads: Vec<Value> = messages
        .iter()
        .map(|m| m.get("payload").cloned().unwrap_or_else(|| json!({})))
        .collect();
    let payload = match payloads.len() {
        1 => payloads.into_iter().next().unwrap_or_default(),
        _ => json!({ "oneOf": payloads }),
    };
    request.insert(content_type, expander.root(&payload));

    if let Some(headers) = messages.iter().find_map(|m| m.get("headers")) {
        request.insert("headers".into(), expander.root(headers));
    }
    Value::Object(request)
}

fn metadata(channel: &str, action: &str, source: &Value, messages: &[Value]) -> Value {
    let mut metadata = Map::new();
    metadata.insert("channel".into(), json!(channel));
    metadata.insert("action".into(), json!(action));
    for key in ["summary", "description", "tags", "bindings"] {
        if let Some(value) = source.get(key) {
            metadata.insert(key.into(), value.clone());
        }
    }
    let names: Vec<&str> = messages
        .iter()
        .filter_map(|m| m.get("name").and_then(Value::as_str))
        .collect();
    if !names.is_empty() {
        metadata.insert("messages".into(), json!(names));
    }
    Value::Object(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::dangling_refs;

    const ORDERS: &str = r##"
asyncapi: 2.6.0
info:
  title: Orders
  version: 1.4.0
servers:
  production:
    url: broker.example.com:9092
    protocol: kafka
channels:
  orders.created:
    subscribe:
      operationId: onOrderCreated
      message:
        $ref: '#/components/messages/OrderCreated'
  orders.cancelled:
    publish:
      message:
        oneOf:
          - $ref: '#/components/messages/OrderCreated'
          - name: Cancelled
            payload: { type: string }
components:
  messages:
    OrderCreated:
      name: OrderCreated
      contentType: application/json
      headers:
        type: object
        properties:
          traceId: { type: string }
      payload:
        $ref: '#/components/schemas/Order'
  schemas:
    Order:
      type: object
      properties:
        id: { type: string }
        lines:
          type: array
          items: { $ref: '#/components/schemas/Line' }
    Line:
      type: object
      properties:
        sku: { type: string }
"##;

    #[test]
    fn one_operation_per_channel_action() {
        let (data, ops) = resolve("spec", &SourceDocument::new("orders.yaml", ORDERS)).unwrap();
        assert_eq!(data.protocol, Protocol::Kafka);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].id, "spec-onOrderCreated");
        assert_eq!(ops[0].method, "subscribe");
        assert_eq!(ops[0].path, "orders.created");
        assert_eq!(ops[1].id, "spec-publish-orders.cancelled");
        assert_eq!(data.addresses(), vec!["broker.example.com:9092".to_string()]);
    }

    #[test]
    fn message_payload_expanded_with_closure() {
        let (_, ops) = resolve("spec", &SourceDocument::new("orders.yaml", ORDERS)).unwrap();
        let payload = &ops[0].request_schema["application/json"];
        assert_eq!(payload["$ref"], "#/definitions/Order");
        assert!(payload["definitions"].get("Line").is_some());
        assert!(dangling_refs(payload).is_empty());
        assert_eq!(ops[0].request_schema["headers"]["properties"]["traceId"]["type"], "string");

        let union = &ops[1].request_schema["application/json"];
        assert_eq!(union["oneOf"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn canned_broker_when_no_servers() {
        let text = "asyncapi: 2.6.0\ninfo: {title: t, version: '1', x-protocol: amqp}\nchannels: {}\n";
        let (data, ops) = resolve("s", &SourceDocument::new("a.yaml", text)).unwrap();
        assert!(ops.is_empty());
        assert_eq!(data.addresses(), vec!["amqp://localhost:5672".to_string()]);
    }

    #[test]
    fn version_three_operations() {
        let text = r##"
asyncapi: 3.0.0
info: {title: Lights, version: 1.0.0}
servers:
  local: {host: 'mqtt.example.com:1883', protocol: mqtt}
channels:
  lightMeasured:
    address: 'lights/measured'
    messages:
      reading: {payload: {type: object, properties: {lumens: {type: integer}}}}
operations:
  onLightMeasured:
    action: receive
    channel: {$ref: '#/channels/lightMeasured'}
"##;
        let (data, ops) = resolve("s", &SourceDocument::new("l.yaml", text)).unwrap();
        assert_eq!(data.protocol, Protocol::Mqtt);
        assert_eq!(ops[0].id, "s-onLightMeasured");
        assert_eq!(ops[0].method, "receive");
        assert_eq!(ops[0].path, "lights/measured");
        assert_eq!(
            ops[0].request_schema["application/json"]["properties"]["lumens"]["type"],
            "integer"
        );
        assert_eq!(data.addresses(), vec!["mqtt.example.com:1883".to_string()]);
    }

    #[test]
    fn missing_info_is_rejected() {
        let err = resolve("s", &SourceDocument::new("a.yaml", "asyncapi: 2.0.0\n")).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidStructure { .. }));
    }
}
