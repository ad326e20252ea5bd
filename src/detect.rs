//! Protocol detection for a set of uploaded files.
//!
//! Extension heuristics run first; content sniffing (WSDL namespace markers,
//! `openapi`/`swagger`/`asyncapi` keys, IDL tokens) runs only when the
//! extension is inconclusive.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::loader::parse_structured;
use crate::types::{Protocol, UploadedFile};

/// Number of leading bytes searched for a WSDL namespace marker.
const WSDL_SNIFF_WINDOW: usize = 512;

pub const WSDL_11_NAMESPACE: &str = "http://schemas.xmlsoap.org/wsdl/";
pub const WSDL_20_NAMESPACE: &str = "http://www.w3.org/ns/wsdl";

/// Outcome of a successful detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub protocol: Protocol,
    /// Index of the file that decided the protocol.
    pub file_index: usize,
}

/// Classify an ordered list of files into one protocol.
///
/// The first conclusive non-async match wins. An async match is remembered so
/// that a later, more specific file can still take precedence. Returns `None`
/// when no file matches; the detector never guesses.
pub fn detect_protocol(files: &[UploadedFile]) -> Option<Detection> {
    let mut async_fallback: Option<Detection> = None;

    for (index, file) in files.iter().enumerate() {
        let Some(protocol) = classify_file(&file.name, &file.text()) else {
            continue;
        };
        let detection = Detection {
            protocol,
            file_index: index,
        };
        if protocol.is_async() {
            if async_fallback.is_none() {
                async_fallback = Some(detection);
            }
            continue;
        }
        tracing::debug!(file = %file.name, %protocol, "protocol detected");
        return Some(detection);
    }

    if let Some(detection) = async_fallback {
        tracing::debug!(protocol = %detection.protocol, "falling back to async protocol");
    }
    async_fallback
}

/// Classify a single file by extension, then by content.
pub fn classify_file(name: &str, text: &str) -> Option<Protocol> {
    by_extension(name).or_else(|| by_content(text))
}

fn by_extension(name: &str) -> Option<Protocol> {
    let extension = name.rsplit_once('.')?.1.to_ascii_lowercase();
    match extension.as_str() {
        "wsdl" => Some(Protocol::Soap),
        "proto" => Some(Protocol::Grpc),
        "graphql" | "gql" | "graphqls" => Some(Protocol::Graphql),
        _ => None,
    }
}

fn by_content(text: &str) -> Option<Protocol> {
    if has_wsdl_marker(text) {
        return Some(Protocol::Soap);
    }

    if let Ok(document) = parse_structured(text) {
        return classify_document(&document);
    }

    if looks_like_proto(text) {
        return Some(Protocol::Grpc);
    }
    if looks_like_graphql(text) {
        return Some(Protocol::Graphql);
    }
    None
}

fn has_wsdl_marker(text: &str) -> bool {
    let mut end = text.len().min(WSDL_SNIFF_WINDOW);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let head = &text[..end];
    head.contains(WSDL_11_NAMESPACE) || head.contains(WSDL_20_NAMESPACE)
}

/// Classify an already-parsed structured document.
pub fn classify_document(document: &Value) -> Option<Protocol> {
    let map = document.as_object()?;
    if map.contains_key("openapi") || map.contains_key("swagger") {
        return Some(Protocol::Http);
    }
    if map.contains_key("asyncapi") {
        return Some(async_protocol_of(document));
    }
    if map.get("type").and_then(Value::as_str) == Some("WSDL") {
        return Some(Protocol::Soap);
    }
    None
}

/// Effective protocol of an AsyncAPI document: `info.x-protocol`, else the
/// first server's `protocol`, else generic async.
pub fn async_protocol_of(document: &Value) -> Protocol {
    if let Some(explicit) = document
        .get("info")
        .and_then(|info| info.get("x-protocol"))
        .and_then(Value::as_str)
    {
        return Protocol::from_async_protocol(explicit);
    }

    let first_server = match document.get("servers") {
        Some(Value::Object(servers)) => servers.values().next(),
        Some(Value::Array(servers)) => servers.first(),
        _ => None,
    };
    first_server
        .and_then(|server| server.get("protocol"))
        .and_then(Value::as_str)
        .map(Protocol::from_async_protocol)
        .unwrap_or(Protocol::Async)
}

fn looks_like_proto(text: &str) -> bool {
    static SERVICE: OnceLock<Regex> = OnceLock::new();
    let re = SERVICE.get_or_init(|| {
        Regex::new(r"(?s)\bservice\s+\w+\s*\{.*\brpc\s+\w+").expect("valid service pattern")
    });
    re.is_match(text)
}

fn looks_like_graphql(text: &str) -> bool {
    static SDL: OnceLock<Regex> = OnceLock::new();
    let re = SDL.get_or_init(|| {
        Regex::new(r"(?m)^\s*(schema\s*\{|type\s+(Query|Mutation)\b)").expect("valid SDL pattern")
    });
    re.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, text: &str) -> UploadedFile {
        UploadedFile::new(name, text.as_bytes().to_vec())
    }

    #[test]
    fn extension_table() {
        assert_eq!(classify_file("svc.WSDL", ""), Some(Protocol::Soap));
        assert_eq!(classify_file("api.proto", ""), Some(Protocol::Grpc));
        assert_eq!(classify_file("schema.gql", ""), Some(Protocol::Graphql));
        assert_eq!(classify_file("types.xsd", "<schema/>"), None);
    }

    #[test]
    fn wsdl_marker_in_xml_file() {
        let text = r#"<?xml version="1.0"?>
<definitions xmlns="http://schemas.xmlsoap.org/wsdl/" name="x"/>"#;
        assert_eq!(classify_file("service.xml", text), Some(Protocol::Soap));
    }

    #[test]
    fn wsdl_marker_outside_window_is_ignored() {
        let padding = " ".repeat(WSDL_SNIFF_WINDOW);
        let text = format!("<root>{}{}</root>", padding, WSDL_11_NAMESPACE);
        assert_eq!(classify_file("service.xml", &text), None);
    }

    #[test]
    fn openapi_and_swagger_keys() {
        assert_eq!(
            classify_file("api.yaml", "openapi: 3.0.0\ninfo: {title: a, version: '1'}\n"),
            Some(Protocol::Http)
        );
        assert_eq!(
            classify_file("api.json", r#"{"swagger": "2.0"}"#),
            Some(Protocol::Http)
        );
    }

    #[test]
    fn asyncapi_sub_protocol() {
        let explicit = "asyncapi: 2.6.0\ninfo:\n  title: t\n  x-protocol: amqp\n";
        assert_eq!(classify_file("a.yaml", explicit), Some(Protocol::Amqp));

        let by_server =
            "asyncapi: 2.6.0\ninfo: {title: t}\nservers:\n  prod:\n    url: b:9092\n    protocol: kafka\n";
        assert_eq!(classify_file("a.yaml", by_server), Some(Protocol::Kafka));

        let bare = "asyncapi: 2.6.0\ninfo: {title: t}\n";
        assert_eq!(classify_file("a.yaml", bare), Some(Protocol::Async));
    }

    #[test]
    fn prior_parse_marker() {
        assert_eq!(
            classify_file("parsed.json", r#"{"type": "WSDL", "operations": []}"#),
            Some(Protocol::Soap)
        );
    }

    #[test]
    fn idl_content_without_extension() {
        let proto = "syntax = \"proto3\";\nservice Greeter {\n  rpc Hello (A) returns (B);\n}\n";
        assert_eq!(classify_file("greeter.txt", proto), Some(Protocol::Grpc));

        let sdl = "type Query {\n  pets: [Pet]\n}\n";
        assert_eq!(classify_file("schema.txt", sdl), Some(Protocol::Graphql));
    }

    #[test]
    fn later_specific_file_beats_async() {
        let files = vec![
            file("events.yaml", "asyncapi: 2.6.0\ninfo: {title: t}\n"),
            file("api.yaml", "openapi: 3.0.0\ninfo: {title: t, version: '1'}\n"),
        ];
        let detection = detect_protocol(&files).unwrap();
        assert_eq!(detection.protocol, Protocol::Http);
        assert_eq!(detection.file_index, 1);
    }

    #[test]
    fn first_conclusive_match_wins() {
        let files = vec![
            file("types.xsd", "<schema/>"),
            file("svc.wsdl", "<definitions/>"),
            file("api.proto", ""),
        ];
        let detection = detect_protocol(&files).unwrap();
        assert_eq!(detection.protocol, Protocol::Soap);
        assert_eq!(detection.file_index, 1);
    }

    #[test]
    fn async_only_falls_back() {
        let files = vec![file(
            "events.yaml",
            "asyncapi: 2.6.0\ninfo: {title: t, x-protocol: kafka}\n",
        )];
        assert_eq!(detect_protocol(&files).unwrap().protocol, Protocol::Kafka);
    }

    #[test]
    fn undetectable_returns_none() {
        let files = vec![file("notes.txt", "hello"), file("data.csv", "a,b\n1,2\n")];
        assert!(detect_protocol(&files).is_none());
    }
}
