//! Integration tests for detection and per-format resolution.

use std::collections::HashSet;

use serde_json::{json, Value};
use spec_import::{
    convert_swagger, dangling_refs, detect_protocol, resolve_documents, IntermediateRepresentation,
    Operation, Protocol, ResolveError, SourceDocument, UploadedFile,
};

const TREE_WSDL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wsdl:definitions xmlns:wsdl="http://schemas.xmlsoap.org/wsdl/"
                  xmlns:soap="http://schemas.xmlsoap.org/wsdl/soap/"
                  xmlns:xs="http://www.w3.org/2001/XMLSchema"
                  xmlns:tns="urn:trees" targetNamespace="urn:trees">
  <wsdl:types>
    <xs:schema targetNamespace="urn:trees" elementFormDefault="qualified">
      <xs:complexType name="TreeNode">
        <xs:annotation><xs:documentation>A node with children.</xs:documentation></xs:annotation>
        <xs:sequence>
          <xs:element name="label" type="xs:string"/>
          <xs:element name="children" type="tns:TreeNode" minOccurs="0" maxOccurs="unbounded"/>
        </xs:sequence>
        <xs:attribute name="id" type="xs:long" use="required"/>
      </xs:complexType>
      <xs:element name="SaveTree" type="tns:TreeNode"/>
      <xs:element name="SaveTreeResult">
        <xs:complexType><xs:sequence>
          <xs:element name="status">
            <xs:simpleType><xs:restriction base="xs:string">
              <xs:enumeration value="OK"/><xs:enumeration value="REJECTED"/>
            </xs:restriction></xs:simpleType>
          </xs:element>
        </xs:sequence></xs:complexType>
      </xs:element>
    </xs:schema>
  </wsdl:types>
  <wsdl:message name="SaveTreeRequest"><wsdl:part name="tree" element="tns:SaveTree"/></wsdl:message>
  <wsdl:message name="SaveTreeResponse"><wsdl:part name="result" element="tns:SaveTreeResult"/></wsdl:message>
  <wsdl:portType name="TreePort">
    <wsdl:operation name="SaveTree">
      <wsdl:input message="tns:SaveTreeRequest"/>
      <wsdl:output message="tns:SaveTreeResponse"/>
    </wsdl:operation>
  </wsdl:portType>
  <wsdl:binding name="TreeBinding" type="tns:TreePort">
    <soap:binding transport="http://schemas.xmlsoap.org/soap/http"/>
    <wsdl:operation name="SaveTree"><soap:operation soapAction="urn:SaveTree"/></wsdl:operation>
  </wsdl:binding>
  <wsdl:service name="TreeService">
    <wsdl:port name="TreePortSoap" binding="tns:TreeBinding">
      <soap:address location="http://trees.example.com/ws/"/>
    </wsdl:port>
  </wsdl:service>
</wsdl:definitions>"#;

const GREETER_PROTO: &str = r#"
syntax = "proto3";
package demo.greet;

import "google/protobuf/timestamp.proto";

service Greeter {
  rpc SayHello (HelloRequest) returns (HelloReply);
  rpc Chat (stream HelloRequest) returns (stream HelloReply) {}
}

message HelloRequest {
  string name = 1;
  repeated Tag tags = 2;
  map<string, int64> counters = 3;
  google.protobuf.Timestamp sent_at = 4;
}

message Tag {
  string key = 1;
  Tag parent = 2;
}

message HelloReply {
  string message = 1;
}
"#;

const PETS_OPENAPI: &str = r##"{
  "openapi": "3.0.3",
  "info": { "title": "Pets", "version": "2.0.0" },
  "servers": [{ "url": "https://{region}.pets.example.com/", "variables": { "region": { "default": "eu" } } }],
  "paths": {
    "/pets": {
      "get": {
        "operationId": "listPets",
        "responses": {
          "200": {
            "description": "ok",
            "content": { "application/json": { "schema": { "type": "array", "items": { "$ref": "#/components/schemas/Pet" } } } }
          }
        }
      }
    }
  },
  "components": {
    "schemas": {
      "Pet": {
        "type": "object",
        "properties": {
          "name": { "type": "string" },
          "parent": { "$ref": "#/components/schemas/Pet" }
        }
      }
    }
  }
}"##;

fn resolve(protocol: Protocol, name: &str, text: &str, aux: &[SourceDocument]) -> (IntermediateRepresentation, Vec<Operation>) {
    let resolved = resolve_documents(protocol, "spec", &SourceDocument::new(name, text), aux).unwrap();
    (resolved.ir, resolved.operations)
}

/// Every root schema of an operation.
fn roots(operation: &Operation) -> Vec<&Value> {
    let mut roots = Vec::new();
    if let Some(request) = operation.request_schema.as_object() {
        for (key, value) in request {
            if key == "parameters" {
                roots.extend(value.as_array().into_iter().flatten().filter_map(|p| p.get("schema")));
            } else {
                roots.push(value);
            }
        }
    }
    if let Some(responses) = operation.response_schemas.as_object() {
        for contents in responses.values() {
            roots.extend(contents.as_object().into_iter().flat_map(|c| c.values()));
        }
    }
    roots
}

fn assert_closed(operations: &[Operation]) {
    for operation in operations {
        for root in roots(operation) {
            assert!(
                dangling_refs(root).is_empty(),
                "{} has dangling refs: {:?}",
                operation.id,
                dangling_refs(root)
            );
        }
    }
}

fn assert_unique_ids(operations: &[Operation]) {
    let ids: HashSet<&str> = operations.iter().map(|op| op.id.as_str()).collect();
    assert_eq!(ids.len(), operations.len());
}

mod detection {
    use super::*;

    #[test]
    fn each_format_is_detected() {
        let cases = [
            ("trees.wsdl", TREE_WSDL, Protocol::Soap),
            ("trees.xml", TREE_WSDL, Protocol::Soap),
            ("greeter.proto", GREETER_PROTO, Protocol::Grpc),
            ("pets.json", PETS_OPENAPI, Protocol::Http),
            ("schema.graphql", "type Query { a: Int }", Protocol::Graphql),
        ];
        for (name, text, expected) in cases {
            let detection = detect_protocol(&[UploadedFile::new(name, text)]).unwrap();
            assert_eq!(detection.protocol, expected, "{}", name);
        }
    }

    #[test]
    fn undetectable_files() {
        let files = [UploadedFile::new("notes.txt", "hello"), UploadedFile::new("data.json", "[1, 2]")];
        assert!(detect_protocol(&files).is_none());
    }
}

mod wsdl {
    use super::*;

    #[test]
    fn tree_node_self_reference() {
        let (ir, ops) = resolve(Protocol::Soap, "trees.wsdl", TREE_WSDL, &[]);
        assert_eq!(ir.kind(), "WSDL");
        assert_eq!(ir.addresses(), vec!["http://trees.example.com/ws/".to_string()]);
        assert_eq!(ops.len(), 1);

        let request = &ops[0].request_schema["application/xml"];
        assert_eq!(request["properties"]["SaveTree"], json!({ "$ref": "#/definitions/TreeNode" }));
        let tree = &request["definitions"]["TreeNode"];
        assert_eq!(tree["properties"]["children"]["type"], "array");
        assert_eq!(tree["properties"]["children"]["items"], json!({ "$ref": "#/definitions/TreeNode" }));
        assert_eq!(tree["properties"]["id"]["type"], "integer");
        assert_eq!(tree["description"], "A node with children.");
        assert_closed(&ops);
    }

    #[test]
    fn enumerations_in_response() {
        let (_, ops) = resolve(Protocol::Soap, "trees.wsdl", TREE_WSDL, &[]);
        let response = &ops[0].response_schemas["200"]["application/xml"];
        let result = &response["definitions"]["SaveTreeResult"];
        assert_eq!(result["properties"]["status"]["enum"], json!(["OK", "REJECTED"]));
        assert_eq!(ops[0].specification["soapAction"], "urn:SaveTree");
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let err = resolve_documents(Protocol::Soap, "s", &SourceDocument::new("x.wsdl", "<definitions"), &[])
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::InvalidXml { .. } | ResolveError::InvalidStructure { .. }
        ));
    }
}

mod protobuf {
    use super::*;

    #[test]
    fn services_become_operations() {
        let (ir, ops) = resolve(Protocol::Grpc, "greeter.proto", GREETER_PROTO, &[]);
        let IntermediateRepresentation::Proto(data) = &ir else {
            panic!("expected proto data");
        };
        assert_eq!(data.package_name.as_deref(), Some("demo.greet"));
        assert_eq!(data.services[0].methods.len(), 2);
        assert!(data.services[0].methods[1].client_streaming);

        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].path, "/demo.greet.Greeter/SayHello");
        assert_eq!(ops[1].specification["serverStreaming"], true);
        assert_unique_ids(&ops);
        assert_closed(&ops);
    }

    #[test]
    fn recursive_messages_terminate() {
        let (_, ops) = resolve(Protocol::Grpc, "greeter.proto", GREETER_PROTO, &[]);
        let request = &ops[0].request_schema["application/grpc"];
        let definitions = request["definitions"].as_object().unwrap();
        let tag = definitions
            .iter()
            .find(|(name, _)| name.ends_with("Tag"))
            .map(|(_, schema)| schema)
            .unwrap();
        assert!(tag["properties"]["parent"]["$ref"].as_str().unwrap().ends_with("Tag"));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let err = resolve_documents(
            Protocol::Grpc,
            "s",
            &SourceDocument::new("bad.proto", "service S { rpc A ( }"),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::Syntax { .. }));
    }
}

mod openapi {
    use super::*;

    #[test]
    fn happy_path() {
        let (ir, ops) = resolve(Protocol::Http, "pets.json", PETS_OPENAPI, &[]);
        assert_eq!(ir.version().as_deref(), Some("2.0.0"));
        assert_eq!(ir.addresses(), vec!["https://eu.pets.example.com/".to_string()]);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].method, "GET");
        assert_eq!(ops[0].path, "/pets");
        assert_eq!(ops[0].id, "spec-listPets");
        assert_closed(&ops);
    }

    #[test]
    fn swagger_first_scheme_wins() {
        let swagger = json!({
            "swagger": "2.0",
            "info": { "title": "Legacy", "version": "1.1" },
            "host": "legacy.example.com",
            "basePath": "/api",
            "schemes": ["http", "https"],
            "paths": {}
        });
        let converted = convert_swagger(&swagger);
        assert_eq!(converted["servers"][0]["url"], "http://legacy.example.com/api");
        assert_eq!(converted["servers"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn missing_title_is_rejected() {
        let err = resolve_documents(
            Protocol::Http,
            "s",
            &SourceDocument::new("a.yaml", "openapi: 3.0.0\ninfo: {version: '1'}\npaths: {}\n"),
            &[],
        )
        .unwrap_err();
        assert!(err.to_string().contains("title"));
    }
}

mod asyncapi {
    use super::*;

    #[test]
    fn channel_actions_with_canned_broker() {
        let text = r#"
asyncapi: 2.4.0
info: {title: Sensors, version: 0.3.0, x-protocol: mqtt}
channels:
  sensors/temp:
    publish:
      message:
        payload: {type: object, properties: {celsius: {type: number}}}
    subscribe:
      operationId: readTemp
      message:
        payload: {type: number}
"#;
        let (ir, ops) = resolve(Protocol::Mqtt, "sensors.yaml", text, &[]);
        assert_eq!(ir.version().as_deref(), Some("0.3.0"));
        assert_eq!(ir.addresses(), vec!["tcp://localhost:1883".to_string()]);
        let ids: Vec<&str> = ops.iter().map(|op| op.id.as_str()).collect();
        assert_eq!(ids, vec!["spec-publish-sensors/temp", "spec-readTemp"]);
        assert_eq!(ops[1].request_schema["application/json"]["type"], "number");
        assert_closed(&ops);
    }
}

mod graphql {
    use super::*;

    #[test]
    fn root_fields_become_operations() {
        let sdl = r#"
type Query {
  tree(id: ID!): Node
}
type Mutation {
  prune(id: ID!, depth: Int = 1): Boolean!
}
type Node {
  id: ID!
  children: [Node!]!
}
"#;
        let (ir, ops) = resolve(Protocol::Graphql, "tree.graphql", sdl, &[]);
        let IntermediateRepresentation::GraphQl(data) = &ir else {
            panic!("expected graphql data");
        };
        assert_eq!(data.types.len(), 1);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].specification["body"], "prune(id: ID!, depth: Int = 1): Boolean!");
        let response = &ops[0].response_schemas["200"]["application/json"];
        assert_eq!(
            response["definitions"]["Node"]["properties"]["children"]["items"],
            json!({ "$ref": "#/definitions/Node" })
        );
        assert_unique_ids(&ops);
        assert_closed(&ops);
    }
}
