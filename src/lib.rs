//! Specification Import
//!
//! Normalization of API description documents into operations with
//! self-contained JSON Schema.
//!
//! Uploaded files (OpenAPI/Swagger, WSDL + XSD, Protobuf IDL, GraphQL SDL,
//! AsyncAPI) are classified into one protocol, resolved by the matching
//! format resolver, and persisted as specification records under a
//! specification group of an integration system.
//!
//! # Example
//!
//! ```
//! use spec_import::{detect_protocol, resolve_documents, Protocol, SourceDocument, UploadedFile};
//!
//! let text = r#"
//! openapi: 3.0.0
//! info: { title: Pets, version: 2.0.0 }
//! paths:
//!   /pets:
//!     get:
//!       operationId: listPets
//!       responses: { '200': { description: ok } }
//! "#;
//! let file = UploadedFile::new("petstore.yaml", text);
//! let detection = detect_protocol(std::slice::from_ref(&file)).unwrap();
//! assert_eq!(detection.protocol, Protocol::Http);
//!
//! let resolved =
//!     resolve_documents(detection.protocol, "pets-2.0.0", &SourceDocument::from(&file), &[])
//!         .unwrap();
//! assert_eq!(resolved.operations[0].id, "pets-2.0.0-listPets");
//! assert_eq!(resolved.ir.version().as_deref(), Some("2.0.0"));
//! ```
//!
//! # Schema Shape
//!
//! | Field | Keyed by |
//! |-------|----------|
//! | `requestSchema` | content type (plus `parameters` for HTTP) |
//! | `responseSchemas` | status code, then content type |
//!
//! Every `$ref: "#/definitions/X"` reachable from a root schema has a
//! matching `definitions.X` in that same root.

mod detect;
mod environment;
mod error;
mod import;
mod linter;
mod loader;
mod resolver;
mod schema;
mod session;
mod store;
mod types;
mod validator;

pub use detect::{
    async_protocol_of, classify_document, classify_file, detect_protocol, Detection,
    WSDL_11_NAMESPACE, WSDL_20_NAMESPACE,
};
pub use environment::{apply_candidates, default_properties, environment_name, normalize_address};
pub use error::{ImportError, ResolveError, SchemaError, StoreError, ValidateError};
pub use import::{
    source_hash, validate_protocol, version_from_file_name, GroupContent, Importer,
    SpecificationContent,
};
pub use linter::{lint, lint_file, lint_specification, Diagnostic, FileResult, FileStatus, LintResult, Severity};
pub use loader::{
    is_url, load_document, load_document_auto, navigate_fragment, parse_structured,
};
pub use resolver::{
    convert_swagger, resolve_documents, AsyncApiData, AsyncOperation, AuxiliaryDocuments,
    DocumentResolver, GraphQlArgument, GraphQlData, GraphQlField, GraphQlType,
    IntermediateRepresentation, MessagePart, MessageRef, OpenApiData, OperationDetail,
    ProtoData, ProtoMethod, ProtoService, Resolved, SourceDocument, TypeKind, TypeRef,
    WsdlEndpoint, WsdlParseResult, WsdlVersion,
};
pub use schema::{dangling_refs, reference_closure, NameAllocator};
pub use session::{ImportSession, ImportState, SessionStore};
pub use store::{read_yaml, write_yaml, DirectoryStore, FileStore, MemoryStore, Record};
pub use types::{
    json_type_name, operation_id_for, Direction, Environment, ImportConfig, ImportRequest,
    ImportResult, ImportToGroupRequest, IntegrationSystem, Operation, Protocol, Specification,
    SpecificationGroup, SpecificationSource, SystemKind, UploadedFile, ASYNC_FAMILY,
};
pub use validator::{validate_against_schema, validate_payload};

#[cfg(feature = "remote")]
pub use loader::load_document_url;
