//! Error types for specification resolution, storage and import.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::Protocol;

/// Errors while reading or resolving a single specification document.
#[derive(Debug, Error)]
pub enum ResolveError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("content is neither valid JSON nor YAML: {message}")]
    InvalidDocument { message: String },

    #[error("invalid XML in {document}: {message}")]
    InvalidXml { document: String, message: String },

    #[error("invalid {format} document: {message}")]
    InvalidStructure {
        format: &'static str,
        message: String,
    },

    #[error("syntax error in {document} at offset {offset}: {message}")]
    Syntax {
        document: String,
        offset: usize,
        message: String,
    },

    /// A reference that could not be followed. Resolvers recover from this by
    /// substituting a placeholder schema; it is surfaced only in logs.
    #[error("unresolved reference {reference}")]
    UnresolvedReference { reference: String },
}

impl ResolveError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolveError::FileNotFound { .. } | ResolveError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            ResolveError::NetworkError { .. } => 3,
            _ => 2,
        }
    }

    pub(crate) fn structure(format: &'static str, message: impl Into<String>) -> Self {
        ResolveError::InvalidStructure {
            format,
            message: message.into(),
        }
    }
}

/// Errors reported by the file store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no record with id {id} and suffix {suffix}")]
    NotFound { id: String, suffix: String },

    #[error("path not found: {path}")]
    PathNotFound { path: String },

    #[error("I/O failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode record {path}: {message}")]
    Encode { path: String, message: String },

    #[error("cannot decode record {path}: {message}")]
    Decode { path: String, message: String },
}

/// Orchestration-level failures. These end an import session with a warning
/// message instead of propagating to the caller.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Invalid import request: {message}")]
    Validation { message: String },

    #[error("Failed to parse {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: ResolveError,
    },

    #[error("Protocol mismatch: system protocol is {existing}, imported specification protocol is {incoming}")]
    ProtocolMismatch {
        existing: Protocol,
        incoming: Protocol,
    },

    #[error("Unable to detect specification protocol from the provided files")]
    ProtocolUndetectable,

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Failed to read stored record: {0}")]
    Read(#[source] StoreError),

    #[error("Failed to persist import results: {0}")]
    Persistence(#[from] StoreError),
}

impl ImportError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        ImportError::Validation {
            message: message.into(),
        }
    }

    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ImportError::Read(_) | ImportError::Persistence(_) => 3,
            ImportError::Parse { source, .. } => source.exit_code(),
            _ => 2,
        }
    }
}

/// Errors during payload validation.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("operation {operation} has no {direction} schema for {content_type}")]
    MissingSchema {
        operation: String,
        direction: &'static str,
        content_type: String,
    },

    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },

    #[error("validation failed with {} error(s)", errors.len())]
    Invalid { errors: Vec<SchemaError> },
}

/// Single validation error with path context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchemaError {
    /// JSON Pointer (RFC 6901) to the invalid field.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl ValidateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ValidateError::Invalid { .. } => 1,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_error_exit_codes() {
        let err = ResolveError::FileNotFound {
            path: PathBuf::from("petstore.yaml"),
        };
        assert_eq!(err.exit_code(), 3);

        let err = ResolveError::structure("OpenAPI", "missing info.title");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn validation_message_format() {
        let err = ImportError::validation("At least one file is required");
        assert_eq!(
            err.to_string(),
            "Invalid import request: At least one file is required"
        );
    }

    #[test]
    fn mismatch_names_both_protocols() {
        let err = ImportError::ProtocolMismatch {
            existing: Protocol::Http,
            incoming: Protocol::Soap,
        };
        let message = err.to_string();
        assert!(message.contains("HTTP"));
        assert!(message.contains("SOAP"));
    }

    #[test]
    fn persistence_error_is_io() {
        let err = ImportError::from(StoreError::PathNotFound {
            path: "systems/a.yaml".into(),
        });
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn read_error_is_not_a_persistence_failure() {
        let err = ImportError::Read(StoreError::Decode {
            path: "sys/sys.service.qip.yaml".into(),
            message: "unexpected end of stream".into(),
        });
        assert_eq!(err.exit_code(), 3);
        assert_eq!(
            err.to_string(),
            "Failed to read stored record: cannot decode record sys/sys.service.qip.yaml: unexpected end of stream"
        );
    }

    #[test]
    fn schema_error_display() {
        let err = SchemaError {
            path: "/pet/name".into(),
            message: "expected string, got number".into(),
        };
        assert_eq!(err.to_string(), "/pet/name: expected string, got number");
    }
}
