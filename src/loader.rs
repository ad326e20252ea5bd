//! Document loading and content sniffing.
//!
//! Handles loading uploaded documents from files and HTTP URLs, and the
//! structured JSON-then-YAML parse that every resolver starts from.

use std::path::Path;

use serde_json::Value;

use crate::error::ResolveError;
use crate::types::UploadedFile;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Parse text as JSON, falling back to YAML.
///
/// Only mappings and sequences count as structured content; a document that
/// parses to a bare scalar (plain prose, XML, IDL) is reported as a failure.
///
/// # Errors
///
/// Returns `ResolveError::InvalidDocument` if neither parser yields a mapping
/// or sequence.
pub fn parse_structured(text: &str) -> Result<Value, ResolveError> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if is_structured(&value) {
            return Ok(value);
        }
    }

    match serde_yaml::from_str::<Value>(text) {
        Ok(value) if is_structured(&value) => Ok(value),
        Ok(value) => Err(ResolveError::InvalidDocument {
            message: format!(
                "expected a mapping or sequence, got {}",
                crate::types::json_type_name(&value)
            ),
        }),
        Err(e) => Err(ResolveError::InvalidDocument {
            message: e.to_string(),
        }),
    }
}

fn is_structured(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// Load a document from a file path.
///
/// # Errors
///
/// Returns `ResolveError::FileNotFound` if the file doesn't exist, or
/// `ResolveError::ReadError` if it can't be read.
pub fn load_document(path: &Path) -> Result<UploadedFile, ResolveError> {
    if !path.exists() {
        return Err(ResolveError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read(path).map_err(|source| ResolveError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(UploadedFile::new(name, content))
}

/// Load a document from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `ResolveError::NetworkError` if the request fails.
#[cfg(feature = "remote")]
pub fn load_document_url(url: &str) -> Result<UploadedFile, ResolveError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|source| ResolveError::NetworkError {
            url: url.to_string(),
            source,
        })?;

    let response = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(|source| ResolveError::NetworkError {
            url: url.to_string(),
            source,
        })?;

    let bytes = response
        .bytes()
        .map_err(|source| ResolveError::NetworkError {
            url: url.to_string(),
            source,
        })?;

    let name = url
        .split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .filter(|n| !n.is_empty())
        .unwrap_or("document")
        .to_string();

    Ok(UploadedFile::new(name, bytes.to_vec()))
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load a document from a file path or URL.
///
/// URL loading requires the `remote` feature.
pub fn load_document_auto(source: &str) -> Result<UploadedFile, ResolveError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_document_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(ResolveError::FileNotFound {
                path: std::path::PathBuf::from(source),
            })
        }
    } else {
        load_document(Path::new(source))
    }
}

/// Navigate a local JSON Pointer reference (e.g. `#/components/schemas/Pet`).
///
/// Returns `None` when any segment is missing.
pub fn navigate_fragment<'a>(document: &'a Value, fragment: &str) -> Option<&'a Value> {
    let path = fragment.trim_start_matches('#').trim_start_matches('/');
    if path.is_empty() {
        return Some(document);
    }

    let mut current = document;
    for part in path.split('/') {
        // Unescape JSON Pointer encoding (~1 = /, ~0 = ~)
        let key = part.replace("~1", "/").replace("~0", "~");
        current = match current {
            Value::Object(map) => map.get(&key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_structured_json() {
        let value = parse_structured(r#"{"openapi": "3.0.0"}"#).unwrap();
        assert_eq!(value["openapi"], "3.0.0");
    }

    #[test]
    fn parse_structured_yaml_fallback() {
        let value = parse_structured("swagger: '2.0'\ninfo:\n  title: Pets\n").unwrap();
        assert_eq!(value["swagger"], "2.0");
        assert_eq!(value["info"]["title"], "Pets");
    }

    #[test]
    fn parse_structured_rejects_scalars() {
        let result = parse_structured("just some words");
        assert!(matches!(result, Err(ResolveError::InvalidDocument { .. })));
    }

    #[test]
    fn parse_structured_rejects_xml() {
        let result = parse_structured("<?xml version=\"1.0\"?>\n<definitions/>");
        assert!(result.is_err());
    }

    #[test]
    fn load_document_reads_bytes() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "syntax = \"proto3\";").unwrap();

        let doc = load_document(file.path()).unwrap();
        assert!(doc.text().starts_with("syntax"));
    }

    #[test]
    fn load_document_file_not_found() {
        let result = load_document(Path::new("/nonexistent/api.yaml"));
        assert!(matches!(result, Err(ResolveError::FileNotFound { .. })));
    }

    #[test]
    fn is_url_detection() {
        assert!(is_url("https://example.com/api.yaml"));
        assert!(is_url("http://example.com/api.yaml"));
        assert!(!is_url("./api.yaml"));
    }

    #[test]
    fn navigate_fragment_pointer() {
        let doc = json!({
            "components": { "schemas": { "a/b": { "type": "string" } } },
            "list": [{ "x": 1 }]
        });
        assert_eq!(
            navigate_fragment(&doc, "#/components/schemas/a~1b"),
            Some(&json!({ "type": "string" }))
        );
        assert_eq!(navigate_fragment(&doc, "#/list/0/x"), Some(&json!(1)));
        assert_eq!(navigate_fragment(&doc, "#/components/missing"), None);
        assert_eq!(navigate_fragment(&doc, "#"), Some(&doc));
    }
}
