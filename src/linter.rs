//! Specification linting - static checks over persisted specification records.
//!
//! Checks records for:
//! - YAML syntax and record shape
//! - `$ref`s with no matching entry in the root's `definitions`
//! - Duplicate operation ids, and ids not derived from the specification id
//! - Missing `$schema`

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::import::SpecificationContent;
use crate::schema::dangling_refs;
use crate::store::Record;
use crate::types::{operation_id_for, ImportConfig, Operation};

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic message from linting.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub file: PathBuf,
    /// JSON path to the issue (e.g., "/operations/0/requestSchema/application~1json")
    pub path: String,
    pub message: String,
}

/// Result of linting a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Status of a linted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

/// Result of linting a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub path: PathBuf,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<FileResult>,
}

impl LintResult {
    /// Returns true if all files passed (no errors).
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }
}

/// Lint a specification record or a directory of them.
///
/// Directories are searched recursively for files ending in the default
/// specification suffix. If `strict` is true, warnings are treated as errors.
pub fn lint(path: &Path, strict: bool) -> LintResult {
    let files = collect_specification_files(path, &ImportConfig::default().specification_suffix);
    let mut results = Vec::new();
    let mut total_errors = 0;
    let mut total_warnings = 0;

    for file in &files {
        let file_result = lint_file(file, path);
        total_errors += file_result
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count();
        total_warnings += file_result
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count();
        results.push(file_result);
    }

    let failed = results
        .iter()
        .filter(|r| {
            if strict {
                r.status != FileStatus::Ok
            } else {
                r.status == FileStatus::Error
            }
        })
        .count();

    LintResult {
        path: path.to_path_buf(),
        files_checked: files.len(),
        passed: files.len() - failed,
        failed,
        errors: total_errors,
        warnings: total_warnings,
        results,
    }
}

/// Lint a single specification record file.
pub fn lint_file(file: &Path, base_path: &Path) -> FileResult {
    let relative = file.strip_prefix(base_path).unwrap_or(file).to_path_buf();
    let relative = if relative.as_os_str().is_empty() {
        file.to_path_buf()
    } else {
        relative
    };

    let decoded = std::fs::read_to_string(file)
        .map_err(|e| e.to_string())
        .and_then(|text| {
            serde_yaml::from_str::<Record<SpecificationContent>>(&text).map_err(|e| e.to_string())
        });
    let record = match decoded {
        Ok(record) => record,
        Err(message) => {
            return FileResult {
                file: relative,
                status: FileStatus::Error,
                diagnostics: vec![Diagnostic {
                    severity: Severity::Error,
                    code: "E001".to_string(),
                    file: file.to_path_buf(),
                    path: "/".to_string(),
                    message: format!("cannot read specification record: {}", message),
                }],
            };
        }
    };

    let mut diagnostics = lint_specification(file, &record.id, &record.content.operations);
    if record.schema.is_none() {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            code: "W001".to_string(),
            file: file.to_path_buf(),
            path: "/".to_string(),
            message: "record missing $schema field".to_string(),
        });
    }

    let status = if diagnostics.iter().any(|d| d.severity == Severity::Error) {
        FileStatus::Error
    } else if diagnostics.iter().any(|d| d.severity == Severity::Warning) {
        FileStatus::Warning
    } else {
        FileStatus::Ok
    };

    FileResult {
        file: relative,
        status,
        diagnostics,
    }
}

/// Check the operations of one specification.
pub fn lint_specification(file: &Path, specification_id: &str, operations: &[Operation]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut seen = HashSet::new();

    for (index, operation) in operations.iter().enumerate() {
        let base = format!("/operations/{}", index);
        let error = |code: &str, path: String, message: String| Diagnostic {
            severity: Severity::Error,
            code: code.to_string(),
            file: file.to_path_buf(),
            path,
            message,
        };

        if !seen.insert(operation.id.as_str()) {
            diagnostics.push(error(
                "E003",
                format!("{}/id", base),
                format!("duplicate operation id {}", operation.id),
            ));
        }
        let expected = operation_id_for(specification_id, &operation.name);
        if operation.id != expected {
            diagnostics.push(error(
                "E004",
                format!("{}/id", base),
                format!("operation id {} should be {}", operation.id, expected),
            ));
        }

        for (path, root) in schema_roots(operation) {
            for name in dangling_refs(root) {
                diagnostics.push(error(
                    "E002",
                    format!("{}{}", base, path),
                    format!("reference to missing definition {}", name),
                ));
            }
        }
    }
    diagnostics
}

/// Every root schema of an operation, with its pointer relative to the operation.
fn schema_roots(operation: &Operation) -> Vec<(String, &Value)> {
    let mut roots = Vec::new();
    if let Some(request) = operation.request_schema.as_object() {
        for (key, value) in request {
            match value {
                Value::Array(parameters) => {
                    for (i, parameter) in parameters.iter().enumerate() {
                        if let Some(schema) = parameter.get("schema") {
                            roots.push((format!("/requestSchema/{}/{}/schema", escape(key), i), schema));
                        }
                    }
                }
                _ => roots.push((format!("/requestSchema/{}", escape(key)), value)),
            }
        }
    }
    if let Some(responses) = operation.response_schemas.as_object() {
        for (status, contents) in responses {
            let Some(contents) = contents.as_object() else {
                continue;
            };
            for (content_type, schema) in contents {
                roots.push((
                    format!("/responseSchemas/{}/{}", escape(status), escape(content_type)),
                    schema,
                ));
            }
        }
    }
    roots
}

fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn collect_specification_files(path: &Path, suffix: &str) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(suffix))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}
