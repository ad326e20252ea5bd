//! Specification Import CLI
//!
//! Command-line interface for detecting, resolving, importing, linting and
//! validating API specification documents.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use spec_import::{
    detect_protocol, lint, load_document, load_document_auto, parse_structured, resolve_documents,
    validate_payload, write_yaml, Direction, DirectoryStore, FileStatus, FileStore, ImportConfig,
    ImportRequest, ImportResult, ImportToGroupRequest, Importer, IntegrationSystem, Operation,
    Protocol, Record, SessionStore, Severity, SourceDocument, SpecificationContent, SystemKind,
    UploadedFile, ValidateError,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spec-import")]
#[command(about = "Normalize API specifications into operations with JSON Schema")]
#[command(version)]
struct Cli {
    /// Log resolution details to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the protocol of a set of files
    Detect {
        /// Files to classify, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve a document into operations
    Resolve {
        /// Main document: file path or URL (http:// or https://)
        source: String,

        /// Auxiliary documents (imported XSDs, .proto files, SDL extensions)
        #[arg(long = "aux")]
        auxiliary: Vec<PathBuf>,

        /// Protocol to resolve as (detected when omitted)
        #[arg(long)]
        protocol: Option<String>,

        /// Specification id used to prefix operation ids
        #[arg(long, default_value = "spec")]
        spec_id: String,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Import files into a specification group of a system
    Import {
        /// Files to import
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Store root directory
        #[arg(long)]
        store: PathBuf,

        /// Target system id
        #[arg(long)]
        system: String,

        /// Specification group name (new or existing by name)
        #[arg(long, required_unless_present = "group", conflicts_with = "group")]
        name: Option<String>,

        /// Existing specification group id
        #[arg(long)]
        group: Option<String>,

        /// Create the system record with this kind when it does not exist
        #[arg(long, value_parser = ["external", "internal", "implemented"])]
        create_system: Option<String>,
    },

    /// Validate a payload against an operation's schema
    Validate {
        /// Specification record or source document
        specification: PathBuf,

        /// Payload file to validate (JSON or YAML)
        payload: PathBuf,

        /// Operation name or id
        #[arg(long, short)]
        operation: String,

        /// Validate as response (request by default)
        #[arg(long)]
        response: bool,

        /// Content type of the schema to use (first available if omitted)
        #[arg(long)]
        content_type: Option<String>,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// Lint specification records (dangling refs, duplicate operation ids)
    Lint {
        /// File or directory to lint
        path: PathBuf,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Suppress progress output, only show errors
        #[arg(long, short)]
        quiet: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Detect { files, json } => run_detect(&files, json),
        Commands::Resolve {
            source,
            auxiliary,
            protocol,
            spec_id,
            output,
            pretty,
        } => run_resolve(&source, &auxiliary, protocol.as_deref(), &spec_id, output, pretty),
        Commands::Import {
            files,
            store,
            system,
            name,
            group,
            create_system,
        } => run_import(ImportArgs {
            files,
            store,
            system,
            name,
            group,
            create_system,
        }),
        Commands::Validate {
            specification,
            payload,
            operation,
            response,
            content_type,
            json,
        } => run_validate(ValidateArgs {
            specification,
            payload,
            operation,
            direction: Direction::from_request_flag(!response),
            content_type,
            json_output: json,
        }),
        Commands::Lint {
            path,
            format,
            strict,
            quiet,
        } => run_lint(&path, &format, strict, quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("spec_import=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_files(paths: &[PathBuf]) -> Result<Vec<UploadedFile>, u8> {
    paths
        .iter()
        .map(|path| {
            load_document(path).map_err(|e| {
                eprintln!("Error: {}", e);
                e.exit_code() as u8
            })
        })
        .collect()
}

fn run_detect(paths: &[PathBuf], json_output: bool) -> Result<(), u8> {
    let files = load_files(paths)?;
    match detect_protocol(&files) {
        Some(detection) => {
            if json_output {
                let output = serde_json::json!({
                    "protocol": detection.protocol,
                    "file": files[detection.file_index].name,
                });
                println!("{}", output);
            } else {
                println!("{}", detection.protocol);
            }
            Ok(())
        }
        None => {
            eprintln!("Error: Unable to detect specification protocol from the provided files");
            Err(2)
        }
    }
}

fn run_resolve(
    source: &str,
    auxiliary: &[PathBuf],
    protocol: Option<&str>,
    spec_id: &str,
    output: Option<PathBuf>,
    pretty: bool,
) -> Result<(), u8> {
    let main = load_document_auto(source).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    let auxiliary = load_files(auxiliary)?;

    let protocol = match protocol {
        Some(name) => Protocol::parse(name).ok_or_else(|| {
            eprintln!("Error: unknown protocol {}", name);
            2u8
        })?,
        None => detect_protocol(std::slice::from_ref(&main))
            .map(|detection| detection.protocol)
            .ok_or_else(|| {
                eprintln!("Error: Unable to detect specification protocol of {}", main.name);
                2u8
            })?,
    };

    let auxiliary: Vec<SourceDocument> = auxiliary.iter().map(SourceDocument::from).collect();
    let resolved = resolve_documents(protocol, spec_id, &SourceDocument::from(&main), &auxiliary)
        .map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?;

    let document = serde_json::json!({
        "protocol": protocol,
        "kind": resolved.ir.kind(),
        "version": resolved.ir.version(),
        "addresses": resolved.ir.addresses(),
        "operations": resolved.operations,
    });
    let json_output = if pretty {
        serde_json::to_string_pretty(&document)
    } else {
        serde_json::to_string(&document)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}

struct ImportArgs {
    files: Vec<PathBuf>,
    store: PathBuf,
    system: String,
    name: Option<String>,
    group: Option<String>,
    create_system: Option<String>,
}

fn run_import(args: ImportArgs) -> Result<(), u8> {
    let files = load_files(&args.files)?;
    let store = DirectoryStore::new(&args.store);
    let config = ImportConfig::default();

    if let Some(kind) = &args.create_system {
        if !store.exists(&args.system, &config.system_suffix) {
            let kind = match kind.as_str() {
                "internal" => SystemKind::Internal,
                "implemented" => SystemKind::Implemented,
                _ => SystemKind::External,
            };
            let system = IntegrationSystem::new(args.system.clone(), args.system.clone(), kind);
            let path = format!("{}/{}{}", args.system, args.system, config.system_suffix);
            write_yaml(&store, &path, &system).map_err(|e| {
                eprintln!("Error: {}", e);
                3u8
            })?;
        }
    }

    let importer = Importer::new(store, Arc::new(SessionStore::new())).with_config(config);
    let result: ImportResult = match (args.group, args.name) {
        (Some(group), _) => importer.import_into_group(&ImportToGroupRequest {
            specification_group_id: group,
            system_id: args.system,
            files,
        }),
        (None, name) => importer.import_specification_group(&ImportRequest {
            system_id: args.system,
            name: name.unwrap_or_default(),
            files,
        }),
    };

    let output = serde_json::to_string_pretty(&result).map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", output);

    match result.warning_message {
        None => Ok(()),
        Some(message) => {
            eprintln!("Error: {}", message);
            Err(1)
        }
    }
}

struct ValidateArgs {
    specification: PathBuf,
    payload: PathBuf,
    operation: String,
    direction: Direction,
    content_type: Option<String>,
    json_output: bool,
}

fn run_validate(args: ValidateArgs) -> Result<(), u8> {
    let ValidateArgs {
        specification,
        payload: payload_path,
        operation,
        direction,
        content_type,
        json_output,
    } = args;

    let payload = load_document(&payload_path)
        .and_then(|file| parse_structured(&file.text()))
        .map_err(|e| {
            report_error(json_output, &format!("loading payload: {}", e));
            e.exit_code() as u8
        })?;

    let operations = load_operations(&specification).map_err(|(code, message)| {
        report_error(json_output, &message);
        code
    })?;
    let Some(target) = operations
        .iter()
        .find(|op| op.name == operation || op.id == operation)
    else {
        report_error(json_output, &format!("operation not found: {}", operation));
        return Err(2);
    };

    match validate_payload(target, &payload, direction, content_type.as_deref()) {
        Ok(()) => {
            if json_output {
                println!(r#"{{"valid":true}}"#);
            } else {
                println!("Valid");
            }
            Ok(())
        }
        Err(ValidateError::Invalid { errors }) => {
            if json_output {
                let output = serde_json::json!({
                    "valid": false,
                    "errors": errors
                });
                println!("{}", output);
            } else {
                eprintln!("Validation failed:");
                for error in errors {
                    eprintln!("  {}", error);
                }
            }
            Err(1)
        }
        Err(e) => {
            report_error(json_output, &e.to_string());
            Err(e.exit_code() as u8)
        }
    }
}

/// Operations of a persisted specification record, or of a source document
/// resolved on the fly.
fn load_operations(path: &Path) -> Result<Vec<Operation>, (u8, String)> {
    let file = load_document(path).map_err(|e| (e.exit_code() as u8, e.to_string()))?;
    let text = file.text();
    if let Ok(record) = serde_yaml::from_str::<Record<SpecificationContent>>(&text) {
        return Ok(record.content.operations);
    }

    let detection = detect_protocol(std::slice::from_ref(&file)).ok_or_else(|| {
        (
            2u8,
            format!("unable to detect specification protocol of {}", file.name),
        )
    })?;
    resolve_documents(detection.protocol, "spec", &SourceDocument::from(&file), &[])
        .map(|resolved| resolved.operations)
        .map_err(|e| (e.exit_code() as u8, e.to_string()))
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}

fn run_lint(path: &Path, format: &str, strict: bool, quiet: bool) -> Result<(), u8> {
    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(2);
    }

    let result = lint(path, strict);

    if format == "json" {
        let output = serde_json::to_string_pretty(&result).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        println!("{}", output);
    } else {
        if !quiet {
            println!("Linting {} ...\n", path.display());
        }

        for file_result in &result.results {
            let status_icon = match file_result.status {
                FileStatus::Ok => "\x1b[32m✓\x1b[0m",
                FileStatus::Warning => "\x1b[33m⚠\x1b[0m",
                FileStatus::Error => "\x1b[31m✗\x1b[0m",
            };

            if !quiet || file_result.status != FileStatus::Ok {
                println!("  {} {}", status_icon, file_result.file.display());
            }

            for diag in &file_result.diagnostics {
                let (color, label) = match diag.severity {
                    Severity::Error => ("\x1b[31m", "error"),
                    Severity::Warning => ("\x1b[33m", "warning"),
                };
                if !quiet || diag.severity == Severity::Error {
                    println!(
                        "    {}{}[{}]\x1b[0m: {} - {}",
                        color, label, diag.code, diag.path, diag.message
                    );
                }
            }
        }

        println!();
        if result.is_ok() && (!strict || result.warnings == 0) {
            println!(
                "\x1b[32m✓ {} files checked, all passed\x1b[0m",
                result.files_checked
            );
        } else {
            println!(
                "\x1b[31m✗ {} files checked: {} passed, {} failed ({} errors, {} warnings)\x1b[0m",
                result.files_checked, result.passed, result.failed, result.errors, result.warnings
            );
        }
    }

    if result.is_ok() && (!strict || result.warnings == 0) {
        Ok(())
    } else {
        Err(1)
    }
}
