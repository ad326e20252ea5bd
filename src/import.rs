//! Import orchestration.
//!
//! An import runs synchronously through the stages of [`ImportState`]. Every
//! outcome is recorded in the session store; callers always receive an
//! [`ImportResult`] and never an error.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::detect::{classify_file, detect_protocol};
use crate::environment::apply_candidates;
use crate::error::ImportError;
use crate::resolver::{resolve_documents, Resolved, SourceDocument};
use crate::session::{ImportState, SessionStore};
use crate::store::{join, parent_dir, read_yaml, write_yaml, FileStore, Record};
use crate::types::{
    operation_id_for, ImportConfig, ImportRequest, ImportResult, ImportToGroupRequest,
    IntegrationSystem, Operation, Protocol, Specification, SpecificationGroup,
    SpecificationSource, UploadedFile,
};

const DEFAULT_VERSION: &str = "1.0.0";

/// Body of a persisted specification group record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupContent {
    #[serde(default)]
    pub synchronization: bool,
    pub parent_id: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Body of a persisted specification record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecificationContent {
    pub version: String,
    #[serde(default)]
    pub source: Option<String>,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub specification_sources: Vec<SpecificationSource>,
    pub parent_id: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Ensure an incoming protocol may be added to a system.
///
/// Protocols must be equal, or both members of the async family.
///
/// # Errors
///
/// Returns `ImportError::ProtocolMismatch` naming both protocols.
pub fn validate_protocol(existing: Protocol, incoming: Protocol) -> Result<(), ImportError> {
    if existing == incoming || (existing.is_async() && incoming.is_async()) {
        Ok(())
    } else {
        Err(ImportError::ProtocolMismatch { existing, incoming })
    }
}

/// 32-bit rolling hash (`h = 31 * h + byte`) as eight hex digits.
pub fn source_hash(bytes: &[u8]) -> String {
    let hash = bytes
        .iter()
        .fold(0u32, |h, &b| h.wrapping_mul(31).wrapping_add(u32::from(b)));
    format!("{:08x}", hash)
}

/// Version embedded in a file name, e.g. `petstore-v2.1.yaml` gives `2.1`.
pub fn version_from_file_name(name: &str) -> Option<String> {
    static VERSION: OnceLock<Regex> = OnceLock::new();
    let re = VERSION.get_or_init(|| {
        Regex::new(r"(?i)(?:^|[^0-9a-z])v?(\d+(?:\.\d+){1,2})").expect("valid version pattern")
    });
    re.captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn declares_root_type(sdl: &str) -> bool {
    static ROOT: OnceLock<Regex> = OnceLock::new();
    let re = ROOT.get_or_init(|| {
        Regex::new(r"(?m)^\s*(schema\s*\{|(extend\s+)?type\s+(Query|Mutation|Subscription)\b)")
            .expect("valid root type pattern")
    });
    re.is_match(sdl)
}

/// Where the imported specifications go.
enum GroupTarget<'a> {
    Named(&'a str),
    Existing(&'a str),
}

/// One specification built during an import, not yet persisted.
struct PendingSpecification {
    specification: Specification,
    files: Vec<(UploadedFile, bool)>,
    addresses: Vec<String>,
}

pub struct Importer<S: FileStore> {
    store: S,
    sessions: Arc<SessionStore>,
    config: ImportConfig,
}

impl<S: FileStore> Importer<S> {
    pub fn new(store: S, sessions: Arc<SessionStore>) -> Self {
        Self {
            store,
            sessions,
            config: ImportConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ImportConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Import files into the group named by the request, creating it if needed.
    pub fn import_specification_group(&self, request: &ImportRequest) -> ImportResult {
        let session = self.sessions.create();
        let outcome = validate_new_group(request).and_then(|()| {
            self.run(
                &session,
                &request.system_id,
                GroupTarget::Named(&request.name),
                &request.files,
            )
        });
        self.finish(&session, outcome)
    }

    /// Import files into an existing specification group.
    pub fn import_into_group(&self, request: &ImportToGroupRequest) -> ImportResult {
        let session = self.sessions.create();
        let outcome = validate_existing_group(request).and_then(|()| {
            self.run(
                &session,
                &request.system_id,
                GroupTarget::Existing(&request.specification_group_id),
                &request.files,
            )
        });
        self.finish(&session, outcome)
    }

    /// Current result of an import. Unknown ids yield a finished result with
    /// a warning.
    pub fn get_import_result(&self, id: &str) -> ImportResult {
        self.sessions.result(id)
    }

    fn finish(&self, session: &str, outcome: Result<(), ImportError>) -> ImportResult {
        match outcome {
            Ok(()) => self.sessions.complete(session),
            Err(error) => {
                tracing::warn!(session, %error, "import failed");
                self.sessions.fail(session, error.to_string());
            }
        }
        self.sessions.result(session)
    }

    fn run(
        &self,
        session: &str,
        system_id: &str,
        target: GroupTarget<'_>,
        files: &[UploadedFile],
    ) -> Result<(), ImportError> {
        let documents: Vec<SourceDocument> = files.iter().map(SourceDocument::from).collect();
        self.sessions.advance(session, ImportState::FilesConverted);

        let system_path = self
            .store
            .find_by_id(system_id, &self.config.system_suffix)
            .map_err(|_| ImportError::NotFound {
                kind: "System",
                id: system_id.to_string(),
            })?;
        let mut system: IntegrationSystem =
            read_yaml(&self.store, &system_path).map_err(ImportError::Read)?;

        let detection = detect_protocol(files).ok_or(ImportError::ProtocolUndetectable)?;
        let protocol = detection.protocol;
        self.sessions.advance(session, ImportState::ProtocolDetected);

        if let Some(existing) = system.protocol {
            validate_protocol(existing, protocol)?;
        }
        self.sessions.advance(session, ImportState::ProtocolValidated);

        let system_dir = parent_dir(&system_path).to_string();
        let (group, group_path) = self.resolve_group(&system_dir, system_id, &target)?;
        self.sessions.set_group(session, &group.id);
        self.sessions.advance(session, ImportState::GroupResolved);

        let pending = self.build_specifications(&group, protocol, detection.file_index, files, &documents)?;
        self.sessions.advance(session, ImportState::OperationsExtracted);

        let spec_dir = parent_dir(&group_path).to_string();
        self.persist(&spec_dir, &group, &group_path, &pending)?;

        if system.protocol.is_none() {
            if protocol.is_async() {
                system.protocol = Some(Protocol::Async);
                system.extended_protocol = Some(protocol.extended_name());
            } else {
                system.protocol = Some(protocol);
            }
        }
        let addresses: Vec<String> = pending.iter().flat_map(|p| p.addresses.clone()).collect();
        let changed = apply_candidates(&mut system, &addresses, protocol, self.config.environment_timeout_ms);
        write_yaml(&self.store, &system_path, &system)?;
        self.sessions.advance(session, ImportState::Persisted);

        tracing::info!(
            session,
            group = %group.id,
            %protocol,
            specifications = pending.len(),
            environments = changed,
            "import completed"
        );
        Ok(())
    }

    fn resolve_group(
        &self,
        system_dir: &str,
        system_id: &str,
        target: &GroupTarget<'_>,
    ) -> Result<(SpecificationGroup, String), ImportError> {
        let suffix = &self.config.group_suffix;
        match *target {
            GroupTarget::Named(name) => {
                let id = SpecificationGroup::id_for(system_id, name);
                match self.store.find_by_id(&id, suffix) {
                    Ok(path) => Ok((self.read_group(&path)?, path)),
                    Err(_) => {
                        let path = join(system_dir, &format!("{}{}", id, suffix));
                        Ok((SpecificationGroup::new(system_id, name), path))
                    }
                }
            }
            GroupTarget::Existing(id) => {
                let path = self
                    .store
                    .find_by_id(id, suffix)
                    .map_err(|_| ImportError::NotFound {
                        kind: "Specification group",
                        id: id.to_string(),
                    })?;
                let group = self.read_group(&path)?;
                if group.parent_id != system_id {
                    return Err(ImportError::validation(format!(
                        "Specification group {} does not belong to system {}",
                        id, system_id
                    )));
                }
                Ok((group, path))
            }
        }
    }

    fn read_group(&self, path: &str) -> Result<SpecificationGroup, ImportError> {
        let record: Record<GroupContent> =
            read_yaml(&self.store, path).map_err(ImportError::Read)?;
        Ok(SpecificationGroup {
            id: record.id,
            name: record.name,
            parent_id: record.content.parent_id,
            synchronization: record.content.synchronization,
            labels: record.content.labels,
        })
    }

    /// Resolve every main source into a specification. Nothing is written.
    fn build_specifications(
        &self,
        group: &SpecificationGroup,
        protocol: Protocol,
        detected_index: usize,
        files: &[UploadedFile],
        documents: &[SourceDocument],
    ) -> Result<Vec<PendingSpecification>, ImportError> {
        let mut taken: HashSet<String> = HashSet::new();
        let mut pending = Vec::new();

        for main_index in main_sources(protocol, detected_index, files) {
            let main = &documents[main_index];
            let auxiliary: Vec<SourceDocument> = documents
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != main_index)
                .map(|(_, d)| d.clone())
                .collect();

            let Resolved { ir, mut operations } =
                resolve_documents(protocol, &group.id, main, &auxiliary).map_err(|source| {
                    ImportError::Parse {
                        file: main.name.clone(),
                        source,
                    }
                })?;

            let version = ir
                .version()
                .or_else(|| version_from_file_name(&main.name))
                .unwrap_or_else(|| DEFAULT_VERSION.to_string());
            let specification_id = self.allocate_specification_id(&group.id, &version, &mut taken);
            for operation in &mut operations {
                operation.id = operation_id_for(&specification_id, &operation.name);
            }
            tracing::debug!(
                specification = %specification_id,
                kind = ir.kind(),
                operations = operations.len(),
                "specification built"
            );

            let files_with_role: Vec<(UploadedFile, bool)> = files
                .iter()
                .enumerate()
                .map(|(i, file)| (file.clone(), i == main_index))
                .collect();
            let specification_sources = files_with_role
                .iter()
                .map(|(file, is_main)| SpecificationSource {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: file.name.clone(),
                    source_hash: source_hash(&file.content),
                    file_name: format!("source-{}/{}", specification_id, file.name),
                    main_source: *is_main,
                })
                .collect();

            pending.push(PendingSpecification {
                specification: Specification {
                    id: specification_id,
                    name: version.clone(),
                    version,
                    parent_id: group.id.clone(),
                    source: Some(main.name.clone()),
                    operations,
                    specification_sources,
                    labels: Vec::new(),
                },
                files: files_with_role,
                addresses: ir.addresses(),
            });
        }
        Ok(pending)
    }

    /// `{groupId}-{version}`, with a numeric suffix when that id is taken.
    fn allocate_specification_id(&self, group_id: &str, version: &str, taken: &mut HashSet<String>) -> String {
        let base = format!("{}-{}", group_id, version);
        let suffix = &self.config.specification_suffix;
        let mut candidate = base.clone();
        let mut n = 1;
        while taken.contains(&candidate) || self.store.exists(&candidate, suffix) {
            candidate = format!("{}-{}", base, n);
            n += 1;
        }
        taken.insert(candidate.clone());
        candidate
    }

    fn persist(
        &self,
        dir: &str,
        group: &SpecificationGroup,
        group_path: &str,
        pending: &[PendingSpecification],
    ) -> Result<(), ImportError> {
        let group_record = Record {
            id: group.id.clone(),
            schema: Some(self.config.group_schema.clone()),
            name: group.name.clone(),
            content: GroupContent {
                synchronization: group.synchronization,
                parent_id: group.parent_id.clone(),
                labels: group.labels.clone(),
            },
        };
        write_yaml(&self.store, group_path, &group_record)?;

        for spec in pending {
            let specification = &spec.specification;
            for (file, _) in &spec.files {
                let path = join(dir, &format!("source-{}/{}", specification.id, file.name));
                self.store.write(&path, &file.content)?;
            }
            let record = Record {
                id: specification.id.clone(),
                schema: Some(self.config.specification_schema.clone()),
                name: specification.name.clone(),
                content: SpecificationContent {
                    version: specification.version.clone(),
                    source: specification.source.clone(),
                    operations: specification.operations.clone(),
                    specification_sources: specification.specification_sources.clone(),
                    parent_id: specification.parent_id.clone(),
                    labels: specification.labels.clone(),
                },
            };
            let path = join(
                dir,
                &format!("{}{}", specification.id, self.config.specification_suffix),
            );
            write_yaml(&self.store, &path, &record)?;
        }
        Ok(())
    }
}

fn validate_new_group(request: &ImportRequest) -> Result<(), ImportError> {
    if request.system_id.trim().is_empty() {
        return Err(ImportError::validation("System id is required"));
    }
    if request.name.trim().is_empty() {
        return Err(ImportError::validation("Specification group name is required"));
    }
    if request.files.is_empty() {
        return Err(ImportError::validation("At least one file is required"));
    }
    Ok(())
}

fn validate_existing_group(request: &ImportToGroupRequest) -> Result<(), ImportError> {
    if request.system_id.trim().is_empty() {
        return Err(ImportError::validation("System id is required"));
    }
    if request.specification_group_id.trim().is_empty() {
        return Err(ImportError::validation("Specification group id is required"));
    }
    if request.files.is_empty() {
        return Err(ImportError::validation("At least one file is required"));
    }
    Ok(())
}

/// Indices of the files that become main sources of a specification.
///
/// SOAP and gRPC build one specification from all files, rooted at the file
/// that decided the protocol. GraphQL does the same, rooted at the first file
/// declaring a root operation type. Other protocols build one specification
/// per file of the detected family.
fn main_sources(protocol: Protocol, detected_index: usize, files: &[UploadedFile]) -> Vec<usize> {
    match protocol {
        Protocol::Soap | Protocol::Grpc => vec![detected_index],
        Protocol::Graphql => {
            let root = files
                .iter()
                .position(|file| {
                    classify_file(&file.name, &file.text()) == Some(Protocol::Graphql)
                        && declares_root_type(&file.text())
                })
                .unwrap_or(detected_index);
            vec![root]
        }
        _ => files
            .iter()
            .enumerate()
            .filter(|(_, file)| {
                classify_file(&file.name, &file.text()).is_some_and(|found| {
                    found == protocol || (found.is_async() && protocol.is_async())
                })
            })
            .map(|(i, _)| i)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryStore;
    use crate::types::SystemKind;

    const PETSTORE: &str = "openapi: 3.0.0\ninfo: {title: Pets, version: 2.0.0}\nservers: [{url: 'https://pets.example.com/'}]\npaths:\n  /pets:\n    get:\n      responses: {'200': {description: ok}}\n";

    fn importer_with_system(kind: SystemKind) -> Importer<MemoryStore> {
        let store = MemoryStore::new();
        let system = IntegrationSystem::new("sys", "Pets", kind);
        write_yaml(&store, "sys/sys.service.qip.yaml", &system).unwrap();
        Importer::new(store, Arc::new(SessionStore::new()))
    }

    fn request(files: Vec<UploadedFile>) -> ImportRequest {
        ImportRequest {
            system_id: "sys".into(),
            name: "pets".into(),
            files,
        }
    }

    #[test]
    fn protocol_compatibility() {
        assert!(validate_protocol(Protocol::Kafka, Protocol::Amqp).is_ok());
        assert!(validate_protocol(Protocol::Async, Protocol::Nats).is_ok());
        assert!(validate_protocol(Protocol::Http, Protocol::Http).is_ok());
        let err = validate_protocol(Protocol::Http, Protocol::Soap).unwrap_err();
        assert!(err.to_string().contains("HTTP"));
        assert!(err.to_string().contains("SOAP"));
    }

    #[test]
    fn hash_is_java_style() {
        assert_eq!(source_hash(b""), "00000000");
        // 'a' = 97, "ab" = 97 * 31 + 98 = 3105
        assert_eq!(source_hash(b"ab"), format!("{:08x}", 3105));
    }

    #[test]
    fn versions_from_file_names() {
        assert_eq!(version_from_file_name("petstore-v2.1.yaml").as_deref(), Some("2.1"));
        assert_eq!(version_from_file_name("api_1.4.0.json").as_deref(), Some("1.4.0"));
        assert_eq!(version_from_file_name("petstore.yaml"), None);
    }

    #[test]
    fn empty_import_fails_validation() {
        let importer = importer_with_system(SystemKind::External);
        let result = importer.import_specification_group(&request(Vec::new()));
        assert!(result.done);
        assert_eq!(
            result.warning_message.as_deref(),
            Some("Invalid import request: At least one file is required")
        );
    }

    #[test]
    fn openapi_import_persists_records() {
        let importer = importer_with_system(SystemKind::External);
        let result = importer.import_specification_group(&request(vec![UploadedFile::new(
            "petstore.yaml",
            PETSTORE,
        )]));
        assert!(result.done);
        assert_eq!(result.warning_message, None);
        assert_eq!(result.specification_group_id, "sys-pets");

        let store = importer.store();
        let spec: Record<SpecificationContent> =
            read_yaml(store, "sys/sys-pets-2.0.0.specification.qip.yaml").unwrap();
        assert_eq!(spec.name, "2.0.0");
        assert_eq!(spec.content.operations.len(), 1);
        assert_eq!(spec.content.operations[0].id, "sys-pets-2.0.0-get_pets");
        assert!(spec.content.specification_sources[0].main_source);
        assert!(store
            .read_text("sys/source-sys-pets-2.0.0/petstore.yaml")
            .is_ok());

        let system: IntegrationSystem = read_yaml(store, "sys/sys.service.qip.yaml").unwrap();
        assert_eq!(system.protocol, Some(Protocol::Http));
        assert_eq!(system.environments.len(), 1);
        assert_eq!(system.environments[0].address, "https://pets.example.com");
        assert!(system.environments[0].is_active);
    }

    #[test]
    fn reimport_gets_distinct_specification_id() {
        let importer = importer_with_system(SystemKind::External);
        let files = vec![UploadedFile::new("petstore.yaml", PETSTORE)];
        importer.import_specification_group(&request(files.clone()));
        let second = importer.import_specification_group(&request(files));
        assert_eq!(second.warning_message, None);
        assert!(importer
            .store()
            .exists("sys-pets-2.0.0-1", ".specification.qip.yaml"));

        let system: IntegrationSystem =
            read_yaml(importer.store(), "sys/sys.service.qip.yaml").unwrap();
        assert_eq!(system.environments.len(), 1);
    }

    #[test]
    fn mismatched_protocol_writes_nothing() {
        let importer = importer_with_system(SystemKind::External);
        importer.import_specification_group(&request(vec![UploadedFile::new(
            "petstore.yaml",
            PETSTORE,
        )]));
        let before = importer.store().paths();

        let wsdl = r#"<definitions xmlns="http://schemas.xmlsoap.org/wsdl/" name="x"/>"#;
        let result = importer.import_specification_group(&ImportRequest {
            system_id: "sys".into(),
            name: "soap".into(),
            files: vec![UploadedFile::new("service.wsdl", wsdl)],
        });
        assert!(result.done);
        let message = result.warning_message.unwrap();
        assert!(message.contains("HTTP") && message.contains("SOAP"), "{}", message);
        assert_eq!(importer.store().paths(), before);
        assert_eq!(
            importer.sessions().get(&result.id).unwrap().state,
            ImportState::Failed
        );
    }

    #[test]
    fn unknown_system_and_group() {
        let importer = importer_with_system(SystemKind::External);
        let result = importer.import_specification_group(&ImportRequest {
            system_id: "ghost".into(),
            name: "pets".into(),
            files: vec![UploadedFile::new("petstore.yaml", PETSTORE)],
        });
        assert_eq!(result.warning_message.as_deref(), Some("System ghost not found"));

        let result = importer.import_into_group(&ImportToGroupRequest {
            specification_group_id: "sys-none".into(),
            system_id: "sys".into(),
            files: vec![UploadedFile::new("petstore.yaml", PETSTORE)],
        });
        assert_eq!(
            result.warning_message.as_deref(),
            Some("Specification group sys-none not found")
        );
    }

    #[test]
    fn import_into_existing_group() {
        let importer = importer_with_system(SystemKind::External);
        let first = importer.import_specification_group(&request(vec![UploadedFile::new(
            "petstore.yaml",
            PETSTORE,
        )]));
        let v3 = PETSTORE.replace("2.0.0", "3.0.0");
        let result = importer.import_into_group(&ImportToGroupRequest {
            specification_group_id: first.specification_group_id.clone(),
            system_id: "sys".into(),
            files: vec![UploadedFile::new("petstore.yaml", v3)],
        });
        assert_eq!(result.warning_message, None);
        assert!(importer
            .store()
            .exists("sys-pets-3.0.0", ".specification.qip.yaml"));
    }

    #[test]
    fn async_family_stored_as_extended_protocol() {
        let importer = importer_with_system(SystemKind::Internal);
        let kafka = "asyncapi: 2.6.0\ninfo: {title: Orders, version: 1.0.0}\nservers: {prod: {url: 'kafka:9092', protocol: kafka}}\nchannels: {}\n";
        let result = importer.import_specification_group(&request(vec![UploadedFile::new(
            "orders.yaml",
            kafka,
        )]));
        assert_eq!(result.warning_message, None);
        let system: IntegrationSystem =
            read_yaml(importer.store(), "sys/sys.service.qip.yaml").unwrap();
        assert_eq!(system.protocol, Some(Protocol::Async));
        assert_eq!(system.extended_protocol.as_deref(), Some("kafka"));
        assert_eq!(system.environments[0].properties["saslMechanism"], "PLAIN");

        let amqp = kafka.replace("protocol: kafka", "protocol: amqp");
        let result = importer.import_specification_group(&request(vec![UploadedFile::new(
            "orders.yaml",
            amqp,
        )]));
        assert_eq!(result.warning_message, None);
    }

    #[test]
    fn http_files_each_become_a_specification() {
        let importer = importer_with_system(SystemKind::External);
        let other = PETSTORE.replace("2.0.0", "2.1.0");
        let result = importer.import_specification_group(&request(vec![
            UploadedFile::new("a.yaml", PETSTORE),
            UploadedFile::new("b.yaml", other),
            UploadedFile::new("readme.txt", "notes"),
        ]));
        assert_eq!(result.warning_message, None);
        let store = importer.store();
        assert!(store.exists("sys-pets-2.0.0", ".specification.qip.yaml"));
        assert!(store.exists("sys-pets-2.1.0", ".specification.qip.yaml"));
    }

    #[test]
    fn graphql_split_schema_is_one_specification() {
        let importer = importer_with_system(SystemKind::External);
        let result = importer.import_specification_group(&request(vec![
            UploadedFile::new("types.graphql", "type Pet {\n  id: ID!\n  name: String\n}\n"),
            UploadedFile::new("schema.graphql", "type Query {\n  pet(id: ID!): Pet\n}\n"),
        ]));
        assert_eq!(result.warning_message, None);

        let store = importer.store();
        assert!(!store.exists("sys-pets-1.0.0-1", ".specification.qip.yaml"));
        let spec: Record<SpecificationContent> =
            read_yaml(store, "sys/sys-pets-1.0.0.specification.qip.yaml").unwrap();
        let ids: Vec<&str> = spec.content.operations.iter().map(|op| op.id.as_str()).collect();
        assert_eq!(ids, vec!["sys-pets-1.0.0-pet"]);
        assert_eq!(spec.content.source.as_deref(), Some("schema.graphql"));
        let response = &spec.content.operations[0].response_schemas["200"]["application/json"];
        assert_eq!(response["definitions"]["Pet"]["properties"]["name"]["type"], "string");

        let main: Vec<&str> = spec
            .content
            .specification_sources
            .iter()
            .filter(|source| source.main_source)
            .map(|source| source.name.as_str())
            .collect();
        assert_eq!(main, vec!["schema.graphql"]);
    }

    /// Accepts group records, rejects specification records.
    struct RejectingStore {
        inner: MemoryStore,
    }

    impl FileStore for RejectingStore {
        fn read_text(&self, path: &str) -> Result<String, StoreError> {
            self.inner.read_text(path)
        }

        fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
            if path.ends_with(".specification.qip.yaml") {
                return Err(StoreError::Io {
                    path: path.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                });
            }
            self.inner.write(path, bytes)
        }

        fn find_by_id(&self, id: &str, suffix: &str) -> Result<String, StoreError> {
            self.inner.find_by_id(id, suffix)
        }
    }

    #[test]
    fn write_failure_fails_the_import() {
        let inner = MemoryStore::new();
        let system = IntegrationSystem::new("sys", "Pets", SystemKind::External);
        write_yaml(&inner, "sys/sys.service.qip.yaml", &system).unwrap();
        let importer = Importer::new(RejectingStore { inner }, Arc::new(SessionStore::new()));

        let result = importer.import_specification_group(&request(vec![UploadedFile::new(
            "petstore.yaml",
            PETSTORE,
        )]));
        assert!(result.done);
        let message = result.warning_message.unwrap();
        assert!(message.starts_with("Failed to persist import results"), "{}", message);
        assert_eq!(
            importer.sessions().get(&result.id).unwrap().state,
            ImportState::Failed
        );
        assert!(importer.store().exists("sys-pets", ".specification-group.qip.yaml"));

        let stored: IntegrationSystem =
            read_yaml(importer.store(), "sys/sys.service.qip.yaml").unwrap();
        assert_eq!(stored, system);
    }

    #[test]
    fn unreadable_system_record_is_a_read_failure() {
        let store = MemoryStore::new();
        store.write("sys/sys.service.qip.yaml", b"id: [unclosed").unwrap();
        let importer = Importer::new(store, Arc::new(SessionStore::new()));

        let result = importer.import_specification_group(&request(vec![UploadedFile::new(
            "petstore.yaml",
            PETSTORE,
        )]));
        let message = result.warning_message.unwrap();
        assert!(message.starts_with("Failed to read stored record"), "{}", message);
        assert!(message.contains("sys/sys.service.qip.yaml"), "{}", message);
        assert_eq!(importer.store().paths(), vec!["sys/sys.service.qip.yaml".to_string()]);
    }
}
