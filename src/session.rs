//! Import sessions and their state machine.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;

use crate::types::ImportResult;

/// Progress of one import. Stages run strictly in declaration order; any stage
/// may jump to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportState {
    Created,
    FilesConverted,
    ProtocolDetected,
    ProtocolValidated,
    GroupResolved,
    OperationsExtracted,
    Persisted,
    Completed,
    Failed,
}

impl ImportState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportState::Completed | ImportState::Failed)
    }
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSession {
    pub id: String,
    pub specification_group_id: String,
    pub done: bool,
    pub warning_message: Option<String>,
    pub state: ImportState,
}

impl ImportSession {
    fn new(id: String) -> Self {
        Self {
            id,
            specification_group_id: String::new(),
            done: false,
            warning_message: None,
            state: ImportState::Created,
        }
    }

    pub fn to_result(&self) -> ImportResult {
        ImportResult {
            id: self.id.clone(),
            specification_group_id: self.specification_group_id.clone(),
            done: self.done,
            warning_message: self.warning_message.clone(),
        }
    }
}

/// Process-wide table of import sessions.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, ImportSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session in the `Created` state and return its id.
    pub fn create(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions
            .lock()
            .insert(id.clone(), ImportSession::new(id.clone()));
        tracing::debug!(session = %id, "import session created");
        id
    }

    /// Move a session forward. Terminal sessions and backward moves are ignored.
    pub fn advance(&self, id: &str, state: ImportState) {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(id) else {
            return;
        };
        if session.state.is_terminal() || state <= session.state {
            tracing::debug!(session = %id, from = %session.state, to = %state, "ignoring transition");
            return;
        }
        tracing::debug!(session = %id, from = %session.state, to = %state, "import state");
        session.state = state;
    }

    pub fn set_group(&self, id: &str, specification_group_id: &str) {
        if let Some(session) = self.sessions.lock().get_mut(id) {
            session.specification_group_id = specification_group_id.to_string();
        }
    }

    pub fn complete(&self, id: &str) {
        self.finish(id, ImportState::Completed, None);
    }

    pub fn fail(&self, id: &str, message: impl Into<String>) {
        self.finish(id, ImportState::Failed, Some(message.into()));
    }

    fn finish(&self, id: &str, state: ImportState, warning: Option<String>) {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(id) else {
            return;
        };
        if session.state.is_terminal() {
            return;
        }
        session.state = state;
        session.done = true;
        session.warning_message = warning;
    }

    pub fn get(&self, id: &str) -> Option<ImportSession> {
        self.sessions.lock().get(id).cloned()
    }

    /// Result for a session id. Unknown ids yield a finished result with a
    /// warning rather than an error.
    pub fn result(&self, id: &str) -> ImportResult {
        match self.get(id) {
            Some(session) => session.to_result(),
            None => ImportResult {
                id: id.to_string(),
                specification_group_id: String::new(),
                done: true,
                warning_message: Some(format!("Import session {} not found", id)),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_advance_in_order() {
        let store = SessionStore::new();
        let id = store.create();
        store.advance(&id, ImportState::FilesConverted);
        store.advance(&id, ImportState::ProtocolDetected);
        store.advance(&id, ImportState::Created);
        assert_eq!(store.get(&id).unwrap().state, ImportState::ProtocolDetected);
        assert!(!store.result(&id).done);
    }

    #[test]
    fn failure_is_terminal_with_warning() {
        let store = SessionStore::new();
        let id = store.create();
        store.fail(&id, "boom");
        store.complete(&id);
        store.advance(&id, ImportState::Persisted);

        let session = store.get(&id).unwrap();
        assert_eq!(session.state, ImportState::Failed);
        assert!(session.done);
        assert_eq!(session.warning_message.as_deref(), Some("boom"));
    }

    #[test]
    fn completion_carries_group() {
        let store = SessionStore::new();
        let id = store.create();
        store.set_group(&id, "sys-pets");
        store.complete(&id);
        let result = store.result(&id);
        assert!(result.done);
        assert_eq!(result.specification_group_id, "sys-pets");
        assert!(result.warning_message.is_none());
    }

    #[test]
    fn unknown_session_is_done_with_warning() {
        let store = SessionStore::new();
        let result = store.result("missing");
        assert!(result.done);
        assert!(result.specification_group_id.is_empty());
        assert!(result.warning_message.unwrap().contains("missing"));
        assert!(store.is_empty());
    }
}
