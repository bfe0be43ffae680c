//! In-process fakes for backends and the event sink.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use conduit_core::{
    error::CoreError,
    events::{DomainEvent, EventSink, ImportReference},
    types::{DatasetId, EventId, UserId, WorkspaceId},
};
use tokio::sync::oneshot;

use crate::{
    backend::{BackendConnection, BackendConnector, Column, ProcessHandle},
    error::BackendError,
    types::{DataSource, Vendor},
};

/// Records every statement; optionally parks named sessions until killed.
pub struct FakeBackend {
    vendor: Vendor,
    statements: Mutex<Vec<(String, Option<String>)>>,
    tables: Mutex<HashSet<(String, String)>>,
    columns: Mutex<Vec<Column>>,
    sessions: Mutex<HashMap<i64, (ProcessHandle, Option<oneshot::Sender<()>>)>>,
    next_pid: AtomicI64,
    block_sessions: AtomicBool,
    unreachable: AtomicBool,
    fail_statements: AtomicBool,
}

impl FakeBackend {
    pub fn new(vendor: Vendor) -> Self {
        Self {
            vendor,
            statements: Mutex::new(Vec::new()),
            tables: Mutex::new(HashSet::new()),
            columns: Mutex::new(vec![Column::new("id", "integer")]),
            sessions: Mutex::new(HashMap::new()),
            next_pid: AtomicI64::new(1000),
            block_sessions: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
            fail_statements: AtomicBool::new(false),
        }
    }

    pub fn statements(&self) -> Vec<(String, Option<String>)> {
        self.statements.lock().unwrap().clone()
    }

    pub fn add_table(&self, schema: &str, table: &str) {
        self.tables
            .lock()
            .unwrap()
            .insert((schema.to_string(), table.to_string()));
    }

    pub fn set_columns(&self, columns: Vec<Column>) {
        *self.columns.lock().unwrap() = columns;
    }

    /// Named sessions hang until [`kill`](BackendConnection::kill)ed.
    pub fn block_sessions(&self) {
        self.block_sessions.store(true, Ordering::SeqCst);
    }

    /// Process listing and killing fail as if the server were down.
    pub fn set_unreachable(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    pub fn fail_statements(&self) {
        self.fail_statements.store(true, Ordering::SeqCst);
    }

    /// Register a live session under `name` without running a statement.
    pub fn attach_session(&self, name: &str) {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().unwrap().insert(
            pid,
            (
                ProcessHandle {
                    pid,
                    name: name.to_string(),
                },
                None,
            ),
        );
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Poll until at least `n` sessions are parked.
    pub async fn wait_for_sessions(&self, n: usize) {
        for _ in 0..500 {
            if self.session_count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("sessions never started");
    }

    fn track_created_table(&self, sql: &str) {
        let Some(rest) = sql.strip_prefix("CREATE TABLE ") else {
            return;
        };
        let target = rest
            .split(|c: char| c == ' ' || c == '(')
            .next()
            .unwrap_or_default();
        let mut parts = target.splitn(2, '.').map(|p| p.trim_matches('"').to_string());
        if let (Some(schema), Some(table)) = (parts.next(), parts.next()) {
            self.tables.lock().unwrap().insert((schema, table));
        }
    }
}

#[async_trait]
impl BackendConnection for FakeBackend {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    async fn execute(&self, sql: &str, session_name: Option<&str>) -> Result<u64, BackendError> {
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), session_name.map(str::to_string)));
        if self.fail_statements.load(Ordering::SeqCst) {
            return Err(BackendError::Query(format!("relation does not exist: {sql}")));
        }
        self.track_created_table(sql);

        let Some(name) = session_name else {
            return Ok(0);
        };
        if !self.block_sessions.load(Ordering::SeqCst) {
            return Ok(3);
        }

        let (tx, rx) = oneshot::channel();
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().unwrap().insert(
            pid,
            (
                ProcessHandle {
                    pid,
                    name: name.to_string(),
                },
                Some(tx),
            ),
        );
        let _ = rx.await;
        Err(BackendError::Terminated(name.to_string()))
    }

    async fn list_processes(&self, pattern: &str) -> Result<Vec<ProcessHandle>, BackendError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BackendError::Connection("connection refused".into()));
        }
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|(p, _)| like_match(pattern, &p.name))
            .map(|(p, _)| p.clone())
            .collect())
    }

    async fn kill(&self, process: &ProcessHandle) -> Result<(), BackendError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BackendError::Connection("connection refused".into()));
        }
        if let Some((_, Some(stop))) = self.sessions.lock().unwrap().remove(&process.pid) {
            let _ = stop.send(());
        }
        Ok(())
    }

    async fn table_names(&self, schema: &str) -> Result<Vec<String>, BackendError> {
        let mut names: Vec<String> = self
            .tables
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == schema)
            .map(|(_, t)| t.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn columns(&self, _schema: &str, _table: &str) -> Result<Vec<Column>, BackendError> {
        Ok(self.columns.lock().unwrap().clone())
    }
}

/// Hands out pre-registered fakes keyed by (data source name, database).
#[derive(Default)]
pub struct FakeConnector {
    backends: Mutex<HashMap<(String, String), Arc<FakeBackend>>>,
    refused: Mutex<HashSet<String>>,
}

impl FakeConnector {
    pub fn register(&self, data_source: &str, database: &str, backend: Arc<FakeBackend>) {
        self.backends
            .lock()
            .unwrap()
            .insert((data_source.to_string(), database.to_string()), backend);
    }

    /// Every connect to `data_source` fails.
    pub fn refuse(&self, data_source: &str) {
        self.refused.lock().unwrap().insert(data_source.to_string());
    }
}

#[async_trait]
impl BackendConnector for FakeConnector {
    async fn connect(
        &self,
        data_source: &DataSource,
        database: &str,
        _user: &UserId,
    ) -> Result<Arc<dyn BackendConnection>, BackendError> {
        if self.refused.lock().unwrap().contains(&data_source.name) {
            return Err(BackendError::Connection(format!(
                "{} is unreachable",
                data_source.name
            )));
        }
        let backend = self
            .backends
            .lock()
            .unwrap()
            .get(&(data_source.name.clone(), database.to_string()))
            .cloned()
            .ok_or_else(|| BackendError::NotConfigured {
                name: data_source.name.clone(),
            })?;
        Ok(backend as Arc<dyn BackendConnection>)
    }
}

/// Keeps published events and notifications in memory.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(EventId, UserId, DomainEvent)>>,
    pub notifications: Mutex<Vec<(UserId, EventId)>>,
    rejected: Mutex<HashSet<&'static str>>,
}

impl RecordingSink {
    /// Publishing events of this kind fails as if the store were down.
    pub fn reject(&self, kind: &'static str) {
        self.rejected.lock().unwrap().insert(kind);
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, e)| e.kind())
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, actor: &UserId, event: DomainEvent) -> conduit_core::Result<EventId> {
        if self.rejected.lock().unwrap().contains(event.kind()) {
            return Err(CoreError::EventSink("sink down".into()));
        }
        let id = EventId::new();
        self.events
            .lock()
            .unwrap()
            .push((id.clone(), actor.clone(), event));
        Ok(id)
    }

    fn notify(&self, recipient: &UserId, event_id: &EventId) -> conduit_core::Result<()> {
        self.notifications
            .lock()
            .unwrap()
            .push((recipient.clone(), event_id.clone()));
        Ok(())
    }

    fn link_import_created(
        &self,
        workspace_id: &WorkspaceId,
        source_dataset_id: &DatasetId,
        reference: &ImportReference,
        dataset_id: Option<&DatasetId>,
    ) -> conduit_core::Result<bool> {
        let mut events = self.events.lock().unwrap();
        for (_, _, event) in events.iter_mut().rev() {
            if let DomainEvent::DatasetImportCreated {
                workspace_id: w,
                source_dataset_id: s,
                reference: r,
                dataset_id: d,
                ..
            } = event
            {
                if w == workspace_id && s == source_dataset_id && r == reference {
                    *d = dataset_id.cloned();
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

/// SQL LIKE matching over a session name, case-sensitive, no escape character.
fn like_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = name.chars().collect();
    let (mut pi, mut si) = (0, 0);
    // Position of the last `%` and the name index it was tried against.
    let mut backtrack: Option<(usize, usize)> = None;

    while si < s.len() {
        if pi < p.len() && p[pi] == '%' {
            backtrack = Some((pi, si));
            pi += 1;
        } else if pi < p.len() && (p[pi] == '_' || p[pi] == s[si]) {
            pi += 1;
            si += 1;
        } else if let Some((bp, bs)) = backtrack {
            pi = bp + 1;
            si = bs + 1;
            backtrack = Some((bp, bs + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_matches_pipe_session_names() {
        let pattern = "pipe%_1700000000_imp-1_r";
        assert!(like_match(pattern, "pipe_1700000000_imp-1_r"));
        assert!(like_match(pattern, "pipe123_1700000000_imp-1_r"));
        assert!(!like_match(pattern, "pipe_1700000000_imp-1_w"));
        assert!(!like_match(pattern, "other_1700000000_imp-1_r"));
    }

    #[test]
    fn like_wildcards() {
        assert!(like_match("%", ""));
        assert!(like_match("a_c", "abc"));
        assert!(!like_match("a_c", "ac"));
        assert!(like_match("%b%", "abc"));
        assert!(like_match("a%%c", "abbbc"));
        assert!(!like_match("abc", "abcd"));
    }
}
