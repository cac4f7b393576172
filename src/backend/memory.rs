//! Scripted in-process procedure backend.
//!
//! Stands in for the real stored procedure in tests, demos and the CLI's
//! `memory` mode. Each action name maps to a handler producing the text rows
//! the procedure would emit; fault queues let callers inject connectivity
//! failures deterministically.

use super::{Backend, BackendConnection, BackendError, Cursor, SessionSettings};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

/// Produces the raw rows for one request envelope.
pub type ProcedureHandler =
    Arc<dyn Fn(&Value) -> Result<Vec<Option<String>>, BackendError> + Send + Sync>;

/// A procedure invocation as the backend saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub connection_id: u64,
    pub procedure: String,
    pub payload: String,
    pub session: Option<SessionSettings>,
}

#[derive(Default)]
struct BackendState {
    handlers: RwLock<HashMap<String, ProcedureHandler>>,
    procedure: RwLock<Option<String>>,
    connect_faults: Mutex<VecDeque<BackendError>>,
    call_faults: Mutex<VecDeque<BackendError>>,
    calls: Mutex<Vec<RecordedCall>>,
    latency: Mutex<Option<Duration>>,
    next_connection_id: AtomicU64,
    round_trips: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory backend. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<BackendState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject calls to any procedure other than `name`.
    pub fn expect_procedure(&self, name: &str) -> &Self {
        *self
            .state
            .procedure
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(name.to_string());
        self
    }

    /// Register a handler for `action`. Replaces any previous handler.
    pub fn on_action<F>(&self, action: &str, handler: F) -> &Self
    where
        F: Fn(&Value) -> Result<Vec<Option<String>>, BackendError> + Send + Sync + 'static,
    {
        self.state
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(action.to_string(), Arc::new(handler));
        self
    }

    /// Register a handler that always returns the same rows.
    pub fn respond<I, S>(&self, action: &str, rows: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rows: Vec<Option<String>> = rows.into_iter().map(|r| Some(r.into())).collect();
        self.on_action(action, move |_| Ok(rows.clone()))
    }

    /// Fail the next `count` connection attempts with `error`.
    pub fn fail_next_connects(&self, count: usize, error: BackendError) -> &Self {
        let mut faults = lock(&self.state.connect_faults);
        faults.extend(std::iter::repeat_n(error, count));
        self
    }

    /// Fail the next `count` procedure calls with `error`.
    pub fn fail_next_calls(&self, count: usize, error: BackendError) -> &Self {
        let mut faults = lock(&self.state.call_faults);
        faults.extend(std::iter::repeat_n(error, count));
        self
    }

    /// Simulated server-side latency for every call.
    pub fn set_latency(&self, latency: Option<Duration>) -> &Self {
        *lock(&self.state.latency) = latency;
        self
    }

    /// Procedure calls dispatched so far, including failed ones.
    pub fn round_trips(&self) -> u64 {
        self.state.round_trips.load(Ordering::SeqCst)
    }

    /// Sessions successfully opened so far.
    pub fn connections_opened(&self) -> u64 {
        self.state.next_connection_id.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.state.calls).clone()
    }

    fn handler_for(&self, action: &str) -> Option<ProcedureHandler> {
        self.state
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(action)
            .cloned()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, BackendError> {
        if let Some(fault) = lock(&self.state.connect_faults).pop_front() {
            return Err(fault);
        }

        let id = self.state.next_connection_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MemoryConnection {
            id,
            backend: self.clone(),
            session: None,
            broken: false,
        })
    }
}

/// Session handed out by [`InMemoryBackend`].
pub struct MemoryConnection {
    id: u64,
    backend: InMemoryBackend,
    session: Option<SessionSettings>,
    broken: bool,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session(&self) -> Option<&SessionSettings> {
        self.session.as_ref()
    }

    fn route(&self, payload: &str) -> Result<Vec<Option<String>>, BackendError> {
        let request: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                return Ok(vec![Some(format!(
                    "Database error: invalid request payload: {}",
                    e
                ))]);
            }
        };

        let action = request
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match self.backend.handler_for(&action) {
            Some(handler) => handler(&request),
            None => Ok(vec![Some(format!(
                "Routing error: unknown action {}",
                action
            ))]),
        }
    }
}

#[async_trait]
impl BackendConnection for MemoryConnection {
    async fn prepare_session(&mut self, settings: &SessionSettings) -> Result<(), BackendError> {
        if self.broken {
            return Err(BackendError::transient("connection is closed"));
        }
        self.session = Some(*settings);
        Ok(())
    }

    async fn call_procedure(
        &mut self,
        procedure: &str,
        payload: &str,
    ) -> Result<Cursor, BackendError> {
        if self.broken {
            return Err(BackendError::transient("connection is closed"));
        }

        let state = &self.backend.state;
        state.round_trips.fetch_add(1, Ordering::SeqCst);
        lock(&state.calls).push(RecordedCall {
            connection_id: self.id,
            procedure: procedure.to_string(),
            payload: payload.to_string(),
            session: self.session,
        });

        let latency = *lock(&state.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let fault = lock(&state.call_faults).pop_front();
        if let Some(fault) = fault {
            if fault.is_transient() {
                self.broken = true;
            }
            return Err(fault);
        }

        let expected = state
            .procedure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(expected) = expected {
            if !expected.eq_ignore_ascii_case(procedure) {
                return Err(BackendError::fatal(format!(
                    "procedure {} does not exist",
                    procedure
                )));
            }
        }

        Ok(Cursor::new(self.route(payload)?))
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}
