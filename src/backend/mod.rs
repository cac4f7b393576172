//! Data-store abstraction behind the gateway.
//!
//! A backend knows how to open a session and how to invoke one stored
//! procedure with a single text argument, handing back a cursor of text rows.
//! Everything above this seam (pooling, retry, decoding) is backend-agnostic.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

pub use memory::InMemoryBackend;
pub use postgres::PostgresBackend;

/// Whether a backend fault is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Connectivity blip, timeout, pool exhaustion.
    Transient,
    /// Deterministic failure; retrying cannot help.
    Fatal,
}

/// Error raised by a backend or by the connection layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    kind: FaultKind,
    message: String,
}

impl BackendError {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Fatal, message)
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FaultKind::Transient
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Session characteristics applied to every connection before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub autocommit: bool,
    pub isolation: IsolationLevel,
    /// Server-side statement timeout, when the backend supports one.
    pub statement_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            autocommit: true,
            isolation: IsolationLevel::ReadCommitted,
            statement_timeout: None,
        }
    }
}

/// Forward-only, read-only cursor over the procedure's text rows.
///
/// A row may be SQL NULL, hence `Option<String>`.
#[derive(Debug, Default)]
pub struct Cursor {
    rows: VecDeque<Option<String>>,
    closed: bool,
}

impl Cursor {
    pub fn new(rows: Vec<Option<String>>) -> Self {
        Self {
            rows: rows.into(),
            closed: false,
        }
    }

    /// Advance the cursor. Returns `None` once exhausted or closed.
    pub fn next_row(&mut self) -> Option<Option<String>> {
        if self.closed {
            return None;
        }
        self.rows.pop_front()
    }

    pub fn remaining(&self) -> usize {
        if self.closed { 0 } else { self.rows.len() }
    }

    /// Discard unread rows and mark the cursor closed. Idempotent.
    pub fn close(&mut self) {
        self.rows.clear();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// One live session against the data store.
#[async_trait]
pub trait BackendConnection: Send + 'static {
    /// Apply autocommit, isolation and timeout settings to the session.
    async fn prepare_session(&mut self, settings: &SessionSettings) -> Result<(), BackendError>;

    /// Invoke `procedure` with one text argument and return its cursor.
    ///
    /// Exactly one round trip to the data store.
    async fn call_procedure(&mut self, procedure: &str, payload: &str)
    -> Result<Cursor, BackendError>;

    /// True once the session can no longer be reused.
    fn is_broken(&self) -> bool;
}

/// Factory for backend sessions; shared by the pool.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Connection: BackendConnection;

    async fn connect(&self) -> Result<Self::Connection, BackendError>;
}
