// ============================================================================
// ActionGate Library
// ============================================================================

pub mod backend;
pub mod config;
pub mod connection;
pub mod core;
pub mod gateway;
pub mod metrics;
pub mod scheduler;
pub mod web;

// Re-export main types for convenience
pub use crate::core::{ActionResult, EntityId, GatewayError, Result, Row};
pub use config::GatewayConfig;

// Re-export backend API
pub use backend::{
    Backend, BackendConnection, BackendError, Cursor, FaultKind, InMemoryBackend,
    IsolationLevel, PostgresBackend, SessionSettings,
};

// Re-export connection API
pub use connection::{
    ConnectionProvider,
    config::ConnectionConfig,
    pool::{ConnectionPool, PoolGuard, PoolStats},
};

// Re-export gateway API
pub use gateway::{
    Gateway,
    request::{Action, ActionRequest, Envelope},
    retry::{BASE_RETRY_DELAY, MAX_RETRY_ATTEMPTS, RetryController, RetryPolicy},
};

pub use metrics::{PerformanceRecorder, PerformanceSnapshot, SignatureSnapshot};
pub use tokio_util::sync::CancellationToken;

pub use scheduler::{ScheduledPublisher, SchedulerReport, TickOutcome};
