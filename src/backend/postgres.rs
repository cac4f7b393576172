//! PostgreSQL backend.
//!
//! The gateway procedure is a set-returning function taking one `text`
//! argument and returning `TABLE(response_text text)`:
//!
//! ```sql
//! CREATE FUNCTION app_pkg.execute_query(request text)
//!     RETURNS TABLE(response_text text) ...
//! ```
//!
//! Postgres refcursors only live inside an explicit transaction, which would
//! break autocommit-per-call semantics, so the rows are streamed back as the
//! function's result set instead.

use super::{Backend, BackendConnection, BackendError, Cursor, FaultKind, SessionSettings};
use crate::connection::config::ConnectionConfig;
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

/// Name of the single text column read from every row.
pub const RESPONSE_COLUMN: &str = "response_text";

pub struct PostgresBackend {
    config: ConnectionConfig,
}

impl PostgresBackend {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn pg_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.config.host)
            .port(self.config.port)
            .dbname(&self.config.database)
            .user(&self.config.username)
            .password(&self.config.password)
            .connect_timeout(self.config.connect_timeout)
            .application_name("actiongate");
        pg
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    type Connection = PostgresConnection;

    async fn connect(&self) -> Result<PostgresConnection, BackendError> {
        let (client, connection) = self
            .pg_config()
            .connect(NoTls)
            .await
            .map_err(|e| from_pg_error(&e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection terminated");
            }
        });

        debug!(url = %self.config.to_url(), "opened postgres session");
        Ok(PostgresConnection { client })
    }
}

pub struct PostgresConnection {
    client: Client,
}

#[async_trait]
impl BackendConnection for PostgresConnection {
    async fn prepare_session(&mut self, settings: &SessionSettings) -> Result<(), BackendError> {
        // Postgres runs every statement outside BEGIN in its own transaction.
        if !settings.autocommit {
            return Err(BackendError::fatal(
                "manual-commit sessions are not supported by the gateway",
            ));
        }

        let mut setup = format!(
            "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {};",
            settings.isolation.as_sql()
        );
        if let Some(timeout) = settings.statement_timeout {
            setup.push_str(&format!(" SET statement_timeout = {};", timeout.as_millis()));
        }

        self.client
            .batch_execute(&setup)
            .await
            .map_err(|e| from_pg_error(&e))
    }

    async fn call_procedure(
        &mut self,
        procedure: &str,
        payload: &str,
    ) -> Result<Cursor, BackendError> {
        let sql = procedure_call_sql(procedure);
        let rows = self
            .client
            .query(sql.as_str(), &[&payload])
            .await
            .map_err(|e| from_pg_error(&e))?;

        let mut texts = Vec::with_capacity(rows.len());
        for row in rows {
            let text: Option<String> = row.try_get(RESPONSE_COLUMN).map_err(|e| {
                BackendError::fatal(format!("unreadable {} column: {}", RESPONSE_COLUMN, e))
            })?;
            texts.push(text);
        }

        Ok(Cursor::new(texts))
    }

    fn is_broken(&self) -> bool {
        self.client.is_closed()
    }
}

/// SQL used to invoke the gateway procedure.
///
/// `procedure` must already be validated as a qualified identifier.
pub fn procedure_call_sql(procedure: &str) -> String {
    format!("SELECT {} FROM {}($1::text)", RESPONSE_COLUMN, procedure)
}

/// SQLSTATE codes that indicate a fault worth retrying.
const TRANSIENT_SQLSTATES: &[&str] = &[
    "57014", // query_canceled (statement_timeout)
    "57P01", // admin_shutdown
    "57P02", // crash_shutdown
    "57P03", // cannot_connect_now
    "53300", // too_many_connections
    "40001", // serialization_failure
    "40P01", // deadlock_detected
];

/// Fault kind for a SQLSTATE code; `None` means no server error code.
pub fn fault_kind_for_sqlstate(code: Option<&str>) -> FaultKind {
    match code {
        None => FaultKind::Transient,
        Some(code) if code.starts_with("08") => FaultKind::Transient,
        Some(code) if TRANSIENT_SQLSTATES.contains(&code) => FaultKind::Transient,
        Some(_) => FaultKind::Fatal,
    }
}

fn from_pg_error(err: &tokio_postgres::Error) -> BackendError {
    let kind = if err.is_closed() {
        FaultKind::Transient
    } else {
        fault_kind_for_sqlstate(err.code().map(|state| state.code()))
    };

    let message = match err.as_db_error() {
        Some(db) => format!("{}: {}", db.code().code(), db.message()),
        None => err.to_string(),
    };

    BackendError::new(kind, message)
}
