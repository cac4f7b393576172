//! The command gateway.
//!
//! Every call follows the same path: serialize the envelope once, then for
//! each attempt acquire a session, run the procedure, decode the cursor and
//! release the session. Transient faults go back through the retry
//! controller; everything else is surfaced at once. Successful calls are
//! timed end to end, retries included. A call that fails once dispatched is
//! counted as an error unless the caller cancelled it.

pub mod classify;
pub mod decoder;
pub mod executor;
pub mod request;
pub mod retry;

use crate::backend::{Backend, BackendError};
use crate::config::GatewayConfig;
use crate::connection::ConnectionProvider;
use crate::connection::config::ConnectionConfig;
use crate::connection::pool::{ConnectionPool, PoolStats};
use crate::core::{ActionResult, EntityId, GatewayError, Result, Row};
use crate::metrics::PerformanceRecorder;
use chrono::NaiveDateTime;
use executor::CommandExecutor;
use request::{Action, Envelope};
use retry::{AttemptError, RetryController};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

pub struct Gateway<B: Backend> {
    provider: ConnectionProvider<B>,
    executor: CommandExecutor,
    retry: RetryController,
    recorder: Arc<PerformanceRecorder>,
    config: GatewayConfig,
}

impl<B: Backend> Gateway<B> {
    /// Build a pool over `backend` and wrap it in a gateway.
    pub async fn connect(
        backend: B,
        connection: ConnectionConfig,
        config: GatewayConfig,
        recorder: Arc<PerformanceRecorder>,
    ) -> Result<Self> {
        config.validate().map_err(GatewayError::Config)?;
        let pool = ConnectionPool::new(backend, connection).await?;
        let provider = ConnectionProvider::new(pool, config.statement_timeout);
        Ok(Self::new(provider, config, recorder))
    }

    /// Wrap `provider` in a gateway.
    ///
    /// The recorder takes on `config.slow_threshold`; when one recorder is
    /// shared by several gateways, the last one built sets it.
    pub fn new(
        provider: ConnectionProvider<B>,
        config: GatewayConfig,
        recorder: Arc<PerformanceRecorder>,
    ) -> Self {
        recorder.set_slow_threshold(config.slow_threshold);
        Self {
            executor: CommandExecutor::new(config.procedure.clone(), config.statement_timeout),
            retry: RetryController::new(config.retry),
            provider,
            recorder,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn recorder(&self) -> &Arc<PerformanceRecorder> {
        &self.recorder
    }

    pub fn provider(&self) -> &ConnectionProvider<B> {
        &self.provider
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.provider.stats()
    }

    /// Run one action and return its decoded rows.
    ///
    /// # Examples
    ///
    /// ```
    /// use actiongate::{
    ///     Action, ConnectionConfig, Gateway, GatewayConfig, InMemoryBackend, PerformanceRecorder,
    /// };
    /// use std::sync::Arc;
    ///
    /// # tokio_test::block_on(async {
    /// let backend = InMemoryBackend::new();
    /// backend.respond("GET_POST_BY_ID", [r#"{"ID":42,"CONTENT":"hello"}"#]);
    ///
    /// let gateway = Gateway::connect(
    ///     backend,
    ///     ConnectionConfig::new("admin", "admin").min_connections(0),
    ///     GatewayConfig::default(),
    ///     Arc::new(PerformanceRecorder::new()),
    /// )
    /// .await
    /// .unwrap();
    ///
    /// let result = gateway.execute(&Action::GetPostById { post_id: 42 }).await.unwrap();
    /// assert_eq!(result.to_json(), r#"[{"CONTENT":"hello","ID":42}]"#);
    /// # });
    /// ```
    pub async fn execute<E: Envelope>(&self, envelope: &E) -> Result<ActionResult> {
        self.execute_with_cancel(envelope, &CancellationToken::new()).await
    }

    /// Like [`execute`](Self::execute), but backoff waits end early once
    /// `cancel` fires. A call already on the wire is left to finish.
    pub async fn execute_with_cancel<E: Envelope>(
        &self,
        envelope: &E,
        cancel: &CancellationToken,
    ) -> Result<ActionResult> {
        let signature = envelope.signature().into_owned();
        let span = info_span!("gateway_call", signature = %signature);

        self.dispatch(&signature, envelope, cancel)
            .instrument(span)
            .await
    }

    async fn dispatch<E: Envelope>(
        &self,
        signature: &str,
        envelope: &E,
        cancel: &CancellationToken,
    ) -> Result<ActionResult> {
        let started = Instant::now();
        let payload = self.executor.encode(signature, envelope)?;
        debug!(signature, payload_len = payload.len(), "dispatching gateway call");

        let outcome = self
            .retry
            .run(signature, cancel, |attempt| self.attempt(signature, &payload, attempt))
            .await;

        match outcome {
            Ok(rows) => {
                self.recorder.record(signature, started.elapsed());
                Ok(ActionResult::new(rows))
            }
            Err(err) => {
                if !matches!(err, GatewayError::Interrupted { .. }) {
                    self.recorder.record_error(signature);
                }
                Err(err)
            }
        }
    }

    async fn attempt(
        &self,
        signature: &str,
        payload: &str,
        attempt: u32,
    ) -> std::result::Result<Vec<Row>, AttemptError> {
        let mut guard = self
            .provider
            .acquire()
            .await
            .map_err(|e| backend_fault(signature, attempt, e))?;

        let mut cursor = self
            .executor
            .execute(&mut guard, payload)
            .await
            .map_err(|e| backend_fault(signature, attempt, e))?;

        // The cursor is drained and closed before the guard releases the session.
        let decoded = decoder::decode(&mut cursor);
        drop(guard);

        decoded.map_err(|embedded| {
            AttemptError::Abort(GatewayError::Embedded {
                signature: signature.to_string(),
                attempts: attempt,
                message: embedded.text,
            })
        })
    }

    /// Queue a post for publication at `scheduled_for`.
    pub async fn create_scheduled(
        &self,
        author_id: EntityId,
        content: &str,
        author_name: &str,
        scheduled_for: NaiveDateTime,
    ) -> Result<ActionResult> {
        self.execute(&Action::CreateScheduled {
            author_id,
            content: content.to_string(),
            author_name: author_name.to_string(),
            scheduled_for,
        })
        .await
    }

    /// Publish every scheduled item that is due.
    pub async fn publish_scheduled(&self) -> Result<ActionResult> {
        self.publish_scheduled_with_cancel(&CancellationToken::new()).await
    }

    pub async fn publish_scheduled_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ActionResult> {
        self.execute_with_cancel(&Action::PublishScheduled, cancel).await
    }
}

fn backend_fault(signature: &str, attempt: u32, error: BackendError) -> AttemptError {
    if error.is_transient() {
        AttemptError::Transient(error)
    } else {
        AttemptError::Abort(GatewayError::Backend {
            signature: signature.to_string(),
            attempts: attempt,
            message: error.message().to_string(),
        })
    }
}
