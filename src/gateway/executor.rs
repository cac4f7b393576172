use super::request::{ACTION_KEY, Envelope};
use crate::backend::{BackendConnection, BackendError, Cursor};
use crate::connection::pool::PoolGuard;
use crate::core::{GatewayError, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// Binds an envelope to the single gateway procedure and runs it.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    procedure: String,
    statement_timeout: Duration,
}

impl CommandExecutor {
    pub fn new(procedure: impl Into<String>, statement_timeout: Duration) -> Self {
        Self {
            procedure: procedure.into(),
            statement_timeout,
        }
    }

    /// Schema-qualified procedure name every call is bound to.
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    /// Serialize `envelope` into the one text parameter the procedure takes.
    ///
    /// The envelope must serialize to a JSON object with a non-empty string
    /// `action`. Object keys are emitted in sorted order, so identical
    /// envelopes always produce identical text.
    pub fn encode<E: Envelope>(&self, signature: &str, envelope: &E) -> Result<String> {
        let value = serde_json::to_value(envelope).map_err(|e| GatewayError::Serialization {
            signature: signature.to_string(),
            message: e.to_string(),
        })?;

        let Value::Object(map) = &value else {
            return Err(invalid(
                signature,
                format!("request envelope must be a JSON object, got {}", value),
            ));
        };

        match map.get(ACTION_KEY) {
            Some(Value::String(action)) if !action.is_empty() => {}
            Some(_) => {
                return Err(invalid(signature, "'action' must be a non-empty string"));
            }
            None => {
                return Err(invalid(signature, "request envelope is missing 'action'"));
            }
        }

        serde_json::to_string(&value).map_err(|e| GatewayError::Serialization {
            signature: signature.to_string(),
            message: e.to_string(),
        })
    }

    /// Run the procedure once on `guard`'s connection.
    ///
    /// A call that exceeds the statement timeout is reported as transient and
    /// the connection is discarded, since the server may still be working on
    /// it.
    pub async fn execute<C: BackendConnection>(
        &self,
        guard: &mut PoolGuard<C>,
        payload: &str,
    ) -> std::result::Result<Cursor, BackendError> {
        let call = guard.connection().call_procedure(&self.procedure, payload);
        let outcome = tokio::time::timeout(self.statement_timeout, call).await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    procedure = %self.procedure,
                    timeout_ms = self.statement_timeout.as_millis() as u64,
                    "statement timed out"
                );
                guard.discard();
                Err(BackendError::transient(format!(
                    "statement timed out after {}ms",
                    self.statement_timeout.as_millis()
                )))
            }
        }
    }
}

fn invalid(signature: &str, message: impl Into<String>) -> GatewayError {
    GatewayError::InvalidRequest {
        signature: signature.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::connection::config::ConnectionConfig;
    use crate::connection::pool::ConnectionPool;
    use crate::gateway::request::{Action, ActionRequest};
    use serde_json::json;

    fn executor() -> CommandExecutor {
        CommandExecutor::new("app_pkg.execute_query", Duration::from_secs(30))
    }

    #[test]
    fn test_encode_typed_action() {
        let payload = executor()
            .encode("GET_POST_BY_ID", &Action::GetPostById { post_id: 42 })
            .unwrap();

        assert_eq!(payload, r#"{"action":"GET_POST_BY_ID","postId":42}"#);
    }

    #[test]
    fn test_encode_is_stable_for_raw_values() {
        let a = json!({"size": 10, "action": "GET_ALL_POSTS_PAGED", "page": 0});
        let b = json!({"page": 0, "action": "GET_ALL_POSTS_PAGED", "size": 10});

        assert_eq!(
            executor().encode("GET_ALL_POSTS_PAGED", &a).unwrap(),
            executor().encode("GET_ALL_POSTS_PAGED", &b).unwrap()
        );
    }

    #[test]
    fn test_encode_rejects_missing_action() {
        let err = executor().encode("Value", &json!({"postId": 1})).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));
        assert_eq!(err.status_code(), 400);

        let err = executor().encode("Value", &json!([1, 2])).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));

        let err = executor().encode("Value", &json!({"action": 5})).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));

        let err = executor().encode("ActionRequest", &ActionRequest::new("")).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_statement_timeout_is_transient_and_discards() {
        let backend = InMemoryBackend::new();
        backend
            .respond("GET_POST_BY_ID", [r#"{"ID":42}"#])
            .set_latency(Some(Duration::from_secs(60)));

        let config = ConnectionConfig::new("admin", "adminpass").min_connections(0);
        let pool = ConnectionPool::new(backend, config).await.unwrap();
        let executor = executor();

        {
            let mut guard = pool.get_connection().await.unwrap();
            let err = executor
                .execute(&mut guard, r#"{"action":"GET_POST_BY_ID","postId":42}"#)
                .await
                .unwrap_err();

            assert!(err.is_transient());
            assert!(err.message().contains("timed out"));
        }

        assert_eq!(pool.stats().total_connections, 0);
    }
}
