//! Call record persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{PersistenceError, StoreClient};

/// Call status, monotonic from `in_progress` to exactly one terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    InProgress,
    Completed,
    Escalated,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Escalated => "escalated",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Row handle returned when a call record is created.
#[derive(Debug, Clone)]
pub struct CallRow {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Call record store.
///
/// Callers treat failures from the lifecycle methods as non-fatal: the phone
/// call continues whether or not the row was written.
#[async_trait]
pub trait CallStore: Send + Sync {
    async fn create_call(
        &self,
        call_id: &str,
        stream_id: &str,
        caller_phone: &str,
        restaurant_phone: &str,
    ) -> Result<CallRow, PersistenceError>;

    async fn complete_call(
        &self,
        call_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    async fn escalate_call(&self, call_id: &str) -> Result<(), PersistenceError>;

    async fn fail_call(&self, call_id: &str, reason: Option<&str>)
        -> Result<(), PersistenceError>;
}

fn require(field: &str, value: &str) -> Result<(), PersistenceError> {
    if value.is_empty() {
        return Err(PersistenceError::InvalidArgument(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

/// ScyllaDB-backed call store
#[derive(Clone)]
pub struct ScyllaCallStore {
    client: StoreClient,
}

impl ScyllaCallStore {
    pub fn new(client: StoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CallStore for ScyllaCallStore {
    async fn create_call(
        &self,
        call_id: &str,
        stream_id: &str,
        caller_phone: &str,
        restaurant_phone: &str,
    ) -> Result<CallRow, PersistenceError> {
        require("call_id", call_id)?;
        require("stream_id", stream_id)?;
        require("caller_phone", caller_phone)?;
        require("restaurant_phone", restaurant_phone)?;

        let row = CallRow {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
        };

        let query = format!(
            "INSERT INTO {}.calls (call_id, id, stream_id, caller_phone, restaurant_phone, status, started_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    call_id,
                    row.id,
                    stream_id,
                    caller_phone,
                    restaurant_phone,
                    CallStatus::InProgress.as_str(),
                    row.started_at.timestamp_millis(),
                ),
            )
            .await?;

        tracing::info!(
            call_id = %call_id,
            stream_id = %stream_id,
            caller_phone = %caller_phone,
            "Call record created"
        );

        Ok(row)
    }

    async fn complete_call(
        &self,
        call_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let now = Utc::now();
        let duration = (now - started_at).num_seconds().max(0) as i32;

        let query = format!(
            "UPDATE {}.calls SET status = ?, ended_at = ?, duration_seconds = ? WHERE call_id = ?",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    CallStatus::Completed.as_str(),
                    now.timestamp_millis(),
                    duration,
                    call_id,
                ),
            )
            .await?;

        tracing::info!(call_id = %call_id, duration_seconds = duration, "Call completed");
        Ok(())
    }

    async fn escalate_call(&self, call_id: &str) -> Result<(), PersistenceError> {
        let query = format!(
            "UPDATE {}.calls SET status = ?, ended_at = ? WHERE call_id = ?",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    CallStatus::Escalated.as_str(),
                    Utc::now().timestamp_millis(),
                    call_id,
                ),
            )
            .await?;

        tracing::info!(call_id = %call_id, "Call escalated");
        Ok(())
    }

    async fn fail_call(
        &self,
        call_id: &str,
        reason: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let query = format!(
            "UPDATE {}.calls SET status = ?, ended_at = ?, failure_reason = ? WHERE call_id = ?",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    CallStatus::Failed.as_str(),
                    Utc::now().timestamp_millis(),
                    reason,
                    call_id,
                ),
            )
            .await?;

        tracing::info!(call_id = %call_id, reason = ?reason, "Call failed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(CallStatus::InProgress.as_str(), "in_progress");
        assert_eq!(CallStatus::Escalated.as_str(), "escalated");
        assert!(!CallStatus::InProgress.is_terminal());
        assert!(CallStatus::Completed.is_terminal());
    }
}
