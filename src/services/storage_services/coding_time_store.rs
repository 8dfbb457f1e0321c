use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{error_models::DbError, session_models::CodingTimeSegment};

/// Read-only view of lab deadlines owned by the course CRUD side.
#[async_trait]
pub trait DeadlineSource: Send + Sync {
    /// Deadlines of those `lab_ids` that lie before `now`. Labs without a passed deadline are absent.
    async fn passed_deadlines(
        &self,
        lab_ids: &[u64],
        now: DateTime<Utc>,
    ) -> Result<HashMap<u64, DateTime<Utc>>, DbError>;
}

/// Append-only coding time rows, written inside a transaction.
#[async_trait]
pub trait CodingTimeStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn CodingTimeTx>, DbError>;

    async fn total_minutes(&self, lab_id: u64, student_id: u64) -> Result<u64, DbError>;
}

/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait CodingTimeTx: Send {
    async fn insert_segments(&mut self, segments: &[CodingTimeSegment]) -> Result<(), DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}
