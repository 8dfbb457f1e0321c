use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::{
    models::{
        error_models::DbError,
        session_models::{CodingTimeSegment, LabDeadline},
    },
    services::storage_services::coding_time_store::{CodingTimeStore, CodingTimeTx, DeadlineSource},
};

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS lab (
        id INTEGER PRIMARY KEY,
        dead_line TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS coding_time (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        lab_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        duration INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        created_at_date TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS coding_time_lab_user ON coding_time (lab_id, user_id)",
];

fn to_i64(id: u64) -> Result<i64, DbError> {
    i64::try_from(id).map_err(|_| DbError::OutOfRange(format!("id {id}")))
}

/// Relational store for deadlines and coding time.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // in-memory databases are per connection
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let store = SqliteStore { pool };
        store.ensure_schema().await?;
        info!("connected to coding time database");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), DbError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Deadlines are CRUD-owned; this exists for local setups and tests.
    pub async fn upsert_lab_deadline(&self, lab: LabDeadline) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO lab (id, dead_line) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET dead_line = excluded.dead_line",
        )
        .bind(to_i64(lab.lab_id)?)
        .bind(lab.deadline)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DeadlineSource for SqliteStore {
    async fn passed_deadlines(
        &self,
        lab_ids: &[u64],
        now: DateTime<Utc>,
    ) -> Result<HashMap<u64, DateTime<Utc>>, DbError> {
        if lab_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; lab_ids.len()].join(", ");
        let sql = format!("SELECT id, dead_line FROM lab WHERE id IN ({placeholders})");
        let mut query = sqlx::query_as::<_, (i64, DateTime<Utc>)>(&sql);
        for lab_id in lab_ids {
            query = query.bind(to_i64(*lab_id)?);
        }
        let rows = query.fetch_all(&self.pool).await?;
        // compared here rather than in SQL: stored text timestamps need not share one format
        Ok(rows
            .into_iter()
            .filter(|(_, deadline)| *deadline < now)
            .filter_map(|(id, deadline)| u64::try_from(id).ok().map(|id| (id, deadline)))
            .collect())
    }
}

#[async_trait]
impl CodingTimeStore for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn CodingTimeTx>, DbError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteCodingTimeTx { tx }))
    }

    async fn total_minutes(&self, lab_id: u64, student_id: u64) -> Result<u64, DbError> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(duration), 0) FROM coding_time WHERE lab_id = ? AND user_id = ?",
        )
        .bind(to_i64(lab_id)?)
        .bind(to_i64(student_id)?)
        .fetch_one(&self.pool)
        .await?;
        u64::try_from(total).map_err(|_| DbError::OutOfRange(format!("total {total}")))
    }
}

struct SqliteCodingTimeTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl CodingTimeTx for SqliteCodingTimeTx {
    async fn insert_segments(&mut self, segments: &[CodingTimeSegment]) -> Result<(), DbError> {
        for segment in segments {
            sqlx::query(
                "INSERT INTO coding_time (lab_id, user_id, duration, created_at, created_at_date)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(to_i64(segment.lab_id)?)
            .bind(to_i64(segment.student_id)?)
            .bind(i64::from(segment.duration_minutes))
            .bind(segment.segment_start)
            .bind(segment.day_bucket)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeDelta};

    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn segment(minutes: u32) -> CodingTimeSegment {
        CodingTimeSegment {
            lab_id: 5,
            student_id: 11,
            duration_minutes: minutes,
            day_bucket: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            segment_start: DateTime::from_timestamp(1_710_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn committed_segments_are_summed() {
        let store = store().await;
        let mut tx = store.begin().await.unwrap();
        tx.insert_segments(&[segment(30), segment(1440)]).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.total_minutes(5, 11).await.unwrap(), 1470);
        assert_eq!(store.total_minutes(5, 12).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rolled_back_segments_leave_no_rows() {
        let store = store().await;
        let mut tx = store.begin().await.unwrap();
        tx.insert_segments(&[segment(30)]).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.total_minutes(5, 11).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn only_passed_deadlines_are_returned() {
        let store = store().await;
        let now = Utc::now();
        let past = now - TimeDelta::hours(1);
        store
            .upsert_lab_deadline(LabDeadline {
                lab_id: 1,
                deadline: past,
            })
            .await
            .unwrap();
        store
            .upsert_lab_deadline(LabDeadline {
                lab_id: 2,
                deadline: now + TimeDelta::hours(1),
            })
            .await
            .unwrap();
        let deadlines = store.passed_deadlines(&[1, 2, 3], now).await.unwrap();
        assert_eq!(deadlines.len(), 1);
        assert_eq!(
            deadlines.get(&1).map(|d| d.timestamp()),
            Some(past.timestamp())
        );
        assert!(store.passed_deadlines(&[], now).await.unwrap().is_empty());
    }
}
