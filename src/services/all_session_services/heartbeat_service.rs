use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::{
    models::{
        error_models::HeartbeatError,
        heartbeat_models::{HeartbeatKey, HeartbeatRecord, HeartbeatValue, TEACHER_SENTINEL},
    },
    services::all_session_services::heartbeat_store::HeartbeatStore,
};

/// How long a session may go without a heartbeat before it counts as abandoned.
/// Clients poll every 30 s, so two polls fit inside the window.
pub const IDLE_WINDOW: Duration = Duration::from_secs(64);

/// Store-side expiry of student records. Only collects records the sweeper never reached;
/// the idle window itself is enforced by the sweeper.
pub const STUDENT_RECORD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Writes heartbeats on behalf of the client-facing IDE endpoints.
#[derive(Clone)]
pub struct HeartbeatService {
    store: Arc<dyn HeartbeatStore>,
}

impl HeartbeatService {
    pub fn new(store: Arc<dyn HeartbeatStore>) -> Self {
        HeartbeatService { store }
    }

    /// Records the start of a student session. A concurrent or repeated start keeps the
    /// original `created_at`; returns whether this call created the record.
    pub async fn begin_student_session(
        &self,
        lab_id: u64,
        student_id: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, HeartbeatError> {
        let key = HeartbeatKey::Student { lab_id, student_id };
        let record = HeartbeatRecord::started(now);
        let created = self
            .store
            .set_if_absent(&key, &record.encode(), STUDENT_RECORD_TTL)
            .await
            .inspect_err(|e| error!(%key, error = %e, "failed to start heartbeat"))?;
        if !created {
            debug!(%key, "heartbeat already started");
        }
        Ok(created)
    }

    /// Moves `last_visited_at` of an existing student record to `now`.
    pub async fn refresh_student(
        &self,
        lab_id: u64,
        student_id: u64,
        now: DateTime<Utc>,
    ) -> Result<HeartbeatRecord, HeartbeatError> {
        let key = HeartbeatKey::Student { lab_id, student_id };
        let raw = self.store.get(&key).await?;
        let record = match HeartbeatValue::from_raw(raw.as_deref()) {
            HeartbeatValue::Record(record) => record,
            HeartbeatValue::Missing => return Err(HeartbeatError::NotFound(key.to_string())),
            HeartbeatValue::TeacherSentinel => {
                return Err(HeartbeatError::Corrupt {
                    key: key.to_string(),
                    reason: "teacher sentinel under a student key".to_string(),
                });
            }
            HeartbeatValue::Corrupt(reason) => {
                error!(%key, %reason, "undecodable heartbeat record");
                return Err(HeartbeatError::Corrupt {
                    key: key.to_string(),
                    reason,
                });
            }
        };
        let record = record.touched(now);
        self.store
            .set(&key, &record.encode(), STUDENT_RECORD_TTL)
            .await?;
        Ok(record)
    }

    /// Teachers are never billed; their key only has to outlive the idle window.
    pub async fn refresh_teacher(
        &self,
        lab_id: u64,
        student_id: u64,
        teacher_id: u64,
    ) -> Result<(), HeartbeatError> {
        let key = HeartbeatKey::Teacher {
            lab_id,
            student_id,
            teacher_id,
        };
        self.store.set(&key, TEACHER_SENTINEL, IDLE_WINDOW).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::services::all_session_services::heartbeat_store::MemoryHeartbeatStore;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn start_then_refresh_moves_only_last_visit() {
        let store = Arc::new(MemoryHeartbeatStore::new());
        let service = HeartbeatService::new(store.clone());
        assert!(service.begin_student_session(7, 9, at(0)).await.unwrap());
        assert!(!service.begin_student_session(7, 9, at(5)).await.unwrap());

        let record = service.refresh_student(7, 9, at(30)).await.unwrap();
        assert_eq!(record.created_at, at(0));
        assert_eq!(record.last_visited_at, at(30));
        assert_eq!(
            record.last_visited_at - record.created_at,
            TimeDelta::seconds(30)
        );

        let key = HeartbeatKey::Student {
            lab_id: 7,
            student_id: 9,
        };
        let stored = store.get(&key).await.unwrap();
        assert_eq!(
            HeartbeatValue::from_raw(stored.as_deref()),
            HeartbeatValue::Record(record)
        );
    }

    #[tokio::test]
    async fn refresh_without_start_is_not_found() {
        let service = HeartbeatService::new(Arc::new(MemoryHeartbeatStore::new()));
        assert!(matches!(
            service.refresh_student(1, 1, at(0)).await,
            Err(HeartbeatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn teacher_heartbeat_stores_the_sentinel() {
        let store = Arc::new(MemoryHeartbeatStore::new());
        let service = HeartbeatService::new(store.clone());
        service.refresh_teacher(1, 2, 3).await.unwrap();
        let key = HeartbeatKey::Teacher {
            lab_id: 1,
            student_id: 2,
            teacher_id: 3,
        };
        assert_eq!(store.get(&key).await.unwrap(), Some(b"0".to_vec()));
    }
}
