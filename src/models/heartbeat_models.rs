use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use prost::Message;

use crate::models::error_models::HeartbeatKeyError;
use crate::proto::sandbox::HeartbeatStat;

pub const STUDENT_KEY_PREFIX: &str = "hbs";
pub const TEACHER_KEY_PREFIX: &str = "hbt";

/// Value stored under teacher keys in place of a record.
pub const TEACHER_SENTINEL: &[u8] = b"0";

/// Identity of one heartbeat entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeartbeatKey {
    Student {
        lab_id: u64,
        student_id: u64,
    },
    Teacher {
        lab_id: u64,
        student_id: u64,
        teacher_id: u64,
    },
}

impl HeartbeatKey {
    pub fn lab_id(&self) -> u64 {
        match self {
            HeartbeatKey::Student { lab_id, .. } | HeartbeatKey::Teacher { lab_id, .. } => *lab_id,
        }
    }

    pub fn student_id(&self) -> u64 {
        match self {
            HeartbeatKey::Student { student_id, .. }
            | HeartbeatKey::Teacher { student_id, .. } => *student_id,
        }
    }

    pub fn is_teacher(&self) -> bool {
        matches!(self, HeartbeatKey::Teacher { .. })
    }
}

impl fmt::Display for HeartbeatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeartbeatKey::Student { lab_id, student_id } => {
                write!(f, "{STUDENT_KEY_PREFIX}:{lab_id}:{student_id}")
            }
            HeartbeatKey::Teacher {
                lab_id,
                student_id,
                teacher_id,
            } => write!(f, "{TEACHER_KEY_PREFIX}:{lab_id}:{student_id}:{teacher_id}"),
        }
    }
}

impl FromStr for HeartbeatKey {
    type Err = HeartbeatKeyError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let mut parts = key.split(':');
        let prefix = parts.next().unwrap_or_default();
        let ids = parts
            .map(|field| {
                field.parse::<u64>().map_err(|_| HeartbeatKeyError::InvalidId {
                    key: key.to_string(),
                    field: field.to_string(),
                })
            })
            .collect::<Result<Vec<u64>, _>>();

        match prefix {
            STUDENT_KEY_PREFIX => match ids?.as_slice() {
                [lab_id, student_id] => Ok(HeartbeatKey::Student {
                    lab_id: *lab_id,
                    student_id: *student_id,
                }),
                _ => Err(HeartbeatKeyError::FieldCount(key.to_string())),
            },
            TEACHER_KEY_PREFIX => match ids?.as_slice() {
                [lab_id, student_id, teacher_id] => Ok(HeartbeatKey::Teacher {
                    lab_id: *lab_id,
                    student_id: *student_id,
                    teacher_id: *teacher_id,
                }),
                _ => Err(HeartbeatKeyError::FieldCount(key.to_string())),
            },
            _ => Err(HeartbeatKeyError::UnknownPrefix(key.to_string())),
        }
    }
}

/// First and latest heartbeat of a student session, second precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatRecord {
    pub created_at: DateTime<Utc>,
    pub last_visited_at: DateTime<Utc>,
}

impl HeartbeatRecord {
    pub fn started(now: DateTime<Utc>) -> Self {
        HeartbeatRecord {
            created_at: now,
            last_visited_at: now,
        }
    }

    pub fn touched(self, now: DateTime<Utc>) -> Self {
        HeartbeatRecord {
            last_visited_at: now,
            ..self
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        HeartbeatStat {
            created_at: self.created_at.timestamp(),
            last_visited_at: self.last_visited_at.timestamp(),
        }
        .encode_to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        let stat = HeartbeatStat::decode(bytes).map_err(|e| e.to_string())?;
        let created_at = DateTime::from_timestamp(stat.created_at, 0)
            .ok_or_else(|| format!("created_at {} out of range", stat.created_at))?;
        let last_visited_at = DateTime::from_timestamp(stat.last_visited_at, 0)
            .ok_or_else(|| format!("last_visited_at {} out of range", stat.last_visited_at))?;
        Ok(HeartbeatRecord {
            created_at,
            last_visited_at,
        })
    }
}

/// What a multi-get returned for one key, interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatValue {
    Missing,
    TeacherSentinel,
    Record(HeartbeatRecord),
    Corrupt(String),
}

impl HeartbeatValue {
    pub fn from_raw(raw: Option<&[u8]>) -> Self {
        match raw {
            None | Some([]) => HeartbeatValue::Missing,
            Some(bytes) if bytes == TEACHER_SENTINEL => HeartbeatValue::TeacherSentinel,
            Some(bytes) => match HeartbeatRecord::decode(bytes) {
                Ok(record) => HeartbeatValue::Record(record),
                Err(reason) => HeartbeatValue::Corrupt(reason),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format_matches_store_layout() {
        let student = HeartbeatKey::Student {
            lab_id: 12,
            student_id: 345,
        };
        let teacher = HeartbeatKey::Teacher {
            lab_id: 12,
            student_id: 345,
            teacher_id: 6,
        };
        assert_eq!(student.to_string(), "hbs:12:345");
        assert_eq!(teacher.to_string(), "hbt:12:345:6");
        assert_eq!("hbs:12:345".parse::<HeartbeatKey>(), Ok(student));
        assert_eq!("hbt:12:345:6".parse::<HeartbeatKey>(), Ok(teacher));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(matches!(
            "hbx:1:2".parse::<HeartbeatKey>(),
            Err(HeartbeatKeyError::UnknownPrefix(_))
        ));
        assert!(matches!(
            "hbs:1:2:3".parse::<HeartbeatKey>(),
            Err(HeartbeatKeyError::FieldCount(_))
        ));
        assert!(matches!(
            "hbt:1:2".parse::<HeartbeatKey>(),
            Err(HeartbeatKeyError::FieldCount(_))
        ));
        assert!(matches!(
            "hbs:1:abc".parse::<HeartbeatKey>(),
            Err(HeartbeatKeyError::InvalidId { .. })
        ));
        assert!("".parse::<HeartbeatKey>().is_err());
    }

    #[test]
    fn raw_values_are_classified() {
        let record = HeartbeatRecord {
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            last_visited_at: DateTime::from_timestamp(1_700_000_600, 0).unwrap(),
        };
        let encoded = record.encode();
        assert_eq!(HeartbeatValue::from_raw(None), HeartbeatValue::Missing);
        assert_eq!(HeartbeatValue::from_raw(Some(b"")), HeartbeatValue::Missing);
        assert_eq!(
            HeartbeatValue::from_raw(Some(b"0")),
            HeartbeatValue::TeacherSentinel
        );
        assert_eq!(
            HeartbeatValue::from_raw(Some(&encoded)),
            HeartbeatValue::Record(record)
        );
        assert!(matches!(
            HeartbeatValue::from_raw(Some(&[0xff, 0xff, 0xff])),
            HeartbeatValue::Corrupt(_)
        ));
    }
}
