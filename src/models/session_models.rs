use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};

use crate::models::error_models::SessionNameError;
use crate::models::heartbeat_models::HeartbeatKey;

pub const SESSION_CONTAINER_PREFIX: &str = "mytheia";

/// Who an IDE container belongs to. One container exists per identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    pub lab_id: u64,
    pub student_id: u64,
    pub teacher_id: Option<u64>,
}

impl SessionIdentity {
    pub fn student(lab_id: u64, student_id: u64) -> Self {
        SessionIdentity {
            lab_id,
            student_id,
            teacher_id: None,
        }
    }

    pub fn teacher(lab_id: u64, student_id: u64, teacher_id: u64) -> Self {
        SessionIdentity {
            lab_id,
            student_id,
            teacher_id: Some(teacher_id),
        }
    }

    pub fn container_name(&self) -> String {
        self.to_string()
    }

    pub fn heartbeat_key(&self) -> HeartbeatKey {
        match self.teacher_id {
            None => HeartbeatKey::Student {
                lab_id: self.lab_id,
                student_id: self.student_id,
            },
            Some(teacher_id) => HeartbeatKey::Teacher {
                lab_id: self.lab_id,
                student_id: self.student_id,
                teacher_id,
            },
        }
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SESSION_CONTAINER_PREFIX}-{}-{}",
            self.lab_id, self.student_id
        )?;
        if let Some(teacher_id) = self.teacher_id {
            write!(f, "-{teacher_id}")?;
        }
        Ok(())
    }
}

impl FromStr for SessionIdentity {
    type Err = SessionNameError;

    /// Parses `mytheia-<lab>-<student>[-<teacher>]`. A leading `/` (docker API style) is ignored.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let trimmed = name.trim_start_matches('/');
        let rest = trimmed
            .strip_prefix(SESSION_CONTAINER_PREFIX)
            .and_then(|rest| rest.strip_prefix('-'))
            .ok_or_else(|| SessionNameError::WrongPrefix(name.to_string()))?;

        let ids = rest
            .split('-')
            .map(|field| {
                field.parse::<u64>().map_err(|_| SessionNameError::InvalidId {
                    name: name.to_string(),
                    field: field.to_string(),
                })
            })
            .collect::<Result<Vec<u64>, _>>()?;

        match ids.as_slice() {
            [lab_id, student_id] => Ok(SessionIdentity::student(*lab_id, *student_id)),
            [lab_id, student_id, teacher_id] => {
                Ok(SessionIdentity::teacher(*lab_id, *student_id, *teacher_id))
            }
            _ => Err(SessionNameError::FieldCount(name.to_string())),
        }
    }
}

/// A running IDE container reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContainer {
    pub name: String,
    pub identity: SessionIdentity,
}

impl SessionContainer {
    pub fn new(identity: SessionIdentity) -> Self {
        SessionContainer {
            name: identity.container_name(),
            identity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabDeadline {
    pub lab_id: u64,
    pub deadline: DateTime<Utc>,
}

/// One calendar day's share of a session's coding time. Append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodingTimeSegment {
    pub lab_id: u64,
    pub student_id: u64,
    pub duration_minutes: u32,
    pub day_bucket: NaiveDate,
    pub segment_start: DateTime<Utc>,
}
