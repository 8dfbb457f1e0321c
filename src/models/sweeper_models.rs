use chrono::TimeDelta;

use crate::models::heartbeat_models::{HeartbeatKey, HeartbeatValue};
use crate::models::session_models::{CodingTimeSegment, SessionContainer};

/// A listed container joined with what the heartbeat store holds for it.
#[derive(Debug, Clone)]
pub struct SweepEntry {
    pub container: SessionContainer,
    pub key: HeartbeatKey,
    pub value: HeartbeatValue,
}

/// Per-container verdict of one sweep cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Keep,
    /// Heartbeat key gone (expired or never written). Nothing to bill.
    ReapOrphaned,
    /// Lab deadline passed during the session; billed up to the deadline.
    ReapPastDeadline { billed: TimeDelta },
    /// Client stopped sending heartbeats; billed up to the last one.
    ReapIdle { billed: TimeDelta },
}

impl Decision {
    pub fn reaps(&self) -> bool {
        !matches!(self, Decision::Keep)
    }
}

/// Everything a cycle's reap transaction must apply, in order.
#[derive(Debug, Clone, Default)]
pub struct SweepPlan {
    pub containers: Vec<String>,
    pub segments: Vec<CodingTimeSegment>,
    pub keys: Vec<HeartbeatKey>,
    pub decisions: Vec<(String, Decision)>,
}

impl SweepPlan {
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

/// How a completed cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No session containers were running.
    Idle,
    /// Containers were checked and all kept.
    Kept { count: usize },
    Reaped { count: usize, segments: usize },
}
