use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::docker::docker_manager::SessionRuntime;
use crate::models::{
    error_models::SweepError,
    heartbeat_models::{HeartbeatKey, HeartbeatValue},
    sweeper_models::{CycleOutcome, Decision, SweepEntry, SweepPlan},
};
use crate::services::all_session_services::{
    coding_time_service::split_by_day, heartbeat_service::IDLE_WINDOW,
    heartbeat_store::HeartbeatStore,
};
use crate::services::storage_services::coding_time_store::{
    CodingTimeStore, CodingTimeTx, DeadlineSource,
};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
/// Budget for listing containers plus the two store reads.
pub const CYCLE_TIMEOUT: Duration = Duration::from_secs(200);
/// Budget for the whole reap transaction, from `begin` to `commit`.
pub const REAP_TIMEOUT: Duration = Duration::from_secs(60);
pub const CRASH_COOLDOWN: Duration = Duration::from_secs(300);

/// Applies the reaping rules to one entry. First match wins.
pub fn decide_entry(
    entry: &SweepEntry,
    deadlines: &HashMap<u64, DateTime<Utc>>,
    now: DateTime<Utc>,
    idle_window: TimeDelta,
) -> Decision {
    let record = match &entry.value {
        HeartbeatValue::Missing => return Decision::ReapOrphaned,
        HeartbeatValue::TeacherSentinel if entry.key.is_teacher() => return Decision::Keep,
        HeartbeatValue::TeacherSentinel => {
            warn!(container = %entry.container.name, key = %entry.key, "teacher sentinel under a student key");
            return Decision::Keep;
        }
        HeartbeatValue::Corrupt(reason) => {
            warn!(container = %entry.container.name, key = %entry.key, %reason, "undecodable heartbeat");
            return Decision::Keep;
        }
        HeartbeatValue::Record(record) => record,
    };

    if let Some(deadline) = deadlines.get(&entry.key.lab_id()) {
        if record.created_at <= *deadline {
            return Decision::ReapPastDeadline {
                billed: *deadline - record.created_at,
            };
        }
    }
    if now - record.last_visited_at > idle_window {
        return Decision::ReapIdle {
            billed: record.last_visited_at - record.created_at,
        };
    }
    Decision::Keep
}

/// Decides every entry and collects what the reap transaction has to apply.
///
/// Only student sessions are billed, and a billed duration under one minute produces no rows.
pub fn decide(
    entries: &[SweepEntry],
    deadlines: &HashMap<u64, DateTime<Utc>>,
    now: DateTime<Utc>,
    idle_window: TimeDelta,
    offset: FixedOffset,
) -> SweepPlan {
    let mut plan = SweepPlan::default();
    for entry in entries {
        let decision = decide_entry(entry, deadlines, now, idle_window);
        if decision.reaps() {
            plan.containers.push(entry.container.name.clone());
            plan.keys.push(entry.key);
        }

        let billed = match (&decision, &entry.value) {
            (
                Decision::ReapPastDeadline { billed } | Decision::ReapIdle { billed },
                HeartbeatValue::Record(record),
            ) if !entry.key.is_teacher() => Some((record.created_at, *billed)),
            _ => None,
        };
        if let Some((start, billed)) = billed {
            if billed >= TimeDelta::minutes(1) {
                plan.segments.extend(split_by_day(
                    start,
                    start + billed,
                    entry.key.lab_id(),
                    entry.key.student_id(),
                    offset,
                ));
            }
        }
        plan.decisions.push((entry.container.name.clone(), decision));
    }
    plan
}

/// Periodically reaps IDE session containers that are orphaned, past their lab deadline, or idle.
#[derive(Clone)]
pub struct SessionSweeper {
    runtime: Arc<dyn SessionRuntime>,
    heartbeats: Arc<dyn HeartbeatStore>,
    deadlines: Arc<dyn DeadlineSource>,
    coding_time: Arc<dyn CodingTimeStore>,
    offset: FixedOffset,
    idle_window: TimeDelta,
    reap_timeout: Duration,
}

impl SessionSweeper {
    pub fn new(
        runtime: Arc<dyn SessionRuntime>,
        heartbeats: Arc<dyn HeartbeatStore>,
        deadlines: Arc<dyn DeadlineSource>,
        coding_time: Arc<dyn CodingTimeStore>,
        offset: FixedOffset,
    ) -> Self {
        SessionSweeper {
            runtime,
            heartbeats,
            deadlines,
            coding_time,
            offset,
            idle_window: TimeDelta::from_std(IDLE_WINDOW).unwrap_or(TimeDelta::seconds(64)),
            reap_timeout: REAP_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_reap_timeout(mut self, reap_timeout: Duration) -> Self {
        self.reap_timeout = reap_timeout;
        self
    }

    /// Loops until `shutdown` fires. Failed or panicked cycles are followed by the crash cooldown.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = SWEEP_INTERVAL.as_secs(), "session sweeper started");
        loop {
            let cycle_id = Uuid::new_v4();
            let span = info_span!("sweep_cycle", %cycle_id);
            let pause = match self.supervised_cycle().instrument(span.clone()).await {
                Ok(outcome) => {
                    span.in_scope(|| debug!(?outcome, "sweep cycle finished"));
                    SWEEP_INTERVAL
                }
                Err(err) => {
                    span.in_scope(|| error!(error = %err, "sweep cycle failed"));
                    CRASH_COOLDOWN
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(pause) => {}
            }
        }
        info!("session sweeper stopped");
    }

    /// Runs one cycle on its own task so a panic surfaces as an error instead of ending the loop.
    /// Dropping the returned future aborts the cycle.
    pub async fn supervised_cycle(&self) -> Result<CycleOutcome, SweepError> {
        let sweeper = self.clone();
        let handle = AbortOnDropHandle::new(tokio::spawn(
            async move { sweeper.run_cycle(Utc::now()).await }.in_current_span(),
        ));
        match handle.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                let payload = join_err.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(SweepError::Panicked(message))
            }
            Err(join_err) => Err(SweepError::Panicked(join_err.to_string())),
        }
    }

    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleOutcome, SweepError> {
        let read_deadline = Instant::now() + CYCLE_TIMEOUT;

        let sessions = timeout_at(read_deadline, self.runtime.list_sessions())
            .await
            .map_err(|_| SweepError::TimedOut("listing session containers"))?
            .map_err(SweepError::List)?;
        if sessions.is_empty() {
            return Ok(CycleOutcome::Idle);
        }

        let keys: Vec<HeartbeatKey> = sessions
            .iter()
            .map(|session| session.identity.heartbeat_key())
            .collect();
        let lab_ids: Vec<u64> = sessions
            .iter()
            .map(|session| session.identity.lab_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let reads = async {
            tokio::try_join!(
                async {
                    self.heartbeats
                        .multi_get(&keys)
                        .await
                        .map_err(SweepError::Heartbeats)
                },
                async {
                    self.deadlines
                        .passed_deadlines(&lab_ids, now)
                        .await
                        .map_err(SweepError::Deadlines)
                },
            )
        };
        let (values, deadlines) = timeout_at(read_deadline, reads)
            .await
            .map_err(|_| SweepError::TimedOut("reading heartbeats and deadlines"))??;

        for (lab_id, deadline) in &deadlines {
            debug!(lab_id, %deadline, "lab deadline passed");
        }

        let entries: Vec<SweepEntry> = sessions
            .into_iter()
            .zip(keys)
            .enumerate()
            .map(|(idx, (container, key))| SweepEntry {
                value: HeartbeatValue::from_raw(values.get(idx).and_then(|raw| raw.as_deref())),
                container,
                key,
            })
            .collect();

        let plan = decide(&entries, &deadlines, now, self.idle_window, self.offset);
        for (name, decision) in &plan.decisions {
            match decision {
                Decision::Keep => debug!(container = %name, "keeping session"),
                reap => info!(container = %name, decision = ?reap, "reaping session"),
            }
        }
        if plan.is_empty() {
            return Ok(CycleOutcome::Kept {
                count: entries.len(),
            });
        }

        self.reap(&plan).await?;
        info!(
            containers = plan.containers.len(),
            segments = plan.segments.len(),
            "reaped session containers"
        );
        Ok(CycleOutcome::Reaped {
            count: plan.containers.len(),
            segments: plan.segments.len(),
        })
    }

    /// Persists segments, removes containers, then deletes keys. Any failure rolls the rows back.
    /// Every step shares one deadline.
    async fn reap(&self, plan: &SweepPlan) -> Result<(), SweepError> {
        let deadline = Instant::now() + self.reap_timeout;

        let mut tx = timeout_at(deadline, self.coding_time.begin())
            .await
            .map_err(|_| SweepError::TimedOut("opening the coding time transaction"))?
            .map_err(SweepError::Persist)?;

        let inserted = timeout_at(deadline, tx.insert_segments(&plan.segments)).await;
        match inserted {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                rollback(tx).await;
                return Err(SweepError::Persist(err));
            }
            Err(_) => {
                rollback(tx).await;
                return Err(SweepError::TimedOut("persisting coding time"));
            }
        }

        match timeout_at(deadline, self.runtime.remove_containers(&plan.containers)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                rollback(tx).await;
                return Err(SweepError::Remove(err));
            }
            Err(_) => {
                rollback(tx).await;
                return Err(SweepError::TimedOut("removing containers"));
            }
        }

        match timeout_at(deadline, self.heartbeats.delete(&plan.keys)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                rollback(tx).await;
                return Err(SweepError::DeleteKeys(err));
            }
            Err(_) => {
                rollback(tx).await;
                return Err(SweepError::TimedOut("deleting heartbeat keys"));
            }
        }

        // an unfinished commit is dropped, which rolls the transaction back
        timeout_at(deadline, tx.commit())
            .await
            .map_err(|_| SweepError::TimedOut("committing coding time"))?
            .map_err(SweepError::Persist)
    }
}

const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

async fn rollback(tx: Box<dyn CodingTimeTx>) {
    match timeout(ROLLBACK_TIMEOUT, tx.rollback()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "coding time rollback failed"),
        Err(_) => warn!("coding time rollback timed out, dropping the transaction"),
    }
}
