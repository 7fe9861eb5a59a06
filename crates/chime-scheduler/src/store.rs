use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    trigger::next_due,
    types::{
        FailureDisposition, Lease, NewSchedule, Schedule, SchedulePatch, ScheduleFilter,
        ScheduleState, SuccessDisposition, TriggerKind, TriggerSpec,
    },
};

/// Column order shared by every SELECT and the row reader below.
const SCHEDULE_COLUMNS: &str = "id, token, scenario_id, user_id, trigger_spec, active, state, \
     next_run_at, last_run_at, retry_count, lease_owner, lease_expires_at, \
     version, created_at, updated_at";

/// Durable schedule repository over a single SQLite connection.
///
/// Gateway handlers and each engine instance hold their own store over
/// their own connection. Every mutation is a conditional UPDATE on
/// `version` (commits additionally on the lease fields), so concurrent
/// writers never need coordination beyond the database itself: whoever
/// matches zero rows gets [`SchedulerError::Conflict`] and drops the write.
pub struct ScheduleStore {
    conn: Arc<Mutex<Connection>>,
}

impl ScheduleStore {
    /// Wrap a connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // --- CRUD --------------------------------------------------------------

    /// Insert a schedule with its initial due time computed from `now`.
    pub fn create(&self, new: NewSchedule, now: DateTime<Utc>) -> Result<Schedule> {
        validate_trigger(&new.trigger)?;
        let next = next_due(&new.trigger, now, None);
        let id = Uuid::new_v4();
        let trigger_json = serde_json::to_string(&new.trigger)
            .map_err(|e| SchedulerError::InvalidTrigger(e.to_string()))?;
        let now_str = now.to_rfc3339();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO schedules
             (id, token, scenario_id, user_id, trigger_spec, active, state,
              next_run_at, last_run_at, retry_count, lease_owner,
              lease_expires_at, version, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,'pending',?7,NULL,0,NULL,NULL,1,?8,?8)",
            params![
                id.to_string(),
                new.token,
                new.scenario_id,
                new.user_id,
                trigger_json,
                new.active,
                next.map(|t| t.to_rfc3339()),
                now_str,
            ],
        )?;
        info!(schedule_id = %id, kind = %new.trigger.kind(), "schedule created");

        Ok(Schedule {
            id,
            token: new.token,
            scenario_id: new.scenario_id,
            user_id: new.user_id,
            trigger: new.trigger,
            active: new.active,
            state: ScheduleState::Pending,
            next_run_at: next,
            last_run_at: None,
            retry_count: 0,
            lease_owner: None,
            lease_expires_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    /// Fetch one schedule by ID.
    pub fn get(&self, id: Uuid) -> Result<Schedule> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1"
        ))?;
        let raw = stmt
            .query_row([id.to_string()], read_row)
            .optional()?
            .ok_or(SchedulerError::NotFound { id })?;
        parse_row(raw).ok_or(SchedulerError::Corrupt { id })
    }

    /// List schedules, newest last, honouring the optional filters.
    pub fn list(&self, filter: &ScheduleFilter) -> Result<Vec<Schedule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules
             WHERE (?1 IS NULL OR token = ?1)
               AND (?2 IS NULL OR user_id = ?2)
               AND (?3 IS NULL OR active = ?3)
             ORDER BY created_at"
        ))?;
        let rows = stmt
            .query_map(
                params![filter.token, filter.user_id, filter.active],
                read_row,
            )?
            .filter_map(|r| r.ok())
            .filter_map(parse_row)
            .collect();
        Ok(rows)
    }

    /// Daily schedules belonging to (token, user), newest first — the
    /// replace-on-create lookup for the one-daily-set-per-owner rule. The
    /// caller keeps the head row and replaces the rest.
    pub fn find_daily(&self, token: &str, user_id: i64) -> Result<Vec<Schedule>> {
        let rows = self.owner_rows(token, user_id)?;
        Ok(rows
            .into_iter()
            .filter(|s| s.trigger.kind() == TriggerKind::Daily)
            .collect())
    }

    /// Apply a partial update, conditioned on `version`.
    ///
    /// A replaced trigger restarts the lifecycle (pending, fresh retry
    /// budget, due time recomputed from scratch). Re-enabling recomputes an
    /// overdue or failed schedule against `now`; a still-future due time is
    /// left alone, and a completed once trigger has nothing left to run.
    pub fn update(
        &self,
        id: Uuid,
        version: i64,
        patch: SchedulePatch,
        now: DateTime<Utc>,
    ) -> Result<Schedule> {
        if let Some(trigger) = &patch.trigger {
            validate_trigger(trigger)?;
        }
        let current = self.get(id)?;
        if current.version != version {
            return Err(SchedulerError::Conflict { id });
        }

        let mut next = Schedule {
            scenario_id: patch.scenario_id.unwrap_or(current.scenario_id),
            trigger: patch.trigger.clone().unwrap_or_else(|| current.trigger.clone()),
            active: patch.active.unwrap_or(current.active),
            updated_at: now,
            ..current.clone()
        };

        if patch.trigger.is_some() {
            next.state = ScheduleState::Pending;
            next.retry_count = 0;
            next.lease_owner = None;
            next.lease_expires_at = None;
            next.next_run_at = next_due(&next.trigger, now, None);
        } else if next.active && !current.active && current.state != ScheduleState::Claimed {
            let overdue = next.next_run_at.map_or(true, |t| t <= now);
            if overdue || current.state == ScheduleState::Failed {
                if let Some(due) = next_due(&next.trigger, now, next.last_run_at) {
                    next.state = ScheduleState::Pending;
                    next.retry_count = 0;
                    next.lease_owner = None;
                    next.lease_expires_at = None;
                    next.next_run_at = Some(due);
                }
            }
        }

        let trigger_json = serde_json::to_string(&next.trigger)
            .map_err(|e| SchedulerError::InvalidTrigger(e.to_string()))?;
        let n = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE schedules
                 SET scenario_id = ?1, trigger_spec = ?2, active = ?3,
                     state = ?4, next_run_at = ?5, retry_count = ?6,
                     lease_owner = ?7, lease_expires_at = ?8,
                     version = version + 1, updated_at = ?9
                 WHERE id = ?10 AND version = ?11",
                params![
                    next.scenario_id,
                    trigger_json,
                    next.active,
                    next.state.to_string(),
                    next.next_run_at.map(|t| t.to_rfc3339()),
                    next.retry_count,
                    next.lease_owner,
                    next.lease_expires_at.map(|t| t.to_rfc3339()),
                    now.to_rfc3339(),
                    id.to_string(),
                    version,
                ],
            )?
        };
        if n == 0 {
            return Err(SchedulerError::Conflict { id });
        }
        next.version = version + 1;
        info!(schedule_id = %id, "schedule updated");
        Ok(next)
    }

    /// Delete a schedule by ID. Legal while a dispatch is in flight; the
    /// engine's commit then matches nothing and is discarded.
    pub fn delete(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM schedules WHERE id = ?1", [id.to_string()])?;
        if n == 0 {
            return Err(SchedulerError::NotFound { id });
        }
        info!(schedule_id = %id, "schedule deleted");
        Ok(())
    }

    /// Delete every schedule owned by (token, user), optionally only those
    /// of one trigger kind. Returns the number removed.
    pub fn delete_by_owner(
        &self,
        token: &str,
        user_id: i64,
        kind: Option<TriggerKind>,
    ) -> Result<usize> {
        let n = match kind {
            None => {
                let conn = self.conn.lock().unwrap();
                conn.execute(
                    "DELETE FROM schedules WHERE token = ?1 AND user_id = ?2",
                    params![token, user_id],
                )?
            }
            Some(kind) => {
                let matching: Vec<Uuid> = self
                    .owner_rows(token, user_id)?
                    .into_iter()
                    .filter(|s| s.trigger.kind() == kind)
                    .map(|s| s.id)
                    .collect();
                let conn = self.conn.lock().unwrap();
                let mut removed = 0;
                for id in &matching {
                    removed +=
                        conn.execute("DELETE FROM schedules WHERE id = ?1", [id.to_string()])?;
                }
                removed
            }
        };
        if n > 0 {
            info!(user_id, count = n, "schedules deleted by key");
        }
        Ok(n)
    }

    // --- engine operations -------------------------------------------------

    /// Schedules ready to fire at `now`: active, due, and either pending or
    /// holding an expired lease (a claimer that died mid-dispatch).
    pub fn get_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Schedule>> {
        let now_str = now.to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules
             WHERE active = 1
               AND next_run_at IS NOT NULL AND next_run_at <= ?1
               AND (state = 'pending'
                    OR (state = 'claimed' AND lease_expires_at <= ?1))
             ORDER BY next_run_at
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![now_str, limit], read_row)?
            .filter_map(|r| r.ok())
            .filter_map(parse_row)
            .collect();
        Ok(rows)
    }

    /// Atomically take ownership of a due schedule.
    ///
    /// Succeeds only if the row still carries `version` and is claimable
    /// (pending, or claimed with an expired lease). Exactly one of any
    /// number of concurrent claimers wins; the rest get `Conflict`.
    pub fn claim(
        &self,
        id: Uuid,
        version: i64,
        owner: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Lease> {
        let expires_at = now + lease;
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE schedules
             SET state = 'claimed', lease_owner = ?1, lease_expires_at = ?2,
                 version = version + 1, updated_at = ?3
             WHERE id = ?4 AND version = ?5 AND active = 1
               AND (state = 'pending'
                    OR (state = 'claimed' AND lease_expires_at <= ?3))",
            params![
                owner,
                expires_at.to_rfc3339(),
                now.to_rfc3339(),
                id.to_string(),
                version,
            ],
        )?;
        if n == 0 {
            return Err(SchedulerError::Conflict { id });
        }
        debug!(schedule_id = %id, %owner, "schedule claimed");
        Ok(Lease {
            schedule_id: id,
            owner: owner.to_string(),
            version: version + 1,
            expires_at,
        })
    }

    /// Record a successful dispatch: reschedule or complete, clear the
    /// lease, reset the retry budget. Requires the lease to still hold.
    pub fn commit_success(
        &self,
        lease: &Lease,
        fired_at: DateTime<Utc>,
        disposition: SuccessDisposition,
    ) -> Result<()> {
        let (state, next_run_at) = match disposition {
            SuccessDisposition::Complete => (ScheduleState::Completed, None),
            SuccessDisposition::Reschedule(next) => {
                (ScheduleState::Pending, Some(next.to_rfc3339()))
            }
        };
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE schedules
             SET state = ?1, next_run_at = ?2, last_run_at = ?3, retry_count = 0,
                 lease_owner = NULL, lease_expires_at = NULL,
                 version = version + 1, updated_at = ?3
             WHERE id = ?4 AND state = 'claimed' AND lease_owner = ?5 AND version = ?6",
            params![
                state.to_string(),
                next_run_at,
                fired_at.to_rfc3339(),
                lease.schedule_id.to_string(),
                lease.owner,
                lease.version,
            ],
        )?;
        if n == 0 {
            return Err(SchedulerError::Conflict {
                id: lease.schedule_id,
            });
        }
        Ok(())
    }

    /// Record a failed dispatch: retry at a later instant or mark failed,
    /// clearing the lease either way. Requires the lease to still hold.
    pub fn commit_failure(
        &self,
        lease: &Lease,
        fired_at: DateTime<Utc>,
        disposition: FailureDisposition,
    ) -> Result<()> {
        let (state, next_run_at, retry_count) = match disposition {
            FailureDisposition::Retry {
                next_run_at,
                retry_count,
            } => (
                ScheduleState::Pending,
                Some(next_run_at.to_rfc3339()),
                Some(retry_count),
            ),
            FailureDisposition::Fail => (ScheduleState::Failed, None, None),
        };
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE schedules
             SET state = ?1, next_run_at = ?2, last_run_at = ?3,
                 retry_count = COALESCE(?4, retry_count),
                 lease_owner = NULL, lease_expires_at = NULL,
                 version = version + 1, updated_at = ?3
             WHERE id = ?5 AND state = 'claimed' AND lease_owner = ?6 AND version = ?7",
            params![
                state.to_string(),
                next_run_at,
                fired_at.to_rfc3339(),
                retry_count,
                lease.schedule_id.to_string(),
                lease.owner,
                lease.version,
            ],
        )?;
        if n == 0 {
            return Err(SchedulerError::Conflict {
                id: lease.schedule_id,
            });
        }
        Ok(())
    }

    // --- private helpers ---------------------------------------------------

    fn owner_rows(&self, token: &str, user_id: i64) -> Result<Vec<Schedule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules
             WHERE token = ?1 AND user_id = ?2
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![token, user_id], read_row)?
            .filter_map(|r| r.ok())
            .filter_map(parse_row)
            .collect();
        Ok(rows)
    }
}

fn validate_trigger(trigger: &TriggerSpec) -> Result<()> {
    if let TriggerSpec::Interval { every_minutes: 0 } = trigger {
        return Err(SchedulerError::InvalidTrigger(
            "interval must be at least one minute".into(),
        ));
    }
    Ok(())
}

// Raw column values in SCHEDULE_COLUMNS order.
type RawRow = (
    String,         // id
    String,         // token
    i64,            // scenario_id
    i64,            // user_id
    String,         // trigger JSON
    bool,           // active
    String,         // state
    Option<String>, // next_run_at
    Option<String>, // last_run_at
    u32,            // retry_count
    Option<String>, // lease_owner
    Option<String>, // lease_expires_at
    i64,            // version
    String,         // created_at
    String,         // updated_at
);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
        row.get(14)?,
    ))
}

fn parse_row(raw: RawRow) -> Option<Schedule> {
    let (
        id,
        token,
        scenario_id,
        user_id,
        trigger_json,
        active,
        state,
        next_run_at,
        last_run_at,
        retry_count,
        lease_owner,
        lease_expires_at,
        version,
        created_at,
        updated_at,
    ) = raw;
    Some(Schedule {
        id: Uuid::parse_str(&id).ok()?,
        token,
        scenario_id,
        user_id,
        trigger: serde_json::from_str(&trigger_json).ok()?,
        active,
        state: state.parse().ok()?,
        next_run_at: parse_opt_ts(next_run_at)?,
        last_run_at: parse_opt_ts(last_run_at)?,
        retry_count,
        lease_owner,
        lease_expires_at: parse_opt_ts(lease_expires_at)?,
        version,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `None` column stays `None`; a present but unparsable value poisons the row.
fn parse_opt_ts(s: Option<String>) -> Option<Option<DateTime<Utc>>> {
    match s {
        Some(s) => parse_ts(&s).map(Some),
        None => Some(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn store() -> ScheduleStore {
        ScheduleStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn interval_schedule(every_minutes: u32) -> NewSchedule {
        NewSchedule {
            token: "tok-1".into(),
            scenario_id: 7,
            user_id: 42,
            trigger: TriggerSpec::Interval { every_minutes },
            active: true,
        }
    }

    fn once_schedule(run_at: DateTime<Utc>) -> NewSchedule {
        NewSchedule {
            trigger: TriggerSpec::Once { run_at },
            ..interval_schedule(1)
        }
    }

    fn daily_schedule() -> NewSchedule {
        NewSchedule {
            trigger: TriggerSpec::Daily {
                time: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
                tz: chrono_tz::Europe::Moscow,
            },
            ..interval_schedule(1)
        }
    }

    fn lease_len() -> Duration {
        Duration::seconds(120)
    }

    #[test]
    fn create_computes_initial_due_time() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        let s = store.create(interval_schedule(60), t0).unwrap();
        assert_eq!(s.version, 1);
        assert_eq!(s.state, ScheduleState::Pending);
        assert_eq!(s.next_run_at, Some(utc("2025-06-01T13:00:00Z")));

        let loaded = store.get(s.id).unwrap();
        assert_eq!(loaded.next_run_at, s.next_run_at);
        assert_eq!(loaded.trigger, s.trigger);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = store()
            .create(interval_schedule(0), utc("2025-06-01T12:00:00Z"))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTrigger(_)));
    }

    #[test]
    fn get_due_orders_by_due_time_and_limits() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        for minutes in [30u32, 10, 20] {
            store
                .create(once_schedule(t0 + Duration::minutes(minutes.into())), t0)
                .unwrap();
        }
        let due = store.get_due(t0 + Duration::hours(1), 2).unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].next_run_at, Some(t0 + Duration::minutes(10)));
        assert_eq!(due[1].next_run_at, Some(t0 + Duration::minutes(20)));
    }

    #[test]
    fn inactive_schedules_are_never_due() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        let mut new = once_schedule(t0);
        new.active = false;
        store.create(new, t0).unwrap();
        assert!(store.get_due(t0 + Duration::hours(1), 10).unwrap().is_empty());
    }

    #[test]
    fn claim_takes_a_lease_and_hides_the_row() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        let s = store.create(once_schedule(t0), t0).unwrap();

        let lease = store.claim(s.id, s.version, "worker-a", t0, lease_len()).unwrap();
        assert_eq!(lease.version, 2);
        assert_eq!(lease.expires_at, t0 + lease_len());

        // Not claimable again while the lease is live.
        let err = store
            .claim(s.id, lease.version, "worker-b", t0, lease_len())
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(store.get_due(t0, 10).unwrap().is_empty());
    }

    #[test]
    fn claim_is_exclusive_across_threads() {
        let store = Arc::new(store());
        let t0 = utc("2025-06-01T12:00:00Z");
        let s = store.create(once_schedule(t0), t0).unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            let id = s.id;
            let version = s.version;
            handles.push(std::thread::spawn(move || {
                store
                    .claim(id, version, &format!("worker-{i}"), t0, lease_len())
                    .is_ok()
            }));
        }
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn expired_lease_is_due_and_reclaimable() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        let s = store.create(once_schedule(t0), t0).unwrap();
        let lease = store.claim(s.id, s.version, "worker-a", t0, lease_len()).unwrap();

        // Live lease: invisible.
        assert!(store.get_due(t0 + Duration::seconds(60), 10).unwrap().is_empty());

        // Expired lease: selectable and claimable by someone else.
        let later = t0 + Duration::seconds(121);
        let due = store.get_due(later, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].state, ScheduleState::Claimed);

        let taken = store
            .claim(s.id, due[0].version, "worker-b", later, lease_len())
            .unwrap();
        assert_eq!(taken.version, lease.version + 1);

        // The dead worker's commit must now be rejected.
        let err = store
            .commit_success(&lease, later, SuccessDisposition::Complete)
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn commit_success_reschedules_and_clears_lease() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        let s = store.create(interval_schedule(60), t0).unwrap();
        let due_at = utc("2025-06-01T13:00:00Z");
        let lease = store.claim(s.id, s.version, "worker-a", due_at, lease_len()).unwrap();

        let fired = due_at + Duration::seconds(2);
        store
            .commit_success(
                &lease,
                fired,
                SuccessDisposition::Reschedule(fired + Duration::minutes(60)),
            )
            .unwrap();

        let row = store.get(s.id).unwrap();
        assert_eq!(row.state, ScheduleState::Pending);
        assert_eq!(row.next_run_at, Some(fired + Duration::minutes(60)));
        assert_eq!(row.last_run_at, Some(fired));
        assert_eq!(row.retry_count, 0);
        assert!(row.lease_owner.is_none());
        assert!(row.lease_expires_at.is_none());
        assert_eq!(row.version, 3);
    }

    #[test]
    fn commit_after_delete_is_a_discarded_conflict() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        let s = store.create(once_schedule(t0), t0).unwrap();
        let lease = store.claim(s.id, s.version, "worker-a", t0, lease_len()).unwrap();

        store.delete(s.id).unwrap();
        let err = store
            .commit_success(&lease, t0, SuccessDisposition::Complete)
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn commit_failure_retry_and_fail_paths() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        let s = store.create(interval_schedule(60), t0).unwrap();

        let lease = store.claim(s.id, s.version, "w", t0, lease_len()).unwrap();
        store
            .commit_failure(
                &lease,
                t0,
                FailureDisposition::Retry {
                    next_run_at: t0 + Duration::seconds(30),
                    retry_count: 1,
                },
            )
            .unwrap();
        let row = store.get(s.id).unwrap();
        assert_eq!(row.state, ScheduleState::Pending);
        assert_eq!(row.retry_count, 1);
        assert_eq!(row.next_run_at, Some(t0 + Duration::seconds(30)));

        let lease = store.claim(s.id, row.version, "w", t0, lease_len()).unwrap();
        store
            .commit_failure(&lease, t0, FailureDisposition::Fail)
            .unwrap();
        let row = store.get(s.id).unwrap();
        assert_eq!(row.state, ScheduleState::Failed);
        assert_eq!(row.next_run_at, None);
        // Fail keeps the count from the retry ladder.
        assert_eq!(row.retry_count, 1);
    }

    #[test]
    fn update_with_stale_version_conflicts() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        let s = store.create(interval_schedule(60), t0).unwrap();
        store
            .update(
                s.id,
                s.version,
                SchedulePatch {
                    scenario_id: Some(9),
                    ..SchedulePatch::default()
                },
                t0,
            )
            .unwrap();

        let err = store
            .update(
                s.id,
                s.version, // stale
                SchedulePatch {
                    scenario_id: Some(11),
                    ..SchedulePatch::default()
                },
                t0,
            )
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get(s.id).unwrap().scenario_id, 9);
    }

    #[test]
    fn replacing_trigger_restarts_lifecycle() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        let s = store.create(interval_schedule(60), t0).unwrap();

        // Drive it to failed.
        let lease = store.claim(s.id, s.version, "w", t0, lease_len()).unwrap();
        store
            .commit_failure(&lease, t0, FailureDisposition::Fail)
            .unwrap();
        let failed = store.get(s.id).unwrap();
        assert_eq!(failed.state, ScheduleState::Failed);

        let updated = store
            .update(
                s.id,
                failed.version,
                SchedulePatch {
                    trigger: Some(TriggerSpec::Interval { every_minutes: 5 }),
                    ..SchedulePatch::default()
                },
                t0,
            )
            .unwrap();
        assert_eq!(updated.state, ScheduleState::Pending);
        assert_eq!(updated.retry_count, 0);
        assert_eq!(updated.next_run_at, Some(t0 + Duration::minutes(5)));
    }

    #[test]
    fn reactivating_overdue_schedule_recomputes_from_now() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        let s = store.create(interval_schedule(60), t0).unwrap();
        let paused = store
            .update(
                s.id,
                s.version,
                SchedulePatch {
                    active: Some(false),
                    ..SchedulePatch::default()
                },
                t0,
            )
            .unwrap();
        assert!(!paused.active);
        // Pausing leaves the due time alone.
        assert_eq!(paused.next_run_at, s.next_run_at);

        let later = t0 + Duration::hours(5);
        let resumed = store
            .update(
                s.id,
                paused.version,
                SchedulePatch {
                    active: Some(true),
                    ..SchedulePatch::default()
                },
                later,
            )
            .unwrap();
        assert!(resumed.active);
        assert_eq!(resumed.next_run_at, Some(later + Duration::minutes(60)));
    }

    #[test]
    fn reactivating_before_due_time_keeps_it() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        let run_at = utc("2025-06-05T09:00:00Z");
        let s = store.create(once_schedule(run_at), t0).unwrap();
        let paused = store
            .update(
                s.id,
                s.version,
                SchedulePatch {
                    active: Some(false),
                    ..SchedulePatch::default()
                },
                t0,
            )
            .unwrap();
        let resumed = store
            .update(
                s.id,
                paused.version,
                SchedulePatch {
                    active: Some(true),
                    ..SchedulePatch::default()
                },
                t0 + Duration::hours(1),
            )
            .unwrap();
        assert_eq!(resumed.next_run_at, Some(run_at));
        assert_eq!(resumed.state, ScheduleState::Pending);
    }

    #[test]
    fn completed_once_stays_completed_when_reactivated() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        let s = store.create(once_schedule(t0), t0).unwrap();
        let lease = store.claim(s.id, s.version, "w", t0, lease_len()).unwrap();
        store
            .commit_success(&lease, t0, SuccessDisposition::Complete)
            .unwrap();

        let done = store.get(s.id).unwrap();
        let paused = store
            .update(
                s.id,
                done.version,
                SchedulePatch {
                    active: Some(false),
                    ..SchedulePatch::default()
                },
                t0,
            )
            .unwrap();
        let resumed = store
            .update(
                s.id,
                paused.version,
                SchedulePatch {
                    active: Some(true),
                    ..SchedulePatch::default()
                },
                t0 + Duration::hours(1),
            )
            .unwrap();
        assert_eq!(resumed.state, ScheduleState::Completed);
        assert_eq!(resumed.next_run_at, None);
    }

    #[test]
    fn delete_by_owner_honours_kind_filter() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        store.create(daily_schedule(), t0).unwrap();
        store.create(interval_schedule(30), t0).unwrap();
        store.create(once_schedule(t0 + Duration::hours(1)), t0).unwrap();
        // Different owner, untouched throughout.
        let mut other = interval_schedule(15);
        other.user_id = 99;
        let other = store.create(other, t0).unwrap();

        assert_eq!(store.find_daily("tok-1", 42).unwrap().len(), 1);
        assert_eq!(
            store
                .delete_by_owner("tok-1", 42, Some(TriggerKind::Once))
                .unwrap(),
            1
        );
        assert_eq!(store.delete_by_owner("tok-1", 42, None).unwrap(), 2);
        assert!(store.get(other.id).is_ok());
    }

    #[test]
    fn find_daily_returns_newest_first() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        let older = store.create(daily_schedule(), t0).unwrap();
        let newer = store
            .create(daily_schedule(), t0 + Duration::minutes(1))
            .unwrap();

        let found = store.find_daily("tok-1", 42).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, newer.id);
        assert_eq!(found[1].id, older.id);
    }

    #[test]
    fn list_filters_compose() {
        let store = store();
        let t0 = utc("2025-06-01T12:00:00Z");
        store.create(interval_schedule(30), t0).unwrap();
        let mut inactive = interval_schedule(30);
        inactive.active = false;
        store.create(inactive, t0).unwrap();
        let mut other_user = interval_schedule(30);
        other_user.user_id = 99;
        store.create(other_user, t0).unwrap();

        assert_eq!(store.list(&ScheduleFilter::default()).unwrap().len(), 3);
        let filter = ScheduleFilter {
            token: Some("tok-1".into()),
            user_id: Some(42),
            active: Some(true),
        };
        assert_eq!(store.list(&filter).unwrap().len(), 1);
    }
}
