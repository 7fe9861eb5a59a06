use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Defines when a schedule fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Fire every day at the given wall-clock time in `tz`.
    ///
    /// The zone is a full IANA zone, never a fixed offset, so the UTC due
    /// instant shifts with DST transitions.
    Daily { time: NaiveTime, tz: Tz },

    /// Fire repeatedly with a fixed interval in minutes.
    Interval { every_minutes: u32 },

    /// Fire exactly once at the given UTC instant.
    Once { run_at: DateTime<Utc> },
}

impl TriggerSpec {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerSpec::Daily { .. } => TriggerKind::Daily,
            TriggerSpec::Interval { .. } => TriggerKind::Interval,
            TriggerSpec::Once { .. } => TriggerKind::Once,
        }
    }
}

/// Trigger discriminant, used for owner-scoped filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Daily,
    Interval,
    Once,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerKind::Daily => "daily",
            TriggerKind::Interval => "interval",
            TriggerKind::Once => "once",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "daily" => Ok(TriggerKind::Daily),
            "interval" => Ok(TriggerKind::Interval),
            "once" => Ok(TriggerKind::Once),
            other => Err(format!("unknown trigger kind: {other}")),
        }
    }
}

/// Execution lifecycle state of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    /// Eligible to fire once `next_run_at` arrives.
    Pending,
    /// Leased by an engine instance; a dispatch is in flight.
    Claimed,
    /// A once trigger after its single successful run. Terminal.
    Completed,
    /// Retries exhausted or permanently rejected. Terminal until edited.
    Failed,
}

impl std::fmt::Display for ScheduleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScheduleState::Pending => "pending",
            ScheduleState::Claimed => "claimed",
            ScheduleState::Completed => "completed",
            ScheduleState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScheduleState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScheduleState::Pending),
            "claimed" => Ok(ScheduleState::Claimed),
            "completed" => Ok(ScheduleState::Completed),
            "failed" => Ok(ScheduleState::Failed),
            other => Err(format!("unknown schedule state: {other}")),
        }
    }
}

/// A persisted schedule record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// Primary key.
    pub id: Uuid,
    /// Credential forwarded verbatim on dispatch; also scopes ownership.
    pub token: String,
    /// Target scenario, passed through to the dispatch call.
    pub scenario_id: i64,
    /// End user the scenario runs for, passed through to the dispatch call.
    pub user_id: i64,
    /// When this schedule fires.
    pub trigger: TriggerSpec,
    /// Disabled schedules are never selected, whatever their state.
    pub active: bool,
    /// Current lifecycle state.
    pub state: ScheduleState,
    /// Next due instant (UTC). None only in terminal states.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Most recent firing instant, if any.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Consecutive transient dispatch failures since the last success.
    pub retry_count: u32,
    /// Engine instance holding the live lease, if claimed.
    pub lease_owner: Option<String>,
    /// Past this instant the claim no longer protects the row.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Bumped on every mutation; every write is conditioned on it.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a schedule.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub token: String,
    pub scenario_id: i64,
    pub user_id: i64,
    pub trigger: TriggerSpec,
    pub active: bool,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SchedulePatch {
    pub scenario_id: Option<i64>,
    pub trigger: Option<TriggerSpec>,
    pub active: Option<bool>,
}

/// Optional list filters; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    pub token: Option<String>,
    pub user_id: Option<i64>,
    pub active: Option<bool>,
}

/// Proof of a successful claim. Commits must present it; the store accepts
/// them only while the same owner and version are still on the row.
#[derive(Debug, Clone)]
pub struct Lease {
    pub schedule_id: Uuid,
    pub owner: String,
    /// Row version after the claim bump.
    pub version: i64,
    pub expires_at: DateTime<Utc>,
}

/// What to do with a schedule after a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuccessDisposition {
    /// Terminal: a once trigger after its single run.
    Complete,
    /// Recurring: pending again at the given instant, retry count reset.
    Reschedule(DateTime<Utc>),
}

/// What to do with a schedule after a failed dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Try again at the given instant with the bumped failure count.
    Retry {
        next_run_at: DateTime<Utc>,
        retry_count: u32,
    },
    /// Terminal: permanent failure or retries exhausted.
    Fail,
}
