//! Schedule CRUD endpoints.
//!
//! Creation is split per trigger kind (`/schedules/daily|interval|once`) so
//! each body carries exactly the fields its kind needs and bad input is
//! rejected here, before anything reaches the store or the engine. Daily
//! creation enforces the one-daily-set-per-owner rule: a daily request
//! carries one or more firing times, each materialised as its own row, and
//! replaces whatever daily rows the same (token, user_id) held before.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use chime_scheduler::{
    NewSchedule, ScheduleFilter, SchedulePatch, SchedulerError, TriggerKind, TriggerSpec,
};

use crate::app::AppState;

/// Largest accepted interval: one year of minutes.
const MAX_INTERVAL_MINUTES: u32 = 525_600;

type HandlerResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

// ── Request bodies ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateDailyBody {
    pub token: String,
    pub scenario_id: i64,
    pub user_id: i64,
    /// Single local wall-clock time, "HH:MM".
    #[serde(default)]
    pub time_hhmm: Option<String>,
    /// Several firing times per day; takes precedence over `time_hhmm`.
    #[serde(default)]
    pub times_hhmm: Option<Vec<String>>,
    /// IANA zone name. Fixed offsets are not accepted.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Deserialize)]
pub struct CreateIntervalBody {
    pub token: String,
    pub scenario_id: i64,
    pub user_id: i64,
    pub every_minutes: u32,
}

#[derive(Deserialize)]
pub struct CreateOnceBody {
    pub token: String,
    pub scenario_id: i64,
    pub user_id: i64,
    /// RFC 3339 with an explicit UTC offset.
    pub run_at: String,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub token: Option<String>,
    pub user_id: Option<i64>,
    pub active: Option<bool>,
}

#[derive(Deserialize)]
pub struct PatchBody {
    /// Version the client last read; a stale one is rejected with 409.
    pub version: i64,
    #[serde(default)]
    pub scenario_id: Option<i64>,
    #[serde(default)]
    pub trigger: Option<TriggerSpec>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Deserialize)]
pub struct ByKeyBody {
    pub token: String,
    pub user_id: i64,
    /// "daily", "interval" or "once".
    pub kind: String,
}

#[derive(Deserialize)]
pub struct ByKeyAllBody {
    pub token: String,
    pub user_id: i64,
}

// ── Create ────────────────────────────────────────────────────────────────────

/// POST /schedules/daily — create or replace the owner's daily set.
///
/// Each requested time becomes one row. The newest existing daily row is
/// updated in place, the other existing rows are dropped, and any further
/// times are created fresh. Responds with the full new set.
pub async fn create_daily(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateDailyBody>,
) -> HandlerResult {
    let times = daily_times(&body)?;
    let tz: Tz = body
        .timezone
        .parse()
        .map_err(|_| validation(format!("unknown timezone: {}", body.timezone)))?;
    let now = state.clock.now();

    let existing = state
        .store
        .find_daily(&body.token, body.user_id)
        .map_err(store_error)?;

    let mut set = Vec::with_capacity(times.len());
    let mut fresh = times.as_slice();
    if let Some(current) = existing.first() {
        for old in &existing[1..] {
            if let Err(e) = state.store.delete(old.id) {
                warn!(schedule_id = %old.id, error = %e, "failed to drop replaced daily schedule");
            }
        }
        let patch = SchedulePatch {
            scenario_id: Some(body.scenario_id),
            trigger: Some(TriggerSpec::Daily { time: times[0], tz }),
            active: Some(true),
        };
        let updated = state
            .store
            .update(current.id, current.version, patch, now)
            .map_err(store_error)?;
        set.push(updated);
        fresh = &times[1..];
    }

    for &time in fresh {
        let created = state
            .store
            .create(
                NewSchedule {
                    token: body.token.clone(),
                    scenario_id: body.scenario_id,
                    user_id: body.user_id,
                    trigger: TriggerSpec::Daily { time, tz },
                    active: true,
                },
                now,
            )
            .map_err(store_error)?;
        set.push(created);
    }
    Ok(Json(json!({ "schedules": set })))
}

/// POST /schedules/interval
pub async fn create_interval(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateIntervalBody>,
) -> HandlerResult {
    check_interval(body.every_minutes)?;
    let created = state
        .store
        .create(
            NewSchedule {
                token: body.token,
                scenario_id: body.scenario_id,
                user_id: body.user_id,
                trigger: TriggerSpec::Interval {
                    every_minutes: body.every_minutes,
                },
                active: true,
            },
            state.clock.now(),
        )
        .map_err(store_error)?;
    Ok(Json(json!(created)))
}

/// POST /schedules/once
pub async fn create_once(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateOnceBody>,
) -> HandlerResult {
    let run_at = DateTime::parse_from_rfc3339(&body.run_at)
        .map_err(|_| {
            validation(format!(
                "run_at must be RFC 3339 with an offset, got: {}",
                body.run_at
            ))
        })?
        .with_timezone(&Utc);
    let created = state
        .store
        .create(
            NewSchedule {
                token: body.token,
                scenario_id: body.scenario_id,
                user_id: body.user_id,
                trigger: TriggerSpec::Once { run_at },
                active: true,
            },
            state.clock.now(),
        )
        .map_err(store_error)?;
    Ok(Json(json!(created)))
}

// ── Read ──────────────────────────────────────────────────────────────────────

/// GET /schedules?token=&user_id=&active=
pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> HandlerResult {
    let filter = ScheduleFilter {
        token: query.token,
        user_id: query.user_id,
        active: query.active,
    };
    let schedules = state.store.list(&filter).map_err(store_error)?;
    Ok(Json(json!({ "schedules": schedules })))
}

/// GET /schedules/{id}
pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> HandlerResult {
    let schedule = state.store.get(id).map_err(store_error)?;
    Ok(Json(json!(schedule)))
}

// ── Update / delete ───────────────────────────────────────────────────────────

/// PATCH /schedules/{id} — partial update, version-checked.
pub async fn patch_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<PatchBody>,
) -> HandlerResult {
    if let Some(TriggerSpec::Interval { every_minutes }) = &body.trigger {
        check_interval(*every_minutes)?;
    }
    let patch = SchedulePatch {
        scenario_id: body.scenario_id,
        trigger: body.trigger,
        active: body.active,
    };
    let updated = state
        .store
        .update(id, body.version, patch, state.clock.now())
        .map_err(store_error)?;
    Ok(Json(json!(updated)))
}

/// DELETE /schedules/{id}
pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> HandlerResult {
    state.store.delete(id).map_err(store_error)?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /schedules/by_key/delete — delete one kind for an owner.
pub async fn delete_by_key(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ByKeyBody>,
) -> HandlerResult {
    let kind = TriggerKind::from_str(&body.kind).map_err(validation)?;
    let deleted = state
        .store
        .delete_by_owner(&body.token, body.user_id, Some(kind))
        .map_err(store_error)?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// POST /schedules/by_key/delete_all — delete everything an owner has.
pub async fn delete_all_by_key(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ByKeyAllBody>,
) -> HandlerResult {
    let deleted = state
        .store
        .delete_by_owner(&body.token, body.user_id, None)
        .map_err(store_error)?;
    Ok(Json(json!({ "deleted": deleted })))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn parse_hhmm(s: &str) -> Result<NaiveTime, (StatusCode, Json<Value>)> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| validation(format!("time_hhmm must be HH:MM, got: {s}")))
}

/// Normalise a daily request's firing times: `times_hhmm` wins when
/// non-empty, else the single `time_hhmm`. Sorted and deduplicated — a
/// repeated time fires once.
fn daily_times(body: &CreateDailyBody) -> Result<Vec<NaiveTime>, (StatusCode, Json<Value>)> {
    let raw: Vec<&str> = match (&body.times_hhmm, &body.time_hhmm) {
        (Some(list), _) if !list.is_empty() => list.iter().map(String::as_str).collect(),
        (_, Some(single)) => vec![single.as_str()],
        _ => {
            return Err(validation(
                "daily schedule requires time_hhmm or times_hhmm".into(),
            ))
        }
    };
    let mut times = raw
        .into_iter()
        .map(parse_hhmm)
        .collect::<Result<Vec<_>, _>>()?;
    times.sort();
    times.dedup();
    Ok(times)
}

fn check_interval(every_minutes: u32) -> Result<(), (StatusCode, Json<Value>)> {
    if every_minutes == 0 || every_minutes > MAX_INTERVAL_MINUTES {
        return Err(validation(format!(
            "every_minutes must be between 1 and {MAX_INTERVAL_MINUTES}, got: {every_minutes}"
        )));
    }
    Ok(())
}

fn validation(msg: String) -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "error": msg })),
    )
}

/// Map store errors onto HTTP statuses. Internal failures are logged here
/// and returned opaque.
fn store_error(e: SchedulerError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        SchedulerError::NotFound { .. } => StatusCode::NOT_FOUND,
        SchedulerError::Conflict { .. } => StatusCode::CONFLICT,
        SchedulerError::InvalidTrigger(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SchedulerError::Database(_) | SchedulerError::Corrupt { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = %e, "schedule store error");
        return (status, Json(json!({ "error": "internal error" })));
    }
    (status, Json(json!({ "error": e.to_string() })))
}
