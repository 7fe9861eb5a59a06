use chrono::offset::LocalResult;
use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::types::TriggerSpec;

/// Compute the next due instant for `trigger`, strictly after `reference`.
///
/// Returns `None` when the trigger is exhausted — currently only a `Once`
/// trigger that has already fired (`last_run_at` set). Daily and interval
/// triggers always produce a next instant.
///
/// Interval triggers advance from `max(last_run_at, reference)`: after
/// downtime the schedule fires at most once and then continues from now,
/// instead of replaying every missed occurrence.
pub fn next_due(
    trigger: &TriggerSpec,
    reference: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match trigger {
        TriggerSpec::Once { run_at } => {
            // Fires at its instant exactly once, even if that instant is
            // already in the past when the schedule is created.
            if last_run_at.is_some() {
                None
            } else {
                Some(*run_at)
            }
        }

        TriggerSpec::Interval { every_minutes } => {
            let base = last_run_at.map_or(reference, |last| last.max(reference));
            Some(base + Duration::minutes(i64::from(*every_minutes)))
        }

        TriggerSpec::Daily { time, tz } => next_daily(*time, *tz, reference),
    }
}

/// Next occurrence of `time` on `tz`'s wall clock, strictly after `reference`.
fn next_daily(time: NaiveTime, tz: Tz, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut day = reference.with_timezone(&tz).date_naive();
    // Today's occurrence may have passed already, or sit inside a DST gap;
    // two probes always suffice, the bound is just caution.
    for _ in 0..4 {
        if let Some(at) = resolve_local(day.and_time(time), tz) {
            if at > reference {
                return Some(at);
            }
        }
        day = day.succ_opt()?;
    }
    None
}

/// Map a local wall-clock datetime in `tz` to a UTC instant.
///
/// Spring-forward gap: the wall time does not exist; resolve to the first
/// valid instant after the gap. Fall-back fold: the wall time exists twice;
/// the earlier occurrence wins.
fn resolve_local(local: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, _) => Some(first.with_timezone(&Utc)),
        LocalResult::None => {
            // Probe forward minute by minute until the gap ends. Real DST
            // gaps are an hour; 3 hours covers every historical offset jump.
            let mut probe = local;
            for _ in 0..180 {
                probe += Duration::minutes(1);
                match tz.from_local_datetime(&probe) {
                    LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                    LocalResult::Ambiguous(first, _) => return Some(first.with_timezone(&Utc)),
                    LocalResult::None => continue,
                }
            }
            None
        }
    }
}
