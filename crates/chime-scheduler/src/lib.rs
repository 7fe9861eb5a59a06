//! `chime-scheduler` — durable schedule execution over SQLite.
//!
//! # Overview
//!
//! Schedules are persisted to a SQLite `schedules` table. The
//! [`engine::ExecutionEngine`] polls for due rows, takes a lease on each via
//! an atomic claim, dispatches the external action under a concurrency
//! bound, and commits the outcome — reschedule, retry with backoff, or a
//! terminal state. Every write is conditioned on the row's `version`, so
//! several engine instances (and the CRUD API) can share one database; a
//! claim that expires without a commit simply becomes claimable again.
//!
//! # Trigger kinds
//!
//! | Kind       | Behaviour                                                |
//! |------------|----------------------------------------------------------|
//! | `Daily`    | Fire at HH:MM wall-clock time in an IANA zone, DST-aware |
//! | `Interval` | Fire every N minutes, rescheduled from the actual run    |
//! | `Once`     | Fire once at an absolute UTC instant                     |

pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod store;
pub mod trigger;
pub mod types;

pub use dispatch::{DispatchCall, Dispatcher, Outcome};
pub use engine::{EngineHealth, ExecutionEngine, HealthHandle, TickStats};
pub use error::{Result, SchedulerError};
pub use store::ScheduleStore;
pub use types::{
    NewSchedule, Schedule, SchedulePatch, ScheduleFilter, ScheduleState, TriggerKind, TriggerSpec,
};
