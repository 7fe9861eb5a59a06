use async_trait::async_trait;
use uuid::Uuid;

use crate::types::Schedule;

/// One external action request, derived from a claimed schedule.
#[derive(Debug, Clone)]
pub struct DispatchCall {
    /// For log correlation only; targets never see schedule IDs.
    pub schedule_id: Uuid,
    pub token: String,
    pub scenario_id: i64,
    pub user_id: i64,
}

impl DispatchCall {
    pub fn for_schedule(schedule: &Schedule) -> Self {
        Self {
            schedule_id: schedule.id,
            token: schedule.token.clone(),
            scenario_id: schedule.scenario_id,
            user_id: schedule.user_id,
        }
    }
}

/// How a dispatch attempt ended, as the engine needs to know it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The target accepted the run.
    Success,
    /// Worth retrying: timeout, connection failure, or a server-side error.
    Transient(String),
    /// Not worth retrying: the target rejected the request outright.
    Permanent(String),
}

/// Sends the external action for a due schedule.
///
/// Implementations hold no schedule state and must be safe to call
/// concurrently. Retry policy lives in the engine, not here — an
/// implementation reports one attempt's outcome and nothing more.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn invoke(&self, call: &DispatchCall) -> Outcome;
}
