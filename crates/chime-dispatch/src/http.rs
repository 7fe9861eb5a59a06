//! The outbound scenario-run call.
//!
//! One GET per dispatch:
//!
//! ```text
//! GET {base_url}?token=…&method=scenarioRun&scenario_id=…&user_id=…
//! ```
//!
//! The response body is ignored; only the status code matters. Statuses
//! below 400 count as success, 5xx and transport failures as transient,
//! and every other 4xx as a permanent rejection.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use chime_core::config::DispatchConfig;
use chime_scheduler::{DispatchCall, Dispatcher, Outcome};

use crate::error::Result;

const METHOD: &str = "scenarioRun";
const USER_AGENT: &str = concat!("chime-dispatch/", env!("CARGO_PKG_VERSION"));

/// [`Dispatcher`] that fires scenario runs against the HTTP API.
///
/// A single instance serves every in-flight dispatch; the inner
/// `reqwest::Client` pools connections.
pub struct HttpDispatcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDispatcher {
    pub fn new(cfg: &DispatchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.clone(),
        })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn invoke(&self, call: &DispatchCall) -> Outcome {
        debug!(
            schedule_id = %call.schedule_id,
            scenario_id = call.scenario_id,
            user_id = call.user_id,
            "dispatching scenario run"
        );

        let scenario_id = call.scenario_id.to_string();
        let user_id = call.user_id.to_string();
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("token", call.token.as_str()),
                ("method", METHOD),
                ("scenario_id", scenario_id.as_str()),
                ("user_id", user_id.as_str()),
            ])
            .send()
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                warn!(
                    schedule_id = %call.schedule_id,
                    error = %e,
                    "scenario run did not reach the API"
                );
                return Outcome::Transient(e.to_string());
            }
        };

        let status = resp.status();
        if status.as_u16() < 400 {
            debug!(
                schedule_id = %call.schedule_id,
                status = status.as_u16(),
                "scenario run accepted"
            );
            Outcome::Success
        } else if status.is_server_error() {
            warn!(
                schedule_id = %call.schedule_id,
                status = status.as_u16(),
                "scenario run failed upstream"
            );
            Outcome::Transient(format!("HTTP {status}"))
        } else {
            warn!(
                schedule_id = %call.schedule_id,
                status = status.as_u16(),
                "scenario run rejected"
            );
            Outcome::Permanent(format!("HTTP {status}"))
        }
    }
}
