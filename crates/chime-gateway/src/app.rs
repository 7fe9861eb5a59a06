use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use chime_core::config::ChimeConfig;
use chime_core::Clock;
use chime_scheduler::{HealthHandle, ScheduleStore};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ChimeConfig,
    pub store: ScheduleStore,
    pub clock: Arc<dyn Clock>,
    pub engine_health: HealthHandle,
}

impl AppState {
    pub fn new(
        config: ChimeConfig,
        store: ScheduleStore,
        clock: Arc<dyn Clock>,
        engine_health: HealthHandle,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            engine_health,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/schedules", get(crate::http::schedules::list_schedules))
        .route(
            "/schedules/daily",
            post(crate::http::schedules::create_daily),
        )
        .route(
            "/schedules/interval",
            post(crate::http::schedules::create_interval),
        )
        .route("/schedules/once", post(crate::http::schedules::create_once))
        .route(
            "/schedules/{id}",
            get(crate::http::schedules::get_schedule)
                .patch(crate::http::schedules::patch_schedule)
                .delete(crate::http::schedules::delete_schedule),
        )
        .route(
            "/schedules/by_key/delete",
            post(crate::http::schedules::delete_by_key),
        )
        .route(
            "/schedules/by_key/delete_all",
            post(crate::http::schedules::delete_all_by_key),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
