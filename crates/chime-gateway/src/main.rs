use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use chime_core::Clock;

mod app;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "chime_gateway=info,chime_scheduler=info,chime_dispatch=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    // load config: explicit path > CHIME_CONFIG env > ~/.chime/chime.toml
    let config_path = std::env::var("CHIME_CONFIG").ok();
    let config =
        chime_core::config::ChimeConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            chime_core::config::ChimeConfig::default()
        });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    // Handlers and the engine each get their own connection; WAL lets the
    // two write without blocking each other's reads.
    let db = open_connection(db_path)?;
    let store = chime_scheduler::ScheduleStore::new(db)?;
    let engine_store = Arc::new(chime_scheduler::ScheduleStore::new(open_connection(
        db_path,
    )?)?);

    let clock: Arc<dyn Clock> = Arc::new(chime_core::SystemClock);
    let dispatcher = Arc::new(chime_dispatch::HttpDispatcher::new(&config.dispatch)?);

    let engine = chime_scheduler::ExecutionEngine::new(
        engine_store,
        dispatcher,
        Arc::clone(&clock),
        config.engine.clone(),
    );
    let engine_health = engine.health();

    // spawn the execution engine loop in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move { engine.run(shutdown_rx).await });

    let state = Arc::new(app::AppState::new(config, store, clock, engine_health));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Chime gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    // signal the engine to stop
    let _ = shutdown_tx.send(true);
    Ok(())
}

fn open_connection(db_path: &str) -> anyhow::Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
