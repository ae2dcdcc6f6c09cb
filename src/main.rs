use anyhow::Context;
use influence_engine::{api, config::Config, db::init_db, Engine, Repository, TimeMs};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    let repo = Arc::new(Repository::new(pool));

    let engine = Engine::start(config.engine.clone(), repo);
    engine
        .bootstrap()
        .await
        .context("Failed to restore engine state")?;

    if !config.recompute_interval.is_zero() {
        spawn_maintenance(Arc::clone(&engine), config.recompute_interval);
    }

    let app = api::create_router(api::AppState::new(engine));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

/// Periodic trend hysteresis and full recompute at wall-clock time.
fn spawn_maintenance(engine: Arc<Engine>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            engine.advance_clock(TimeMs::now());
            if let Err(err) = engine.tick().await {
                tracing::warn!(error = %err, "Trend maintenance failed");
            }
            if let Err(err) = engine.recompute(None).await {
                tracing::warn!(error = %err, "Scheduled recompute failed");
            }
        }
    });
}
