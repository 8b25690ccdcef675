use axum::{Router, http::Method, routing::get};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sellerdesk_backend::services::NotificationService;
use sellerdesk_backend::workflows::{WorkflowEngine, WorkflowStore};
use sellerdesk_backend::{AppState, config, database, handlers, jobs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let store = WorkflowStore::new(db_pool.clone());
    let notifier = NotificationService::new(&config.smtp, config.notify.clone());
    let (engine, invocations) = WorkflowEngine::new(
        store,
        notifier,
        Duration::from_secs(config.action_timeout_secs),
    )?;

    engine.warm_up().await?;
    engine.clone().run_invocation_queue(invocations);

    let scheduler = jobs::JobScheduler::new(engine.clone()).await?;
    scheduler.start().await?;

    let app_state = Arc::new(AppState { db_pool, engine });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "SellerDesk Automation API v1.0.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/workflows", handlers::workflow_routes())
        .nest("/api/v1/events", handlers::event_routes())
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
