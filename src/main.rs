use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use booking_jobs::{
    app_state::AppState,
    config::AppConfig,
    db::{self, JobStore, PgStore},
    routes,
    services::broker::{MessageBroker, RedisBroker},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing booking-jobs API server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    metrics::describe_counter!("jobs_submitted_total", "Jobs persisted and published");
    metrics::describe_counter!(
        "jobs_publish_failed_total",
        "Jobs persisted whose message could not be published"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize Redis broker and declare queues
    tracing::info!("Connecting to Redis broker");
    let broker = RedisBroker::new(&config.redis_url, config.broker_settings())
        .expect("Failed to initialize message broker");
    broker
        .declare_topology(&config.exchange_name)
        .await
        .expect("Failed to declare broker topology");

    let store: Arc<dyn JobStore> = Arc::new(PgStore::new(db_pool));
    let broker: Arc<dyn MessageBroker> = Arc::new(broker);
    let state = AppState::new(store, broker, &config.exchange_name);

    let app = routes::router(state)
        .route(
            "/metrics",
            get(move || std::future::ready(prometheus_handle.render())),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    tracing::info!("Starting booking-jobs on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
