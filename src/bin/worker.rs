use booking_jobs::{
    config::AppConfig,
    db::{self, JobStore, OrderStore, PgStore},
    services::{
        broker::{MessageBroker, RedisBroker},
        worker::Worker,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting job worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    let queues = config.worker_queues().expect("Invalid WORKER_QUEUES");

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to start Prometheus listener");
        tracing::info!(%addr, "Serving worker metrics");
    }

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize broker
    tracing::info!("Connecting to Redis broker");
    let broker = RedisBroker::new(&config.redis_url, config.broker_settings())
        .expect("Failed to initialize message broker");
    broker
        .declare_topology(&config.exchange_name)
        .await
        .expect("Failed to declare broker topology");

    let store = Arc::new(PgStore::new(db_pool));
    let worker = Arc::new(
        Worker::new(
            store.clone() as Arc<dyn JobStore>,
            store as Arc<dyn OrderStore>,
            Arc::new(broker) as Arc<dyn MessageBroker>,
            config.exchange_name.clone(),
        )
        .with_handler_timeout(config.handler_timeout()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested, finishing in-flight messages");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for ctrl-c, running until killed");
                // Keep the sender alive so consumers do not read this as a shutdown.
                std::future::pending::<()>().await;
            }
        }
    });

    // One consumer per queue; each holds at most one unacked message.
    let mut consumers = JoinSet::new();
    for queue in queues {
        let worker = Arc::clone(&worker);
        let shutdown = shutdown_rx.clone();
        consumers.spawn(async move { (queue, worker.run(queue, shutdown).await) });
    }

    tracing::info!("Worker ready");

    let mut failed = false;
    while let Some(joined) = consumers.join_next().await {
        match joined {
            Ok((queue, Ok(()))) => tracing::info!(queue = %queue, "Consumer exited"),
            Ok((queue, Err(e))) => {
                failed = true;
                tracing::error!(queue = %queue, error = %e, "Consumer terminated");
            }
            Err(e) => {
                failed = true;
                tracing::error!(error = %e, "Consumer task panicked");
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}
