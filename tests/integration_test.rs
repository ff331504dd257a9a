use booking_jobs::{
    config::AppConfig,
    db::{self, JobStore, OrderStore, PgStore},
    models::{
        booking::{BookingRequest, CartItem},
        job::{JobPayload, JobType, ResultState, Status},
    },
    services::{
        broker::{MessageBroker, QueueName, RedisBroker, RedisBrokerSettings},
        status::JobStatusAggregator,
        submitter::JobSubmitter,
        worker::{Outcome, Worker},
    },
};
use std::sync::Arc;
use std::time::Duration;

/// Integration test: full booking flow
///
/// This test verifies the complete integration:
/// 1. Database connection and schema
/// 2. Broker topology, publish and manual-ack consume
/// 3. Job/Task/Result persistence at submit time
/// 4. Worker processing and outcome persistence
/// 5. Derived job status
///
/// Note: This requires a running PostgreSQL and Redis instance
/// configured via environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_full_integration() {
    let config = AppConfig::from_env().expect("Failed to load config");

    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    // Isolated exchange so stray bindings from other runs do not interfere.
    let exchange = format!("it-{}", uuid::Uuid::new_v4());
    let broker = RedisBroker::new(&config.redis_url, config.broker_settings())
        .expect("Failed to initialize broker");
    broker
        .declare_topology(&exchange)
        .await
        .expect("Failed to declare topology");
    let broker: Arc<dyn MessageBroker> = Arc::new(broker);

    let store = Arc::new(PgStore::new(db_pool));
    let submitter = JobSubmitter::new(store.clone(), broker.clone(), exchange.clone());
    let aggregator = JobStatusAggregator::new(store.clone());

    // 1. Submit a booking
    let job_id = submitter
        .submit(
            JobType::CreateBooking,
            "U1",
            JobPayload::BookingRequest(BookingRequest {
                cart: vec![CartItem {
                    pid: "P1".to_string(),
                    quantity: 2,
                    calculated_price: 19.98,
                }],
                shipping: None,
            }),
        )
        .await
        .expect("Failed to submit job");

    let tasks = store.tasks_for_job(job_id).await.expect("Failed to load tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, Status::not_set());

    // 2. Consume it by hand, the way a worker does
    let mut consumer = broker
        .consumer(QueueName::Booking)
        .await
        .expect("Failed to open consumer");
    let delivery = loop {
        let delivery = consumer.next_delivery().await.expect("Failed to fetch");
        let item = booking_jobs::models::queue_item::QueueItem::from_bytes(&delivery.body);
        if matches!(&item, Ok(item) if item.job.id == job_id) {
            break delivery;
        }
        // Leftover message from an earlier run on the shared queue.
        consumer.ack(delivery).await.expect("Failed to ack leftover");
    };

    let worker = Worker::new(
        store.clone() as Arc<dyn JobStore>,
        store.clone() as Arc<dyn OrderStore>,
        broker.clone(),
        exchange.clone(),
    );
    let outcome = worker
        .process(QueueName::Booking, &delivery.body)
        .await
        .expect("Worker failed");
    consumer.ack(delivery).await.expect("Failed to ack");
    assert_eq!(outcome, Outcome::Succeeded);

    // 3. Check derived status and result
    let view = aggregator
        .job_view(job_id)
        .await
        .expect("Failed to load job")
        .expect("Job not found");
    assert_eq!(view.report.status, Status::finished(true));
    assert!(view.result.is_some());

    let result = store
        .result_for_task(tasks[0].id)
        .await
        .expect("Failed to load result")
        .expect("Result not found");
    assert_eq!(result.result_state, ResultState::Present);
    assert!(result.checksum.is_some());

    println!("✅ All integration tests passed!");
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_broker_prefetch_and_ack() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let exchange = format!("it-{}", uuid::Uuid::new_v4());
    let broker = RedisBroker::new(&config.redis_url, config.broker_settings())
        .expect("Failed to initialize broker");
    broker.declare_topology(&exchange).await.unwrap();
    broker.health_check().await.expect("Redis not reachable");

    let marker = uuid::Uuid::new_v4().to_string();
    broker
        .publish(&exchange, "MANUAL", marker.as_bytes())
        .await
        .unwrap();

    let mut consumer = broker.consumer(QueueName::Manual).await.unwrap();
    let delivery = loop {
        let delivery = consumer.next_delivery().await.unwrap();
        if delivery.body == marker.as_bytes() {
            break delivery;
        }
        consumer.ack(delivery).await.unwrap();
    };

    assert!(consumer.next_delivery().await.is_err());
    consumer.ack(delivery).await.unwrap();

    assert!(broker.publish(&exchange, "UNBOUND", b"x").await.is_err());
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_broker_redelivers_from_dead_consumer() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let settings = RedisBrokerSettings {
        stale_after: Duration::from_secs(2),
        poll_timeout: Duration::from_secs(1),
        ..config.broker_settings()
    };
    let exchange = format!("it-{}", uuid::Uuid::new_v4());
    let broker = RedisBroker::new(&config.redis_url, settings).expect("Failed to initialize broker");
    broker.declare_topology(&exchange).await.unwrap();

    let marker = uuid::Uuid::new_v4().to_string();
    broker
        .publish(&exchange, "SEARCH", marker.as_bytes())
        .await
        .unwrap();

    // First consumer takes the message and dies without acking.
    let mut doomed = broker.consumer(QueueName::Search).await.unwrap();
    loop {
        let delivery = doomed.next_delivery().await.unwrap();
        if delivery.body == marker.as_bytes() {
            break;
        }
        doomed.ack(delivery).await.unwrap();
    }
    drop(doomed);

    let mut survivor = broker.consumer(QueueName::Search).await.unwrap();
    let redelivered = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let delivery = survivor.next_delivery().await.unwrap();
            if delivery.body == marker.as_bytes() {
                return delivery;
            }
            survivor.ack(delivery).await.unwrap();
        }
    })
    .await
    .expect("Message held by the dead consumer was never redelivered");

    survivor.ack(redelivered).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_broker_requeue_hands_message_back() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let exchange = format!("it-{}", uuid::Uuid::new_v4());
    let broker = RedisBroker::new(&config.redis_url, config.broker_settings())
        .expect("Failed to initialize broker");
    broker.declare_topology(&exchange).await.unwrap();

    let marker = uuid::Uuid::new_v4().to_string();
    broker
        .publish(&exchange, "MANUAL", marker.as_bytes())
        .await
        .unwrap();

    let mut consumer = broker.consumer(QueueName::Manual).await.unwrap();
    let delivery = loop {
        let delivery = consumer.next_delivery().await.unwrap();
        if delivery.body == marker.as_bytes() {
            break delivery;
        }
        consumer.ack(delivery).await.unwrap();
    };
    consumer.requeue(delivery).await.unwrap();

    // Back at the head of the queue, so the same consumer sees it next.
    let again = consumer.next_delivery().await.unwrap();
    assert_eq!(again.body, marker.as_bytes());
    consumer.ack(again).await.unwrap();
}
