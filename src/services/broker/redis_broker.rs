use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use super::{BrokerError, Consumer, Delivery, MessageBroker, QueueName};

const KEY_PREFIX: &str = "booking_jobs";
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

fn bindings_key(exchange: &str) -> String {
    format!("{KEY_PREFIX}:exchange:{exchange}:bindings")
}

fn queue_key(queue: QueueName) -> String {
    format!("{KEY_PREFIX}:queue:{queue}")
}

fn processing_key(queue: QueueName, consumer_id: &str) -> String {
    format!("{KEY_PREFIX}:processing:{queue}:{consumer_id}")
}

fn consumers_key(queue: QueueName) -> String {
    format!("{KEY_PREFIX}:consumers:{queue}")
}

#[derive(Debug, Clone)]
pub struct RedisBrokerSettings {
    /// A consumer whose heartbeat is older than this is treated as dead and
    /// its in-flight message goes back to the queue.
    pub stale_after: Duration,
    /// How long one blocking fetch waits before re-checking for stale consumers.
    pub poll_timeout: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for RedisBrokerSettings {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(60),
            poll_timeout: Duration::from_secs(1),
            max_reconnect_attempts: 8,
        }
    }
}

/// Opens connections, retrying with exponential backoff.
#[derive(Clone)]
struct Connector {
    client: redis::Client,
    max_attempts: u32,
}

impl Connector {
    async fn connect(&self) -> Result<MultiplexedConnection, BrokerError> {
        let mut delay = INITIAL_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.client.get_multiplexed_async_connection().await {
                Ok(conn) => return Ok(conn),
                Err(e) if attempt < self.max_attempts => {
                    tracing::warn!(
                        error = %e,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "Redis connection failed, backing off"
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(BrokerError::Unavailable(format!(
                        "gave up after {attempt} connection attempts: {e}"
                    )))
                }
            }
        }
    }
}

/// Redis-backed broker using the reliable-queue pattern.
///
/// Queues are lists. A direct exchange is a hash of routing key to queue
/// name. Consuming moves a message atomically into a per-consumer
/// processing list; acking removes it from there.
pub struct RedisBroker {
    connector: Connector,
    settings: RedisBrokerSettings,
}

impl RedisBroker {
    pub fn new(redis_url: &str, settings: RedisBrokerSettings) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            connector: Connector {
                client,
                max_attempts: settings.max_reconnect_attempts.max(1),
            },
            settings,
        })
    }

    async fn publish_once(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        let mut conn = self.connector.connect().await?;
        let bound: Option<String> = conn.hget(bindings_key(exchange), routing_key).await?;
        let queue = bound
            .and_then(|name| name.parse::<QueueName>().ok())
            .ok_or_else(|| BrokerError::Unroutable {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            })?;

        conn.lpush::<_, _, ()>(queue_key(queue), body).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for RedisBroker {
    async fn declare_topology(&self, exchange: &str) -> Result<(), BrokerError> {
        let mut conn = self.connector.connect().await?;
        for queue in QueueName::ALL {
            conn.hset::<_, _, _, ()>(bindings_key(exchange), queue.routing_key(), queue.to_string())
                .await?;
        }
        tracing::info!(exchange, "Declared queues and bindings");
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        let mut delay = INITIAL_BACKOFF;
        let mut attempt = 1;
        loop {
            let err = match self.publish_once(exchange, routing_key, body).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if !err.is_transient() {
                return Err(err);
            }
            if attempt >= self.connector.max_attempts {
                return Err(BrokerError::Unavailable(format!(
                    "publish to '{routing_key}' gave up after {attempt} attempts: {err}"
                )));
            }
            tracing::warn!(
                routing_key,
                error = %err,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                "Publish failed, reconnecting"
            );
            sleep(delay).await;
            delay = (delay * 2).min(MAX_BACKOFF);
            attempt += 1;
        }
    }

    async fn consumer(&self, queue: QueueName) -> Result<Box<dyn Consumer>, BrokerError> {
        let conn = self.connector.connect().await?;
        let id = Uuid::new_v4().to_string();

        let heartbeat = tokio::spawn(heartbeat_loop(
            self.connector.clone(),
            queue,
            id.clone(),
            (self.settings.stale_after / 3).max(Duration::from_secs(1)),
        ));

        let mut consumer = RedisConsumer {
            connector: self.connector.clone(),
            conn: Some(conn),
            queue,
            id,
            settings: self.settings.clone(),
            unacked: None,
            next_tag: 0,
            last_reclaim: Instant::now(),
            heartbeat,
        };
        consumer.beat().await?;
        consumer.reclaim_stale().await?;

        tracing::info!(queue = %queue, consumer_id = %consumer.id, "Registered consumer");
        Ok(Box::new(consumer))
    }

    async fn queue_depth(&self, queue: QueueName) -> Result<u64, BrokerError> {
        let mut conn = self.connector.connect().await?;
        let depth: u64 = conn.llen(queue_key(queue)).await?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        let mut conn = self.connector.connect().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

async fn heartbeat_loop(connector: Connector, queue: QueueName, id: String, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let beat = async {
            let mut conn = connector.connect().await?;
            conn.zadd::<_, _, _, ()>(consumers_key(queue), &id, Utc::now().timestamp())
                .await?;
            Ok::<_, BrokerError>(())
        };
        if let Err(e) = beat.await {
            tracing::warn!(queue = %queue, consumer_id = %id, error = %e, "Heartbeat failed");
        }
    }
}

struct RedisConsumer {
    connector: Connector,
    conn: Option<MultiplexedConnection>,
    queue: QueueName,
    id: String,
    settings: RedisBrokerSettings,
    unacked: Option<(u64, Vec<u8>)>,
    next_tag: u64,
    last_reclaim: Instant,
    heartbeat: JoinHandle<()>,
}

impl RedisConsumer {
    async fn connection(&mut self) -> Result<&mut MultiplexedConnection, BrokerError> {
        if self.conn.is_none() {
            self.conn = Some(self.connector.connect().await?);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| BrokerError::Unavailable("no connection".to_string()))
    }

    async fn beat(&mut self) -> Result<(), BrokerError> {
        let key = consumers_key(self.queue);
        let id = self.id.clone();
        let conn = self.connection().await?;
        conn.zadd::<_, _, _, ()>(key, id, Utc::now().timestamp()).await?;
        Ok(())
    }

    /// Move in-flight messages of dead consumers back to the head of the queue.
    async fn reclaim_stale(&mut self) -> Result<(), BrokerError> {
        self.last_reclaim = Instant::now();
        let queue = self.queue;
        let own_id = self.id.clone();
        let cutoff = Utc::now().timestamp() - self.settings.stale_after.as_secs() as i64;

        let conn = self.connection().await?;
        let stale: Vec<String> = conn
            .zrangebyscore(consumers_key(queue), "-inf", cutoff)
            .await?;

        for consumer_id in stale.into_iter().filter(|id| *id != own_id) {
            let mut moved = 0u32;
            loop {
                let body: Option<Vec<u8>> = redis::cmd("LMOVE")
                    .arg(processing_key(queue, &consumer_id))
                    .arg(queue_key(queue))
                    .arg("RIGHT")
                    .arg("RIGHT")
                    .query_async(&mut *conn)
                    .await?;
                if body.is_none() {
                    break;
                }
                moved += 1;
            }
            conn.zrem::<_, _, ()>(consumers_key(queue), &consumer_id).await?;

            if moved > 0 {
                tracing::warn!(
                    queue = %queue,
                    consumer_id = %consumer_id,
                    redelivered = moved,
                    "Redelivering messages held by stale consumer"
                );
            }
        }
        Ok(())
    }

    async fn fetch(&mut self) -> Result<Option<Vec<u8>>, BrokerError> {
        let processing = processing_key(self.queue, &self.id);
        let source = queue_key(self.queue);
        let wait = self.settings.poll_timeout.as_secs_f64();
        let conn = self.connection().await?;

        // A fetch whose reply was lost to a dropped connection left the
        // message in our processing list.
        let leftover: Option<Vec<u8>> = conn.lindex(&processing, -1).await?;
        if leftover.is_some() {
            return Ok(leftover);
        }

        let body: Option<Vec<u8>> = redis::cmd("BRPOPLPUSH")
            .arg(source)
            .arg(processing)
            .arg(wait)
            .query_async(&mut *conn)
            .await?;
        Ok(body)
    }
}

#[async_trait]
impl Consumer for RedisConsumer {
    async fn next_delivery(&mut self) -> Result<Delivery, BrokerError> {
        if self.unacked.is_some() {
            return Err(BrokerError::PrefetchExceeded);
        }

        loop {
            match self.fetch().await {
                Ok(Some(body)) => {
                    self.next_tag += 1;
                    self.unacked = Some((self.next_tag, body.clone()));
                    return Ok(Delivery {
                        tag: self.next_tag,
                        queue: self.queue,
                        body,
                    });
                }
                Ok(None) => {
                    if self.last_reclaim.elapsed() >= self.settings.stale_after / 2 {
                        self.reclaim_stale().await?;
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(queue = %self.queue, error = %e, "Lost broker connection, reconnecting");
                    self.conn = None;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn ack(&mut self, delivery: Delivery) -> Result<(), BrokerError> {
        let body = match &self.unacked {
            Some((tag, body)) if *tag == delivery.tag => body.clone(),
            _ => return Err(BrokerError::UnknownDelivery(delivery.tag)),
        };
        let processing = processing_key(self.queue, &self.id);

        let mut retried = false;
        loop {
            let conn = self.connection().await?;
            let err = match conn.lrem::<_, _, ()>(&processing, 1, &body).await {
                Ok(()) => {
                    self.unacked = None;
                    return Ok(());
                }
                Err(e) => BrokerError::from(e),
            };
            if retried || !err.is_transient() {
                return Err(err);
            }
            tracing::warn!(queue = %self.queue, error = %err, "Ack failed, reconnecting");
            self.conn = None;
            retried = true;
        }
    }

    async fn requeue(&mut self, delivery: Delivery) -> Result<(), BrokerError> {
        let body = match &self.unacked {
            Some((tag, body)) if *tag == delivery.tag => body.clone(),
            _ => return Err(BrokerError::UnknownDelivery(delivery.tag)),
        };
        let processing = processing_key(self.queue, &self.id);
        let source = queue_key(self.queue);

        let mut retried = false;
        loop {
            let conn = self.connection().await?;
            // Consumers pop from the right, so RPUSH puts it back at the head.
            let moved = redis::pipe()
                .atomic()
                .lrem(&processing, 1, &body)
                .ignore()
                .rpush(&source, &body)
                .ignore()
                .query_async::<()>(conn)
                .await;
            let err = match moved {
                Ok(()) => {
                    self.unacked = None;
                    return Ok(());
                }
                Err(e) => BrokerError::from(e),
            };
            if retried || !err.is_transient() {
                return Err(err);
            }
            tracing::warn!(queue = %self.queue, error = %err, "Requeue failed, reconnecting");
            self.conn = None;
            retried = true;
        }
    }
}

impl Drop for RedisConsumer {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}
