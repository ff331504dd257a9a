//! Exchange/queue abstraction between the API process and the workers.
//!
//! Delivery is at-least-once: a consumer holds at most one unacknowledged
//! message (prefetch = 1), and a message that is never acked is handed to
//! another consumer of the same queue.

use std::future::Future;

use async_trait::async_trait;
use strum::{Display, EnumString};
use tokio::sync::watch;

pub mod memory;
pub mod redis_broker;

pub use memory::MemoryBroker;
pub use redis_broker::{RedisBroker, RedisBrokerSettings};

/// Fixed set of durable queues. Each is bound to the direct exchange with a
/// routing key equal to its name.
#[derive(Debug, Clone, Copy, EnumString, Display, PartialEq, Eq, Hash)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueName {
    Search,
    Booking,
    LostItem,
    Manual,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::Search,
        QueueName::Booking,
        QueueName::LostItem,
        QueueName::Manual,
    ];

    /// Routing key on the direct exchange.
    pub fn routing_key(self) -> String {
        self.to_string()
    }
}

/// One message handed to a consumer and not yet acknowledged.
#[derive(Debug)]
pub struct Delivery {
    pub tag: u64,
    pub queue: QueueName,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Declare every queue and bind it to `exchange` under its own name.
    async fn declare_topology(&self, exchange: &str) -> Result<(), BrokerError>;

    /// Publish a persistent message.
    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8])
        -> Result<(), BrokerError>;

    /// Open a manual-ack consumer with prefetch = 1.
    async fn consumer(&self, queue: QueueName) -> Result<Box<dyn Consumer>, BrokerError>;

    /// Number of ready (not in-flight) messages on a queue.
    async fn queue_depth(&self, queue: QueueName) -> Result<u64, BrokerError>;

    async fn health_check(&self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Consumer: Send {
    /// Wait for the next message. Fails with [`BrokerError::PrefetchExceeded`]
    /// while a previous delivery is still unacknowledged.
    async fn next_delivery(&mut self) -> Result<Delivery, BrokerError>;

    async fn ack(&mut self, delivery: Delivery) -> Result<(), BrokerError>;

    /// Hand an unacked delivery back to the head of its queue.
    async fn requeue(&mut self, delivery: Delivery) -> Result<(), BrokerError>;
}

/// Manual-ack consume loop: fetch one message, run `handler` on its body,
/// ack it, repeat until `shutdown` flips to true.
///
/// A handler error puts the message back on its queue and ends the loop.
/// If the shutdown sender goes away the loop keeps consuming.
pub async fn consume<F, Fut, E>(
    consumer: &mut dyn Consumer,
    mut shutdown: watch::Receiver<bool>,
    mut handler: F,
) -> Result<(), E>
where
    F: FnMut(Vec<u8>) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: From<BrokerError>,
{
    let mut watching = true;
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let delivery = tokio::select! {
            changed = shutdown.changed(), if watching => {
                match changed {
                    Ok(()) if *shutdown.borrow() => return Ok(()),
                    Ok(()) => {}
                    Err(_) => {
                        tracing::warn!("Shutdown signal dropped, consuming until the process exits");
                        watching = false;
                    }
                }
                continue;
            }
            delivery = consumer.next_delivery() => delivery?,
        };

        if let Err(e) = handler(delivery.body.clone()).await {
            let tag = delivery.tag;
            if let Err(requeue_err) = consumer.requeue(delivery).await {
                // Still unacked; stale-consumer reclaim redelivers it.
                tracing::warn!(tag, error = %requeue_err, "Failed to requeue delivery");
            }
            return Err(e);
        }
        consumer.ack(delivery).await?;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("No queue bound to exchange '{exchange}' with routing key '{routing_key}'")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },

    #[error("Consumer already holds an unacknowledged delivery")]
    PrefetchExceeded,

    #[error("Delivery {0} is not in flight on this consumer")]
    UnknownDelivery(u64),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

impl BrokerError {
    /// Connection-level failures worth a reconnect.
    pub fn is_transient(&self) -> bool {
        match self {
            BrokerError::Redis(e) => {
                e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_queue_names_match_routing_keys() {
        assert_eq!(QueueName::LostItem.routing_key(), "LOST_ITEM");
        assert_eq!(QueueName::Booking.to_string(), "BOOKING");
        assert_eq!(QueueName::from_str("SEARCH").unwrap(), QueueName::Search);
        assert_eq!(QueueName::from_str("MANUAL").unwrap(), QueueName::Manual);
        assert!(QueueName::from_str("booking").is_err());
    }
}
