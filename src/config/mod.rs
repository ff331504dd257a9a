use serde::Deserialize;
use std::time::Duration;

use crate::services::broker::{QueueName, RedisBrokerSettings};

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the message broker
    pub redis_url: String,

    /// Direct exchange every queue is bound to
    #[serde(default = "default_exchange_name")]
    pub exchange_name: String,

    /// Comma-separated queues the worker binary consumes, one consumer each
    #[serde(default = "default_worker_queues")]
    pub worker_queues: String,

    /// Per-message handler deadline; unset means no deadline
    pub handler_timeout_secs: Option<u64>,

    /// Seconds without a heartbeat before a consumer's in-flight message is redelivered
    #[serde(default = "default_consumer_stale_secs")]
    pub consumer_stale_secs: u64,

    #[serde(default = "default_broker_max_reconnect_attempts")]
    pub broker_max_reconnect_attempts: u32,

    /// Prometheus listener for the worker (e.g., "0.0.0.0:9100")
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_exchange_name() -> String {
    "jobs".to_string()
}

fn default_worker_queues() -> String {
    "BOOKING,SEARCH,MANUAL".to_string()
}

fn default_consumer_stale_secs() -> u64 {
    60
}

fn default_broker_max_reconnect_attempts() -> u32 {
    8
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Queues to consume. LOST_ITEM is only ever drained by hand.
    pub fn worker_queues(&self) -> Result<Vec<QueueName>, ConfigError> {
        let mut queues = Vec::new();
        for name in self.worker_queues.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let queue: QueueName = name
                .parse()
                .map_err(|_| ConfigError::UnknownQueue(name.to_string()))?;
            if queue == QueueName::LostItem {
                return Err(ConfigError::DeadLetterQueue);
            }
            if !queues.contains(&queue) {
                queues.push(queue);
            }
        }
        if queues.is_empty() {
            return Err(ConfigError::NoQueues);
        }
        Ok(queues)
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_secs.map(Duration::from_secs)
    }

    pub fn broker_settings(&self) -> RedisBrokerSettings {
        RedisBrokerSettings {
            stale_after: Duration::from_secs(self.consumer_stale_secs),
            max_reconnect_attempts: self.broker_max_reconnect_attempts,
            ..RedisBrokerSettings::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown queue '{0}'")]
    UnknownQueue(String),

    #[error("LOST_ITEM is a dead-letter queue and is not consumed by workers")]
    DeadLetterQueue,

    #[error("No worker queues configured")]
    NoQueues,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(worker_queues: &str) -> AppConfig {
        AppConfig {
            bind_addr: default_bind_addr(),
            database_url: "postgres://localhost/jobs".to_string(),
            redis_url: "redis://localhost".to_string(),
            exchange_name: default_exchange_name(),
            worker_queues: worker_queues.to_string(),
            handler_timeout_secs: None,
            consumer_stale_secs: default_consumer_stale_secs(),
            broker_max_reconnect_attempts: default_broker_max_reconnect_attempts(),
            worker_metrics_addr: None,
        }
    }

    #[test]
    fn test_default_worker_queues() {
        let queues = config(&default_worker_queues()).worker_queues().unwrap();
        assert_eq!(queues, vec![QueueName::Booking, QueueName::Search, QueueName::Manual]);
    }

    #[test]
    fn test_worker_queues_are_trimmed_and_deduplicated() {
        let queues = config(" BOOKING , BOOKING,SEARCH ").worker_queues().unwrap();
        assert_eq!(queues, vec![QueueName::Booking, QueueName::Search]);
    }

    #[test]
    fn test_lost_item_is_not_consumable() {
        assert!(matches!(
            config("BOOKING,LOST_ITEM").worker_queues(),
            Err(ConfigError::DeadLetterQueue)
        ));
    }

    #[test]
    fn test_unknown_and_empty_queue_lists() {
        assert!(matches!(config("ORDERS").worker_queues(), Err(ConfigError::UnknownQueue(_))));
        assert!(matches!(config(" , ").worker_queues(), Err(ConfigError::NoQueues)));
    }

    #[test]
    fn test_from_env_style_deserialization_applies_defaults() {
        let vars = vec![
            ("DATABASE_URL".to_string(), "postgres://db/jobs".to_string()),
            ("REDIS_URL".to_string(), "redis://cache".to_string()),
            ("HANDLER_TIMEOUT_SECS".to_string(), "30".to_string()),
        ];
        let config: AppConfig = envy::from_iter(vars).unwrap();

        assert_eq!(config.exchange_name, "jobs");
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.handler_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.broker_settings().stale_after, Duration::from_secs(60));
    }
}
