use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{BrokerError, Consumer, Delivery, MessageBroker, QueueName};

/// In-process broker with the same delivery contract as [`super::RedisBroker`].
///
/// Dropping a consumer that still holds an unacked delivery puts the message
/// back at the head of its queue, which is how a dead consumer looks to the
/// rest of the pipeline.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    published: Notify,
}

#[derive(Default)]
struct State {
    // (exchange, routing key)
    bindings: HashSet<(String, String)>,
    queues: HashMap<QueueName, VecDeque<Vec<u8>>>,
    next_tag: u64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of ready messages on a queue, head first.
    pub fn messages(&self, queue: QueueName) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .queues
            .get(&queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn declare_topology(&self, exchange: &str) -> Result<(), BrokerError> {
        let mut state = self.inner.lock();
        for queue in QueueName::ALL {
            state.queues.entry(queue).or_default();
            state
                .bindings
                .insert((exchange.to_string(), queue.routing_key()));
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.inner.lock();
            let bound = state
                .bindings
                .contains(&(exchange.to_string(), routing_key.to_string()));
            let queue = routing_key.parse::<QueueName>().ok().filter(|_| bound);
            let Some(queue) = queue else {
                return Err(BrokerError::Unroutable {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                });
            };
            state.queues.entry(queue).or_default().push_back(body.to_vec());
        }
        self.inner.published.notify_waiters();
        Ok(())
    }

    async fn consumer(&self, queue: QueueName) -> Result<Box<dyn Consumer>, BrokerError> {
        Ok(Box::new(MemoryConsumer {
            inner: Arc::clone(&self.inner),
            queue,
            unacked: None,
        }))
    }

    async fn queue_depth(&self, queue: QueueName) -> Result<u64, BrokerError> {
        Ok(self
            .inner
            .lock()
            .queues
            .get(&queue)
            .map_or(0, |q| q.len() as u64))
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

struct MemoryConsumer {
    inner: Arc<Inner>,
    queue: QueueName,
    unacked: Option<(u64, Vec<u8>)>,
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn next_delivery(&mut self) -> Result<Delivery, BrokerError> {
        if self.unacked.is_some() {
            return Err(BrokerError::PrefetchExceeded);
        }

        loop {
            let notified = self.inner.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.lock();
                let body = state.queues.get_mut(&self.queue).and_then(VecDeque::pop_front);
                if let Some(body) = body {
                    state.next_tag += 1;
                    let tag = state.next_tag;
                    self.unacked = Some((tag, body.clone()));
                    return Ok(Delivery {
                        tag,
                        queue: self.queue,
                        body,
                    });
                }
            }

            notified.await;
        }
    }

    async fn ack(&mut self, delivery: Delivery) -> Result<(), BrokerError> {
        match &self.unacked {
            Some((tag, _)) if *tag == delivery.tag => {
                self.unacked = None;
                Ok(())
            }
            _ => Err(BrokerError::UnknownDelivery(delivery.tag)),
        }
    }

    async fn requeue(&mut self, delivery: Delivery) -> Result<(), BrokerError> {
        let body = match self.unacked.take() {
            Some((tag, body)) if tag == delivery.tag => body,
            other => {
                self.unacked = other;
                return Err(BrokerError::UnknownDelivery(delivery.tag));
            }
        };
        self.inner
            .lock()
            .queues
            .entry(self.queue)
            .or_default()
            .push_front(body);
        self.inner.published.notify_waiters();
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        if let Some((_, body)) = self.unacked.take() {
            self.inner
                .lock()
                .queues
                .entry(self.queue)
                .or_default()
                .push_front(body);
            self.inner.published.notify_waiters();
        }
    }
}
