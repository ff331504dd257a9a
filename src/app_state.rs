use std::sync::Arc;

use crate::db::JobStore;
use crate::services::{
    broker::MessageBroker, status::JobStatusAggregator, submitter::JobSubmitter,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub broker: Arc<dyn MessageBroker>,
    pub submitter: Arc<JobSubmitter>,
    pub aggregator: Arc<JobStatusAggregator>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, broker: Arc<dyn MessageBroker>, exchange: &str) -> Self {
        Self {
            submitter: Arc::new(JobSubmitter::new(store.clone(), broker.clone(), exchange)),
            aggregator: Arc::new(JobStatusAggregator::new(store.clone())),
            store,
            broker,
        }
    }
}
