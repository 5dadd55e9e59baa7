use std::sync::Arc;

use crate::services::{producer::Producer, queue::Broker, status::StatusStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub producer: Arc<Producer>,
    pub store: Arc<dyn StatusStore>,
    pub queue: Arc<dyn Broker>,
}

impl AppState {
    pub fn new(producer: Producer, store: Arc<dyn StatusStore>, queue: Arc<dyn Broker>) -> Self {
        Self {
            producer: Arc::new(producer),
            store,
            queue,
        }
    }
}
