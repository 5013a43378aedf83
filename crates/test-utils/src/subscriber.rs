use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use watchrun::expression::Expression;
use watchrun::types::ChangeEvent;
use watchrun::watch::ChangeSubscriber;

/// A change subscriber that just records every delivered batch.
pub struct RecordingSubscriber {
    name: String,
    expression: Expression,
    batches: Mutex<Vec<Vec<ChangeEvent>>>,
    delivered: Notify,
}

impl RecordingSubscriber {
    pub fn new(name: &str, expression: Expression) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            expression,
            batches: Mutex::new(Vec::new()),
            delivered: Notify::new(),
        })
    }

    pub fn batches(&self) -> Vec<Vec<ChangeEvent>> {
        self.batches.lock().unwrap().clone()
    }

    /// Wait until at least `n` batches were delivered.
    pub async fn wait_for_batches(&self, n: usize) {
        loop {
            let notified = self.delivered.notified();
            if self.batches.lock().unwrap().len() >= n {
                return;
            }
            let _ = tokio::time::timeout(Duration::from_millis(50), notified).await;
        }
    }
}

impl ChangeSubscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn expression(&self) -> &Expression {
        &self.expression
    }

    fn deliver(&self, events: Vec<ChangeEvent>) {
        self.batches.lock().unwrap().push(events);
        self.delivered.notify_waiters();
    }
}
