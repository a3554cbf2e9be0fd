use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::broadcast::{Broadcaster, Topic};
use crate::ingest::types::FilingRecord;

/// One topic publication travelling through the hub.
#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub record: Arc<FilingRecord>,
}

/// In-process pub/sub: publishers send `(topic, record)` messages, every subscriber
/// sees all of them and filters by the rooms it joined.
#[derive(Clone)]
pub struct Hub {
    tx: broadcast::Sender<Published>,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Broadcaster for Hub {
    async fn publish(&self, topic: &Topic, record: &FilingRecord) -> Result<()> {
        let msg = Published {
            topic: topic.to_string(),
            record: Arc::new(record.clone()),
        };
        // No receivers just means nobody is connected right now.
        if self.tx.send(msg).is_err() {
            tracing::debug!(topic = %topic, "no subscribers for publication");
        }
        Ok(())
    }
}
