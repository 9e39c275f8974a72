use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tokio::sync::Mutex;

use crate::error::BusError;

/// Publishing side of the message bus: at-least-once, ordered per key.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), BusError>;
}

#[async_trait]
impl<T: MessageBus + ?Sized> MessageBus for Arc<T> {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), BusError> {
        (**self).publish(topic, key, payload).await
    }
}

#[derive(Clone)]
pub struct KafkaBus {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaBus {
    pub fn new(producer: FutureProducer, timeout: Duration) -> Self {
        Self { producer, timeout }
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), BusError> {
        let record = FutureRecord::to(topic).payload(payload).key(key);

        self.producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| BusError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub key: String,
    pub payload: String,
}

#[derive(Debug, Default)]
struct BusState {
    deliveries: Vec<Delivery>,
    attempts: usize,
    fail_next: usize,
    lose_ack_next: usize,
}

/// Bus that keeps deliveries in memory, with failure injection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` publishes fail without delivering anything.
    pub async fn fail_next(&self, n: usize) {
        self.state.lock().await.fail_next = n;
    }

    /// The next `n` publishes deliver but report failure, as if the ack was lost.
    pub async fn lose_acks(&self, n: usize) {
        self.state.lock().await.lose_ack_next = n;
    }

    pub async fn attempts(&self) -> usize {
        self.state.lock().await.attempts
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.state.lock().await.deliveries.clone()
    }

    /// Removes and returns everything delivered to `topic`.
    pub async fn drain(&self, topic: &str) -> Vec<Delivery> {
        let mut state = self.state.lock().await;
        let (taken, kept) = std::mem::take(&mut state.deliveries)
            .into_iter()
            .partition(|d| d.topic == topic);
        state.deliveries = kept;
        taken
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), BusError> {
        let mut state = self.state.lock().await;
        state.attempts += 1;

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(BusError::Publish {
                topic: topic.to_string(),
                reason: "broker unreachable".to_string(),
            });
        }

        state.deliveries.push(Delivery {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_string(),
        });

        if state.lose_ack_next > 0 {
            state.lose_ack_next -= 1;
            return Err(BusError::Publish {
                topic: topic.to_string(),
                reason: "acknowledgement timed out".to_string(),
            });
        }

        Ok(())
    }
}
