use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Message, Offset};
use serde::de::DeserializeOwned;
use tokio::time;
use tracing::{error, info, warn};

use crate::error::ServiceError;
use crate::guard::Admission;

/// Subscription seam: the core never sees the broker, only topic and payload.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: &str) -> Result<Admission, ServiceError>;
}

pub fn decode<T: DeserializeOwned>(topic: &str, payload: &str) -> Result<T, ServiceError> {
    serde_json::from_str(payload).map_err(|source| ServiceError::Decode {
        topic: topic.to_string(),
        source,
    })
}

/// Runs `handler` under a timeout and decides whether the message must come again.
pub async fn deliver<H: MessageHandler + ?Sized>(
    handler: &H,
    topic: &str,
    payload: &str,
    timeout: Duration,
) -> bool {
    let outcome = match time::timeout(timeout, handler.handle(topic, payload)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ServiceError::Timeout(timeout)),
    };

    match outcome {
        Ok(_) => false,
        Err(e) if e.is_retryable() => {
            warn!(topic, "Transient failure, message will be redelivered: {}", e);
            true
        }
        Err(e) => {
            error!(topic, "Dropping message that cannot be applied: {}", e);
            false
        }
    }
}

/// Consumes `consumer` sequentially, committing each offset once the message is settled.
///
/// Messages that fail transiently are not committed; the consumer seeks back
/// to them so the broker hands them out again.
pub async fn consume<H: MessageHandler + ?Sized>(
    consumer: StreamConsumer,
    handler: &H,
    timeout: Duration,
    redelivery_backoff: Duration,
) {
    let mut message_stream = consumer.stream();

    while let Some(message) = message_stream.next().await {
        match message {
            Ok(m) => {
                let redeliver = match m.payload_view::<str>() {
                    Some(Ok(json_str)) => deliver(handler, m.topic(), json_str, timeout).await,
                    Some(Err(e)) => {
                        error!("Error parsing payload: {}", e);
                        false
                    }
                    None => false,
                };

                if redeliver {
                    time::sleep(redelivery_backoff).await;
                    if let Err(e) = consumer.seek(m.topic(), m.partition(), Offset::Offset(m.offset()), timeout) {
                        error!("Error rewinding to offset {}: {}", m.offset(), e);
                    }
                    continue;
                }

                if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                    error!("Error committing message: {}", e);
                }
            }
            Err(e) => error!("Error receiving message: {}", e),
        }
    }

    info!("Consumer stream ended");
}
