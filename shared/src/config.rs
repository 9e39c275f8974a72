use std::time::Duration;

use clap::Args;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::StreamConsumer;
use rdkafka::error::KafkaResult;
use rdkafka::producer::FutureProducer;

use crate::dispatcher::DispatchSettings;

#[derive(Debug, Clone, Args)]
pub struct KafkaArgs {
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    pub kafka_brokers: String,

    #[arg(long, env = "PUBLISH_TIMEOUT_MS", default_value_t = 5000)]
    pub publish_timeout_ms: u64,

    /// Upper bound for one message handler's atomic unit of work.
    #[arg(long, env = "HANDLER_TIMEOUT_MS", default_value_t = 10_000)]
    pub handler_timeout_ms: u64,

    #[arg(long, env = "REDELIVERY_BACKOFF_MS", default_value_t = 1000)]
    pub redelivery_backoff_ms: u64,
}

impl KafkaArgs {
    pub fn producer(&self) -> KafkaResult<FutureProducer> {
        ClientConfig::new()
            .set("bootstrap.servers", &self.kafka_brokers)
            .set("message.timeout.ms", self.publish_timeout_ms.to_string())
            .set("enable.idempotence", "true")
            .create()
    }

    /// Offsets are committed by hand once a message is settled.
    pub fn consumer(&self, group_id: &str) -> KafkaResult<StreamConsumer> {
        ClientConfig::new()
            .set("group.id", group_id)
            .set("bootstrap.servers", &self.kafka_brokers)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn redelivery_backoff(&self) -> Duration {
        Duration::from_millis(self.redelivery_backoff_ms)
    }
}

#[derive(Debug, Clone, Args)]
pub struct DispatcherArgs {
    #[arg(long, env = "OUTBOX_INTERVAL_MS", default_value_t = 5000)]
    pub outbox_interval_ms: u64,

    #[arg(long, env = "OUTBOX_DEBOUNCE_MS", default_value_t = 100)]
    pub outbox_debounce_ms: u64,

    #[arg(long, env = "OUTBOX_MAX_AGE_SECS", default_value_t = 300)]
    pub outbox_max_age_secs: u64,

    #[arg(long, env = "OUTBOX_RETENTION_SECS", default_value_t = 86_400)]
    pub outbox_retention_secs: u64,

    #[arg(long, env = "OUTBOX_PURGE_INTERVAL_SECS", default_value_t = 60)]
    pub outbox_purge_interval_secs: u64,

    #[arg(long, env = "OUTBOX_BATCH_SIZE", default_value_t = 100)]
    pub outbox_batch_size: usize,
}

impl From<&DispatcherArgs> for DispatchSettings {
    fn from(args: &DispatcherArgs) -> Self {
        DispatchSettings {
            interval: Duration::from_millis(args.outbox_interval_ms),
            debounce: Duration::from_millis(args.outbox_debounce_ms),
            max_age: Duration::from_secs(args.outbox_max_age_secs),
            retention: Duration::from_secs(args.outbox_retention_secs),
            purge_interval: Duration::from_secs(args.outbox_purge_interval_secs),
            batch_size: args.outbox_batch_size,
        }
    }
}
