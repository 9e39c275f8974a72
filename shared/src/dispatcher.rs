use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::bus::MessageBus;
use crate::clock::Clock;
use crate::error::StoreError;
use crate::outbox::{OutboxRow, OutboxStore};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Time between scheduled scans.
    pub interval: Duration,
    /// Minimum age of a row before it is picked up.
    pub debounce: Duration,
    /// Age past which a still-unpublished row is alerted on.
    pub max_age: Duration,
    /// How long published rows are kept.
    pub retention: Duration,
    pub purge_interval: Duration,
    pub batch_size: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            debounce: Duration::from_millis(100),
            max_age: Duration::from_secs(300),
            retention: Duration::from_secs(24 * 60 * 60),
            purge_interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub published: usize,
    pub failed: usize,
    pub stale: u64,
}

/// Publishes STARTED outbox rows and marks them COMPLETED on acknowledgement.
///
/// A row whose publish fails stays STARTED and is picked up again on the next
/// pass. Re-publishing is always safe because every consumer is gated by the
/// idempotency guard.
pub struct OutboxDispatcher<O, B> {
    outbox: O,
    bus: B,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
    wake: Arc<Notify>,
}

impl<O, B> OutboxDispatcher<O, B>
where
    O: OutboxStore,
    B: MessageBus,
{
    pub fn new(outbox: O, bus: B, clock: Arc<dyn Clock>, settings: DispatchSettings) -> Self {
        Self {
            outbox,
            bus,
            clock,
            settings,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Handle that local commits use to trigger an early scan.
    pub fn notifier(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.settings.interval);
        let mut purge = time::interval(self.settings.purge_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.wake.notified() => {
                    time::sleep(self.settings.debounce).await;
                }
                _ = purge.tick() => {
                    if let Err(e) = self.purge_published().await {
                        error!("Error purging outbox: {}", e);
                    }
                    continue;
                }
            }

            if let Err(e) = self.dispatch_pending().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    pub async fn dispatch_pending(&self) -> Result<DispatchReport, StoreError> {
        let now = self.clock.now();
        let rows = self
            .outbox
            .pending_rows(window_start(now, self.settings.debounce), self.settings.batch_size)
            .await?;

        let mut report = DispatchReport::default();
        for row in rows {
            if let Err(e) = self.publish_row(&row).await {
                warn!(saga_id = %row.saga_id, attempts = row.attempts + 1, "Failed to publish outbox row {}: {}", row.id, e);
                self.outbox.record_failed_attempt(row.id).await?;
                report.failed += 1;
                continue;
            }

            if self.outbox.mark_published(row.id, self.clock.now()).await? {
                info!(saga_id = %row.saga_id, topic = row.topic(), "Published outbox row: {}", row.id);
            } else {
                debug!("Outbox row {} was already completed", row.id);
            }
            report.published += 1;
        }

        report.stale = self
            .outbox
            .count_stale(window_start(now, self.settings.max_age))
            .await?;
        if report.stale > 0 {
            error!(
                alert = "outbox_stale",
                stale = report.stale,
                max_age = ?self.settings.max_age,
                "Outbox rows still unpublished past max age"
            );
        }

        Ok(report)
    }

    pub async fn purge_published(&self) -> Result<u64, StoreError> {
        let cutoff = window_start(self.clock.now(), self.settings.retention);
        let purged = self.outbox.purge_published(cutoff).await?;
        if purged > 0 {
            info!("Purged {} published outbox rows", purged);
        }
        Ok(purged)
    }

    async fn publish_row(&self, row: &OutboxRow) -> Result<(), crate::error::BusError> {
        let payload = row.payload.to_string();
        let key = row.saga_id.to_string();
        self.bus.publish(row.topic(), &key, &payload).await
    }
}

fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::clock::ManualClock;
    use crate::outbox::{MemoryOutbox, OutboxStatus};
    use crate::{topics, OrderStatus, OrderStatusEvent};
    use uuid::Uuid;

    fn settings() -> DispatchSettings {
        DispatchSettings {
            debounce: Duration::ZERO,
            max_age: Duration::from_secs(60),
            retention: Duration::from_secs(3600),
            ..DispatchSettings::default()
        }
    }

    async fn seed(outbox: &MemoryOutbox, clock: &ManualClock) -> OutboxRow {
        let event = OrderStatusEvent {
            id: Uuid::new_v4(),
            saga_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            tracking_id: Uuid::new_v4(),
            order_status: OrderStatus::Pending,
            failure_messages: vec![],
            created_at: clock.now(),
        };
        let row = OutboxRow::from_message(&event, "Order", clock.now()).unwrap();
        outbox.lock().await.insert_all(vec![row.clone()]);
        row
    }

    #[tokio::test]
    async fn publishes_keyed_by_saga_and_completes_the_row() {
        let outbox = MemoryOutbox::new();
        let bus = InMemoryBus::new();
        let clock = Arc::new(ManualClock::default());
        let row = seed(&outbox, &clock).await;
        let dispatcher = OutboxDispatcher::new(outbox.clone(), bus.clone(), clock.clone(), settings());

        let report = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!(report, DispatchReport { published: 1, failed: 0, stale: 0 });

        let deliveries = bus.deliveries().await;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].topic, topics::ORDER_EVENTS);
        assert_eq!(deliveries[0].key, row.saga_id.to_string());
        let rows = outbox.rows().await;
        assert_eq!(rows[0].outbox_status, OutboxStatus::Completed);
        assert_eq!(rows[0].processed_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn debounce_holds_back_fresh_rows() {
        let outbox = MemoryOutbox::new();
        let bus = InMemoryBus::new();
        let clock = Arc::new(ManualClock::default());
        seed(&outbox, &clock).await;
        let dispatcher = OutboxDispatcher::new(
            outbox.clone(),
            bus.clone(),
            clock.clone(),
            DispatchSettings {
                debounce: Duration::from_secs(1),
                ..settings()
            },
        );

        assert_eq!(dispatcher.dispatch_pending().await.unwrap().published, 0);
        clock.advance(chrono::Duration::seconds(2));
        assert_eq!(dispatcher.dispatch_pending().await.unwrap().published, 1);
    }

    #[tokio::test]
    async fn failed_publish_is_retried_and_alerted_when_stale() {
        let outbox = MemoryOutbox::new();
        let bus = InMemoryBus::new();
        let clock = Arc::new(ManualClock::default());
        seed(&outbox, &clock).await;
        let dispatcher = OutboxDispatcher::new(outbox.clone(), bus.clone(), clock.clone(), settings());

        bus.fail_next(2).await;
        let first = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!((first.published, first.failed, first.stale), (0, 1, 0));

        clock.advance(chrono::Duration::seconds(120));
        let second = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!((second.published, second.failed, second.stale), (0, 1, 1));
        assert_eq!(outbox.rows().await[0].attempts, 2);

        let third = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!(third, DispatchReport { published: 1, failed: 0, stale: 0 });
        assert_eq!(bus.deliveries().await.len(), 1);
    }

    #[tokio::test]
    async fn purge_respects_retention() {
        let outbox = MemoryOutbox::new();
        let bus = InMemoryBus::new();
        let clock = Arc::new(ManualClock::default());
        seed(&outbox, &clock).await;
        let dispatcher = OutboxDispatcher::new(outbox.clone(), bus, clock.clone(), settings());

        dispatcher.dispatch_pending().await.unwrap();
        assert_eq!(dispatcher.purge_published().await.unwrap(), 0);
        clock.advance(chrono::Duration::hours(2));
        assert_eq!(dispatcher.purge_published().await.unwrap(), 1);
        assert!(outbox.rows().await.is_empty());
    }
}
