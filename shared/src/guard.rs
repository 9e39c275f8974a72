//! Idempotent consumption guard.
//!
//! Every incoming saga message is gated before it reaches an aggregate. The
//! read-side decision ([`Expectation::admit`]) filters duplicates and
//! reordered messages cheaply; the write-side decision ([`Admission::settle`])
//! folds a uniqueness violation or a lost compare-and-set from the atomic
//! commit into [`Admission::AlreadyProcessed`], which is what makes two
//! concurrent deliveries of the same message safe.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    AlreadyProcessed,
    OutOfOrder,
}

/// What a service has recorded for a saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recorded<S> {
    pub status: S,
    pub last_event_id: Option<Uuid>,
}

impl<S> Recorded<S> {
    pub fn new(status: S) -> Self {
        Self {
            status,
            last_event_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Expectation<'a, S> {
    /// Statuses the record must be in for the message to apply.
    pub from: &'a [S],
    /// Statuses the message itself leads to.
    pub produces: &'a [S],
    /// Decision when the service holds no record for the saga.
    pub when_absent: Admission,
}

impl<S: PartialEq> Expectation<'_, S> {
    pub fn admit(&self, recorded: Option<&Recorded<S>>, event_id: Uuid) -> Admission {
        let Some(recorded) = recorded else {
            return self.when_absent;
        };
        if recorded.last_event_id == Some(event_id) || self.produces.contains(&recorded.status) {
            Admission::AlreadyProcessed
        } else if self.from.contains(&recorded.status) {
            Admission::Accepted
        } else {
            Admission::OutOfOrder
        }
    }
}

impl Admission {
    /// Interprets the outcome of the atomic "mutate + insert outbox row" unit.
    pub fn settle(commit: Result<(), StoreError>) -> Result<Admission, StoreError> {
        match commit {
            Ok(()) => Ok(Admission::Accepted),
            Err(err) if err.is_duplicate() => {
                debug!("commit lost to a concurrent delivery: {}", err);
                Ok(Admission::AlreadyProcessed)
            }
            Err(err) => Err(err),
        }
    }

    pub fn is_accepted(self) -> bool {
        self == Admission::Accepted
    }

    /// Logs a skipped message at the level its kind deserves.
    pub fn log_skip(self, saga_id: Uuid, message: &str) {
        match self {
            Admission::Accepted => {}
            Admission::AlreadyProcessed => {
                debug!(%saga_id, "{} already processed, skipping", message)
            }
            Admission::OutOfOrder => {
                warn!(%saga_id, "{} arrived out of order, dropping", message)
            }
        }
    }
}
