//! Loads customer credit balances from a JSON list of
//! `{"customer_id": ..., "total_credit": ...}` entries.

use anyhow::{Context, Result};
use tracing::info;

use crate::domain::CreditEntry;
use crate::repository::PaymentRepository;

/// Upserts every entry in `raw`; existing balances are overwritten.
pub async fn load_credits<R: PaymentRepository + ?Sized>(store: &R, raw: &str) -> Result<usize> {
    let entries: Vec<CreditEntry> = serde_json::from_str(raw).context("parsing credit entries")?;

    for entry in &entries {
        store.upsert_credit(entry).await?;
        info!(customer_id = %entry.customer_id, "Loaded credit {}", entry.total_credit);
    }
    Ok(entries.len())
}
