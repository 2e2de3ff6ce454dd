use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::engine::BookingLedger;

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(ledger: Arc<BookingLedger>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        compact_if_due(&ledger, threshold).await;
    }
}

/// Compact when appends since the last compaction reach `threshold`.
/// Returns whether a compaction ran.
pub async fn compact_if_due(ledger: &BookingLedger, threshold: u64) -> bool {
    let appends = ledger.wal_appends_since_compact().await;
    if appends < threshold.max(1) {
        return false;
    }
    match ledger.compact().await {
        Ok(()) => {
            info!("compaction after {appends} appends");
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            true
        }
        Err(e) => {
            error!("compaction failed: {e}");
            false
        }
    }
}
