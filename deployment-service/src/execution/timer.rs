// Transaction Tracking Timer
// Measures how long each submitted transaction has been outstanding

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Tracks, per transaction hash, when this process first saw the transaction.
///
/// Transactions recovered from the journal start being tracked on the first
/// poll after a restart.
#[derive(Debug, Default)]
pub struct TransactionTrackingTimer {
    started: HashMap<String, Instant>,
}

impl TransactionTrackingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transaction(&mut self, hash: &str) {
        self.started
            .entry(hash.to_string())
            .or_insert_with(Instant::now);
    }

    /// Time since the transaction started being tracked
    pub fn tracking_time(&mut self, hash: &str) -> Duration {
        self.add_transaction(hash);
        self.started
            .get(hash)
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }
}
