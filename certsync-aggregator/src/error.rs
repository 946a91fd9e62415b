//! Error types for certsync-aggregator.

use thiserror::Error;

/// Errors surfaced by ledgers and the broadcast hub.
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// The hub's inbound queue is closed; the round's change event was dropped.
    #[error("broadcast hub has shut down; update from \"{ledger}\" was not delivered")]
    HubClosed { ledger: String },
}
