//! # certsync-aggregator
//!
//! Change tracking and fan-out.
//!
//! Each importer owns a [`CertificateLedger`] that turns full-set polls into
//! added/removed diffs; every non-empty diff is relayed to the single
//! [`BroadcastHub`], which delivers it to every [`Subscription`] in arrival
//! order.

pub mod error;
pub mod hub;
pub mod ledger;
pub mod relay;

pub use error::AggregatorError;
pub use hub::{BroadcastHub, HubWorker, Subscription};
pub use ledger::{CertificateLedger, Round};
pub use relay::{EventReceiver, EventSender};
