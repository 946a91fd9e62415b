//! Per-importer certificate ledger.
//!
//! ## Round protocol
//!
//! 1. [`CertificateLedger::begin_round`] takes the ledger lock for the whole
//!    round.
//! 2. [`Round::confirm`] marks a certificate as still present, or stages it
//!    as added when it is new or its content changed.
//! 3. [`Round::sweep`] stages every unmarked entry as removed.
//! 4. [`Round::end`] emits a [`ChangeEvent`] when the diff is non-empty (this
//!    may wait on the relay queue), commits the staged changes once the relay
//!    has accepted the event and releases the lock.
//!
//! Importers therefore only ever report the full current set; removals fall
//! out of the sweep. A round that never completes `end` (dropped, cancelled
//! while blocked on the relay, or refused by a closed hub) leaves the ledger
//! exactly as it was, so the next round reports the same changes again.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use certsync_core::{CertificateId, CertificatePackage, ChangeEvent, Diff};

use crate::error::AggregatorError;
use crate::relay::EventSender;

#[derive(Debug, Default)]
struct LedgerState {
    entries: HashMap<CertificateId, CertificatePackage>,
    /// Diff of the last committed round.
    diff: Diff,
}

struct LedgerInner {
    name: String,
    state: Mutex<LedgerState>,
    relay: EventSender,
}

/// Authoritative set of certificates currently reported by one source.
///
/// Cloning yields another handle to the same ledger.
#[derive(Clone)]
pub struct CertificateLedger {
    inner: Arc<LedgerInner>,
}

impl fmt::Debug for CertificateLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .inner
            .state
            .try_lock()
            .map(|state| state.entries.len())
            .ok();
        f.debug_struct("CertificateLedger")
            .field("name", &self.inner.name)
            .field("entries", &entries)
            .finish()
    }
}

impl CertificateLedger {
    /// Create an empty ledger that emits its change events into `relay`.
    pub fn new(name: impl Into<String>, relay: EventSender) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                name: name.into(),
                state: Mutex::new(LedgerState::default()),
                relay,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Start a reconciliation round, waiting for any round in progress.
    pub async fn begin_round(&self) -> Round<'_> {
        let state = self.inner.state.lock().await;
        tracing::trace!(ledger = %self.inner.name, "round started");
        Round {
            ledger: &self.inner,
            state,
            confirmed: HashSet::new(),
            evicted: HashSet::new(),
            diff: Diff::default(),
        }
    }

    /// The diff of the most recent round that was committed.
    pub async fn diff(&self) -> Diff {
        self.inner.state.lock().await.diff.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, id: &CertificateId) -> bool {
        self.inner.state.lock().await.entries.contains_key(id)
    }

    /// Snapshot of every tracked package, ordered by certificate id.
    pub async fn certificates(&self) -> Vec<CertificatePackage> {
        let state = self.inner.state.lock().await;
        let mut packages: Vec<_> = state.entries.values().cloned().collect();
        packages.sort_by(|a, b| a.id().cmp(b.id()));
        packages
    }
}

/// An open reconciliation round. Holds the ledger lock until dropped or
/// [`ended`](Round::end).
///
/// Changes are staged on the round and only reach the ledger when `end`
/// succeeds; dropping a round discards them.
pub struct Round<'a> {
    ledger: &'a LedgerInner,
    state: MutexGuard<'a, LedgerState>,
    confirmed: HashSet<CertificateId>,
    evicted: HashSet<CertificateId>,
    diff: Diff,
}

impl fmt::Debug for Round<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Round")
            .field("ledger", &self.ledger.name)
            .field("added", &self.diff.added.len())
            .field("removed", &self.diff.removed.len())
            .finish()
    }
}

impl Round<'_> {
    /// Confirm that `package` is currently valid at the source.
    ///
    /// Returns `true` when the package is new to the ledger (or replaces an
    /// entry with the same id but different leaf bytes) and was staged as
    /// added; `false` when it was already known.
    pub fn confirm(&mut self, package: CertificatePackage) -> bool {
        let id = package.id().clone();

        if let Some(staged) = self.diff.added.iter_mut().find(|p| p.id() == &id) {
            if staged.certificate.same_content(&package.certificate) {
                return false;
            }
            *staged = package;
            return true;
        }

        if self.evicted.remove(&id) {
            self.diff.removed.retain(|p| p.id() != &id);
        }
        self.confirmed.insert(id.clone());

        match self.state.entries.get(&id) {
            Some(known) if known.certificate.same_content(&package.certificate) => false,
            Some(_) => {
                // Same id, new content: replaced on commit, reported as an add only.
                tracing::debug!(ledger = %self.ledger.name, certificate = %id, "replacing certificate with new content");
                self.diff.added.push(package);
                true
            }
            None => {
                self.diff.added.push(package);
                true
            }
        }
    }

    /// Stage every entry not confirmed during this round as removed.
    ///
    /// Returns the number of entries newly staged for eviction.
    pub fn sweep(&mut self) -> usize {
        let mut stale: Vec<&CertificateId> = self
            .state
            .entries
            .keys()
            .filter(|id| !self.confirmed.contains(*id) && !self.evicted.contains(*id))
            .collect();
        stale.sort();

        let mut swept = 0;
        for id in stale {
            if let Some(package) = self.state.entries.get(id) {
                tracing::trace!(ledger = %self.ledger.name, certificate = %id, "sweeping certificate");
                self.diff.removed.push(package.clone());
                self.evicted.insert(id.clone());
                swept += 1;
            }
        }
        swept
    }

    /// The diff staged so far in this round.
    pub fn diff(&self) -> &Diff {
        &self.diff
    }

    /// Close the round, emitting a change event when anything changed.
    ///
    /// The ledger lock is held until the event has been accepted by the
    /// relay queue; only then are the staged changes applied. If this future
    /// is dropped early or the hub is gone, the ledger is left untouched.
    pub async fn end(self) -> Result<Option<Arc<ChangeEvent>>, AggregatorError> {
        let Round {
            ledger,
            mut state,
            diff,
            ..
        } = self;

        if diff.is_empty() {
            tracing::trace!(ledger = %ledger.name, "round ended without changes");
            state.diff = diff;
            return Ok(None);
        }

        let event = Arc::new(ChangeEvent::new(ledger.name.clone(), diff));
        tracing::debug!(
            ledger = %ledger.name,
            added = event.diff.added.len(),
            removed = event.diff.removed.len(),
            "round produced changes",
        );
        ledger
            .relay
            .send(Arc::clone(&event))
            .await
            .map_err(|_| AggregatorError::HubClosed {
                ledger: ledger.name.clone(),
            })?;

        for package in &event.diff.removed {
            state.entries.remove(package.id());
        }
        for package in &event.diff.added {
            state.entries.insert(package.id().clone(), package.clone());
        }
        state.diff = event.diff.clone();
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use certsync_core::Certificate;
    use rstest::rstest;

    use super::*;
    use crate::relay::{self, EventReceiver};

    fn package(serial: u64, content: u8) -> CertificatePackage {
        CertificatePackage::leaf(Certificate::from_parts(serial, vec![0x30, content], None))
    }

    fn ledger(capacity: usize) -> (CertificateLedger, EventReceiver) {
        let (tx, rx) = relay::channel(capacity);
        (CertificateLedger::new("vault", tx), rx)
    }

    fn ids(packages: &[CertificatePackage]) -> Vec<String> {
        packages.iter().map(|p| p.id().to_string()).collect()
    }

    #[tokio::test]
    async fn confirming_twice_in_one_round_adds_once() {
        let (ledger, mut rx) = ledger(4);
        let mut round = ledger.begin_round().await;
        assert!(round.confirm(package(1, 1)));
        assert!(!round.confirm(package(1, 1)));
        round.sweep();
        let event = round.end().await.expect("end").expect("event");

        assert_eq!(ids(&event.diff.added), vec!["01"]);
        assert!(event.diff.removed.is_empty());
        assert_eq!(rx.try_recv().expect("queued").diff, event.diff);
    }

    #[tokio::test]
    async fn unconfirmed_entries_are_swept_exactly_once() {
        let (ledger, _rx) = ledger(4);
        let mut round = ledger.begin_round().await;
        for serial in 1..=3 {
            round.confirm(package(serial, 0));
        }
        round.sweep();
        round.end().await.expect("end");

        let mut round = ledger.begin_round().await;
        round.confirm(package(2, 0));
        assert_eq!(round.sweep(), 2);
        assert_eq!(ids(&round.diff().removed), vec!["01", "03"]);
        assert!(round.diff().added.is_empty());
        round.end().await.expect("end");

        assert_eq!(ledger.len().await, 1);
        assert!(ledger.contains(&CertificateId::from(2u64)).await);
        assert!(!ledger.contains(&CertificateId::from(1u64)).await);
    }

    #[rstest]
    #[case::nothing_changes(&[1, 2], &[1, 2], &[], &[])]
    #[case::one_added(&[1], &[1, 2], &["02"], &[])]
    #[case::one_removed(&[1, 2], &[2], &[], &["01"])]
    #[case::full_turnover(&[1, 2], &[3], &["03"], &["01", "02"])]
    #[case::everything_removed(&[1, 2, 3], &[], &[], &["01", "02", "03"])]
    #[tokio::test]
    async fn second_round_diff(
        #[case] before: &[u64],
        #[case] after: &[u64],
        #[case] added: &[&str],
        #[case] removed: &[&str],
    ) {
        let (ledger, _rx) = ledger(4);
        let mut round = ledger.begin_round().await;
        for serial in before {
            round.confirm(package(*serial, 0));
        }
        round.sweep();
        round.end().await.expect("end");

        let mut round = ledger.begin_round().await;
        for serial in after {
            round.confirm(package(*serial, 0));
        }
        round.sweep();
        let mut got_added = ids(&round.diff().added);
        got_added.sort();
        assert_eq!(got_added, added);
        assert_eq!(ids(&round.diff().removed), removed);
        round.end().await.expect("end");
        assert_eq!(ledger.len().await, after.len());
    }

    #[tokio::test]
    async fn empty_round_on_empty_ledger_emits_nothing() {
        let (ledger, mut rx) = ledger(4);
        let mut round = ledger.begin_round().await;
        assert_eq!(round.sweep(), 0);
        assert!(round.end().await.expect("end").is_none());
        assert!(rx.try_recv().is_none());
        assert!(ledger.diff().await.is_empty());
    }

    #[tokio::test]
    async fn unchanged_round_emits_nothing() {
        let (ledger, mut rx) = ledger(4);
        for _ in 0..2 {
            let mut round = ledger.begin_round().await;
            round.confirm(package(7, 7));
            round.sweep();
            round.end().await.expect("end");
        }
        assert!(rx.try_recv().is_some(), "first round reports the add");
        assert!(rx.try_recv().is_none(), "second round is silent");
    }

    #[tokio::test]
    async fn changed_content_under_same_id_is_reported_as_add() {
        let (ledger, _rx) = ledger(4);
        let mut round = ledger.begin_round().await;
        round.confirm(package(5, 1));
        round.end().await.expect("end");

        let mut round = ledger.begin_round().await;
        assert!(round.confirm(package(5, 2)));
        assert_eq!(round.sweep(), 0);
        let event = round.end().await.expect("end").expect("event");
        assert_eq!(ids(&event.diff.added), vec!["05"]);
        assert!(event.diff.removed.is_empty());

        let stored = ledger.certificates().await;
        assert_eq!(stored[0].certificate.der(), &[0x30, 2]);
    }

    #[tokio::test]
    async fn abandoned_round_leaves_ledger_untouched() {
        let (ledger, mut rx) = ledger(4);
        {
            let mut round = ledger.begin_round().await;
            round.confirm(package(1, 1));
        }
        assert!(rx.try_recv().is_none());
        assert!(ledger.is_empty().await);

        let mut round = ledger.begin_round().await;
        assert!(round.diff().is_empty());
        assert!(round.confirm(package(1, 1)), "abandoned add is staged again");
    }

    #[tokio::test]
    async fn confirm_after_sweep_keeps_the_entry() {
        let (ledger, _rx) = ledger(4);
        let mut round = ledger.begin_round().await;
        round.confirm(package(1, 0));
        round.end().await.expect("end");

        let mut round = ledger.begin_round().await;
        assert_eq!(round.sweep(), 1);
        assert!(!round.confirm(package(1, 0)));
        assert!(round.diff().is_empty());
        assert!(round.end().await.expect("end").is_none());
        assert!(ledger.contains(&CertificateId::from(1u64)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn end_cancelled_on_full_relay_is_reported_by_next_round() {
        let (ledger, mut rx) = ledger(1);
        let mut round = ledger.begin_round().await;
        round.confirm(package(1, 0));
        round.sweep();
        round.end().await.expect("end");

        let mut round = ledger.begin_round().await;
        round.confirm(package(2, 0));
        round.sweep();
        let gave_up = tokio::time::timeout(Duration::from_millis(10), round.end()).await;
        assert!(gave_up.is_err(), "relay is full");
        rx.recv().await.expect("first event");
        assert!(ledger.contains(&CertificateId::from(1u64)).await);
        assert!(!ledger.contains(&CertificateId::from(2u64)).await);

        let mut round = ledger.begin_round().await;
        assert!(round.confirm(package(2, 0)));
        assert_eq!(round.sweep(), 1);
        let event = round.end().await.expect("end").expect("event");
        assert_eq!(ids(&event.diff.added), vec!["02"]);
        assert_eq!(ids(&event.diff.removed), vec!["01"]);
        assert_eq!(rx.try_recv().expect("queued").diff, event.diff);

        assert!(ledger.contains(&CertificateId::from(2u64)).await);
        assert!(!ledger.contains(&CertificateId::from(1u64)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn rounds_are_sequential() {
        let (ledger, _rx) = ledger(4);
        let round = ledger.begin_round().await;

        let other = ledger.clone();
        let waiter = tokio::spawn(async move {
            let round = other.begin_round().await;
            round.end().await.expect("end");
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "second round must wait for the first");
        round.end().await.expect("end");
        waiter.await.expect("join");
    }

    #[tokio::test(start_paused = true)]
    async fn end_waits_on_full_relay_while_holding_lock() {
        let (ledger, mut rx) = ledger(1);
        for serial in 1..=2 {
            let mut round = ledger.begin_round().await;
            round.confirm(package(serial, 0));
            round.sweep();
            if serial == 1 {
                round.end().await.expect("end");
                continue;
            }
            let pending = tokio::spawn({
                let ledger = ledger.clone();
                async move { ledger.len().await }
            });
            let end = round.end();
            tokio::pin!(end);
            let blocked = tokio::time::timeout(Duration::from_millis(50), &mut end).await;
            assert!(blocked.is_err(), "relay is full");
            assert!(!pending.is_finished(), "lock is still held");

            rx.recv().await.expect("drain first event");
            end.await.expect("end").expect("event");
            assert_eq!(pending.await.expect("join"), 1);
        }
    }

    #[tokio::test]
    async fn end_fails_when_hub_is_gone() {
        let (ledger, rx) = ledger(1);
        drop(rx);
        let mut round = ledger.begin_round().await;
        round.confirm(package(1, 0));
        let err = round.end().await.unwrap_err();
        assert!(matches!(err, AggregatorError::HubClosed { .. }));
        assert!(ledger.is_empty().await, "nothing committed without delivery");
    }

    #[tokio::test]
    async fn three_round_scenario() {
        let (ledger, mut rx) = ledger(8);
        let rounds: [&[u64]; 3] = [&[0xA, 0xB], &[0xA], &[0xA, 0xC]];
        for confirmed in rounds {
            let mut round = ledger.begin_round().await;
            for serial in confirmed {
                round.confirm(package(*serial, *serial as u8));
            }
            round.sweep();
            round.end().await.expect("end");
        }

        let first = rx.try_recv().expect("round 1");
        let second = rx.try_recv().expect("round 2");
        let third = rx.try_recv().expect("round 3");
        assert!(rx.try_recv().is_none());

        let mut added = ids(&first.diff.added);
        added.sort();
        assert_eq!(added, vec!["0A", "0B"]);
        assert!(first.diff.removed.is_empty());
        assert!(second.diff.added.is_empty());
        assert_eq!(ids(&second.diff.removed), vec!["0B"]);
        assert_eq!(ids(&third.diff.added), vec!["0C"]);
        assert!(third.diff.removed.is_empty());
        assert!([first, second, third].iter().all(|e| e.source == "vault"));
    }
}
