//! Bounded relay queue carrying change events from ledgers to the hub.
//!
//! Sending blocks while the queue is full, which is the only backpressure
//! mechanism between importers and the hub.

use std::sync::Arc;

use tokio::sync::mpsc;

use certsync_core::ChangeEvent;

/// Producer side of a relay queue. Cloned into every ledger.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Arc<ChangeEvent>>,
}

/// Consumer side of a relay queue.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<Arc<ChangeEvent>>,
}

/// Create a relay queue holding at most `capacity` undelivered events.
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx }, EventReceiver { rx })
}

impl EventSender {
    /// Enqueue `event`, waiting for space. Returns the event back if the
    /// receiving side is gone.
    pub async fn send(&self, event: Arc<ChangeEvent>) -> Result<(), Arc<ChangeEvent>> {
        self.tx.send(event).await.map_err(|err| err.0)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventReceiver {
    /// Next event, or `None` once every sender is dropped and the queue drained.
    pub async fn recv(&mut self) -> Option<Arc<ChangeEvent>> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Arc<ChangeEvent>> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting new events; already queued ones can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use certsync_core::Diff;

    use super::*;

    fn event(source: &str) -> Arc<ChangeEvent> {
        Arc::new(ChangeEvent::new(source, Diff::default()))
    }

    #[test]
    fn send_is_pending_until_capacity_frees() {
        let (tx, mut rx) = channel(1);
        let mut first = tokio_test::task::spawn(tx.send(event("a")));
        tokio_test::assert_ready_ok!(first.poll());

        let mut second = tokio_test::task::spawn(tx.send(event("b")));
        tokio_test::assert_pending!(second.poll());

        assert_eq!(rx.try_recv().expect("a").source, "a");
        assert!(second.is_woken());
        tokio_test::assert_ready_ok!(second.poll());
        assert_eq!(rx.try_recv().expect("b").source, "b");
    }

    #[tokio::test]
    async fn send_fails_after_receiver_closes() {
        let (tx, mut rx) = channel(2);
        rx.close();
        let returned = tx.send(event("a")).await.unwrap_err();
        assert_eq!(returned.source, "a");
        assert!(tx.is_closed());
    }
}
