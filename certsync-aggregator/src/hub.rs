//! Broadcast hub: fans change events from every ledger out to every exporter.
//!
//! Delivery is lock-step and lossless. The worker takes one event at a time
//! and pushes it to each subscriber queue in registration order while
//! holding the subscriber lock; a full subscriber queue stalls the whole hub
//! until it drains.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use certsync_core::{ChangeEvent, HubConfig};

use crate::ledger::CertificateLedger;
use crate::relay::{self, EventReceiver, EventSender};

struct Outbound {
    id: u64,
    tx: mpsc::Sender<Arc<ChangeEvent>>,
}

#[derive(Default)]
struct Subscribers {
    queues: Vec<Outbound>,
    shut_down: bool,
}

impl Subscribers {
    fn prune(&mut self) {
        self.queues.retain(|queue| {
            let open = !queue.tx.is_closed();
            if !open {
                tracing::debug!(subscriber = queue.id, "dropping released subscription");
            }
            open
        });
    }
}

struct HubInner {
    config: HubConfig,
    inbound: EventSender,
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
}

/// Cloneable handle used to create ledgers and subscriptions.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self
            .inner
            .subscribers
            .try_lock()
            .map(|subs| subs.queues.len())
            .ok();
        f.debug_struct("BroadcastHub")
            .field("config", &self.inner.config)
            .field("subscribers", &subscribers)
            .finish()
    }
}

/// The single worker that drains the hub's inbound queue.
pub struct HubWorker {
    inner: Arc<HubInner>,
    inbound: EventReceiver,
}

impl fmt::Debug for HubWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubWorker")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Receiving end of one exporter's subscriber queue.
///
/// Dropping it releases the subscription; the hub forgets the queue on its
/// next fan-out or subscribe.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<ChangeEvent>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next change event, or `None` once the hub has shut down.
    pub async fn recv(&mut self) -> Option<Arc<ChangeEvent>> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Arc<ChangeEvent>> {
        self.rx.try_recv().ok()
    }
}

impl BroadcastHub {
    /// Create a hub and its worker. The worker must be driven with
    /// [`HubWorker::run`] for events to flow.
    pub fn new(config: HubConfig) -> (Self, HubWorker) {
        let (inbound, receiver) = relay::channel(config.inbound_capacity);
        let inner = Arc::new(HubInner {
            config,
            inbound,
            subscribers: Mutex::new(Subscribers::default()),
            next_id: AtomicU64::new(1),
        });
        let worker = HubWorker {
            inner: Arc::clone(&inner),
            inbound: receiver,
        };
        (Self { inner }, worker)
    }

    pub fn config(&self) -> HubConfig {
        self.inner.config
    }

    /// Producer handle for the inbound queue.
    pub fn sender(&self) -> EventSender {
        self.inner.inbound.clone()
    }

    /// Create a ledger whose change events flow into this hub.
    pub fn ledger(&self, name: impl Into<String>) -> CertificateLedger {
        CertificateLedger::new(name, self.sender())
    }

    /// Register a new subscriber queue. It only sees events fanned out after
    /// this call returns.
    ///
    /// After shutdown the returned subscription is already closed.
    pub async fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.config.subscriber_capacity.max(1));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.inner.subscribers.lock().await;
        if subscribers.shut_down {
            tracing::debug!(subscriber = id, "subscribe after hub shutdown");
            return Subscription { id, rx };
        }
        subscribers.prune();
        subscribers.queues.push(Outbound { id, tx });
        tracing::debug!(
            subscriber = id,
            total = subscribers.queues.len(),
            "subscriber registered"
        );
        Subscription { id, rx }
    }

    /// Number of live subscriber queues.
    pub async fn subscriber_count(&self) -> usize {
        let mut subscribers = self.inner.subscribers.lock().await;
        subscribers.prune();
        subscribers.queues.len()
    }
}

enum FanOut {
    Delivered(usize),
    Cancelled,
}

impl HubWorker {
    /// Relay events until `cancel` fires, then close every subscriber queue.
    ///
    /// The hub holds a producer handle of its own, so the inbound queue
    /// never ends while the worker runs; cancellation is the only stop.
    /// Returns the number of events fanned out.
    pub async fn run(mut self, cancel: CancellationToken) -> u64 {
        let mut relayed = 0u64;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(event) = self.inbound.recv() => event,
            };

            match self.fan_out(&event, &cancel).await {
                FanOut::Delivered(subscribers) => {
                    relayed += 1;
                    tracing::info!(
                        source = %event.source,
                        added = event.diff.added.len(),
                        removed = event.diff.removed.len(),
                        subscribers,
                        "\"{}\" has produced an update",
                        event.source,
                    );
                }
                FanOut::Cancelled => break,
            }
        }

        self.inbound.close();
        let mut subscribers = self.inner.subscribers.lock().await;
        subscribers.shut_down = true;
        let closed = subscribers.queues.len();
        subscribers.queues.clear();
        tracing::info!(closed, relayed, "broadcast hub stopped; subscriber queues closed");
        relayed
    }

    async fn fan_out(&self, event: &Arc<ChangeEvent>, cancel: &CancellationToken) -> FanOut {
        let mut subscribers = self.inner.subscribers.lock().await;
        subscribers.prune();

        let mut delivered = 0usize;
        for queue in &subscribers.queues {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return FanOut::Cancelled,
                sent = queue.tx.send(Arc::clone(event)) => match sent {
                    Ok(()) => delivered += 1,
                    Err(_) => tracing::debug!(subscriber = queue.id, "subscriber released during fan-out"),
                },
            }
        }
        FanOut::Delivered(delivered)
    }
}
