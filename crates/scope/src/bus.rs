//! Channel-backed lifecycle event fan-out.
//!
//! [`LifecycleBus`] is a [`ScopeObserver`] that copies every notification into
//! per-subscriber channels, so hosts can watch scopes from another thread
//! without coupling to the projector.
//!
//! - No IO / no async
//! - Broadcast: every subscription receives every event published after it subscribed
//! - Dead subscribers (dropped receivers) are pruned on the next publish

use std::sync::mpsc::{self, Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::sync::Mutex;
use std::time::Duration;

use crate::observer::{ConnectionResolved, ScopeEnding, ScopeEvent, ScopeObserver};

/// A subscription to the lifecycle event stream.
///
/// ## Usage Pattern
///
/// ```ignore
/// let bus = Arc::new(LifecycleBus::new());
/// let subscription = bus.subscribe();
/// let factory = LifetimeScopeFactory::new(registry).with_observer(bus.clone());
///
/// while let Ok(event) = subscription.recv_timeout(Duration::from_secs(1)) {
///     tracing::debug!(scope = %event.scope_id(), "scope event");
/// }
/// ```
///
/// Subscriptions are meant for a single consuming thread.
#[derive(Debug)]
pub struct Subscription {
    receiver: Receiver<ScopeEvent>,
}

impl Subscription {
    /// Block until the next event is available.
    pub fn recv(&self) -> Result<ScopeEvent, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&self) -> Result<ScopeEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for an event.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ScopeEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<ScopeEvent> {
        self.receiver.try_iter().collect()
    }
}

#[derive(Debug, Default)]
pub struct LifecycleBus {
    subscribers: Mutex<Vec<mpsc::Sender<ScopeEvent>>>,
}

impl LifecycleBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel();

        // A poisoned lock still yields a subscription; it just never receives.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription { receiver: rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|subs| subs.len()).unwrap_or(0)
    }

    fn publish(&self, event: ScopeEvent) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

impl ScopeObserver for LifecycleBus {
    fn on_resolved(&self, event: &ConnectionResolved) {
        self.publish(ScopeEvent::Resolved(event.clone()));
    }

    fn on_scope_ending(&self, event: &ScopeEnding) {
        self.publish(ScopeEvent::Ending(event.clone()));
    }
}
