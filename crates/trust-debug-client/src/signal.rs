//! Observable notifications for model consumers.
//! - Signal::subscribe/unsubscribe: per-consumer channels
//! - Signal::emit: fan out a value, pruning closed subscribers

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Identifier of one subscription on a [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber<T> {
    id: SubscriptionId,
    sender: UnboundedSender<T>,
}

/// A notification source with any number of subscribers.
///
/// Each subscriber owns an unbounded queue, so emitting never blocks and
/// every subscriber observes values in emission order.
pub struct Signal<T> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

impl<T: Clone> Signal<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber { id, sender });
        Subscription { id, receiver }
    }

    /// Returns `false` when the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        subscribers.len() != before
    }

    pub fn emit(&self, value: T) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.sender.send(value.clone()).is_ok());
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Drop every subscriber; pending values stay readable, then receivers end.
    pub(crate) fn close(&self) {
        self.subscribers.lock().clear();
    }
}

/// Receiving end of a [`Signal`] subscription.
#[derive(Debug)]
pub struct Subscription<T> {
    id: SubscriptionId,
    receiver: UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next value; `None` once the signal is closed or dropped.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::Signal;

    #[test]
    fn emit_reaches_every_live_subscriber_in_order() {
        let signal = Signal::new();
        let mut first = signal.subscribe();
        let mut second = signal.subscribe();

        signal.emit(1);
        signal.emit(2);

        assert_eq!(first.try_recv(), Some(1));
        assert_eq!(first.try_recv(), Some(2));
        assert_eq!(second.try_recv(), Some(1));
        assert_eq!(second.try_recv(), Some(2));
        assert_eq!(first.try_recv(), None);
    }

    #[test]
    fn unsubscribe_and_drop_remove_subscribers() {
        let signal = Signal::new();
        let kept = signal.subscribe();
        let dropped = signal.subscribe();
        let mut removed = signal.subscribe();

        assert!(signal.unsubscribe(removed.id()));
        assert!(!signal.unsubscribe(removed.id()));
        drop(dropped);
        signal.emit("x");

        assert_eq!(signal.subscriber_count(), 1);
        assert_eq!(removed.try_recv(), None);
        drop(kept);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn close_ends_receivers_after_buffered_values() {
        let signal = Signal::new();
        let mut subscription = signal.subscribe();
        signal.emit(7);
        signal.close();

        assert_eq!(subscription.recv().await, Some(7));
        assert_eq!(subscription.recv().await, None);
    }
}
