//! Outbound signals and the listener registry.
//!
//! A throttle notifies its consumer synchronously through registered
//! listeners. Listeners are `Fn` closures held behind `Rc` so dispatch can
//! snapshot the current set, release every internal borrow, and then call
//! out. A listener may therefore call back into the throttle (write, pause,
//! resume, end) or register further listeners without deadlocking.

use std::fmt;
use std::rc::Rc;

use bytes::Bytes;

use crate::throttle::WriteOutcome;

/// A signal emitted downstream by a throttle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A chunk forwarded to the consumer.
    Data(Bytes),
    /// End of stream. Emitted at most once.
    End,
    /// The pending queue emptied; the producer may write again.
    Drain,
}

/// Handle returned by listener registration, used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Inbound capability: what a producer needs from a throttle.
pub trait ByteSink {
    /// Offers a chunk. See [`WriteOutcome`] for the backpressure contract.
    fn write(&self, chunk: Bytes) -> WriteOutcome;

    /// Signals that no more data will be written.
    fn end(&self);

    /// Tears the stream down without flushing or signalling end.
    fn destroy(&self);
}

/// Outbound capability: how a consumer observes a throttle.
pub trait SignalSource {
    /// Registers a listener for forwarded chunks.
    fn on_data<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Bytes) + 'static;

    /// Registers a listener for end of stream.
    fn on_end<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + 'static;

    /// Registers a listener for drain notifications.
    fn on_drain<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + 'static;

    /// Removes a listener. Returns false if it was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;
}

pub(crate) type DataListener = Rc<dyn Fn(&Bytes)>;
pub(crate) type NotifyListener = Rc<dyn Fn()>;

/// Which unit signal a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NotifyKind {
    End,
    Drain,
}

/// Registered listeners, in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    data: Vec<(ListenerId, DataListener)>,
    end: Vec<(ListenerId, NotifyListener)>,
    drain: Vec<(ListenerId, NotifyListener)>,
}

impl Listeners {
    fn allocate_id(&mut self) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn add_data(&mut self, listener: DataListener) -> ListenerId {
        let id = self.allocate_id();
        self.data.push((id, listener));
        id
    }

    pub(crate) fn add_notify(&mut self, kind: NotifyKind, listener: NotifyListener) -> ListenerId {
        let id = self.allocate_id();
        match kind {
            NotifyKind::End => self.end.push((id, listener)),
            NotifyKind::Drain => self.drain.push((id, listener)),
        }
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.len();
        self.data.retain(|(existing, _)| *existing != id);
        self.end.retain(|(existing, _)| *existing != id);
        self.drain.retain(|(existing, _)| *existing != id);
        self.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len() + self.end.len() + self.drain.len()
    }

    pub(crate) fn data_snapshot(&self) -> Vec<DataListener> {
        self.data.iter().map(|(_, l)| Rc::clone(l)).collect()
    }

    pub(crate) fn notify_snapshot(&self, kind: NotifyKind) -> Vec<NotifyListener> {
        let listeners = match kind {
            NotifyKind::End => &self.end,
            NotifyKind::Drain => &self.drain,
        };
        listeners.iter().map(|(_, l)| Rc::clone(l)).collect()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("data", &self.data.len())
            .field("end", &self.end.len())
            .field("drain", &self.drain.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn test_ids_are_unique_across_kinds() {
        let mut listeners = Listeners::default();
        let a = listeners.add_data(Rc::new(|_: &Bytes| {}));
        let b = listeners.add_notify(NotifyKind::End, Rc::new(|| {}));
        let c = listeners.add_notify(NotifyKind::Drain, Rc::new(|| {}));

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(listeners.len(), 3);
    }

    #[test]
    fn test_remove_only_named_listener() {
        let mut listeners = Listeners::default();
        let keep = listeners.add_notify(NotifyKind::Drain, Rc::new(|| {}));
        let removed = listeners.add_notify(NotifyKind::Drain, Rc::new(|| {}));

        assert!(listeners.remove(removed));
        assert!(!listeners.remove(removed));
        assert_eq!(listeners.notify_snapshot(NotifyKind::Drain).len(), 1);
        assert!(listeners.remove(keep));
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn test_snapshot_preserves_registration_order() {
        let order = Rc::new(Cell::new(0u32));
        let mut listeners = Listeners::default();
        for expected in 0..3u32 {
            let order = Rc::clone(&order);
            listeners.add_notify(
                NotifyKind::End,
                Rc::new(move || {
                    assert_eq!(order.get(), expected);
                    order.set(expected + 1);
                }),
            );
        }

        for listener in listeners.notify_snapshot(NotifyKind::End) {
            listener();
        }
        assert_eq!(order.get(), 3);
    }
}
