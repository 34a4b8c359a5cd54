//! Listener bookkeeping shared by the in-memory stores.

use huddle_core::CollaboratorError;
use huddle_core::CollaboratorResult;
use tokio::sync::mpsc;

/// A registered subscriber, with per-listener metadata (the feed stores the
/// `after` threshold here).
pub(crate) struct Listener<T, M> {
    pub id: u64,
    pub meta: M,
    tx: mpsc::UnboundedSender<CollaboratorResult<T>>,
}

/// Subscribers attached to one subject.
pub(crate) struct ListenerSet<T, M = ()> {
    listeners: Vec<Listener<T, M>>,
}

impl<T, M> Default for ListenerSet<T, M> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }
}

impl<T: Clone, M> ListenerSet<T, M> {
    /// Attach a listener and queue its initial item.
    pub fn add(
        &mut self,
        id: u64,
        meta: M,
        initial: CollaboratorResult<T>,
    ) -> mpsc::UnboundedReceiver<CollaboratorResult<T>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(initial);
        self.listeners.push(Listener { id, meta, tx });
        rx
    }

    /// Detach a listener. Returns whether it was present.
    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.id != id);
        self.listeners.len() != before
    }

    /// Deliver a value to every listener for which `select` yields one.
    ///
    /// Listeners whose receiver is gone are dropped.
    pub fn notify(&mut self, mut select: impl FnMut(&M) -> Option<T>) {
        self.listeners.retain(|l| match select(&l.meta) {
            Some(value) => l.tx.send(Ok(value)).is_ok(),
            None => !l.tx.is_closed(),
        });
    }

    /// Deliver the same value to every listener
    pub fn broadcast(&mut self, value: &T) {
        self.notify(|_| Some(value.clone()));
    }

    /// Push a terminal error to every listener and detach them all.
    pub fn fail_all(&mut self, error: CollaboratorError) -> usize {
        let count = self.listeners.len();
        for listener in self.listeners.drain(..) {
            let _ = listener.tx.send(Err(error.clone()));
        }
        count
    }

    /// Push an error without detaching anyone.
    pub fn inject(&mut self, error: CollaboratorError) {
        self.listeners
            .retain(|l| l.tx.send(Err(error.clone())).is_ok());
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_queues_initial() {
        let mut set: ListenerSet<u32> = ListenerSet::default();
        let mut rx = set.add(1, (), Ok(7));
        assert_eq!(rx.try_recv().unwrap(), Ok(7));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_notify_filters_by_meta() {
        let mut set: ListenerSet<u32, u32> = ListenerSet::default();
        let mut low = set.add(1, 10, Ok(0));
        let mut high = set.add(2, 100, Ok(0));
        low.try_recv().unwrap();
        high.try_recv().unwrap();

        set.notify(|threshold| (*threshold < 50).then_some(42));
        assert_eq!(low.try_recv().unwrap(), Ok(42));
        assert!(high.try_recv().is_err());
    }

    #[test]
    fn test_closed_receivers_are_pruned() {
        let mut set: ListenerSet<u32> = ListenerSet::default();
        let rx = set.add(1, (), Ok(0));
        drop(rx);
        set.broadcast(&1);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_remove_and_fail_all() {
        let mut set: ListenerSet<u32> = ListenerSet::default();
        let _a = set.add(1, (), Ok(0));
        let mut b = set.add(2, (), Ok(0));
        b.try_recv().unwrap();

        assert!(set.remove(1));
        assert!(!set.remove(1));

        assert_eq!(set.fail_all(CollaboratorError::Closed), 1);
        assert_eq!(b.try_recv().unwrap(), Err(CollaboratorError::Closed));
        assert_eq!(set.len(), 0);
    }
}
