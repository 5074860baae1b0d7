use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::mailbox::{Mailbox, MailboxReceiver, mailbox};

struct BroadcasterState<T> {
    next_id: u64,
    listeners: HashMap<u64, Mailbox<T>>,
}

/// Fan-out of values to dynamically subscribed listeners. Each listener
/// owns an unbounded mailbox, so one that is not being drained never blocks
/// an emitter. `emit` takes the read lock; subscription changes take write.
pub struct Broadcaster<T> {
    state: Arc<RwLock<BroadcasterState<T>>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Broadcaster {
            state: self.state.clone(),
        }
    }
}

impl<T: Clone> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Listener<T> {
    id: u64,
    rx: MailboxReceiver<T>,
    state: Arc<RwLock<BroadcasterState<T>>>,
}

impl<T: Clone> Broadcaster<T> {
    pub fn new() -> Self {
        Broadcaster {
            state: Arc::new(RwLock::new(BroadcasterState {
                next_id: 0,
                listeners: HashMap::new(),
            })),
        }
    }

    pub fn subscribe(&self) -> Listener<T> {
        let (tx, rx) = mailbox();
        let mut state = self.state.write().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.insert(id, tx);
        Listener {
            id,
            rx,
            state: self.state.clone(),
        }
    }

    /// Push a value to every currently subscribed listener.
    pub fn emit(&self, value: T) {
        let state = self.state.read().unwrap();
        for listener in state.listeners.values() {
            listener.send(value.clone());
        }
    }

    /// Unsubscribe everyone; pending items still drain on each listener.
    pub fn close(&self) {
        let mut state = self.state.write().unwrap();
        for (_, listener) in state.listeners.drain() {
            listener.close();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.state.read().unwrap().listeners.len()
    }
}

impl<T> Listener<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking: whatever is buffered right now, if anything.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv()
    }
}

impl<T> Drop for Listener<T> {
    fn drop(&mut self) {
        let mut state = self.state.write().unwrap();
        if let Some(tx) = state.listeners.remove(&self.id) {
            tx.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_listener_sees_every_emit_in_order() {
        let events = Broadcaster::new();
        let mut a = events.subscribe();
        let mut b = events.subscribe();

        events.emit(1);
        events.emit(2);

        assert_eq!(a.recv().await, Some(1));
        assert_eq!(a.recv().await, Some(2));
        assert_eq!(b.recv().await, Some(1));
        assert_eq!(b.recv().await, Some(2));
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_emits() {
        let events = Broadcaster::new();
        events.emit("early");
        let mut listener = events.subscribe();
        events.emit("late");
        assert_eq!(listener.recv().await, Some("late"));
    }

    #[tokio::test]
    async fn close_ends_all_listeners_after_drain() {
        let events = Broadcaster::new();
        let mut listener = events.subscribe();
        events.emit(7);
        events.close();

        assert_eq!(listener.recv().await, Some(7));
        assert_eq!(listener.recv().await, None);
        assert_eq!(events.listener_count(), 0);
    }

    #[tokio::test]
    async fn dropping_a_listener_unsubscribes_it() {
        let events = Broadcaster::new();
        let listener = events.subscribe();
        assert_eq!(events.listener_count(), 1);
        drop(listener);
        assert_eq!(events.listener_count(), 0);
        // emitting into nobody is fine
        events.emit(1);
    }

    #[tokio::test]
    async fn undrained_listener_does_not_block_emitters() {
        let events = Broadcaster::new();
        let _stuck = events.subscribe();
        let mut live = events.subscribe();
        for i in 0..1000 {
            events.emit(i);
        }
        assert_eq!(live.recv().await, Some(0));
    }
}
