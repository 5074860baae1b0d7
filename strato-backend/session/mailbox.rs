use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Lossless, order-preserving queue: sends never block and never fail while
/// the mailbox is open, so a slow consumer (a blocked socket write, a paused
/// client) cannot back-pressure the producer. Closing the input flushes
/// whatever is buffered before the receiver sees end-of-stream.
pub struct Mailbox<T> {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<T>>>>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Mailbox {
            tx: self.tx.clone(),
        }
    }
}

pub struct MailboxReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

pub fn mailbox<T>() -> (Mailbox<T>, MailboxReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Mailbox {
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        MailboxReceiver { rx },
    )
}

impl<T> Mailbox<T> {
    /// Enqueue an item. Returns false if the mailbox was closed or the
    /// receiver dropped; the item is discarded in that case.
    pub fn send(&self, item: T) -> bool {
        let guard = self.tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx.send(item).is_ok(),
            None => false,
        }
    }

    /// Close the input. Items already queued still reach the receiver.
    /// Every clone of this mailbox observes the close.
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }

    pub fn is_closed(&self) -> bool {
        match self.tx.lock().unwrap().as_ref() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}

impl<T> MailboxReceiver<T> {
    /// Next item, or None once the mailbox is closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking variant for drain loops.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}
