//! Outbound message queue and the single-flight sender discipline that
//! drains it (§4.6).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::messages::{MessageId, SerializedMessage};
use crate::transport::AnyConnection;

/// Slot the `ClientConnector` installs the live connection into and the
/// `MessageSender` reads from. Neither side owns the connection outright:
/// it lives only in this shared slot, so clearing it on disconnect is
/// enough to drop it, mirroring the weak-back-reference discipline used
/// elsewhere in the transport layer (§9).
pub type ConnectionSlot = Arc<Mutex<Option<AnyConnection>>>;

/// FIFO of outbound frames. A queued entry is not removed until its send
/// is confirmed by the connection's `on_sent` callback, so a message still
/// in flight when the connection drops is resent after reconnect rather
/// than lost.
pub struct SentMessageQueue {
    queue: Mutex<VecDeque<(SerializedMessage, Option<MessageId>)>>,
}

impl SentMessageQueue {
    pub fn new() -> Self {
        SentMessageQueue {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_back(&self, message: SerializedMessage, id: Option<MessageId>) {
        self.queue.lock().unwrap().push_back((message, id));
    }

    fn front(&self) -> Option<(SerializedMessage, Option<MessageId>)> {
        self.queue.lock().unwrap().front().cloned()
    }

    fn pop_front(&self) -> Option<(SerializedMessage, Option<MessageId>)> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

impl Default for SentMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives outbound I/O for one client, one message at a time (§4.6).
/// `is_sending` makes `send_next` a guarded critical section: at most one
/// message is ever in flight on the connection, and a reconnect simply
/// leaves the queue's head in place until a connection reappears.
pub struct MessageSender {
    connection: ConnectionSlot,
    queue: Arc<SentMessageQueue>,
    is_sending: AtomicBool,
}

impl MessageSender {
    pub fn new(connection: ConnectionSlot, queue: Arc<SentMessageQueue>) -> Arc<Self> {
        Arc::new(MessageSender {
            connection,
            queue,
            is_sending: AtomicBool::new(false),
        })
    }

    /// Enqueues `message` and attempts to drain the queue.
    pub fn send(self: &Arc<Self>, message: SerializedMessage, id: Option<MessageId>) {
        self.queue.push_back(message, id);
        self.send_next();
    }

    /// No-op if a send is already in flight or no connection is currently
    /// installed; otherwise hands the queue's head to the connection.
    pub fn send_next(self: &Arc<Self>) {
        if self.is_sending.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some((message, _)) = self.queue.front() else {
            self.is_sending.store(false, Ordering::Release);
            return;
        };
        let connection = self.connection.lock().unwrap().clone();
        match connection {
            Some(connection) => connection.async_send(message),
            None => self.is_sending.store(false, Ordering::Release),
        }
    }

    /// Called from the connection's `on_sent` callback: the head of the
    /// queue has been fully written, so pop it and try the next one.
    pub fn handle_sent(self: &Arc<Self>) {
        self.queue.pop_front();
        self.is_sending.store(false, Ordering::Release);
        self.send_next();
    }

    /// Called when the connection is torn down mid-send: release the
    /// in-flight flag without popping, so the unsent head is retried once
    /// a new connection is installed.
    pub fn handle_disconnection(&self) {
        self.is_sending.store(false, Ordering::Release);
    }
}
