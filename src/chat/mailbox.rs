//! Per-peer message queue.

use std::collections::VecDeque;

use serde::Serialize;

/// One chat message as stored in mailboxes and channel histories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Process-wide, strictly increasing.
    pub seq: u64,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub channel: String,
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Bounded FIFO of undelivered messages.
///
/// When full, the oldest message is dropped to make room.
#[derive(Debug, Clone)]
pub struct Mailbox {
    queue: VecDeque<ChatMessage>,
    capacity: usize,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a message. Returns the message evicted to make room, if any.
    pub fn push(&mut self, msg: ChatMessage) -> Option<ChatMessage> {
        let evicted = if self.queue.len() >= self.capacity {
            self.queue.pop_front()
        } else {
            None
        };
        self.queue.push_back(msg);
        evicted
    }

    /// Remove and return everything, oldest first.
    pub fn drain(&mut self) -> Vec<ChatMessage> {
        self.queue.drain(..).collect()
    }

    /// Copy of everything, oldest first.
    pub fn peek(&self) -> Vec<ChatMessage> {
        self.queue.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
