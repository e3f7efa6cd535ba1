//! Named channels with a bounded history.

use std::collections::{BTreeSet, VecDeque};

use serde::Serialize;

use crate::chat::mailbox::ChatMessage;

#[derive(Debug, Clone)]
pub struct Channel {
    members: BTreeSet<String>,
    history: VecDeque<ChatMessage>,
    capacity: usize,
}

/// Listing entry returned by `/channels`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSummary {
    pub channel: String,
    pub members: Vec<String>,
    pub message_count: usize,
}

impl Channel {
    /// An empty channel retaining at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            members: BTreeSet::new(),
            history: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a message; its sender becomes a member. Returns the oldest
    /// message if it had to go to make room.
    pub fn record(&mut self, msg: ChatMessage) -> Option<ChatMessage> {
        self.members.insert(msg.from.clone());
        let evicted = if self.history.len() >= self.capacity {
            self.history.pop_front()
        } else {
            None
        };
        self.history.push_back(msg);
        evicted
    }

    /// The last `limit` retained messages, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ChatMessage> {
        let start = self.history.len().saturating_sub(limit);
        self.history.iter().skip(start).cloned().collect()
    }

    pub fn summary(&self, name: &str) -> ChannelSummary {
        ChannelSummary {
            channel: name.to_string(),
            members: self.members.iter().cloned().collect(),
            message_count: self.history.len(),
        }
    }
}
