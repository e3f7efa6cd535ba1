//! Peer registry for the chat-app tracker.
//!
//! # Responsibilities
//! - Register peers (idempotent by `peer_id`) and list them in registration order
//! - Route broadcast and direct messages into per-peer mailboxes
//! - Keep channel histories and the per-peer default target
//! - Mark peers disconnected once they go quiet
//!
//! # Design Decisions
//! - One `Mutex` around all of it: every operation is a single atomic step,
//!   so a failed operation never leaves a partial delivery behind
//! - Peers are never removed, only marked disconnected, so registration
//!   order is stable

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::chat::channel::{Channel, ChannelSummary};
use crate::chat::mailbox::{ChatMessage, Mailbox};
use crate::config::ChatConfig;
use crate::lifecycle::Shutdown;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("peer {0} has no target; pass to_peer or call connect-peer first")]
    NoTarget(String),
}

impl RegistryError {
    pub fn status(&self) -> u16 {
        match self {
            RegistryError::UnknownPeer(_) => 404,
            RegistryError::NoTarget(_) => 400,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::UnknownPeer(_) => "UnknownPeer",
            RegistryError::NoTarget(_) => "NoTarget",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Registered,
    Connected,
    Disconnected,
}

/// A registered peer. Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Peer {
    pub peer_id: String,
    pub ip: String,
    pub port: u16,
    pub status: PeerStatus,
    pub registered_at: u64,
    pub last_seen: u64,
}

/// Whether reading a mailbox empties it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    #[default]
    Drain,
    Peek,
}

/// Result of a broadcast or direct send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message: ChatMessage,
    pub recipients: Vec<String>,
}

struct Entry {
    peer: Peer,
    mailbox: Mailbox,
    target: Option<String>,
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    channels: BTreeMap<String, Channel>,
    next_seq: u64,
}

impl State {
    fn entry(&self, peer_id: &str) -> Option<&Entry> {
        self.index.get(peer_id).map(|&i| &self.entries[i])
    }

    fn entry_mut(&mut self, peer_id: &str) -> Option<&mut Entry> {
        match self.index.get(peer_id) {
            Some(&i) => Some(&mut self.entries[i]),
            None => None,
        }
    }

    fn touch(&mut self, peer_id: &str, now: u64) {
        if let Some(entry) = self.entry_mut(peer_id) {
            entry.peer.last_seen = now;
            if entry.peer.status == PeerStatus::Disconnected {
                entry.peer.status = PeerStatus::Registered;
            }
        }
    }

    fn new_message(&mut self, from: &str, to: Option<&str>, channel: &str, text: &str, now: u64) -> ChatMessage {
        self.next_seq += 1;
        ChatMessage {
            seq: self.next_seq,
            from: from.to_string(),
            to: to.map(str::to_string),
            channel: channel.to_string(),
            message: text.to_string(),
            timestamp: now,
        }
    }

    fn deliver(&mut self, peer_id: &str, msg: ChatMessage) {
        if let Some(entry) = self.entry_mut(peer_id) {
            if let Some(dropped) = entry.mailbox.push(msg) {
                tracing::warn!(peer_id = %peer_id, dropped_seq = dropped.seq, "Mailbox full, dropped oldest message");
            }
        }
    }
}

/// Shared registry of peers, mailboxes and channels.
pub struct PeerRegistry {
    state: Mutex<State>,
    mailbox_capacity: usize,
    history_capacity: usize,
    default_channel: String,
}

impl PeerRegistry {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            mailbox_capacity: config.mailbox_capacity,
            history_capacity: config.history_capacity,
            default_channel: config.default_channel.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, state: &mut State, channel: String, msg: &ChatMessage) {
        let history = state
            .channels
            .entry(channel)
            .or_insert_with(|| Channel::new(self.history_capacity));
        if let Some(dropped) = history.record(msg.clone()) {
            tracing::debug!(channel = %msg.channel, dropped_seq = dropped.seq, "Channel history full, dropped oldest message");
        }
    }

    pub fn default_channel(&self) -> &str {
        &self.default_channel
    }

    /// Register a peer, or refresh its address if already known.
    /// Returns the stored peer and whether it was newly created.
    pub fn submit_info(&self, peer_id: &str, ip: &str, port: u16) -> (Peer, bool) {
        let now = now_ms();
        let mut state = self.lock();

        if let Some(entry) = state.entry_mut(peer_id) {
            entry.peer.ip = ip.to_string();
            entry.peer.port = port;
            entry.peer.last_seen = now;
            if entry.peer.status == PeerStatus::Disconnected {
                entry.peer.status = PeerStatus::Registered;
            }
            return (entry.peer.clone(), false);
        }

        let peer = Peer {
            peer_id: peer_id.to_string(),
            ip: ip.to_string(),
            port,
            status: PeerStatus::Registered,
            registered_at: now,
            last_seen: now,
        };
        let idx = state.entries.len();
        state.entries.push(Entry {
            peer: peer.clone(),
            mailbox: Mailbox::new(self.mailbox_capacity),
            target: None,
        });
        state.index.insert(peer_id.to_string(), idx);
        tracing::info!(peer_id = %peer_id, ip = %ip, port, "Peer registered");
        (peer, true)
    }

    /// All peers in registration order.
    pub fn get_list(&self) -> Vec<Peer> {
        self.lock().entries.iter().map(|e| e.peer.clone()).collect()
    }

    pub fn get(&self, peer_id: &str) -> Option<Peer> {
        self.lock().entry(peer_id).map(|e| e.peer.clone())
    }

    /// Make `to` the default target of `from` and mark `from` connected.
    /// Returns the target peer so the caller can reach it directly.
    pub fn connect_peer(&self, from: &str, to: &str) -> Result<Peer, RegistryError> {
        let now = now_ms();
        let mut state = self.lock();

        let target = state
            .entry(to)
            .map(|e| e.peer.clone())
            .ok_or_else(|| RegistryError::UnknownPeer(to.to_string()))?;
        let entry = state
            .entry_mut(from)
            .ok_or_else(|| RegistryError::UnknownPeer(from.to_string()))?;

        entry.target = Some(to.to_string());
        entry.peer.status = PeerStatus::Connected;
        entry.peer.last_seen = now;
        tracing::info!(from = %from, to = %to, "Peer connected");
        Ok(target)
    }

    /// Deliver `text` to every registered peer except `sender` and record
    /// it in `channel` (the default channel when `None`).
    pub fn broadcast(&self, sender: &str, text: &str, channel: Option<&str>) -> Delivery {
        let now = now_ms();
        let channel = channel.unwrap_or(self.default_channel.as_str()).to_string();
        let mut state = self.lock();

        let msg = state.new_message(sender, None, &channel, text, now);
        let recipients: Vec<String> = state
            .entries
            .iter()
            .map(|e| e.peer.peer_id.clone())
            .filter(|id| id != sender)
            .collect();
        for id in &recipients {
            state.deliver(id, msg.clone());
        }
        self.record(&mut state, channel, &msg);
        state.touch(sender, now);

        tracing::debug!(sender = %sender, seq = msg.seq, recipients = recipients.len(), "Broadcast delivered");
        Delivery { message: msg, recipients }
    }

    /// Deliver `text` to one peer. Without `target`, the sender's
    /// connect-peer target is used. The message is recorded in `channel`,
    /// or `dm-<target>` when `None`.
    pub fn send(
        &self,
        sender: &str,
        target: Option<&str>,
        text: &str,
        channel: Option<&str>,
    ) -> Result<Delivery, RegistryError> {
        let now = now_ms();
        let mut state = self.lock();

        let target = match target {
            Some(t) => t.to_string(),
            None => state
                .entry(sender)
                .and_then(|e| e.target.clone())
                .ok_or_else(|| RegistryError::NoTarget(sender.to_string()))?,
        };
        if state.entry(&target).is_none() {
            return Err(RegistryError::UnknownPeer(target));
        }

        let channel = channel.map(str::to_string).unwrap_or_else(|| format!("dm-{}", target));
        let msg = state.new_message(sender, Some(&target), &channel, text, now);
        state.deliver(&target, msg.clone());
        self.record(&mut state, channel, &msg);
        state.touch(sender, now);

        tracing::debug!(sender = %sender, target = %target, seq = msg.seq, "Direct message delivered");
        Ok(Delivery {
            message: msg,
            recipients: vec![target],
        })
    }

    /// Pending messages for `peer_id` in arrival order.
    pub fn get_messages(&self, peer_id: &str, mode: ReadMode) -> Result<Vec<ChatMessage>, RegistryError> {
        let now = now_ms();
        let mut state = self.lock();
        let entry = state
            .entry_mut(peer_id)
            .ok_or_else(|| RegistryError::UnknownPeer(peer_id.to_string()))?;
        let messages = match mode {
            ReadMode::Drain => entry.mailbox.drain(),
            ReadMode::Peek => entry.mailbox.peek(),
        };
        state.touch(peer_id, now);
        Ok(messages)
    }

    /// Every channel with its members and message count, by name.
    pub fn channels(&self) -> Vec<ChannelSummary> {
        self.lock()
            .channels
            .iter()
            .map(|(name, ch)| ch.summary(name))
            .collect()
    }

    /// The last `limit` messages of a channel. Unknown channels are empty.
    pub fn channel_history(&self, name: &str, limit: usize) -> Vec<ChatMessage> {
        self.lock()
            .channels
            .get(name)
            .map(|ch| ch.recent(limit))
            .unwrap_or_default()
    }

    /// Mark peers not seen within `ttl` as disconnected. Returns their ids.
    pub fn sweep_idle(&self, ttl: Duration) -> Vec<String> {
        let now = now_ms();
        let ttl_ms = ttl.as_millis() as u64;
        let mut state = self.lock();
        let mut swept = Vec::new();
        for entry in state.entries.iter_mut() {
            if entry.peer.status != PeerStatus::Disconnected && now.saturating_sub(entry.peer.last_seen) >= ttl_ms {
                entry.peer.status = PeerStatus::Disconnected;
                entry.target = None;
                swept.push(entry.peer.peer_id.clone());
            }
        }
        swept
    }

    /// Run `sweep_idle(ttl)` every `interval` until shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, ttl: Duration, interval: Duration, shutdown: &Shutdown) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for peer_id in registry.sweep_idle(ttl) {
                            tracing::info!(peer_id = %peer_id, "Idle peer marked disconnected");
                        }
                    }
                    _ = stop.recv() => break,
                }
            }
        })
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
