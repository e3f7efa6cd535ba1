//! P2P node: listener, link table, inbox.
//!
//! # Responsibilities
//! - Accept inbound links and answer their handshake
//! - Open outbound links by address
//! - Send to one peer or broadcast to every established link
//! - Collect received messages into a bounded inbox and a live feed
//!
//! # Design Decisions
//! - One reader task per link; writes go through the link's own async mutex
//! - The link table and inbox sit behind std mutexes never held across an await
//! - Every link write has a deadline; a failed or late write closes the
//!   link and the caller sees `PeerUnreachable`
//! - A message's sender is the peer id its link was established with
//! - A second link from the same peer id replaces the first

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::config::schema::TimeoutConfig;
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::observability::metrics;
use crate::p2p::frame::{read_frame, write_frame, Frame};
use crate::p2p::link::{Direction, Link, LinkInfo};
use crate::resilience::timeouts::connect_with_timeout;

/// Capacity of the live message feed.
const FEED_CAPACITY: usize = 256;

/// Inbox size used by [`P2pNode::new`].
pub const DEFAULT_INBOX_CAPACITY: usize = 1_000;

#[derive(Debug, Error)]
pub enum P2pError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: std::io::Error },

    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: std::io::Error },

    #[error("handshake with {addr} failed: {reason}")]
    Handshake { addr: String, reason: String },

    #[error("peer {0} is unreachable")]
    PeerUnreachable(String),

    #[error("node is already listening")]
    AlreadyListening,

    #[error("node is stopped")]
    Stopped,
}

/// A message received over a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from: String,
    pub message: String,
    /// Sender's clock, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Idle,
    Listening,
    Stopped,
}

struct Inner {
    peer_id: String,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    write_timeout: Duration,
    state: Mutex<NodeState>,
    local_addr: Mutex<Option<SocketAddr>>,
    links: Mutex<HashMap<String, Arc<Link>>>,
    inbox: Mutex<VecDeque<InboundMessage>>,
    inbox_capacity: usize,
    feed: broadcast::Sender<InboundMessage>,
    stop: Shutdown,
    tracker: ConnectionTracker,
}

/// Handle to a P2P node. Clones share the same node.
#[derive(Clone)]
pub struct P2pNode {
    inner: Arc<Inner>,
}

impl P2pNode {
    pub fn new(peer_id: impl Into<String>, timeouts: &TimeoutConfig) -> Self {
        Self::with_inbox_capacity(peer_id, timeouts, DEFAULT_INBOX_CAPACITY)
    }

    /// Like [`P2pNode::new`], keeping at most `inbox_capacity` undrained
    /// messages. The oldest is dropped to make room.
    pub fn with_inbox_capacity(peer_id: impl Into<String>, timeouts: &TimeoutConfig, inbox_capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                peer_id: peer_id.into(),
                connect_timeout: Duration::from_secs(timeouts.connect_secs),
                handshake_timeout: Duration::from_secs(timeouts.handshake_secs),
                write_timeout: Duration::from_secs(timeouts.p2p_write_secs),
                state: Mutex::new(NodeState::Idle),
                local_addr: Mutex::new(None),
                links: Mutex::new(HashMap::new()),
                inbox: Mutex::new(VecDeque::new()),
                inbox_capacity: inbox_capacity.max(1),
                feed,
                stop: Shutdown::new(),
                tracker: ConnectionTracker::new("p2p"),
            }),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.inner.peer_id
    }

    pub fn state(&self) -> NodeState {
        *lock(&self.inner.state)
    }

    /// Address the listener is bound to, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.inner.local_addr)
    }

    /// Bind `addr` and start accepting inbound links.
    pub async fn listen(&self, addr: &str) -> Result<SocketAddr, P2pError> {
        match self.state() {
            NodeState::Stopped => return Err(P2pError::Stopped),
            NodeState::Listening => return Err(P2pError::AlreadyListening),
            NodeState::Idle => {}
        }

        let listener = TcpListener::bind(addr).await.map_err(|source| P2pError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local = listener.local_addr().map_err(|source| P2pError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        *lock(&self.inner.state) = NodeState::Listening;
        *lock(&self.inner.local_addr) = Some(local);

        let node = self.clone();
        let mut stop = self.inner.stop.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => {
                            let node = node.clone();
                            tokio::spawn(async move {
                                if let Err(e) = node.accept_link(stream, remote).await {
                                    tracing::warn!(remote_addr = %remote, error = %e, "Inbound link rejected");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "P2P accept failed");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    },
                    _ = stop.recv() => break,
                }
            }
            tracing::debug!("P2P accept loop stopped");
        });

        tracing::info!(peer_id = %self.inner.peer_id, address = %local, "P2P node listening");
        Ok(local)
    }

    /// Open a link to the node at `addr`. Returns the remote peer id.
    pub async fn connect(&self, addr: &str) -> Result<String, P2pError> {
        if self.state() == NodeState::Stopped {
            return Err(P2pError::Stopped);
        }

        let stream = connect_with_timeout(addr, self.inner.connect_timeout)
            .await
            .map_err(|source| P2pError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let remote = peer_addr(&stream, addr)?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let hello = Frame::Hello {
            peer_id: self.inner.peer_id.clone(),
            listen_port: self.local_addr().map(|a| a.port()).unwrap_or(0),
        };
        let handshake = async {
            write_frame(&mut writer, &hello).await?;
            read_frame(&mut reader).await
        };
        let peer_id = match tokio::time::timeout(self.inner.handshake_timeout, handshake).await {
            Err(_) => return Err(handshake_error(addr, "timed out")),
            Ok(Err(e)) => return Err(handshake_error(addr, e)),
            Ok(Ok(Some(Frame::HelloAck { peer_id }))) => peer_id,
            Ok(Ok(_)) => return Err(handshake_error(addr, "expected hello_ack")),
        };
        if peer_id == self.inner.peer_id {
            return Err(handshake_error(addr, "remote uses our own peer id"));
        }

        self.establish(peer_id.clone(), remote, Direction::Outbound, reader, writer)
            .await;
        Ok(peer_id)
    }

    async fn accept_link(&self, stream: TcpStream, remote: SocketAddr) -> Result<(), P2pError> {
        let addr = remote.to_string();
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let hello = tokio::time::timeout(self.inner.handshake_timeout, read_frame(&mut reader)).await;
        let peer_id = match hello {
            Err(_) => return Err(handshake_error(&addr, "timed out")),
            Ok(Err(e)) => return Err(handshake_error(&addr, e)),
            Ok(Ok(Some(Frame::Hello { peer_id, .. }))) => peer_id,
            Ok(Ok(_)) => return Err(handshake_error(&addr, "expected hello")),
        };
        if peer_id == self.inner.peer_id {
            return Err(handshake_error(&addr, "remote uses our own peer id"));
        }

        let ack = Frame::HelloAck {
            peer_id: self.inner.peer_id.clone(),
        };
        match tokio::time::timeout(self.inner.handshake_timeout, write_frame(&mut writer, &ack)).await {
            Err(_) => return Err(handshake_error(&addr, "timed out")),
            Ok(Err(e)) => return Err(handshake_error(&addr, e)),
            Ok(Ok(())) => {}
        }

        self.establish(peer_id, remote, Direction::Inbound, reader, writer)
            .await;
        Ok(())
    }

    async fn establish(
        &self,
        peer_id: String,
        remote: SocketAddr,
        direction: Direction,
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    ) {
        let link = Arc::new(Link::new(
            peer_id.clone(),
            remote,
            direction,
            writer,
            self.inner.write_timeout,
            self.inner.tracker.track(),
        ));
        let replaced = lock(&self.inner.links).insert(peer_id.clone(), Arc::clone(&link));
        if let Some(old) = replaced {
            tracing::info!(peer_id = %peer_id, "Replacing existing link");
            old.close(false).await;
        }

        tracing::info!(peer_id = %peer_id, remote_addr = %remote, direction = ?direction, "Link established");

        let stop = self.inner.stop.subscribe();
        let node = self.clone();
        tokio::spawn(async move { node.read_loop(link, reader, stop).await });
    }

    async fn read_loop(self, link: Arc<Link>, mut reader: BufReader<OwnedReadHalf>, mut stop: broadcast::Receiver<()>) {
        loop {
            let frame = tokio::select! {
                frame = read_frame(&mut reader) => frame,
                _ = stop.recv() => break,
            };
            match frame {
                Ok(Some(Frame::Message { from, message, timestamp })) => {
                    metrics::record_p2p_frame("received");
                    if from != link.peer_id {
                        tracing::warn!(peer_id = %link.peer_id, claimed = %from, "Message claims another sender, using link peer id");
                    }
                    let msg = InboundMessage {
                        from: link.peer_id.clone(),
                        message,
                        timestamp,
                    };
                    tracing::debug!(peer_id = %link.peer_id, "Message received");
                    self.store(msg.clone());
                    let _ = self.inner.feed.send(msg);
                }
                Ok(Some(Frame::Bye)) | Ok(None) => break,
                Ok(Some(other)) => {
                    tracing::debug!(peer_id = %link.peer_id, frame = ?other, "Ignoring unexpected frame");
                }
                Err(e) => {
                    tracing::warn!(peer_id = %link.peer_id, error = %e, "Link read failed");
                    break;
                }
            }
        }
        self.drop_link(&link).await;
    }

    fn store(&self, msg: InboundMessage) {
        let mut inbox = lock(&self.inner.inbox);
        if inbox.len() >= self.inner.inbox_capacity {
            if let Some(dropped) = inbox.pop_front() {
                tracing::warn!(from = %dropped.from, timestamp = dropped.timestamp, "Inbox full, dropped oldest message");
            }
        }
        inbox.push_back(msg);
    }

    /// Remove `link` from the table (unless it was already replaced) and close it.
    async fn drop_link(&self, link: &Arc<Link>) {
        {
            let mut links = lock(&self.inner.links);
            if links.get(&link.peer_id).is_some_and(|l| l.id() == link.id()) {
                links.remove(&link.peer_id);
            }
        }
        link.close(false).await;
    }

    /// Send `text` to `peer_id` over its established link.
    pub async fn send(&self, peer_id: &str, text: &str) -> Result<(), P2pError> {
        let link = lock(&self.inner.links)
            .get(peer_id)
            .cloned()
            .ok_or_else(|| P2pError::PeerUnreachable(peer_id.to_string()))?;

        let frame = Frame::Message {
            from: self.inner.peer_id.clone(),
            message: text.to_string(),
            timestamp: now_ms(),
        };
        if let Err(e) = link.send(&frame).await {
            tracing::warn!(peer_id = %peer_id, error = %e, "Send failed, closing link");
            self.drop_link(&link).await;
            return Err(P2pError::PeerUnreachable(peer_id.to_string()));
        }
        Ok(())
    }

    /// Send `text` to every established link, one after another.
    pub async fn broadcast(&self, text: &str) -> BTreeMap<String, Result<(), P2pError>> {
        let mut peer_ids: Vec<String> = lock(&self.inner.links).keys().cloned().collect();
        peer_ids.sort();

        let mut results = BTreeMap::new();
        for peer_id in peer_ids {
            let result = self.send(&peer_id, text).await;
            results.insert(peer_id, result);
        }
        results
    }

    /// Every message still in the inbox, oldest first.
    pub fn messages(&self) -> Vec<InboundMessage> {
        lock(&self.inner.inbox).iter().cloned().collect()
    }

    /// Take every message in the inbox, oldest first.
    pub fn drain_messages(&self) -> Vec<InboundMessage> {
        lock(&self.inner.inbox).drain(..).collect()
    }

    /// Live feed of messages received from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inner.feed.subscribe()
    }

    /// Snapshot of the link table, by peer id.
    pub fn links(&self) -> Vec<LinkInfo> {
        let mut infos: Vec<LinkInfo> = lock(&self.inner.links).values().map(|l| l.info()).collect();
        infos.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        infos
    }

    /// Stop listening, say goodbye on every link and close them.
    pub async fn shutdown(&self) {
        {
            let mut state = lock(&self.inner.state);
            if *state == NodeState::Stopped {
                return;
            }
            *state = NodeState::Stopped;
        }
        self.inner.stop.trigger();

        let links: Vec<Arc<Link>> = lock(&self.inner.links).drain().map(|(_, l)| l).collect();
        for link in &links {
            link.close(true).await;
        }
        tracing::info!(peer_id = %self.inner.peer_id, closed_links = links.len(), "P2P node stopped");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn handshake_error(addr: &str, reason: impl ToString) -> P2pError {
    P2pError::Handshake {
        addr: addr.to_string(),
        reason: reason.to_string(),
    }
}

fn peer_addr(stream: &TcpStream, addr: &str) -> Result<SocketAddr, P2pError> {
    stream.peer_addr().map_err(|source| P2pError::Connect {
        addr: addr.to_string(),
        source,
    })
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::link::LinkState;

    fn timeouts() -> TimeoutConfig {
        TimeoutConfig {
            connect_secs: 1,
            handshake_secs: 1,
            ..TimeoutConfig::default()
        }
    }

    async fn listening(id: &str) -> (P2pNode, String) {
        let node = P2pNode::new(id, &timeouts());
        let addr = node.listen("127.0.0.1:0").await.unwrap();
        (node, addr.to_string())
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn connect_handshake_registers_both_sides() {
        let (a, _) = listening("a").await;
        let (b, b_addr) = listening("b").await;

        assert_eq!(a.connect(&b_addr).await.unwrap(), "b");
        assert_eq!(a.links()[0].peer_id, "b");
        assert_eq!(a.links()[0].state, LinkState::Established);

        wait_for(|| b.links().len() == 1).await;
        assert_eq!(b.links()[0].peer_id, "a");
        assert_eq!(b.links()[0].direction, Direction::Inbound);
    }

    #[tokio::test]
    async fn send_without_link_is_unreachable() {
        let node = P2pNode::new("a", &timeouts());
        assert!(matches!(
            node.send("nobody", "hi").await,
            Err(P2pError::PeerUnreachable(id)) if id == "nobody"
        ));
    }

    #[tokio::test]
    async fn messages_flow_both_ways() {
        let (a, _) = listening("a").await;
        let (b, b_addr) = listening("b").await;
        a.connect(&b_addr).await.unwrap();
        wait_for(|| b.links().len() == 1).await;

        let mut feed = b.subscribe();
        a.send("b", "hello b").await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), feed.recv()).await.unwrap().unwrap();
        assert_eq!(got.from, "a");
        assert_eq!(got.message, "hello b");

        b.send("a", "hello a").await.unwrap();
        wait_for(|| a.messages().len() == 1).await;
        assert_eq!(a.drain_messages()[0].message, "hello a");
        assert!(a.messages().is_empty());
    }

    #[tokio::test]
    async fn broadcast_reports_per_peer_failures() {
        let (a, _) = listening("a").await;
        let (_b, b_addr) = listening("b").await;
        let (_c, c_addr) = listening("c").await;
        a.connect(&b_addr).await.unwrap();
        a.connect(&c_addr).await.unwrap();

        // Mark the link to c dead while it is still in the table.
        let c_link = lock(&a.inner.links).get("c").cloned().unwrap();
        c_link.set_state(LinkState::Closed);

        let results = a.broadcast("all").await;
        assert_eq!(results.len(), 2);
        assert!(results["b"].is_ok());
        assert!(matches!(results["c"], Err(P2pError::PeerUnreachable(_))));
        assert_eq!(a.links().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_says_bye_and_remote_drops_link() {
        let (a, _) = listening("a").await;
        let (b, b_addr) = listening("b").await;
        a.connect(&b_addr).await.unwrap();
        wait_for(|| b.links().len() == 1).await;

        b.shutdown().await;
        assert_eq!(b.state(), NodeState::Stopped);
        assert!(b.links().is_empty());

        wait_for(|| a.links().is_empty()).await;
        assert!(matches!(a.send("b", "late").await, Err(P2pError::PeerUnreachable(_))));
        assert!(matches!(b.connect("127.0.0.1:1").await, Err(P2pError::Stopped)));
    }

    /// Listens as `id`, answers the handshake, then never reads again.
    async fn stalled_peer(id: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut writer) = socket.into_split();
            let mut reader = BufReader::new(read_half);
            read_frame(&mut reader).await.unwrap();
            write_frame(&mut writer, &Frame::HelloAck { peer_id: id.into() })
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop((reader, writer));
        });
        addr
    }

    #[tokio::test]
    async fn stalled_peer_is_dropped_without_blocking_broadcast() {
        let timeouts = TimeoutConfig {
            p2p_write_secs: 1,
            ..timeouts()
        };
        let a = P2pNode::new("a", &timeouts);
        let (z, z_addr) = listening("z-good").await;
        // Sorts before z-good, so broadcast writes to it first.
        a.connect(&stalled_peer("m-stalled").await).await.unwrap();
        a.connect(&z_addr).await.unwrap();

        let payload = "x".repeat(60 * 1024);
        let rounds = tokio::time::timeout(Duration::from_secs(30), async {
            for round in 1..=DEFAULT_INBOX_CAPACITY {
                let results = a.broadcast(&payload).await;
                assert!(results["z-good"].is_ok());
                if let Some(Err(e)) = results.get("m-stalled") {
                    assert!(matches!(e, P2pError::PeerUnreachable(id) if id == "m-stalled"));
                    return round;
                }
            }
            panic!("socket buffers never filled");
        })
        .await
        .expect("broadcast hung behind a peer that stopped reading");

        let ids: Vec<_> = a.links().into_iter().map(|l| l.peer_id).collect();
        assert_eq!(ids, vec!["z-good".to_string()]);
        wait_for(|| z.messages().len() == rounds).await;

        tokio::time::timeout(Duration::from_secs(5), a.shutdown())
            .await
            .expect("shutdown hung");
    }

    #[tokio::test]
    async fn shutdown_does_not_wait_on_a_stalled_peer() {
        let timeouts = TimeoutConfig {
            p2p_write_secs: 1,
            ..timeouts()
        };
        let a = P2pNode::new("a", &timeouts);
        a.connect(&stalled_peer("m-stalled").await).await.unwrap();

        let sender = a.clone();
        let writes = tokio::spawn(async move {
            let payload = "y".repeat(60 * 1024);
            while sender.send("m-stalled", &payload).await.is_ok() {}
        });
        // Let writes back up behind the unread socket.
        tokio::time::sleep(Duration::from_millis(300)).await;

        tokio::time::timeout(Duration::from_secs(5), a.shutdown())
            .await
            .expect("shutdown hung");
        tokio::time::timeout(Duration::from_secs(5), writes)
            .await
            .expect("writer hung")
            .unwrap();
        assert!(a.links().is_empty());
    }

    #[tokio::test]
    async fn full_inbox_drops_oldest() {
        let b = P2pNode::with_inbox_capacity("b", &timeouts(), 2);
        let b_addr = b.listen("127.0.0.1:0").await.unwrap().to_string();
        let (a, _) = listening("a").await;
        a.connect(&b_addr).await.unwrap();
        wait_for(|| b.links().len() == 1).await;

        let mut feed = b.subscribe();
        for text in ["one", "two", "three"] {
            a.send("b", text).await.unwrap();
        }
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(1), feed.recv()).await.unwrap().unwrap();
        }

        let kept: Vec<_> = b.messages().into_iter().map(|m| m.message).collect();
        assert_eq!(kept, vec!["two".to_string(), "three".to_string()]);
        assert_eq!(b.drain_messages().len(), 2);
        assert!(b.messages().is_empty());
    }

    #[tokio::test]
    async fn sender_comes_from_the_link_not_the_frame() {
        let (b, b_addr) = listening("b").await;
        let mut feed = b.subscribe();

        let stream = TcpStream::connect(&b_addr).await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let hello = Frame::Hello {
            peer_id: "mallory".into(),
            listen_port: 0,
        };
        write_frame(&mut writer, &hello).await.unwrap();
        assert!(matches!(read_frame(&mut reader).await.unwrap(), Some(Frame::HelloAck { .. })));

        let forged = Frame::Message {
            from: "alice".into(),
            message: "trust me".into(),
            timestamp: 1,
        };
        write_frame(&mut writer, &forged).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), feed.recv()).await.unwrap().unwrap();
        assert_eq!(got.from, "mallory");
        assert_eq!(got.message, "trust me");
        assert_eq!(b.messages()[0].from, "mallory");
    }

    #[tokio::test]
    async fn handshake_times_out_on_silent_peer() {
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_socket, _) = silent.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let node = P2pNode::new("a", &timeouts());
        assert!(matches!(node.connect(&addr).await, Err(P2pError::Handshake { .. })));
    }
}
