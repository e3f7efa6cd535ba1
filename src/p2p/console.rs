//! Interactive console for a P2P node.
//!
//! ```text
//! connect <host:port | peer_id>   open a link (peer ids resolve via the tracker)
//! send <peer_id> <message...>     send to one linked peer
//! broadcast <message...>          send to every linked peer
//! peers                           list peers known to the tracker
//! links                           list open links
//! inbox                           print and clear received messages
//! help | exit
//! ```

use std::fmt::Write as _;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::p2p::node::P2pNode;
use crate::p2p::tracker::TrackerClient;

const HELP: &str = "commands: connect <host:port|peer_id>, send <peer_id> <message>, broadcast <message>, peers, links, inbox, help, exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(String),
    Send { peer_id: String, message: String },
    Broadcast(String),
    Peers,
    Links,
    Inbox,
    Help,
    Exit,
}

impl Command {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (line, ""),
        };

        let cmd = match word {
            "connect" if !rest.is_empty() && !rest.contains(char::is_whitespace) => Command::Connect(rest.to_string()),
            "connect" => return Err("usage: connect <host:port|peer_id>".to_string()),
            "send" => {
                let (peer_id, message) = rest
                    .split_once(char::is_whitespace)
                    .map(|(p, m)| (p, m.trim()))
                    .filter(|(_, m)| !m.is_empty())
                    .ok_or_else(|| "usage: send <peer_id> <message>".to_string())?;
                Command::Send {
                    peer_id: peer_id.to_string(),
                    message: message.to_string(),
                }
            }
            "broadcast" if !rest.is_empty() => Command::Broadcast(rest.to_string()),
            "broadcast" => return Err("usage: broadcast <message>".to_string()),
            "peers" => Command::Peers,
            "links" => Command::Links,
            "inbox" => Command::Inbox,
            "help" => Command::Help,
            "exit" | "quit" => Command::Exit,
            other => return Err(format!("unknown command: {} ({})", other, HELP)),
        };
        Ok(Some(cmd))
    }
}

pub struct Console {
    node: P2pNode,
    tracker: Option<TrackerClient>,
}

impl Console {
    pub fn new(node: P2pNode, tracker: Option<TrackerClient>) -> Self {
        Self { node, tracker }
    }

    /// Read commands from `input` until `exit` or end of input.
    pub async fn run<R, W>(&self, input: R, output: &mut W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        output.write_all(b"> ").await?;
        output.flush().await?;

        while let Some(line) = lines.next_line().await? {
            let reply = match Command::parse(&line) {
                Ok(None) => String::new(),
                Ok(Some(Command::Exit)) => break,
                Ok(Some(cmd)) => self.execute(cmd).await,
                Err(usage) => usage,
            };
            if !reply.is_empty() {
                output.write_all(reply.as_bytes()).await?;
                output.write_all(b"\n").await?;
            }
            output.write_all(b"> ").await?;
            output.flush().await?;
        }
        Ok(())
    }

    /// Run one command and describe the outcome.
    pub async fn execute(&self, cmd: Command) -> String {
        match cmd {
            Command::Connect(target) => {
                let addr = if target.contains(':') {
                    target
                } else {
                    match self.resolve(&target).await {
                        Ok(addr) => addr,
                        Err(e) => return e,
                    }
                };
                match self.node.connect(&addr).await {
                    Ok(peer_id) => format!("connected to {} at {}", peer_id, addr),
                    Err(e) => format!("connect failed: {}", e),
                }
            }
            Command::Send { peer_id, message } => match self.node.send(&peer_id, &message).await {
                Ok(()) => format!("sent to {}", peer_id),
                Err(e) => format!("send failed: {}", e),
            },
            Command::Broadcast(message) => {
                let results = self.node.broadcast(&message).await;
                if results.is_empty() {
                    return "no open links".to_string();
                }
                let mut out = String::new();
                for (peer_id, result) in results {
                    match result {
                        Ok(()) => {
                            let _ = writeln!(out, "{}: sent", peer_id);
                        }
                        Err(e) => {
                            let _ = writeln!(out, "{}: {}", peer_id, e);
                        }
                    }
                }
                out.trim_end().to_string()
            }
            Command::Peers => match &self.tracker {
                None => "no tracker configured".to_string(),
                Some(tracker) => match tracker.get_list().await {
                    Ok(peers) if peers.is_empty() => "tracker lists no peers".to_string(),
                    Ok(peers) => peers
                        .iter()
                        .map(|p| format!("{} {}", p.peer_id, p.address()))
                        .collect::<Vec<_>>()
                        .join("\n"),
                    Err(e) => format!("tracker error: {}", e),
                },
            },
            Command::Links => {
                let links = self.node.links();
                if links.is_empty() {
                    return "no open links".to_string();
                }
                links
                    .iter()
                    .map(|l| format!("{} {} {:?} {:?}", l.peer_id, l.remote_addr, l.direction, l.state))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Command::Inbox => {
                let messages = self.node.drain_messages();
                if messages.is_empty() {
                    return "inbox empty".to_string();
                }
                messages
                    .iter()
                    .map(|m| format!("[{}] {}", m.from, m.message))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Command::Help => HELP.to_string(),
            Command::Exit => String::new(),
        }
    }

    async fn resolve(&self, peer_id: &str) -> Result<String, String> {
        let tracker = self
            .tracker
            .as_ref()
            .ok_or_else(|| format!("no tracker configured; use connect <host:port> for {}", peer_id))?;
        match tracker.resolve(peer_id).await {
            Ok(Some(peer)) => Ok(peer.address()),
            Ok(None) => Err(format!("tracker does not know {}", peer_id)),
            Err(e) => Err(format!("tracker error: {}", e)),
        }
    }
}

/// Print messages as they arrive.
pub fn spawn_feed_printer(node: &P2pNode) -> JoinHandle<()> {
    let mut feed = node.subscribe();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match feed.recv().await {
                Ok(msg) => println!("\n[{}] {}", msg.from, msg.message),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Console fell behind the message feed");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
