//! P2P nodes finding each other through a chat tracker and talking directly.

use std::time::Duration;

use sockstack::config::schema::TimeoutConfig;
use sockstack::p2p::console::{Command, Console};
use sockstack::p2p::{LinkState, P2pNode, TrackerClient};

mod common;

async fn announced_node(id: &str, tracker_base: &str) -> (P2pNode, TrackerClient) {
    let node = P2pNode::new(id, &TimeoutConfig::default());
    let local = node.listen("127.0.0.1:0").await.unwrap();
    let mut tracker = TrackerClient::new(tracker_base).unwrap();
    tracker.login(id, "pw").await.unwrap();
    tracker.submit_info(id, Some("127.0.0.1"), local.port()).await.unwrap();
    (node, tracker)
}

async fn wait_for_messages(node: &P2pNode, count: usize) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while node.messages().len() < count {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("messages did not arrive");
}

#[tokio::test]
async fn console_connects_by_peer_id_through_tracker() {
    let (server, _app) = common::spawn_chat(&common::test_config()).await;
    let base = format!("http://{}", server.addr);

    let (alice, alice_tracker) = announced_node("alice", &base).await;
    let (bob, _bob_tracker) = announced_node("bob", &base).await;

    let console = Console::new(alice.clone(), Some(alice_tracker));
    let reply = console.execute(Command::Connect("bob".to_string())).await;
    assert!(reply.starts_with("connected to bob"), "{}", reply);

    let reply = console
        .execute(Command::Send {
            peer_id: "bob".to_string(),
            message: "direct hello".to_string(),
        })
        .await;
    assert_eq!(reply, "sent to bob");

    wait_for_messages(&bob, 1).await;
    let inbox = bob.drain_messages();
    assert_eq!(inbox[0].from, "alice");
    assert_eq!(inbox[0].message, "direct hello");

    let peers = console.execute(Command::Peers).await;
    assert!(peers.contains("alice 127.0.0.1:"));
    assert!(peers.contains("bob 127.0.0.1:"));

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn broadcast_fans_out_over_links() {
    let timeouts = TimeoutConfig::default();
    let hub = P2pNode::new("hub", &timeouts);
    let mut spokes = Vec::new();
    for id in ["s1", "s2", "s3"] {
        let spoke = P2pNode::new(id, &timeouts);
        let addr = spoke.listen("127.0.0.1:0").await.unwrap();
        assert_eq!(hub.connect(&addr.to_string()).await.unwrap(), id);
        spokes.push(spoke);
    }
    assert!(hub.links().iter().all(|l| l.state == LinkState::Established));

    let results = hub.broadcast("to everyone").await;
    assert_eq!(results.len(), 3);
    assert!(results.values().all(Result::is_ok));

    for spoke in &spokes {
        wait_for_messages(spoke, 1).await;
        assert_eq!(spoke.messages()[0].from, "hub");
    }

    hub.shutdown().await;
    for spoke in &spokes {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !spoke.links().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("spoke kept its link after bye");
    }
}
