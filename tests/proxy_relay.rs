//! Reverse proxy in front of real upstreams.

use std::time::Duration;

use reqwest::header::COOKIE;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

mod common;

#[tokio::test]
async fn relays_backend_session_flow() {
    let config = common::test_config();
    let backend = common::spawn_backend(&config).await;
    let proxy = common::spawn_proxy(&config, backend.addr).await;
    let client = common::client();

    let login = client
        .post(proxy.url("/login"))
        .form(&[("username", "admin"), ("password", "password")])
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), 200);
    let sid = common::sid_cookie(&login).expect("cookie survives the proxy");

    let index = client.get(proxy.url("/index.html")).header(COOKIE, sid).send().await.unwrap();
    assert_eq!(index.status(), 200);

    let echo: Value = client
        .post(proxy.url("/echo"))
        .json(&serde_json::json!({"via": "proxy"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echo["echo"]["via"], "proxy");
}

#[tokio::test]
async fn relayed_echo_matches_direct_reply_until_backend_stops() {
    let config = common::test_config();
    let backend = common::spawn_backend(&config).await;
    let proxy = common::spawn_proxy(&config, backend.addr).await;
    let client = common::client();
    let payload = serde_json::json!({"x": 1});

    let direct = client.post(backend.url("/echo")).json(&payload).send().await.unwrap();
    let direct_status = direct.status();
    let direct_body: Value = direct.json().await.unwrap();

    let relayed = client.post(proxy.url("/echo")).json(&payload).send().await.unwrap();
    assert_eq!(relayed.status(), direct_status);
    let relayed_body: Value = relayed.json().await.unwrap();
    assert_eq!(relayed_body, direct_body);
    assert_eq!(relayed_body["echo"]["x"], 1);

    // Stopping the backend closes its pooled connection and its listener.
    drop(backend);
    let mut status = 0;
    for _ in 0..50 {
        let res = client.post(proxy.url("/echo")).json(&payload).send().await.unwrap();
        status = res.status().as_u16();
        if status == 502 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(status, 502);
}

#[tokio::test]
async fn unreachable_upstream_is_502() {
    let config = common::test_config();
    let proxy = common::spawn_proxy(&config, common::dead_addr().await).await;
    let res = common::client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 502);
}

#[tokio::test]
async fn upstream_status_and_body_pass_through() {
    let upstream = common::start_fixed_upstream(
        "HTTP/1.1 418 I'm a teapot\r\nContent-Type: text/plain\r\nContent-Length: 5\r\nConnection: close\r\n\r\nshort",
    )
    .await;
    let proxy = common::spawn_proxy(&common::test_config(), upstream).await;
    let res = common::client().get(proxy.url("/brew")).send().await.unwrap();
    assert_eq!(res.status(), 418);
    assert_eq!(res.text().await.unwrap(), "short");
}

#[tokio::test]
async fn forwarded_request_carries_client_address() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = socket.read(&mut buf).await.unwrap();
        let _ = seen_tx.send(String::from_utf8_lossy(&buf[..n]).into_owned());
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
            .await;
    });

    let mut config = common::test_config();
    config.proxy.host_rewrite = Some("backend.internal".to_string());
    let proxy = common::spawn_proxy(&config, upstream).await;

    let res = common::client()
        .get(proxy.url("/path?q=1"))
        .header("Connection", "keep-alive, X-Drop-Me")
        .header("X-Drop-Me", "secret")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let seen = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(seen.starts_with("GET /path?q=1 HTTP/1.1\r\n"), "{}", seen);
    assert!(seen.contains("Host: backend.internal"), "{}", seen);
    assert!(seen.contains("X-Forwarded-For: 127.0.0.1"), "{}", seen);
    assert!(!seen.to_ascii_lowercase().contains("x-drop-me"), "{}", seen);
}
