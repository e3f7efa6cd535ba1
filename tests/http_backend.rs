//! End-to-end tests for the backend role over real sockets.

use reqwest::header::COOKIE;
use serde_json::Value;

mod common;

#[tokio::test]
async fn login_flow_grants_access_to_index() {
    let server = common::spawn_backend(&common::test_config()).await;
    let client = common::client();

    let page = client.get(server.url("/login.html")).send().await.unwrap();
    assert_eq!(page.status(), 200);
    assert!(page.text().await.unwrap().contains("<form"));

    let denied = client.get(server.url("/index.html")).send().await.unwrap();
    assert_eq!(denied.status(), 401);

    let login = client
        .post(server.url("/login"))
        .form(&[("username", "admin"), ("password", "password")])
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), 200);
    let sid = common::sid_cookie(&login).expect("login sets a session cookie");

    let index = client
        .get(server.url("/"))
        .header(COOKIE, sid.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(index.status(), 200);
    assert!(index.text().await.unwrap().contains("admin"));

    let logout = client
        .post(server.url("/logout"))
        .header(COOKIE, sid.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(logout.status(), 200);

    let after = client.get(server.url("/")).header(COOKIE, sid).send().await.unwrap();
    assert_eq!(after.status(), 401);
}

#[tokio::test]
async fn json_login_with_wrong_password_is_rejected() {
    let server = common::spawn_backend(&common::test_config()).await;
    let res = common::client()
        .post(server.url("/login"))
        .json(&serde_json::json!({"username": "admin", "password": "wrong"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
    assert!(common::sid_cookie(&res).is_none());
}

#[tokio::test]
async fn echo_round_trips_json_and_text() {
    let server = common::spawn_backend(&common::test_config()).await;
    let client = common::client();

    let res = client
        .post(server.url("/echo"))
        .json(&serde_json::json!({"msg": "hi", "n": [1, 2]}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers().contains_key("x-request-id"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["echo"]["msg"], "hi");
    assert_eq!(body["echo"]["n"][1], 2);

    let res = client
        .post(server.url("/echo"))
        .header("Content-Type", "text/plain")
        .body("plain words")
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "plain words");
}

#[tokio::test]
async fn unknown_path_is_404() {
    let server = common::spawn_backend(&common::test_config()).await;
    let res = common::client().get(server.url("/nope")).send().await.unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn malformed_request_line_gets_400_and_close() {
    let server = common::spawn_backend(&common::test_config()).await;
    let reply = common::raw_exchange(server.addr, b"NONSENSE\r\n\r\n").await;
    assert!(reply.starts_with("HTTP/1.1 400"), "{}", reply);
    assert!(reply.contains("Connection: close"));
}

#[tokio::test]
async fn non_identity_transfer_encoding_is_501() {
    let server = common::spawn_backend(&common::test_config()).await;
    let reply = common::raw_exchange(
        server.addr,
        b"POST /echo HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: gzip\r\n\r\n",
    )
    .await;
    assert!(reply.starts_with("HTTP/1.1 501"), "{}", reply);
}

#[tokio::test]
async fn oversized_body_is_413() {
    let mut config = common::test_config();
    config.limits.max_body_bytes = 16;
    let server = common::spawn_backend(&config).await;
    let reply = common::raw_exchange(
        server.addr,
        b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 100\r\n\r\n",
    )
    .await;
    assert!(reply.starts_with("HTTP/1.1 413"), "{}", reply);
}

#[tokio::test]
async fn pipelined_requests_are_answered_in_order() {
    let server = common::spawn_backend(&common::test_config()).await;
    let reply = common::raw_exchange(
        server.addr,
        b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Type: text/plain\r\nContent-Length: 3\r\n\r\none\
          POST /echo HTTP/1.1\r\nHost: x\r\nContent-Type: text/plain\r\nContent-Length: 3\r\nConnection: close\r\n\r\ntwo",
    )
    .await;
    let first = reply.find("one").unwrap();
    let second = reply.find("two").unwrap();
    assert!(first < second);
    assert_eq!(reply.matches("HTTP/1.1 200").count(), 2);
}
