use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use serde_json::json;
use tokio_tungstenite::tungstenite::{self, protocol::frame::coding::CloseCode};
use uuid::Uuid;

use crate::setup::{TEST_TIMEOUT, TestTunnelServer, spawn_kiosk_replier};

mod setup;

#[tokio::test]
async fn happy_path_roundtrip() -> eyre::Result<()> {
    let server = TestTunnelServer::start(false, Duration::from_secs(5)).await?;
    let token = server.create_kiosk("K1").await?;
    let ws = server.connect_kiosk(&token).await?;
    server.wait_until_connected("K1").await?;

    let _replier = spawn_kiosk_replier(ws, |_| json!({"status": "ok", "transaction_id": "T1"}));

    let (status, body) = server.send("K1", json!({"sum": 100})).await?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["transaction_id"], "T1");
    // the generated correlation id must be present in the response
    let request_id = body["request_id"].as_str().expect("request_id present");
    Uuid::parse_str(request_id).expect("request_id is a uuid");
    Ok(())
}

#[tokio::test]
async fn missing_kiosk_header_is_a_structural_error() -> eyre::Result<()> {
    let server = TestTunnelServer::start(false, Duration::from_secs(5)).await?;
    let response = server
        .client
        .post(server.url("/send"))
        .json(&json!({"sum": 100}))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 400);
    Ok(())
}

#[tokio::test]
async fn unknown_kiosk_is_an_in_band_error() -> eyre::Result<()> {
    let server = TestTunnelServer::start(false, Duration::from_secs(5)).await?;
    let (status, body) = server.send("K2", json!({})).await?;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({"status": "error", "error": "kiosk_not_found", "kiosk_id": "K2"})
    );
    Ok(())
}

#[tokio::test]
async fn disabled_kiosk_is_an_in_band_error() -> eyre::Result<()> {
    let server = TestTunnelServer::start(false, Duration::from_secs(5)).await?;
    server.create_kiosk("K1").await?;
    server
        .registry
        .set_kiosk_enabled(&"K1".into(), false)
        .await?;
    let (status, body) = server.send("K1", json!({})).await?;
    assert_eq!(status, 200);
    assert_eq!(body["error"], "kiosk_disabled");
    Ok(())
}

#[tokio::test]
async fn offline_kiosk_is_an_in_band_error() -> eyre::Result<()> {
    let server = TestTunnelServer::start(false, Duration::from_secs(5)).await?;
    server.create_kiosk("K1").await?;
    let (status, body) = server.send("K1", json!({})).await?;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({"status": "error", "error": "kiosk_offline", "kiosk_id": "K1"})
    );
    Ok(())
}

#[tokio::test]
async fn unresponsive_kiosk_times_out_and_counts_one_error() -> eyre::Result<()> {
    let server = TestTunnelServer::start(false, Duration::from_millis(500)).await?;
    let token = server.create_kiosk("K1").await?;
    // connected but silent: frames are read and dropped
    let mut ws = server.connect_kiosk(&token).await?;
    server.wait_until_connected("K1").await?;
    let _reader = tokio::spawn(async move { while ws.next().await.is_some() {} });

    let (status, body) = server.send("K1", json!({"sum": 100})).await?;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({"status": "error", "error": "timeout", "kiosk_id": "K1"})
    );

    let stats = server.registry.stats().await?;
    assert_eq!(stats.errors_total, 1);
    assert_eq!(stats.requests_total, 1);
    Ok(())
}

#[tokio::test]
async fn late_reply_is_discarded_and_later_requests_work() -> eyre::Result<()> {
    let server = TestTunnelServer::start(false, Duration::from_millis(300)).await?;
    let token = server.create_kiosk("K1").await?;
    let mut ws = server.connect_kiosk(&token).await?;
    server.wait_until_connected("K1").await?;

    // first request: answer well after the server deadline
    let (_, body) = server.send("K1", json!({"attempt": 1})).await?;
    assert_eq!(body["error"], "timeout");

    let frame = tokio::time::timeout(TEST_TIMEOUT, ws.next())
        .await?
        .expect("frame")
        .expect("frame readable");
    let request: tunnel_types::wire::TunnelRequest = match frame {
        tungstenite::Message::Text(text) => serde_json::from_str(text.as_str())?,
        other => panic!("expected text frame, got {other:?}"),
    };
    let late_reply = json!({
        "request_id": request.request_id,
        "status": "ok",
    });
    ws.send(tungstenite::Message::text(late_reply.to_string()))
        .await?;

    // the late reply must not leak into the next call
    let _replier = spawn_kiosk_replier(ws, |_| json!({"status": "ok", "attempt": 2}));
    let (_, body) = server.send("K1", json!({"attempt": 2})).await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["attempt"], 2);
    assert_eq!(server.connection_manager.pending_requests(), 0);
    Ok(())
}

#[tokio::test]
async fn sensitive_headers_are_redacted_on_the_tunnel() -> eyre::Result<()> {
    let server = TestTunnelServer::start(false, Duration::from_secs(5)).await?;
    let token = server.create_kiosk("K1").await?;
    let ws = server.connect_kiosk(&token).await?;
    server.wait_until_connected("K1").await?;

    let _replier = spawn_kiosk_replier(ws, |request| {
        json!({"status": "ok", "echo_headers": request.headers})
    });

    let response = server
        .client
        .post(server.url("/send"))
        .header("Header-Kiosk-Id", "K1")
        .header("Authorization", "Bearer secret")
        .header("X-Custom", "visible")
        .json(&json!({}))
        .send()
        .await?;
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["echo_headers"]["authorization"], "***REDACTED***");
    assert_eq!(body["echo_headers"]["x-custom"], "visible");
    assert_eq!(body["echo_headers"]["header-kiosk-id"], "K1");
    Ok(())
}

#[tokio::test]
async fn duplicate_connection_is_rejected_while_first_is_alive() -> eyre::Result<()> {
    let server = TestTunnelServer::start(false, Duration::from_secs(5)).await?;
    let token = server.create_kiosk("K1").await?;
    let ws1 = server.connect_kiosk(&token).await?;
    server.wait_until_connected("K1").await?;

    let mut ws2 = server.connect_kiosk(&token).await?;
    let close = tokio::time::timeout(TEST_TIMEOUT, async {
        loop {
            match ws2.next().await {
                Some(Ok(tungstenite::Message::Close(frame))) => break frame,
                Some(Ok(_)) => continue,
                other => panic!("expected close frame, got {other:?}"),
            }
        }
    })
    .await?
    .expect("close frame with payload");
    assert_eq!(close.code, CloseCode::Policy);
    assert_eq!(close.reason.as_str(), "Kiosk already connected");

    // the first socket keeps serving
    let _replier = spawn_kiosk_replier(ws1, |_| json!({"status": "ok", "socket": 1}));
    let (_, body) = server.send("K1", json!({})).await?;
    assert_eq!(body["socket"], 1);
    Ok(())
}

#[tokio::test]
async fn duplicate_connection_replaces_when_allowed() -> eyre::Result<()> {
    let server = TestTunnelServer::start(true, Duration::from_secs(5)).await?;
    let token = server.create_kiosk("K1").await?;
    let mut ws1 = server.connect_kiosk(&token).await?;
    server.wait_until_connected("K1").await?;

    let ws2 = server.connect_kiosk(&token).await?;

    // the displaced socket receives a graceful close
    let close = tokio::time::timeout(TEST_TIMEOUT, async {
        loop {
            match ws1.next().await {
                Some(Ok(tungstenite::Message::Close(frame))) => break frame,
                Some(Ok(_)) => continue,
                other => panic!("expected close frame, got {other:?}"),
            }
        }
    })
    .await?
    .expect("close frame with payload");
    assert_eq!(close.code, CloseCode::Normal);
    assert_eq!(close.reason.as_str(), "Replaced by new connection");

    // and the new socket is the active entry
    let _replier = spawn_kiosk_replier(ws2, |_| json!({"status": "ok", "socket": 2}));
    let (_, body) = server.send("K1", json!({})).await?;
    assert_eq!(body["socket"], 2);
    Ok(())
}

#[tokio::test]
async fn invalid_token_is_closed_with_policy_violation() -> eyre::Result<()> {
    let server = TestTunnelServer::start(false, Duration::from_secs(5)).await?;
    let mut ws = server.connect_kiosk("garbage").await?;
    let close = tokio::time::timeout(TEST_TIMEOUT, ws.next())
        .await?
        .expect("frame")
        .expect("frame readable");
    match close {
        tungstenite::Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Policy);
            assert_eq!(frame.reason.as_str(), "Invalid token");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn stored_token_must_match_presented_token() -> eyre::Result<()> {
    let server = TestTunnelServer::start(false, Duration::from_secs(5)).await?;
    server.create_kiosk("K1").await?;
    // a second token for the same kiosk verifies but differs from the stored one
    let other_token = server
        .verifier
        .issue(&"K1".into(), Duration::from_secs(7200))?;
    let mut ws = server.connect_kiosk(&other_token).await?;
    let close = tokio::time::timeout(TEST_TIMEOUT, ws.next())
        .await?
        .expect("frame")
        .expect("frame readable");
    match close {
        tungstenite::Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Policy);
            assert_eq!(frame.reason.as_str(), "Token mismatch");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn health_and_introspection_reflect_connections() -> eyre::Result<()> {
    let server = TestTunnelServer::start(false, Duration::from_secs(5)).await?;
    let token = server.create_kiosk("K1").await?;
    let _ws = server.connect_kiosk(&token).await?;
    server.wait_until_connected("K1").await?;

    let health: serde_json::Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["active_kiosks"], 1);
    assert_eq!(health["total_kiosks"], 1);

    let kiosks: serde_json::Value = server
        .client
        .get(server.url("/api/kiosks"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(kiosks["online"], 1);
    assert_eq!(kiosks["kiosks"][0]["id"], "K1");
    assert_eq!(kiosks["kiosks"][0]["online"], true);

    let history: serde_json::Value = server
        .client
        .get(server.url("/api/history"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(history["history"][0]["kiosk_id"], "K1");
    assert_eq!(history["history"][0]["event"], "connected");

    let metrics = server
        .client
        .get(server.url("/metrics"))
        .send()
        .await?
        .text()
        .await?;
    // the per-test recorder is not globally installed, the endpoint just
    // has to answer with the text exposition
    assert!(metrics.is_empty() || metrics.contains("kiosk"));
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_are_correlated_not_ordered() -> eyre::Result<()> {
    let server = TestTunnelServer::start(false, Duration::from_secs(5)).await?;
    let token = server.create_kiosk("K1").await?;
    let ws = server.connect_kiosk(&token).await?;
    server.wait_until_connected("K1").await?;

    // echo the request body so each caller can check it got its own answer
    let _replier = spawn_kiosk_replier(ws, |request| {
        json!({"status": "ok", "echo": request.body.clone()})
    });

    let mut join_set = tokio::task::JoinSet::new();
    for i in 0..10 {
        let client = server.client.clone();
        let url = server.url("/send");
        join_set.spawn(async move {
            let body: serde_json::Value = client
                .post(url)
                .header("Header-Kiosk-Id", "K1")
                .json(&json!({"i": i}))
                .send()
                .await
                .expect("request sent")
                .json()
                .await
                .expect("json body");
            (i, body)
        });
    }
    let results = join_set.join_all().await;
    assert_eq!(results.len(), 10);
    for (i, body) in results {
        assert_eq!(body["status"], "ok");
        assert_eq!(body["echo"]["i"], i);
    }
    Ok(())
}
