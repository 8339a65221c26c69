//! Bootstrap, RPCs, and room fan-out through real WebSocket clients.

use std::time::Duration;

use futures::SinkExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use texhub_auth::PrivilegeLevel;
use texhub_core::traits::{EpochField, EpochSource};
use texhub_core::types::{DocId, ProjectId, UserId};

use super::helpers::{PRODUCT, TestServer, next_close, next_json, send_rpc};

#[tokio::test]
async fn test_bootstrap_lists_the_new_client() {
    let server = TestServer::start().await;
    let project = ProjectId::new();
    let user = UserId::new();

    let (_ws, first) = server
        .connect(&server.token(project, user, PrivilegeLevel::Owner))
        .await;
    let bootstrap = &first["bootstrap"];
    assert_eq!(bootstrap["projectId"], json!(project));
    assert_eq!(bootstrap["userId"], json!(user));
    assert_eq!(bootstrap["privilegeLevel"], "owner");
    let clients = bootstrap["connectedClients"].as_array().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0]["publicId"], bootstrap["publicId"]);

    assert_eq!(server.engine.rooms.client_count(), 1);
    assert_eq!(server.engine.metrics.snapshot().bootstraps_ok, 1);
    server.shutdown().await;
}

#[tokio::test]
async fn test_silent_client_is_closed_and_forgotten() {
    let server = TestServer::start_with(|config| {
        config.realtime.heartbeat_interval_ms = 300;
        config.realtime.idle_grace_ms = 200;
    })
    .await;
    let project = ProjectId::new();

    let (mut quiet, _, _) = server.join(project).await;
    let frame = next_close(&mut quiet).await.expect("close frame");
    assert_eq!(frame.code, CloseCode::Away);
    assert_eq!(frame.reason.as_str(), "idle timeout");

    tokio::time::timeout(Duration::from_secs(5), async {
        while server.engine.rooms.client_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("room left in time");

    let (_ws, _, first) = server.join(project).await;
    let clients = first["bootstrap"]["connectedClients"].as_array().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0]["publicId"], first["bootstrap"]["publicId"]);
    server.shutdown().await;
}

#[tokio::test]
async fn test_v7_bootstrap_from_query() {
    let server = TestServer::start().await;
    let token = server.token(ProjectId::new(), UserId::new(), PrivilegeLevel::ReadOnly);

    let mut request = format!("ws://{}/socket?bootstrap={token}", server.addr)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_str(&format!("v7.real-time.{PRODUCT}")).unwrap(),
    );
    let (mut ws, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(
        response.headers().get("Sec-WebSocket-Protocol").unwrap(),
        &format!("v7.real-time.{PRODUCT}")
    );
    let first = next_json(&mut ws).await;
    assert_eq!(first["bootstrap"]["privilegeLevel"], "readOnly");
    server.shutdown().await;
}

#[tokio::test]
async fn test_payloadless_successes_are_acknowledged_lazily() {
    let server = TestServer::start().await;
    let (mut ws, _, _) = server.join(ProjectId::new()).await;

    send_rpc(&mut ws, json!({"action": "ping", "callback": 1})).await;
    send_rpc(&mut ws, json!({"action": "ping", "callback": 2})).await;
    send_rpc(&mut ws, json!({"action": "ping"})).await;

    let mut acked = Vec::new();
    while acked.len() < 2 {
        let frame = next_json(&mut ws).await;
        let callbacks = frame["lazySuccess"].as_array().expect("lazy success frame");
        acked.extend(callbacks.iter().map(|c| c.as_u64().unwrap()));
    }
    assert_eq!(acked, vec![1, 2]);
    server.shutdown().await;
}

#[tokio::test]
async fn test_join_doc_returns_snapshot() {
    let server = TestServer::start().await;
    let (mut ws, _, _) = server.join(ProjectId::new()).await;
    let doc = DocId::new();

    send_rpc(&mut ws, json!({"action": "joinDoc", "callback": 3, "body": {"docId": doc}})).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["callback"], 3);
    assert_eq!(reply["body"]["doc"]["id"], json!(doc));
    assert_eq!(reply["body"]["doc"]["version"], 3);
    assert!(reply["latency"].is_u64());
    assert!(reply.get("error").is_none());
    server.shutdown().await;
}

#[tokio::test]
async fn test_updates_fan_out_to_other_members() {
    let server = TestServer::start().await;
    let project = ProjectId::new();
    let (mut alice, _, _) = server.join(project).await;
    let (mut bob, _, bob_boot) = server.join(project).await;

    let joined = next_json(&mut alice).await;
    assert_eq!(joined["name"], "clientUpdated");
    assert_eq!(joined["payload"]["publicId"], bob_boot["bootstrap"]["publicId"]);

    let doc = DocId::new();
    let update = json!({"op": [{"p": 0, "i": "\\begin{document}"}], "v": 3});
    send_rpc(
        &mut alice,
        json!({"action": "applyUpdate", "callback": 7, "body": {"docId": doc, "update": update}}),
    )
    .await;

    assert_eq!(next_json(&mut alice).await, json!({"lazySuccess": [7]}));
    let relayed = next_json(&mut bob).await;
    assert_eq!(relayed["name"], "update");
    assert_eq!(relayed["payload"]["docId"], json!(doc));
    assert_eq!(relayed["payload"]["update"], update);

    assert_eq!(server.documents.updates.lock().unwrap().len(), 1);
    server.shutdown().await;
}

#[tokio::test]
async fn test_read_only_members_cannot_write() {
    let server = TestServer::start().await;
    let token = server.token(ProjectId::new(), UserId::new(), PrivilegeLevel::ReadOnly);
    let (mut ws, _) = server.connect(&token).await;

    send_rpc(
        &mut ws,
        json!({"action": "applyUpdate", "callback": 9, "body": {"docId": DocId::new(), "update": {}}}),
    )
    .await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["callback"], 9);
    assert_eq!(reply["error"]["code"], "NOT_AUTHORIZED");
    assert_eq!(reply["error"]["retryable"], false);
    assert!(server.documents.updates.lock().unwrap().is_empty());
    server.shutdown().await;
}

#[tokio::test]
async fn test_stale_epoch_is_rejected_with_one_frame() {
    let server = TestServer::start().await;
    let project = ProjectId::new();
    let user = UserId::new();
    let token = server.token(project, user, PrivilegeLevel::Owner);
    server
        .epochs
        .increment_epoch(EpochField::User, &user.to_string())
        .await
        .unwrap();

    let (mut ws, first) = server.connect(&token).await;
    assert_eq!(first["bootstrapError"]["retryable"], false);
    let close = next_close(&mut ws).await.expect("close frame");
    assert_eq!(close.code, CloseCode::Policy);

    assert_eq!(server.engine.rooms.client_count(), 0);
    assert_eq!(server.engine.metrics.snapshot().bootstraps_rejected, 1);
    server.shutdown().await;
}

#[tokio::test]
async fn test_garbage_token_is_rejected() {
    let server = TestServer::start().await;
    let (mut ws, first) = server.connect("not-a-token").await;
    assert!(first["bootstrapError"]["message"].as_str().unwrap().contains("UNAUTHORIZED"));
    assert!(next_close(&mut ws).await.is_some());
    server.shutdown().await;
}

#[tokio::test]
async fn test_leave_project_closes_and_announces() {
    let server = TestServer::start().await;
    let project = ProjectId::new();
    let (mut alice, _, alice_boot) = server.join(project).await;
    let (mut bob, _, _) = server.join(project).await;
    next_json(&mut alice).await;

    send_rpc(&mut alice, json!({"action": "leaveProject"})).await;
    let close = next_close(&mut alice).await.expect("close frame");
    assert_eq!(close.code, CloseCode::Normal);

    let left = next_json(&mut bob).await;
    assert_eq!(left["name"], "clientDisconnected");
    assert_eq!(left["payload"]["publicId"], alice_boot["bootstrap"]["publicId"]);
    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_rpc_closes_the_connection() {
    let server = TestServer::start().await;
    let (mut ws, _, _) = server.join(ProjectId::new()).await;

    ws.send(Message::text("{not json")).await.unwrap();
    let close = next_close(&mut ws).await.expect("close frame");
    assert_eq!(close.code, CloseCode::Invalid);
    server.shutdown().await;
}
