//! Forced disconnects after epoch bumps, and shutdown of live sessions.

use std::sync::Arc;

use serde_json::json;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use texhub_auth::PrivilegeLevel;
use texhub_core::types::ProjectId;

use super::helpers::{TestServer, next_close, next_json};

#[tokio::test]
async fn test_revoking_a_user_disconnects_only_their_clients() {
    let server = TestServer::start().await;
    let project = ProjectId::new();
    let (mut alice, alice_id, alice_boot) = server.join(project).await;
    let (mut bob, _, _) = server.join(project).await;
    next_json(&mut alice).await;

    let epoch = server
        .engine
        .revoker
        .revoke_user(project, alice_id, "removed from project")
        .await
        .unwrap();
    assert_eq!(epoch, 2);

    let notice = next_json(&mut alice).await;
    assert_eq!(notice["name"], "forceDisconnect");
    assert_eq!(notice["payload"]["userId"], json!(alice_id));
    let close = next_close(&mut alice).await.expect("close frame");
    assert_eq!(close.code, CloseCode::Policy);
    assert_eq!(close.reason.as_str(), "removed from project");

    let left = next_json(&mut bob).await;
    assert_eq!(left["name"], "clientDisconnected");
    assert_eq!(left["payload"]["publicId"], alice_boot["bootstrap"]["publicId"]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_old_token_is_refused_after_revocation() {
    let server = TestServer::start().await;
    let project = ProjectId::new();
    let (_ws, alice_id, _) = server.join(project).await;
    let old_token = server.token(project, alice_id, PrivilegeLevel::ReadAndWrite);

    server
        .engine
        .revoker
        .revoke_user(project, alice_id, "password changed")
        .await
        .unwrap();

    let (_, first) = server.connect(&old_token).await;
    assert_eq!(first["bootstrapError"]["retryable"], false);

    let fresh = server.token(project, alice_id, PrivilegeLevel::ReadAndWrite);
    let (_, first) = server.connect(&fresh).await;
    assert!(first.get("bootstrap").is_some(), "{first}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_revoking_a_project_disconnects_everyone() {
    let server = TestServer::start().await;
    let project = ProjectId::new();
    let (mut alice, _, _) = server.join(project).await;
    let (mut bob, _, _) = server.join(project).await;
    next_json(&mut alice).await;

    server
        .engine
        .revoker
        .revoke_project(project, "sharing changed")
        .await
        .unwrap();

    for ws in [&mut alice, &mut bob] {
        let notice = next_json(ws).await;
        assert_eq!(notice["name"], "forceDisconnect");
        assert!(notice["payload"].get("userId").is_none());
        let close = next_close(ws).await.expect("close frame");
        assert_eq!(close.code, CloseCode::Policy);
    }
    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_sends_going_away() {
    let server = TestServer::start().await;
    let (mut ws, _, _) = server.join(ProjectId::new()).await;

    let engine = Arc::clone(&server.engine);
    let draining = tokio::spawn(async move { engine.shutdown().await });

    let close = next_close(&mut ws).await.expect("close frame");
    assert_eq!(close.code, CloseCode::Away);
    draining.await.unwrap();

    assert!(!server.engine.server.is_ready());
    assert_eq!(server.engine.rooms.client_count(), 0);
    server.shutdown().await;
}
