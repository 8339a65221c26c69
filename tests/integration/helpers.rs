//! Shared test helpers for integration tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use texhub_auth::{JwtHandler, PrivilegeLevel, ProjectJwtClaims};
use texhub_cache::memory::MemoryCacheProvider;
use texhub_core::config::AppConfig;
use texhub_core::error::AppError;
use texhub_core::result::AppResult;
use texhub_core::traits::{DocumentService, EpochField, EpochSource};
use texhub_core::types::{DocId, ProjectId, UserId};
use texhub_realtime::{EngineDeps, Listener, MemoryPubSub, RealtimeEngine};

pub const PRODUCT: &str = "texhub.test";
const SECRET: &str = "integration-secret-long-enough-for-hs512";

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Authoritative epochs; every entity starts at 1.
#[derive(Debug, Default)]
pub struct Epochs(Mutex<HashMap<String, i64>>);

impl Epochs {
    pub fn current(&self, field: EpochField, entity_id: &str) -> i64 {
        *self
            .0
            .lock()
            .unwrap()
            .get(&format!("{field}:{entity_id}"))
            .unwrap_or(&1)
    }
}

#[async_trait]
impl EpochSource for Epochs {
    async fn fetch_epoch(&self, field: EpochField, entity_id: &str) -> AppResult<i64> {
        Ok(self.current(field, entity_id))
    }

    async fn increment_epoch(&self, field: EpochField, entity_id: &str) -> AppResult<i64> {
        let mut epochs = self.0.lock().unwrap();
        let epoch = epochs.entry(format!("{field}:{entity_id}")).or_insert(1);
        *epoch += 1;
        Ok(*epoch)
    }
}

/// Document-updater stand-in that records accepted updates.
#[derive(Debug, Default)]
pub struct Documents {
    pub updates: Mutex<Vec<(DocId, Value)>>,
}

#[async_trait]
impl DocumentService for Documents {
    async fn get_doc(&self, _project_id: ProjectId, doc_id: DocId) -> AppResult<Value> {
        Ok(json!({ "id": doc_id, "lines": ["\\documentclass{article}"], "version": 3 }))
    }

    async fn apply_update(&self, _project_id: ProjectId, doc_id: DocId, update: Value) -> AppResult<()> {
        if update.is_null() {
            return Err(AppError::validation("empty update"));
        }
        self.updates.lock().unwrap().push((doc_id, update));
        Ok(())
    }
}

/// A running server on an ephemeral port with in-memory backends.
pub struct TestServer {
    pub engine: Arc<RealtimeEngine>,
    pub addr: SocketAddr,
    pub epochs: Arc<Epochs>,
    pub documents: Arc<Documents>,
    tokens: JwtHandler<ProjectJwtClaims>,
    serving: Option<JoinHandle<AppResult<()>>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let mut config = AppConfig::default();
        config.server.listen_address = "127.0.0.1:0".into();
        config.server.readiness_grace_ms = 0;
        config.server.shutdown_grace_seconds = 2;
        config.server.buffer_size = 1024;
        config.server.max_buffer_fills = 2;
        config.auth.jwt_secret = SECRET.into();
        config.realtime.product_domain = PRODUCT.into();
        config.realtime.write_timeout_ms = 2_000;
        tweak(&mut config);

        let epochs = Arc::new(Epochs::default());
        let documents = Arc::new(Documents::default());
        let engine = Arc::new(
            RealtimeEngine::new(
                &config,
                EngineDeps {
                    cache: Arc::new(MemoryCacheProvider::new()),
                    epoch_source: epochs.clone(),
                    pubsub: Arc::new(MemoryPubSub::new()),
                    documents: documents.clone(),
                },
            )
            .expect("engine"),
        );

        let listener = Listener::bind(&config.server.listen_address).await.expect("bind");
        let addr = listener.tcp_addr().expect("tcp address");
        let serving = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.serve(listener).await })
        };

        Self {
            engine,
            addr,
            epochs,
            documents,
            tokens: JwtHandler::new(&config.auth).expect("jwt"),
            serving: Some(serving),
        }
    }

    /// A signed project token carrying the current epochs.
    pub fn token(&self, project_id: ProjectId, user_id: UserId, privilege: PrivilegeLevel) -> String {
        let mut claims = ProjectJwtClaims {
            expires_at: 0,
            project_id,
            user_id,
            privilege_level: privilege,
            project_epoch: self.epochs.current(EpochField::Project, &project_id.to_string()),
            user_epoch: self.epochs.current(EpochField::User, &user_id.to_string()),
            is_token_member: false,
            is_restricted_user: false,
        };
        self.tokens.set_expiry_and_sign(&mut claims).expect("sign")
    }

    /// Open a v8 connection and return the first frame the server sends.
    pub async fn connect(&self, token: &str) -> (Client, Value) {
        let mut request = format!("ws://{}/socket", self.addr)
            .into_client_request()
            .expect("request");
        let protocols = format!("v8.real-time.{PRODUCT}, {token}.bootstrap.v8.real-time.{PRODUCT}");
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_str(&protocols).expect("header"));
        let (mut ws, response) = tokio_tungstenite::connect_async(request).await.expect("connect");
        assert_eq!(
            response.headers().get("Sec-WebSocket-Protocol").unwrap(),
            &format!("v8.real-time.{PRODUCT}")
        );
        let first = next_json(&mut ws).await;
        (ws, first)
    }

    /// Connect a fresh read-write user to `project_id` and consume the
    /// bootstrap frame.
    pub async fn join(&self, project_id: ProjectId) -> (Client, UserId, Value) {
        let user_id = UserId::new();
        let token = self.token(project_id, user_id, PrivilegeLevel::ReadAndWrite);
        let (ws, first) = self.connect(&token).await;
        assert!(first.get("bootstrap").is_some(), "unexpected first frame {first}");
        (ws, user_id, first)
    }

    /// Send raw bytes and read until the server closes.
    pub async fn raw(&self, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(self.addr).await.expect("tcp");
        stream.write_all(request).await.expect("write");
        let mut response = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
            .await
            .expect("server closed in time")
            .expect("read");
        String::from_utf8_lossy(&response).into_owned()
    }

    pub async fn shutdown(mut self) {
        self.engine.shutdown().await;
        if let Some(serving) = self.serving.take() {
            serving.await.expect("join").expect("serve");
        }
    }
}

/// Next text frame as JSON, skipping pings.
pub async fn next_json(ws: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("frame");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

/// Wait for the server's close frame.
pub async fn next_close(ws: &mut Client) -> Option<CloseFrame> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("close in time");
        match message {
            Some(Ok(Message::Close(frame))) => return frame,
            Some(Ok(Message::Text(text))) => panic!("unexpected frame before close: {text}"),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

pub async fn send_rpc(ws: &mut Client, rpc: Value) {
    ws.send(Message::text(rpc.to_string())).await.expect("send");
}
