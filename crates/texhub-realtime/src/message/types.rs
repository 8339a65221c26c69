//! RPC and room event type definitions.

use serde::{Deserialize, Serialize};

use texhub_auth::PrivilegeLevel;
use texhub_core::error::AppError;
use texhub_core::types::{DocId, ProjectId, PublicId, UserId};

/// RPC sent by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Action name, e.g. `joinDoc`.
    pub action: String,
    /// Client-chosen correlation id. Fire-and-forget when absent.
    #[serde(default)]
    pub callback: Option<u64>,
    /// Action arguments.
    #[serde(default)]
    pub body: serde_json::Value,
}

/// Error carried by an RPC response or a rejection frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&AppError> for RpcError {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.kind.to_string(),
            message: err.message.clone(),
            retryable: err.is_retryable(),
        }
    }
}

/// Response to an RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub callback: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Server-side processing time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Successful response with a payload.
    pub fn ok(callback: u64, body: serde_json::Value, latency_ms: u64) -> Self {
        Self {
            callback,
            body: Some(body),
            latency: Some(latency_ms),
            error: None,
        }
    }

    /// Failed response.
    pub fn failed(callback: u64, err: &AppError) -> Self {
        Self {
            callback,
            body: None,
            latency: None,
            error: Some(RpcError::from(err)),
        }
    }
}

/// Acknowledgement of several payload-less successes in one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LazySuccessBatch {
    #[serde(rename = "lazySuccess")]
    pub callbacks: Vec<u64>,
}

/// A client as listed in the project's presence hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedClient {
    pub public_id: PublicId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<DocId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Unix seconds of the last update.
    pub last_updated_at: i64,
}

/// First frame after a successful bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapReply {
    pub bootstrap: BootstrapInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapInfo {
    pub public_id: PublicId,
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub privilege_level: PrivilegeLevel,
    pub connected_clients: Vec<ConnectedClient>,
}

/// Terminal frame sent when bootstrap fails; the socket closes after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapError {
    #[serde(rename = "bootstrapError")]
    pub error: BootstrapErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapErrorBody {
    pub message: String,
    pub retryable: bool,
}

impl From<&AppError> for BootstrapError {
    fn from(err: &AppError) -> Self {
        Self {
            error: BootstrapErrorBody {
                message: err.to_string(),
                retryable: err.is_retryable(),
            },
        }
    }
}

/// Event fanned out to every process serving a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMessage {
    /// Client that caused the event; it does not get an echo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PublicId>,
    pub event: RoomEvent,
}

/// Events relayed to room members. Clients receive the event object as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload", rename_all = "camelCase")]
pub enum RoomEvent {
    /// A document update accepted by the editing service.
    #[serde(rename_all = "camelCase")]
    Update {
        doc_id: DocId,
        update: serde_json::Value,
    },
    /// Cursor/position change of a member.
    ClientUpdated(ConnectedClient),
    /// A member left.
    #[serde(rename_all = "camelCase")]
    ClientDisconnected { public_id: PublicId },
    /// Access changed; affected members must reconnect.
    #[serde(rename_all = "camelCase")]
    ForceDisconnect {
        /// Only this user's clients; every member when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        reason: String,
    },
}
