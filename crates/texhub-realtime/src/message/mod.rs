//! Wire formats: RPC frames exchanged with browsers and room events
//! exchanged between server processes.

pub mod types;

pub use types::{
    BootstrapError, BootstrapErrorBody, BootstrapInfo, BootstrapReply, ConnectedClient,
    LazySuccessBatch, RoomEvent, RoomMessage, RpcError, RpcRequest, RpcResponse,
};
