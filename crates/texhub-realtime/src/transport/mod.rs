//! Low-level WebSocket transport: raw HTTP/1.1 recognition and hijacking.

pub mod buffer;
pub mod handshake;
pub mod listener;
pub mod request;
pub mod response;
pub mod server;

pub use handshake::{ProtocolVersion, UpgradeRequest};
pub use listener::{BoxedIo, Listener};
pub use server::{ConnectionServer, UpgradeHandler};
