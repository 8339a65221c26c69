//! Session layer: bootstrapped clients, rooms, RPCs, revocation.

pub mod client;
pub mod revocation;
pub mod room;
pub mod rpc;

pub use client::RealtimeHandler;
pub use revocation::AccessRevoker;
pub use room::{ClientEntry, RoomManager};
pub use rpc::{ClientSession, RpcDispatcher, RpcOutcome};
