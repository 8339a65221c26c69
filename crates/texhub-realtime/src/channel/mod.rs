//! Room channels over the pub/sub backend.

pub mod manager;
pub mod naming;

pub use manager::{ChannelEvent, ChannelManager};
