//! Core type definitions used across the TexHub workspace.

pub mod id;

pub use id::*;
