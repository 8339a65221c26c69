//! # texhub-database
//!
//! PostgreSQL connection management and the primary-store side of the
//! epoch protocol. Schema management lives with the web application.

pub mod connection;
pub mod repositories;

pub use connection::DatabasePool;
pub use repositories::EpochRepository;
