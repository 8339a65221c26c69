//! Key builders for every Redis entry the real-time layer owns.
//!
//! Centralising key construction prevents typos and makes it easy
//! to find every key the application uses.

use texhub_core::traits::EpochField;
use texhub_core::types::ProjectId;

/// Lock key: `<namespace>{<entityId>}`.
///
/// The braces make the entity id the Redis Cluster hash tag.
pub fn lock(namespace: &str, entity_id: &str) -> String {
    format!("{namespace}{{{entity_id}}}")
}

/// Epoch key: `epoch:<field>:<entityId>`.
pub fn epoch(field: EpochField, entity_id: &str) -> String {
    format!("epoch:{}:{entity_id}", field.as_str())
}

/// Hash of connected clients for a project: `connected:{<projectId>}`.
pub fn connected_clients(project_id: ProjectId) -> String {
    format!("connected:{{{}}}", project_id.to_hex())
}
