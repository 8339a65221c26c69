//! Access revocation: epoch bump plus disconnect of affected clients.
//!
//! Runs under the project's document lock so concurrent permission changes
//! on one project are serialised. The epoch bump tombstones the cached
//! epoch before committing, so tokens carrying the old epoch stop passing
//! bootstrap right away; the room event then closes the clients that are
//! already connected on any process.

use std::sync::Arc;

use tracing::info;

use texhub_cache::{DocumentLock, EpochCache};
use texhub_core::result::AppResult;
use texhub_core::traits::{EpochField, EpochSource};
use texhub_core::types::{ProjectId, UserId};

use crate::message::{RoomEvent, RoomMessage};

use super::room::RoomManager;

/// Revokes user or project access. The cached epoch is tombstoned before
/// the primary bump, and every node is told to disconnect afterwards.
#[derive(Debug, Clone)]
pub struct AccessRevoker {
    lock: DocumentLock,
    epochs: EpochCache,
    source: Arc<dyn EpochSource>,
    rooms: Arc<RoomManager>,
}

impl AccessRevoker {
    /// Build a revoker over the shared lock, cache and database epoch source.
    pub fn new(
        lock: DocumentLock,
        epochs: EpochCache,
        source: Arc<dyn EpochSource>,
        rooms: Arc<RoomManager>,
    ) -> Self {
        Self {
            lock,
            epochs,
            source,
            rooms,
        }
    }

    /// Revoke one user's access to a project. Returns the user's new epoch.
    pub async fn revoke_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        reason: &str,
    ) -> AppResult<i64> {
        let epoch = self
            .bump_and_disconnect(project_id, EpochField::User, &user_id.to_string(), Some(user_id), reason)
            .await?;
        info!(project_id = %project_id, user_id = %user_id, epoch, "User access revoked");
        Ok(epoch)
    }

    /// Invalidate every token of a project, e.g. after a sharing change.
    /// Returns the project's new epoch.
    pub async fn revoke_project(&self, project_id: ProjectId, reason: &str) -> AppResult<i64> {
        let epoch = self
            .bump_and_disconnect(project_id, EpochField::Project, &project_id.to_string(), None, reason)
            .await?;
        info!(project_id = %project_id, epoch, "Project access revoked");
        Ok(epoch)
    }

    async fn bump_and_disconnect(
        &self,
        project_id: ProjectId,
        field: EpochField,
        entity_id: &str,
        user_id: Option<UserId>,
        reason: &str,
    ) -> AppResult<i64> {
        let epochs = self.epochs.clone();
        let source = Arc::clone(&self.source);
        let rooms = Arc::clone(&self.rooms);
        let message = RoomMessage {
            source: None,
            event: RoomEvent::ForceDisconnect {
                user_id,
                reason: reason.to_string(),
            },
        };
        self.lock
            .run_with_lock(&project_id.to_hex(), |_deadline| async move {
                let epoch = epochs.bump_epoch(field, entity_id, source.as_ref()).await?;
                rooms.publish(project_id, &message).await?;
                Ok(epoch)
            })
            .await
    }
}
