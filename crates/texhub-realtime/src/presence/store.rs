//! Presence backed by a shared hash per project.
//!
//! Every process writes its own clients into `connected:{<projectId>}`
//! (field = public id, value = JSON [`ConnectedClient`]), so any process can
//! list the whole project. Each write refreshes the hash TTL, which cleans
//! up after processes that died without removing their clients.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use texhub_cache::keys;
use texhub_core::result::AppResult;
use texhub_core::traits::CacheProvider;
use texhub_core::types::{ProjectId, PublicId};

use crate::message::ConnectedClient;

#[derive(Debug, Clone)]
pub struct PresenceStore {
    cache: Arc<dyn CacheProvider>,
    ttl: Duration,
}

impl PresenceStore {
    /// `ttl` is refreshed on every write to a project's hash.
    pub fn new(cache: Arc<dyn CacheProvider>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Record or update a client.
    pub async fn set(&self, project_id: ProjectId, client: &ConnectedClient) -> AppResult<()> {
        let value = serde_json::to_string(client)?;
        self.cache
            .hash_set(
                &keys::connected_clients(project_id),
                &client.public_id.to_hex(),
                &value,
                self.ttl,
            )
            .await
    }

    /// Forget a client.
    pub async fn remove(&self, project_id: ProjectId, public_id: PublicId) -> AppResult<()> {
        self.cache
            .hash_delete(&keys::connected_clients(project_id), &public_id.to_hex())
            .await
    }

    /// Every client of a project, across all processes.
    pub async fn list(&self, project_id: ProjectId) -> AppResult<Vec<ConnectedClient>> {
        let fields = self
            .cache
            .hash_get_all(&keys::connected_clients(project_id))
            .await?;
        let mut clients = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            match serde_json::from_str::<ConnectedClient>(&value) {
                Ok(client) => clients.push(client),
                Err(e) => warn!(field = %field, error = %e, "Skipping unreadable presence entry"),
            }
        }
        clients.sort_by_key(|c| c.last_updated_at);
        Ok(clients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use texhub_cache::memory::MemoryCacheProvider;
    use texhub_core::types::{DocId, UserId};

    fn client(at: i64) -> ConnectedClient {
        ConnectedClient {
            public_id: PublicId::new(),
            user_id: UserId::new(),
            doc_id: Some(DocId::new()),
            row: Some(3),
            column: Some(14),
            last_updated_at: at,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_list_remove() {
        let cache = Arc::new(MemoryCacheProvider::new());
        let store = PresenceStore::new(cache.clone(), Duration::from_secs(60));
        let project = ProjectId::new();
        let (a, b) = (client(20), client(10));

        store.set(project, &a).await.unwrap();
        store.set(project, &b).await.unwrap();
        assert_eq!(store.list(project).await.unwrap(), vec![b.clone(), a.clone()]);
        assert_eq!(
            cache.ttl(&keys::connected_clients(project)),
            Some(Duration::from_secs(60))
        );

        store.remove(project, b.public_id).await.unwrap();
        assert_eq!(store.list(project).await.unwrap(), vec![a]);
        assert!(store.list(ProjectId::new()).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_entries_are_skipped() {
        let cache = Arc::new(MemoryCacheProvider::new());
        let store = PresenceStore::new(cache.clone(), Duration::from_secs(60));
        let project = ProjectId::new();
        cache
            .hash_set(
                &keys::connected_clients(project),
                "junk",
                "not json",
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        store.set(project, &client(1)).await.unwrap();
        assert_eq!(store.list(project).await.unwrap().len(), 1);
    }
}
