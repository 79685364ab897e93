use std::{sync::Arc, time::Duration};

use shared::{domain::UserId, protocol::Group};
use tracing::debug;

use crate::{error::FetchError, resource_cache::ResourceCache, BackendService};

pub const DEFAULT_GROUP_LIST_TTL: Duration = Duration::from_secs(30);

/// The principal's group list, cached with a TTL and fetched at most once at
/// a time.
///
/// A returned `Arc` stays identical across calls until the list contents
/// change. A refetch that yields an equal list hands back the previous `Arc`,
/// so callers can detect a membership change by pointer identity.
pub struct GroupDirectory {
    backend: Arc<dyn BackendService>,
    cache: ResourceCache<UserId, Arc<Vec<Group>>>,
}

impl GroupDirectory {
    pub fn new(backend: Arc<dyn BackendService>, ttl: Duration) -> Self {
        Self {
            backend,
            cache: ResourceCache::new(ttl),
        }
    }

    pub async fn groups(
        &self,
        principal: &UserId,
        force_refresh: bool,
    ) -> Result<Arc<Vec<Group>>, FetchError> {
        let backend = Arc::clone(&self.backend);
        let previous = self.cache.cached(principal).await;
        self.cache
            .get(principal.clone(), force_refresh, move |principal| async move {
                debug!(principal = %principal, "groups: fetching group list");
                let groups = backend.fetch_user_groups(&principal).await?;
                match previous {
                    Some(previous) if *previous == groups => {
                        debug!(principal = %principal, "groups: list unchanged");
                        Ok::<_, anyhow::Error>(previous)
                    }
                    _ => Ok::<_, anyhow::Error>(Arc::new(groups)),
                }
            })
            .await
    }

    pub async fn invalidate(&self, principal: &UserId) {
        self.cache.invalidate(principal).await;
    }
}
