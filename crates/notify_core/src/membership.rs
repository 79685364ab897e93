use std::sync::Arc;

use anyhow::Context;
use futures::future::try_join_all;
use shared::{
    domain::{GroupId, UserId},
    protocol::UserProfile,
};
use tracing::debug;

use crate::{error::MembershipError, resource_cache::ResourceCache, BackendService};

/// Resolves group members to profiles, once per group per session.
///
/// A resolution fails as a whole when any member lookup fails and nothing is
/// cached for that group, so the next caller tries again.
pub struct MembershipResolver {
    backend: Arc<dyn BackendService>,
    cache: ResourceCache<GroupId, Arc<Vec<UserProfile>>>,
}

impl MembershipResolver {
    pub fn new(backend: Arc<dyn BackendService>) -> Self {
        Self {
            backend,
            cache: ResourceCache::without_expiry(),
        }
    }

    pub async fn resolve_members(
        &self,
        group_id: &GroupId,
        member_ids: &[UserId],
    ) -> Result<Arc<Vec<UserProfile>>, MembershipError> {
        let backend = Arc::clone(&self.backend);
        let member_ids = member_ids.to_vec();
        self.cache
            .get(group_id.clone(), false, move |group_id| async move {
                debug!(
                    group_id = %group_id,
                    members = member_ids.len(),
                    "membership: resolving profiles"
                );
                let backend = &backend;
                let profiles = try_join_all(member_ids.iter().map(|member_id| async move {
                    backend
                        .fetch_user_profile(member_id)
                        .await
                        .with_context(|| format!("failed to fetch profile for {member_id}"))
                }))
                .await?;
                Ok::<_, anyhow::Error>(Arc::new(profiles))
            })
            .await
            .map_err(|source| MembershipError::Resolution {
                group_id: group_id.clone(),
                source,
            })
    }

    pub async fn cached(&self, group_id: &GroupId) -> Option<Arc<Vec<UserProfile>>> {
        self.cache.cached(group_id).await
    }

    pub async fn release(&self) {
        self.cache.clear().await;
    }
}
