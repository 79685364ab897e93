use std::sync::Arc;

use shared::domain::GroupId;
use thiserror::Error;

/// Failure of a coalesced fetch.
///
/// Every caller attached to the same in-flight fetch receives a clone of the
/// same error, so the underlying cause is shared behind an `Arc`.
#[derive(Debug, Clone, Error)]
#[error("{0:#}")]
pub struct FetchError(Arc<anyhow::Error>);

impl From<anyhow::Error> for FetchError {
    fn from(value: anyhow::Error) -> Self {
        Self(Arc::new(value))
    }
}

#[derive(Debug, Clone, Error)]
pub enum MembershipError {
    #[error("failed to resolve members of group {group_id}: {source}")]
    Resolution {
        group_id: GroupId,
        source: FetchError,
    },
}
