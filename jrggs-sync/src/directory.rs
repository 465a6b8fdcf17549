//! Contributor role directory
//!
//! Owned cache over the `contributors` table. The cache carries the table's
//! freshness token and reloads only when the token changes (or when forced),
//! so a derivation pass never works from roles older than the last write.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::db::contributors::{self, Contributor};
use crate::db::Store;
use crate::error::SyncResult;

/// Reviewer/developer classification used by the derivation engine
pub trait RoleLookup: Send + Sync {
    /// True when `account_id` may produce code-review events
    fn is_reviewer(&self, account_id: &str) -> bool;
}

/// Fixed role table
#[derive(Debug, Clone, Default)]
pub struct StaticRoles {
    roles: HashMap<String, String>,
    reviewer_roles: Vec<String>,
}

impl StaticRoles {
    pub fn new<I>(contributors: I, reviewer_roles: &[String]) -> Self
    where
        I: IntoIterator<Item = Contributor>,
    {
        Self {
            roles: contributors
                .into_iter()
                .map(|c| (c.id, c.role.to_lowercase()))
                .collect(),
            reviewer_roles: reviewer_roles.iter().map(|r| r.to_lowercase()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl RoleLookup for StaticRoles {
    fn is_reviewer(&self, account_id: &str) -> bool {
        self.roles
            .get(account_id)
            .is_some_and(|role| self.reviewer_roles.iter().any(|r| r == role))
    }
}

#[derive(Debug, Default)]
struct Cached {
    token: Option<(i64, i64)>,
    roles: StaticRoles,
}

/// Store-backed directory with token-based refresh
#[derive(Debug)]
pub struct ContributorDirectory {
    store: Store,
    reviewer_roles: Vec<String>,
    cache: RwLock<Cached>,
}

impl ContributorDirectory {
    pub fn new(store: Store, reviewer_roles: Vec<String>) -> Self {
        Self {
            store,
            reviewer_roles,
            cache: RwLock::new(Cached::default()),
        }
    }

    /// Current role table, reloaded if the stored token moved
    pub async fn snapshot(&self) -> SyncResult<StaticRoles> {
        let pool = self.store.pool()?;
        let token = contributors::freshness_token(pool).await?;

        {
            let cache = self.cache.read().await;
            if cache.token == Some(token) {
                return Ok(cache.roles.clone());
            }
        }

        self.reload(token).await
    }

    /// Reload regardless of the token
    pub async fn refresh(&self) -> SyncResult<StaticRoles> {
        let token = contributors::freshness_token(self.store.pool()?).await?;
        self.reload(token).await
    }

    async fn reload(&self, token: (i64, i64)) -> SyncResult<StaticRoles> {
        let all = contributors::all(self.store.pool()?).await?;
        let roles = StaticRoles::new(all, &self.reviewer_roles);
        debug!(contributors = roles.len(), "Contributor directory reloaded");

        let mut cache = self.cache.write().await;
        cache.token = Some(token);
        cache.roles = roles.clone();
        Ok(roles)
    }

    pub async fn upsert(&self, contributor: &Contributor) -> SyncResult<()> {
        contributors::upsert(self.store.pool()?, contributor).await?;
        Ok(())
    }
}
