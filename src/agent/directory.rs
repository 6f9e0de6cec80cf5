//! Resolution of the logged-in OS account to a monitored-user id
//! through the external user directory.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::api;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    /// Maps an OS account name to the monitored-user id tracked by the
    /// server.
    async fn resolve(&self, os_user: &str) -> Result<i64>;
}

/// Directory lookup served by the ingestion server itself.
pub struct HttpUserDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUserDirectory {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn resolve(&self, os_user: &str) -> Result<i64> {
        let url = format!("{}{}", self.base_url, api::USER_RESOLVE_PATH);
        let response = self
            .client
            .get(&url)
            .query(&[("osUser", os_user)])
            .send()
            .await?;
        if !response.status().is_success() {
            bail!(
                "directory lookup for {os_user:?} returned {}",
                response.status()
            );
        }
        let user: api::UserResponse = response.json().await?;
        Ok(user.id)
    }
}

/// Caches the last successful resolution. A failed re-resolve keeps the
/// stale id so observations can still be attributed; the lookup is
/// retried on the next tick.
pub struct CachedResolution {
    directory: Arc<dyn UserDirectory>,
    current: Option<(Arc<str>, i64)>,
}

impl CachedResolution {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            directory,
            current: None,
        }
    }

    pub async fn user_id_for(&mut self, os_user: &Arc<str>) -> Option<i64> {
        match &self.current {
            Some((cached_os_user, id)) if cached_os_user == os_user => Some(*id),
            _ => {
                match self.directory.resolve(os_user).await {
                    Ok(id) => {
                        debug!("resolved {os_user:?} to monitored user {id}");
                        self.current = Some((os_user.clone(), id));
                    }
                    Err(e) => {
                        warn!("directory lookup for {os_user:?} failed, keeping previous id: {e:?}")
                    }
                }
                self.current.as_ref().map(|(_, id)| *id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::anyhow;

    use super::{CachedResolution, MockUserDirectory};

    #[tokio::test]
    async fn resolution_is_cached_per_os_user() {
        let mut directory = MockUserDirectory::new();
        directory
            .expect_resolve()
            .withf(|u| u == "alice")
            .times(1)
            .returning(|_| Ok(7));

        let mut resolution = CachedResolution::new(Arc::new(directory));
        let alice: Arc<str> = "alice".into();
        assert_eq!(resolution.user_id_for(&alice).await, Some(7));
        // second call must hit the cache, mock allows one call only
        assert_eq!(resolution.user_id_for(&alice).await, Some(7));
    }

    #[tokio::test]
    async fn failed_lookup_keeps_stale_id() {
        let mut directory = MockUserDirectory::new();
        directory
            .expect_resolve()
            .withf(|u| u == "alice")
            .returning(|_| Ok(7));
        directory
            .expect_resolve()
            .withf(|u| u == "bob")
            .returning(|_| Err(anyhow!("directory down")));

        let mut resolution = CachedResolution::new(Arc::new(directory));
        let alice: Arc<str> = "alice".into();
        let bob: Arc<str> = "bob".into();
        assert_eq!(resolution.user_id_for(&alice).await, Some(7));
        // the login changed but the directory is down: observations keep
        // flowing against the previous id
        assert_eq!(resolution.user_id_for(&bob).await, Some(7));
    }

    #[tokio::test]
    async fn no_id_until_first_successful_lookup() {
        let mut directory = MockUserDirectory::new();
        directory
            .expect_resolve()
            .returning(|_| Err(anyhow!("directory down")));

        let mut resolution = CachedResolution::new(Arc::new(directory));
        let alice: Arc<str> = "alice".into();
        assert_eq!(resolution.user_id_for(&alice).await, None);
    }
}
