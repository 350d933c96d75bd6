//! OAuth access-token lifecycle
//!
//! Stored tokens are handed out unchanged while they are valid for longer than the
//! refresh margin. Inside the margin the refresh token is exchanged, the new pair is
//! persisted and only then returned. Refreshes for one user are serialised within the
//! process so rotating refresh tokens are never spent twice.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use engagement_types::{TokenRecord, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::traits::{AccessTokenSource, TokenEndpoint};
use crate::constants::{MAX_TOKEN_LIFETIME_SECONDS, TOKEN_REFRESH_MARGIN_SECONDS};
use crate::error::{EngagementError, Result};
use crate::store::DocumentStore;
use crate::types::TokenGrant;

pub struct TokenLifecycleManager {
    store: Arc<dyn DocumentStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    refresh_margin: Duration,
    /// One refresh lease per user
    refresh_leases: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenLifecycleManager {
    pub fn new(store: Arc<dyn DocumentStore>, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self::with_refresh_margin(store, endpoint, TOKEN_REFRESH_MARGIN_SECONDS)
    }

    pub fn with_refresh_margin(
        store: Arc<dyn DocumentStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        refresh_margin_seconds: i64,
    ) -> Self {
        Self {
            store,
            endpoint,
            refresh_margin: Duration::try_seconds(refresh_margin_seconds)
                .unwrap_or_else(|| Duration::seconds(TOKEN_REFRESH_MARGIN_SECONDS)),
            refresh_leases: Mutex::new(HashMap::new()),
        }
    }

    /// Current access token for `user_id`, refreshed first when close to expiry.
    ///
    /// Returns `None` when no token is stored or the refresh failed. No retry happens
    /// here; the caller treats `None` as an authentication failure.
    pub async fn get_valid_access_token(&self, user_id: &UserId) -> Option<String> {
        let record = self.load(user_id).await?;
        if !record.needs_refresh(Utc::now(), self.refresh_margin) {
            log::debug!("Using stored access token for user {} (expires at {})", user_id, record.expires_at);
            return Some(record.access_token);
        }

        let lease = self.lease_for(user_id);
        let _held = lease.lock().await;

        // Another task may have refreshed while we waited for the lease
        let record = self.load(user_id).await?;
        if !record.needs_refresh(Utc::now(), self.refresh_margin) {
            log::debug!("Access token for user {} was refreshed concurrently", user_id);
            return Some(record.access_token);
        }

        log::info!("Access token for user {} is near expiry (expires at {}), refreshing", user_id, record.expires_at);
        match self.refresh(user_id, &record).await {
            Ok(access_token) => Some(access_token),
            Err(e) => {
                log::warn!("Token refresh failed for user {}: {}", user_id, e);
                None
            }
        }
    }

    /// Persist the grant from an initial authorization
    pub async fn store_grant(&self, user_id: &UserId, grant: TokenGrant) -> Result<()> {
        if user_id.is_empty() {
            return Err(EngagementError::InvalidArgument("user_id is required".to_string()));
        }
        let refresh_token = grant.refresh_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            EngagementError::InvalidArgument("initial grant must carry a refresh token".to_string())
        })?;
        if grant.access_token.is_empty() {
            return Err(EngagementError::InvalidArgument("grant has no access token".to_string()));
        }

        if grant.expires_in_seconds <= 0 || grant.expires_in_seconds > MAX_TOKEN_LIFETIME_SECONDS {
            return Err(EngagementError::InvalidArgument(format!(
                "grant lifetime {}s is outside 1..={}s",
                grant.expires_in_seconds, MAX_TOKEN_LIFETIME_SECONDS
            )));
        }

        let record = TokenRecord::from_grant(grant.access_token, refresh_token, grant.expires_in_seconds, Utc::now())
            .ok_or_else(|| EngagementError::InvalidArgument("grant lifetime cannot be represented".to_string()))?;
        self.store.save_token(user_id, &record).await?;
        log::info!("Stored token grant for user {} (expires at {})", user_id, record.expires_at);
        Ok(())
    }

    async fn load(&self, user_id: &UserId) -> Option<TokenRecord> {
        match self.store.load_token(user_id).await {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                log::info!("No token stored for user {}", user_id);
                None
            }
            Err(e) => {
                log::error!("Failed to load token for user {}: {}", user_id, e);
                None
            }
        }
    }

    async fn refresh(&self, user_id: &UserId, current: &TokenRecord) -> Result<String> {
        let grant = self.endpoint.refresh(&current.refresh_token).await?;
        let refresh_token = grant
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| current.refresh_token.clone());

        if grant.expires_in_seconds > MAX_TOKEN_LIFETIME_SECONDS {
            return Err(EngagementError::Unauthenticated(format!(
                "refreshed token lifetime {}s is implausible",
                grant.expires_in_seconds
            )));
        }

        let now = Utc::now();
        let refreshed = TokenRecord::from_grant(grant.access_token, refresh_token, grant.expires_in_seconds, now)
            .ok_or_else(|| {
                EngagementError::Unauthenticated(format!(
                    "refreshed token lifetime {}s cannot be represented",
                    grant.expires_in_seconds
                ))
            })?;
        if refreshed.needs_refresh(now, self.refresh_margin) {
            return Err(EngagementError::Unauthenticated(format!(
                "refreshed token lifetime {}s is inside the refresh margin",
                grant.expires_in_seconds
            )));
        }

        self.store.save_token(user_id, &refreshed).await?;
        log::info!("Refreshed access token for user {} (expires at {})", user_id, refreshed.expires_at);
        Ok(refreshed.access_token)
    }

    fn lease_for(&self, user_id: &UserId) -> Arc<tokio::sync::Mutex<()>> {
        let mut leases = self.refresh_leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        leases.entry(user_id.clone()).or_default().clone()
    }
}

#[async_trait]
impl AccessTokenSource for TokenLifecycleManager {
    async fn valid_access_token(&self, user_id: &UserId) -> Option<String> {
        self.get_valid_access_token(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fakes::FakeTokenEndpoint;
    use crate::store::FileStore;
    use tempfile::TempDir;

    fn setup(endpoint: FakeTokenEndpoint) -> (TempDir, Arc<FileStore>, Arc<FakeTokenEndpoint>, TokenLifecycleManager) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(temp_dir.path()).unwrap());
        let endpoint = Arc::new(endpoint);
        let manager = TokenLifecycleManager::new(store.clone(), endpoint.clone());
        (temp_dir, store, endpoint, manager)
    }

    async fn seed(store: &FileStore, user: &UserId, expires_in: i64) {
        let record =
            TokenRecord::from_grant("stored-access".into(), "stored-refresh".into(), expires_in, Utc::now()).unwrap();
        store.save_token(user, &record).await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_token_makes_no_refresh_call() {
        let (_tmp, store, endpoint, manager) = setup(FakeTokenEndpoint::granting("new", Some("r2"), 3600));
        let user = UserId::new("u1");
        seed(&store, &user, 3600).await;

        assert_eq!(manager.get_valid_access_token(&user).await.as_deref(), Some("stored-access"));
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refreshed_once_and_persisted() {
        let (_tmp, store, endpoint, manager) = setup(FakeTokenEndpoint::granting("new-access", Some("new-refresh"), 3600));
        let user = UserId::new("u1");
        seed(&store, &user, 120).await;

        assert_eq!(manager.get_valid_access_token(&user).await.as_deref(), Some("new-access"));
        assert_eq!(endpoint.calls(), 1);
        assert_eq!(endpoint.seen_refresh_tokens.lock().unwrap().as_slice(), ["stored-refresh"]);

        let stored = store.load_token(&user).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "new-access");
        assert_eq!(stored.refresh_token, "new-refresh");
        assert!(stored.expires_at - Utc::now().timestamp() >= TOKEN_REFRESH_MARGIN_SECONDS);

        // Second call uses the refreshed record
        manager.get_valid_access_token(&user).await.unwrap();
        assert_eq!(endpoint.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_without_rotation_keeps_refresh_token() {
        let (_tmp, store, _endpoint, manager) = setup(FakeTokenEndpoint::granting("new-access", None, 3600));
        let user = UserId::new("u1");
        seed(&store, &user, -30).await;

        manager.get_valid_access_token(&user).await.unwrap();
        let stored = store.load_token(&user).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token, "stored-refresh");
    }

    #[tokio::test]
    async fn test_refresh_failure_returns_none_and_keeps_record() {
        let (_tmp, store, endpoint, manager) = setup(FakeTokenEndpoint::failing());
        let user = UserId::new("u1");
        seed(&store, &user, 10).await;

        assert!(manager.get_valid_access_token(&user).await.is_none());
        assert_eq!(endpoint.calls(), 1);
        assert_eq!(store.load_token(&user).await.unwrap().unwrap().access_token, "stored-access");
    }

    #[tokio::test]
    async fn test_short_lived_grant_is_not_handed_out() {
        let (_tmp, store, _endpoint, manager) = setup(FakeTokenEndpoint::granting("brief", Some("r2"), 60));
        let user = UserId::new("u1");
        seed(&store, &user, 10).await;

        assert!(manager.get_valid_access_token(&user).await.is_none());
    }

    #[tokio::test]
    async fn test_out_of_range_refresh_lifetime_yields_none() {
        for lifetime in [i64::MAX, MAX_TOKEN_LIFETIME_SECONDS + 1] {
            let (_tmp, store, endpoint, manager) = setup(FakeTokenEndpoint::granting("huge", Some("r2"), lifetime));
            let user = UserId::new("u1");
            seed(&store, &user, -60).await;

            assert!(manager.get_valid_access_token(&user).await.is_none());
            assert_eq!(endpoint.calls(), 1);
            assert_eq!(store.load_token(&user).await.unwrap().unwrap().access_token, "stored-access");
        }
    }

    #[tokio::test]
    async fn test_store_grant_rejects_unusable_lifetimes() {
        let (_tmp, store, _endpoint, manager) = setup(FakeTokenEndpoint::failing());
        let user = UserId::new("u1");

        for lifetime in [0, -5, i64::MAX, MAX_TOKEN_LIFETIME_SECONDS + 1] {
            let grant = TokenGrant { access_token: "a".into(), refresh_token: Some("r".into()), expires_in_seconds: lifetime };
            let err = manager.store_grant(&user, grant).await.unwrap_err();
            assert_eq!(err.code().as_str(), "invalid-argument");
        }
        assert!(store.load_token(&user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_token_returns_none() {
        let (_tmp, _store, endpoint, manager) = setup(FakeTokenEndpoint::granting("new", Some("r"), 3600));
        assert!(manager.get_valid_access_token(&UserId::new("nobody")).await.is_none());
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let endpoint = FakeTokenEndpoint::granting("new-access", Some("new-refresh"), 3600)
            .with_delay(std::time::Duration::from_millis(50));
        let (_tmp, store, endpoint, manager) = setup(endpoint);
        let manager = Arc::new(manager);
        let user = UserId::new("u1");
        seed(&store, &user, 0).await;

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let manager = manager.clone();
                let user = user.clone();
                tokio::spawn(async move { manager.get_valid_access_token(&user).await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().as_deref(), Some("new-access"));
        }
        assert_eq!(endpoint.calls(), 1);
    }

    #[tokio::test]
    async fn test_store_grant_requires_refresh_token() {
        let (_tmp, store, _endpoint, manager) = setup(FakeTokenEndpoint::failing());
        let user = UserId::new("u1");

        let without_refresh = TokenGrant { access_token: "a".into(), refresh_token: None, expires_in_seconds: 3600 };
        let err = manager.store_grant(&user, without_refresh).await.unwrap_err();
        assert_eq!(err.code().as_str(), "invalid-argument");

        let grant = TokenGrant { access_token: "a".into(), refresh_token: Some("r".into()), expires_in_seconds: 3600 };
        manager.store_grant(&user, grant).await.unwrap();
        assert_eq!(store.load_token(&user).await.unwrap().unwrap().refresh_token, "r");
    }
}
