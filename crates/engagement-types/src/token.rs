//! Stored OAuth credentials for posting on a user's behalf

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch seconds
    pub expires_at: i64,
}

impl TokenRecord {
    /// Record for a grant issued at `now`; `None` when the lifetime overflows a timestamp.
    pub fn from_grant(
        access_token: String,
        refresh_token: String,
        expires_in_seconds: i64,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let lifetime = Duration::try_seconds(expires_in_seconds)?;
        let expires_at = now.checked_add_signed(lifetime)?;
        Some(Self {
            access_token,
            refresh_token,
            expires_at: expires_at.timestamp(),
        })
    }

    /// True once `now` is within `margin` of the expiry (or past it).
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now.timestamp() >= self.expires_at.saturating_sub(margin.num_seconds())
    }
}

// Tokens never end up in logs.
impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
