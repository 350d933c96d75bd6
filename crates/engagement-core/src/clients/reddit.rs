//! Reddit API clients: messaging, comment posting and OAuth token refresh

use async_trait::async_trait;
use engagement_types::UserId;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PlatformConfig;
use crate::error::{EngagementError, Result};
use crate::pipeline::traits::{AccessTokenSource, MessagingTransport, PostingEndpoint, TokenEndpoint};
use crate::types::{InboundItem, InboundKind, PostError, PostErrorClass, PostedComment, SendOutcome, TokenGrant};

fn http_client(user_agent: &str, timeout: Duration) -> Result<HttpClient> {
    HttpClient::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(|e| EngagementError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Error strings from a `{"json": {"errors": [[code, message, field], ...]}}` body
fn api_errors(body: &Value) -> Option<String> {
    let errors = body["json"]["errors"].as_array()?;
    if errors.is_empty() {
        return None;
    }
    let joined = errors
        .iter()
        .map(|e| match e.as_array() {
            Some(parts) => parts.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(": "),
            None => e.to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ");
    Some(joined)
}

/// First created thing in a `/api/comment` response
fn created_thing(body: &Value) -> Option<(String, Option<String>)> {
    let data = &body["json"]["data"]["things"][0]["data"];
    let name = data["name"].as_str()?.to_string();
    let permalink = data["permalink"].as_str().map(str::to_string);
    Some((name, permalink))
}

/// Inbox listing (`/message/unread`) to inbound items
fn parse_unread(listing: &Value) -> Vec<InboundItem> {
    let Some(children) = listing["data"]["children"].as_array() else {
        return Vec::new();
    };

    children
        .iter()
        .filter_map(|child| {
            let kind = match child["kind"].as_str()? {
                "t4" => InboundKind::DirectMessage,
                "t1" => InboundKind::CommentReply,
                _ => return None,
            };
            let data = &child["data"];
            Some(InboundItem {
                id: data["name"].as_str()?.to_string(),
                kind,
                author: data["author"].as_str()?.to_string(),
                body: data["body"].as_str().unwrap_or_default().to_string(),
            })
        })
        .collect()
}

/// Messaging and posting on behalf of connected users
pub struct RedditClient {
    base_url: String,
    tokens: Arc<dyn AccessTokenSource>,
    http_client: HttpClient,
}

impl RedditClient {
    pub fn new(config: &PlatformConfig, tokens: Arc<dyn AccessTokenSource>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
            http_client: http_client(&config.user_agent, timeout)?,
        })
    }

    /// Overrides the API base URL (for testing with wiremock)
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn user_token(&self, user_id: &UserId) -> std::result::Result<String, String> {
        self.tokens
            .valid_access_token(user_id)
            .await
            .ok_or_else(|| format!("no valid access token for user {}", user_id))
    }

    /// POST a form to an `api_type=json` endpoint and return the decoded body
    async fn post_form(&self, access_token: &str, path: &str, form: &[(&str, &str)]) -> Result<(u16, Value)> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http_client
            .post(&url)
            .bearer_auth(access_token)
            .form(form)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    async fn send_form(&self, user_id: &UserId, path: &str, form: &[(&str, &str)]) -> SendOutcome {
        let token = match self.user_token(user_id).await {
            Ok(token) => token,
            Err(e) => return SendOutcome::failed(e),
        };

        match self.post_form(&token, path, form).await {
            Ok((status, _)) if !(200..300).contains(&status) => SendOutcome::failed(format!("HTTP {}", status)),
            Ok((_, body)) => match api_errors(&body) {
                Some(errors) => SendOutcome::failed(errors),
                None => SendOutcome::delivered(created_thing(&body).map(|(name, _)| name)),
            },
            Err(e) => SendOutcome::failed(e.to_string()),
        }
    }
}

#[async_trait]
impl MessagingTransport for RedditClient {
    async fn send(&self, user_id: &UserId, recipient: &str, subject: &str, body: &str) -> SendOutcome {
        let outcome = self
            .send_form(
                user_id,
                "/api/compose",
                &[("api_type", "json"), ("to", recipient), ("subject", subject), ("text", body)],
            )
            .await;
        if outcome.success {
            log::info!("Sent direct message to {} for user {}", recipient, user_id);
        }
        outcome
    }

    async fn reply(&self, user_id: &UserId, parent_id: &str, body: &str) -> SendOutcome {
        self.send_form(
            user_id,
            "/api/comment",
            &[("api_type", "json"), ("thing_id", parent_id), ("text", body)],
        )
        .await
    }

    async fn fetch_unread(&self, user_id: &UserId) -> Result<Vec<InboundItem>> {
        let token = self.user_token(user_id).await.map_err(EngagementError::Unauthenticated)?;
        let url = format!("{}/message/unread", self.base_url);

        let response = self.http_client
            .get(&url)
            .bearer_auth(&token)
            .query(&[("limit", "100")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngagementError::ServiceUnavailable(format!(
                "Inbox request failed: {}",
                response.status()
            )));
        }

        let listing: Value = response.json().await?;
        Ok(parse_unread(&listing))
    }

    async fn acknowledge(&self, user_id: &UserId, item_id: &str) -> Result<()> {
        let token = self.user_token(user_id).await.map_err(EngagementError::Unauthenticated)?;
        let (status, _) = self.post_form(&token, "/api/read_message", &[("id", item_id)]).await?;
        if !(200..300).contains(&status) {
            return Err(EngagementError::ServiceUnavailable(format!(
                "Marking {} read failed: HTTP {}",
                item_id, status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PostingEndpoint for RedditClient {
    async fn post(
        &self,
        access_token: &str,
        target_fullname: &str,
        text: &str,
    ) -> std::result::Result<PostedComment, PostError> {
        let (status, body) = self
            .post_form(
                access_token,
                "/api/comment",
                &[("api_type", "json"), ("thing_id", target_fullname), ("text", text)],
            )
            .await
            .map_err(|e| PostError::new(PostErrorClass::Other, e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(PostError::new(PostErrorClass::from_status(status), format!("HTTP {}", status)));
        }
        if let Some(errors) = api_errors(&body) {
            let class = if errors.contains("RATELIMIT") { PostErrorClass::RateLimited } else { PostErrorClass::Other };
            return Err(PostError::new(class, errors));
        }

        let (remote_id, permalink) = created_thing(&body)
            .ok_or_else(|| PostError::new(PostErrorClass::Other, "response did not include the created comment"))?;
        Ok(PostedComment { remote_id, permalink })
    }
}

#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
}

/// OAuth refresh-token grant against the platform's token endpoint
pub struct RedditOAuth {
    auth_url: String,
    client_id: String,
    client_secret: String,
    http_client: HttpClient,
}

impl RedditOAuth {
    pub fn new(config: &PlatformConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            auth_url: config.auth_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            http_client: http_client(&config.user_agent, timeout)?,
        })
    }

    /// Overrides the token endpoint URL (for testing with wiremock)
    pub fn with_auth_url(mut self, auth_url: String) -> Self {
        self.auth_url = auth_url;
        self
    }
}

#[async_trait]
impl TokenEndpoint for RedditOAuth {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        let response = self.http_client
            .post(&self.auth_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(EngagementError::Unauthenticated(format!("Token refresh rejected: HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(EngagementError::ServiceUnavailable(format!("Token endpoint returned {}", status)));
        }
        // The endpoint reports a bad grant with 200 and an error body
        if let Ok(error) = serde_json::from_value::<OAuthErrorBody>(body.clone()) {
            return Err(EngagementError::Unauthenticated(format!("Token refresh rejected: {}", error.error)));
        }

        serde_json::from_value(body)
            .map_err(|e| EngagementError::Deserialization(format!("Unexpected token response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fakes::StaticTokens;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn platform() -> PlatformConfig {
        PlatformConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            user_agent: "engagement-test/1.0".to_string(),
            base_url: "https://oauth.reddit.com".to_string(),
            auth_url: "https://www.reddit.com/api/v1/access_token".to_string(),
        }
    }

    fn client(server: &MockServer, token: Option<&str>) -> RedditClient {
        RedditClient::new(&platform(), Arc::new(StaticTokens(token.map(str::to_string))), Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri())
    }

    fn comment_created() -> Value {
        json!({"json": {"errors": [], "data": {"things": [
            {"kind": "t1", "data": {"name": "t1_new", "permalink": "/r/rust/comments/abc/_/new/"}}
        ]}}})
    }

    #[test]
    fn test_parse_unread_keeps_messages_and_comment_replies() {
        let listing = json!({"data": {"children": [
            {"kind": "t4", "data": {"name": "t4_a", "author": "lead", "body": "hi"}},
            {"kind": "t1", "data": {"name": "t1_b", "author": "lead", "body": "reply"}},
            {"kind": "t3", "data": {"name": "t3_c", "author": "x", "body": ""}}
        ]}});
        let items = parse_unread(&listing);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind, InboundKind::DirectMessage);
        assert_eq!(items[1].id, "t1_b");
    }

    #[tokio::test]
    async fn test_post_comment_returns_remote_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/comment"))
            .and(header("authorization", "Bearer tok"))
            .and(body_string_contains("thing_id=t3_post"))
            .respond_with(ResponseTemplate::new(200).set_body_json(comment_created()))
            .mount(&server)
            .await;

        let posted = client(&server, None).post("tok", "t3_post", "Nice write-up").await.unwrap();
        assert_eq!(posted.remote_id, "t1_new");
        assert_eq!(posted.permalink.as_deref(), Some("/r/rust/comments/abc/_/new/"));
    }

    #[tokio::test]
    async fn test_post_failures_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/comment"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "Forbidden"})))
            .mount(&server)
            .await;

        let err = client(&server, None).post("tok", "t3_post", "text").await.unwrap_err();
        assert_eq!(err.class, PostErrorClass::Forbidden);
    }

    #[tokio::test]
    async fn test_send_without_token_fails_without_request() {
        let server = MockServer::start().await;
        let outcome = client(&server, None).send(&UserId::new("u1"), "lead", "hi", "hello").await;
        assert!(!outcome.success);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_reports_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/compose"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"json": {"errors": [
                ["USER_DOESNT_EXIST", "that user doesn't exist", "to"]
            ]}})))
            .mount(&server)
            .await;

        let outcome = client(&server, Some("tok")).send(&UserId::new("u1"), "ghost", "hi", "hello").await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("USER_DOESNT_EXIST"));
    }

    #[tokio::test]
    async fn test_refresh_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh", "token_type": "bearer", "expires_in": 86400, "scope": "*"
            })))
            .mount(&server)
            .await;

        let oauth = RedditOAuth::new(&platform(), Duration::from_secs(5))
            .unwrap()
            .with_auth_url(format!("{}/api/v1/access_token", server.uri()));
        let grant = oauth.refresh("refresh-1").await.unwrap();
        assert_eq!(grant.access_token, "fresh");
        assert_eq!(grant.expires_in_seconds, 86400);
        assert!(grant.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_refresh_rejected_grant_is_unauthenticated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "invalid_grant"})))
            .mount(&server)
            .await;

        let oauth = RedditOAuth::new(&platform(), Duration::from_secs(5))
            .unwrap()
            .with_auth_url(server.uri());
        let err = oauth.refresh("revoked").await.unwrap_err();
        assert_eq!(err.code().as_str(), "unauthenticated");
    }
}
