//! Data exchanged with external collaborators

use engagement_types::{ConversationStage, LeadId, Sentiment, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the pipeline knows about the lead on the other side of a conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadContext {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Free-form notes (e.g. the post that surfaced the lead)
    #[serde(default)]
    pub notes: Option<String>,
}

/// Product knowledge handed to the reply generator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeContext {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub snippets: Vec<KnowledgeSnippet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub source: String,
    pub text: String,
}

/// Per-call options for processing one inbound message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOptions {
    pub lead: LeadContext,
    /// Platform id of the inbound item being processed
    pub inbound_platform_id: Option<String>,
}

/// Result of processing one inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    /// Reply to send; empty when generation failed and nothing was committed
    pub response: String,
    pub new_stage: ConversationStage,
    pub extracted_email: Option<String>,
    /// The inbound message was handled before and its reply already went out
    pub already_delivered: bool,
}

impl ProcessOutcome {
    /// Outcome of a failed generation. Nothing was committed.
    pub fn uncommitted() -> Self {
        Self {
            response: String::new(),
            new_stage: ConversationStage::BuildingRapport,
            extracted_email: None,
            already_delivered: false,
        }
    }

    pub fn is_committed(&self) -> bool {
        !self.response.is_empty()
    }
}

/// Reply produced by the content generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedReply {
    pub text: String,
    pub next_stage: ConversationStage,
    #[serde(default)]
    pub extracted_email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Interested,
    NotInterested,
    Question,
    Other,
}

/// Analyzer view of one inbound text
#[derive(Debug, Clone, PartialEq)]
pub struct MessageAnalysis {
    pub sentiment: Sentiment,
    pub intent: Intent,
    pub has_email: bool,
    pub extracted_email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundKind {
    DirectMessage,
    CommentReply,
}

/// Unread item fetched from the platform inbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundItem {
    pub id: String,
    pub kind: InboundKind,
    pub author: String,
    pub body: String,
}

/// Result of a transport send or reply
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub success: bool,
    pub error: Option<String>,
    /// Platform id of the delivered message when the platform returns one
    pub message_id: Option<String>,
}

impl SendOutcome {
    pub fn delivered(message_id: Option<String>) -> Self {
        Self { success: true, error: None, message_id }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()), message_id: None }
    }
}

/// Failure modes of the AI judge
#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("Judge credentials not configured")]
    MissingCredentials,

    #[error("Judge request failed: {0}")]
    Failed(String),

    #[error("Judge returned unparseable output: {0}")]
    Unparseable(String),
}

/// Access grant returned by the OAuth token endpoint
#[derive(Clone, PartialEq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent when the provider does not rotate refresh tokens
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(alias = "expires_in")]
    pub expires_in_seconds: i64,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_in_seconds", &self.expires_in_seconds)
            .field("rotates_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

/// Comment created on the platform
#[derive(Debug, Clone, PartialEq)]
pub struct PostedComment {
    pub remote_id: String,
    pub permalink: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostErrorClass {
    Unauthorized,
    Forbidden,
    RateLimited,
    Other,
}

impl PostErrorClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            429 => Self::RateLimited,
            _ => Self::Other,
        }
    }

    /// Failure reason stored on the moderation item
    pub fn failure_reason(&self) -> &'static str {
        match self {
            Self::Unauthorized => "auth expired: platform rejected the access token",
            Self::Forbidden => "forbidden: account may not post in this community",
            Self::RateLimited => "rate limited: platform refused the post, retry later",
            Self::Other => "posting failed",
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("{class:?}: {message}")]
pub struct PostError {
    pub class: PostErrorClass,
    pub message: String,
}

impl PostError {
    pub fn new(class: PostErrorClass, message: impl Into<String>) -> Self {
        Self { class, message: message.into() }
    }
}

/// Request to open a conversation with a lead
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutreachRequest {
    pub user_id: UserId,
    pub lead_id: LeadId,
    pub lead_username: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub initial_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_error_class_from_status() {
        assert_eq!(PostErrorClass::from_status(401), PostErrorClass::Unauthorized);
        assert_eq!(PostErrorClass::from_status(403), PostErrorClass::Forbidden);
        assert_eq!(PostErrorClass::from_status(429), PostErrorClass::RateLimited);
        assert_eq!(PostErrorClass::from_status(500), PostErrorClass::Other);
        assert!(PostErrorClass::Unauthorized.failure_reason().starts_with("auth expired"));
    }

    #[test]
    fn test_token_grant_accepts_provider_field_names() {
        let grant: TokenGrant =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":3600,"token_type":"bearer"}"#).unwrap();
        assert_eq!(grant.expires_in_seconds, 3600);
        assert!(grant.refresh_token.is_none());
        assert!(!format!("{:?}", grant).contains("abc"));
    }
}
