//! Collaborator seams of the engagement pipeline
//!
//! Every external system the pipeline talks to sits behind one of these traits and is
//! injected as `Arc<dyn Trait>`, so tests substitute fakes and production wires the
//! HTTP clients.

use async_trait::async_trait;
use engagement_types::{AiVerdict, BillingPeriod, ConversationStage, Message, ModerationItem, PostContext, QualificationType, UserId};

use crate::error::Result;
use crate::types::{
    GeneratedReply, InboundItem, JudgeError, KnowledgeContext, KnowledgeSnippet, LeadContext, MessageAnalysis,
    PostError, PostedComment, SendOutcome, TokenGrant,
};

/// Writes the next conversational reply
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        history: &[Message],
        lead: &LeadContext,
        knowledge: &KnowledgeContext,
        stage: ConversationStage,
    ) -> Result<GeneratedReply>;
}

/// Classifies an inbound text (sentiment, intent, email)
#[async_trait]
pub trait MessageAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<MessageAnalysis>;
}

/// Direct-message and inbox access on the platform, scoped to the user's account
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    async fn send(&self, user_id: &UserId, recipient: &str, subject: &str, body: &str) -> SendOutcome;

    /// Threaded reply to a previously received item
    async fn reply(&self, user_id: &UserId, parent_id: &str, body: &str) -> SendOutcome;

    async fn fetch_unread(&self, user_id: &UserId) -> Result<Vec<InboundItem>>;

    /// Mark an inbound item as consumed so it is not fetched again
    async fn acknowledge(&self, user_id: &UserId, item_id: &str) -> Result<()>;
}

/// AI quality gate for drafted comments
#[async_trait]
pub trait AiJudge: Send + Sync {
    async fn judge(
        &self,
        draft: &str,
        context: &PostContext,
        snippets: &[KnowledgeSnippet],
    ) -> std::result::Result<AiVerdict, JudgeError>;
}

/// Delivers AI-approved drafts to the human approver
#[async_trait]
pub trait ReviewInbox: Send + Sync {
    async fn deliver(&self, item: &ModerationItem, verdict: &AiVerdict) -> Result<()>;
}

/// Contextual product knowledge for a user
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn snippets(&self, user_id: &UserId, query: &str, limit: usize) -> Result<Vec<KnowledgeSnippet>>;
}

/// OAuth refresh-token grant exchange
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;
}

/// Creates comments on the platform
#[async_trait]
pub trait PostingEndpoint: Send + Sync {
    async fn post(
        &self,
        access_token: &str,
        target_fullname: &str,
        text: &str,
    ) -> std::result::Result<PostedComment, PostError>;
}

/// Hands out a bearer credential that is valid for at least the refresh margin
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// `None` means no usable credential; callers treat it as an auth failure.
    async fn valid_access_token(&self, user_id: &UserId) -> Option<String>;
}

/// Resolves open billing periods and accumulates their counters
#[async_trait]
pub trait BillingCycles: Send + Sync {
    async fn current_period(&self, user_id: &UserId) -> Result<BillingPeriod>;

    async fn record(&self, period: &BillingPeriod, kind: QualificationType) -> Result<BillingPeriod>;
}
