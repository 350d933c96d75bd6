//! Persisted document store used by every pipeline component
//!
//! Writes that depend on the current state are conditional: they report `false`
//! instead of overwriting when another writer got there first. Nothing here spans
//! more than one document.

pub mod file_store;

use async_trait::async_trait;
use engagement_types::{
    AuditRecord, BillingPeriod, BillingStatus, Conversation, ConversationId, ConversationStage, LeadId, LinkClick,
    ModerationItem, ModerationItemId, ModerationStatus, QualificationEventId, QualificationType,
    QualifiedLeadEvent, TokenRecord, UserId,
};

use crate::error::Result;

pub use file_store::FileStore;

/// Result of a create-if-absent write
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome<T> {
    Inserted,
    Existing(T),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    // Conversations
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<()>;

    async fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>>;

    /// Replace the stored conversation if it is still at `expected_stage` with
    /// `expected_messages` messages in its log.
    async fn update_conversation(
        &self,
        conversation: &Conversation,
        expected_stage: ConversationStage,
        expected_messages: usize,
    ) -> Result<bool>;

    /// Conversations of a user, optionally narrowed to one lead username (case-insensitive).
    async fn find_conversations(&self, user_id: &UserId, lead_username: Option<&str>) -> Result<Vec<Conversation>>;

    // Moderation items
    async fn insert_moderation_item(&self, item: &ModerationItem) -> Result<()>;

    async fn get_moderation_item(&self, id: &ModerationItemId) -> Result<Option<ModerationItem>>;

    /// Store `item` (carrying its new status) if the stored status is still `expected_status`.
    async fn transition_moderation_item(
        &self,
        item: &ModerationItem,
        expected_status: ModerationStatus,
    ) -> Result<bool>;

    async fn list_moderation_items(&self, status: ModerationStatus) -> Result<Vec<ModerationItem>>;

    // Qualification ledger
    async fn find_qualification(&self, user_id: &UserId, lead_id: &LeadId) -> Result<Option<QualifiedLeadEvent>>;

    /// Create the event unless one already exists for its (user, lead) key.
    async fn insert_qualification_if_absent(
        &self,
        event: &QualifiedLeadEvent,
    ) -> Result<InsertOutcome<QualifiedLeadEvent>>;

    /// Replace the event if its stored billing status is still `expected_status`.
    /// Returns false when another writer moved it first.
    async fn update_qualification(&self, event: &QualifiedLeadEvent, expected_status: BillingStatus) -> Result<bool>;

    async fn get_qualification(&self, user_id: &UserId, id: &QualificationEventId) -> Result<Option<QualifiedLeadEvent>>;

    async fn list_qualifications(&self, user_id: &UserId) -> Result<Vec<QualifiedLeadEvent>>;

    // Billing periods
    async fn get_billing_period(&self, user_id: &UserId, period_key: &str) -> Result<Option<BillingPeriod>>;

    async fn insert_billing_period_if_absent(&self, period: &BillingPeriod) -> Result<InsertOutcome<BillingPeriod>>;

    /// Add one to the period's counter for `kind`; returns the updated period.
    async fn increment_billing_counter(
        &self,
        user_id: &UserId,
        period_key: &str,
        kind: QualificationType,
    ) -> Result<BillingPeriod>;

    // Link clicks and audit trail
    async fn insert_link_click(&self, click: &LinkClick) -> Result<()>;

    async fn list_link_clicks(&self, lead_id: &LeadId) -> Result<Vec<LinkClick>>;

    async fn insert_audit_record(&self, record: &AuditRecord) -> Result<()>;

    async fn list_audit_records(&self, user_id: &UserId) -> Result<Vec<AuditRecord>>;

    // OAuth tokens
    async fn load_token(&self, user_id: &UserId) -> Result<Option<TokenRecord>>;

    async fn save_token(&self, user_id: &UserId, record: &TokenRecord) -> Result<()>;
}
