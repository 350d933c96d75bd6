//! Shared data model for the lead engagement pipeline
//!
//! Conversations, moderation items, qualification events and token records, with the
//! stage/status machines that govern how each may change.

pub mod audit;
pub mod conversation;
pub mod error;
pub mod ids;
pub mod moderation;
pub mod qualification;
pub mod token;

pub use audit::{AuditAction, AuditRecord};
pub use conversation::{Conversation, ConversationStage, Message, Sender, Sentiment};
pub use error::TransitionError;
pub use ids::*;
pub use moderation::{AiVerdict, CommentTarget, ModerationItem, ModerationStatus, PostContext, UserApproval};
pub use qualification::{
    BillingPeriod, BillingStatus, LinkClick, LinkTracking, QualificationCounters, QualificationMetadata,
    QualificationType, QualifiedLeadEvent,
};
pub use token::TokenRecord;
