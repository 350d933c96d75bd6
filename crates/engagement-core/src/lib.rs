//! Engagement Core Library
//!
//! Business logic for the lead engagement pipeline: conversation state machine,
//! comment moderation, OAuth token lifecycle and the qualification ledger, plus the
//! document store and service clients they run on.

pub mod clients;
pub mod config;
pub mod constants;
pub mod error;
pub mod paths;
pub mod pipeline;
pub mod store;
pub mod types;

// Re-export main types for easy access
pub use config::EngagementConfig;
pub use error::{EngagementError, ErrorCode, Result};

pub use clients::{FileKnowledgeBase, HeuristicAnalyzer, OpenAiClient, RedditClient, RedditOAuth, TelegramClient};

pub use pipeline::{
    AuditChannel,
    ConversationStateMachine,
    DraftWatcher,
    MessagePoller,
    ModerationPipeline,
    QualificationLedger,
    StoreBillingCycles,
    TokenLifecycleManager,
};

pub use store::{DocumentStore, FileStore, InsertOutcome};
