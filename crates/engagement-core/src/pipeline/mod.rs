//! Pipeline components: conversations, moderation, tokens and qualification

pub mod audit;
pub mod billing;
pub mod conversation;
pub mod draft_watcher;
pub mod message_poller;
pub mod moderation;
pub mod qualification;
pub mod tokens;
pub mod traits;

#[cfg(test)]
pub(crate) mod fakes;

pub use audit::AuditChannel;
pub use billing::StoreBillingCycles;
pub use conversation::ConversationStateMachine;
pub use draft_watcher::DraftWatcher;
pub use message_poller::MessagePoller;
pub use moderation::{HealthStatus, ModerationHealth, ModerationPipeline, StatusCountMap};
pub use qualification::{LinkClickOutcome, QualificationLedger, Tracked};
pub use tokens::TokenLifecycleManager;
pub use traits::*;
