//! Transition errors raised by the state machines

use thiserror::Error;

use crate::conversation::ConversationStage;
use crate::moderation::ModerationStatus;
use crate::qualification::BillingStatus;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("conversation cannot move from {from} to {to}")]
    Conversation { from: ConversationStage, to: ConversationStage },

    #[error("moderation item cannot move from {from} to {to}")]
    Moderation { from: ModerationStatus, to: ModerationStatus },

    #[error("billing status cannot move from {from:?} to {to:?}")]
    Billing { from: BillingStatus, to: BillingStatus },
}
