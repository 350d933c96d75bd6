//! Direct-message conversation with a lead

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransitionError;
use crate::ids::{ConversationId, LeadId, MessageId, UserId};

/// Stage of an automated exchange with a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStage {
    NotStarted,
    BuildingRapport,
    ReadyToAsk,
    Asked,
    Collected,
    NotInterested,
}

impl ConversationStage {
    pub const ALL: [ConversationStage; 6] = [
        Self::NotStarted,
        Self::BuildingRapport,
        Self::ReadyToAsk,
        Self::Asked,
        Self::Collected,
        Self::NotInterested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::BuildingRapport => "building_rapport",
            Self::ReadyToAsk => "ready_to_ask",
            Self::Asked => "asked",
            Self::Collected => "collected",
            Self::NotInterested => "not_interested",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Collected | Self::NotInterested)
    }

    /// Position on the rapport ladder; terminal stages sit outside it.
    fn rank(&self) -> Option<u8> {
        match self {
            Self::NotStarted => Some(0),
            Self::BuildingRapport => Some(1),
            Self::ReadyToAsk => Some(2),
            Self::Asked => Some(3),
            Self::Collected | Self::NotInterested => None,
        }
    }

    /// Transition table. Terminal stages accept nothing; non-terminal stages may stay,
    /// move forward along the ladder, or jump to either terminal outcome.
    pub fn can_transition_to(&self, next: ConversationStage) -> bool {
        match (self.rank(), next.rank()) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(from), Some(to)) => to >= from,
        }
    }

    /// Stage handed to the reply generator. A terminal stage is never fed back as the
    /// current stage, so `not_interested` restarts from `not_started`.
    pub fn generation_input(&self) -> ConversationStage {
        match self {
            Self::NotInterested => Self::NotStarted,
            other => *other,
        }
    }
}

impl fmt::Display for ConversationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

/// A single message in a conversation log. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    /// Platform id of the delivered/received message, used for threading and to
    /// recognise redelivered inbound items.
    #[serde(default)]
    pub platform_id: Option<String>,
    /// Set on outbound messages once the transport accepted them.
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn outbound(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            sender: Sender::Outbound,
            text: text.into(),
            timestamp: Utc::now(),
            sentiment: None,
            platform_id: None,
            delivered_at: None,
        }
    }

    /// Outbound message the transport already accepted
    pub fn delivered(text: impl Into<String>, platform_id: Option<String>) -> Self {
        let mut message = Self::outbound(text);
        message.mark_delivered(platform_id);
        message
    }

    pub fn inbound(text: impl Into<String>, platform_id: Option<String>, sentiment: Option<Sentiment>) -> Self {
        Self {
            id: MessageId::new(),
            sender: Sender::Inbound,
            text: text.into(),
            timestamp: Utc::now(),
            sentiment,
            platform_id,
            delivered_at: None,
        }
    }

    pub fn is_inbound(&self) -> bool {
        self.sender == Sender::Inbound
    }

    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }

    pub fn mark_delivered(&mut self, platform_id: Option<String>) {
        self.delivered_at = Some(Utc::now());
        if platform_id.is_some() {
            self.platform_id = platform_id;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub lead_id: LeadId,
    pub user_id: UserId,
    pub lead_username: String,
    pub stage: ConversationStage,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub collected_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Conversation opened by a successfully delivered first outbound message.
    pub fn from_outreach(user_id: UserId, lead_id: LeadId, lead_username: String, first_message: Message) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            lead_id,
            user_id,
            lead_username,
            stage: ConversationStage::BuildingRapport,
            messages: vec![first_message],
            collected_email: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn has_inbound(&self) -> bool {
        self.messages.iter().any(Message::is_inbound)
    }

    pub fn inbound_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_inbound()).count()
    }

    pub fn last_inbound(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_inbound())
    }

    /// Index of an inbound message carrying the given platform id.
    pub fn inbound_position(&self, platform_id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.is_inbound() && m.platform_id.as_deref() == Some(platform_id))
    }

    /// Index of the first outbound message written after the message at `inbound_index`
    pub fn reply_position(&self, inbound_index: usize) -> Option<usize> {
        self.messages
            .iter()
            .enumerate()
            .skip(inbound_index + 1)
            .find(|(_, m)| !m.is_inbound())
            .map(|(i, _)| i)
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Move to `next`, rejecting anything the transition table does not allow.
    pub fn advance_stage(&mut self, next: ConversationStage) -> Result<(), TransitionError> {
        if !self.stage.can_transition_to(next) {
            return Err(TransitionError::Conversation { from: self.stage, to: next });
        }
        self.stage = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
