//! Strongly typed identifiers
//!
//! Ids minted by the pipeline are UUID v4 strings; ids that come from the outside
//! (users, leads, agents) are opaque strings and only checked for emptiness.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! generated_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn from_string(s: &str) -> Result<Self, String> {
                uuid::Uuid::parse_str(s)
                    .map(|_| Self(s.to_string()))
                    .map_err(|e| format!("Invalid {} format: {}", stringify!($name), e))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! external_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

generated_id!(
    /// Conversation document id
    ConversationId
);
generated_id!(MessageId);
generated_id!(
    /// Moderation item document id
    ModerationItemId
);
generated_id!(QualificationEventId);
generated_id!(LinkClickId);
generated_id!(AuditRecordId);

external_id!(
    /// Account owner on whose behalf the pipeline acts
    UserId
);
external_id!(
    /// The external party being engaged
    LeadId
);
external_id!(
    /// Automation agent that produced the engagement
    AgentId
);
