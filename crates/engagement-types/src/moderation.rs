//! Drafted comments moving through AI review, human approval and posting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransitionError;
use crate::ids::{ModerationItemId, UserId};

/// Maximum length of a stored verdict reason.
pub const VERDICT_REASON_MAX_CHARS: usize = 100;

/// Strongly typed moderation status - no strings!
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    Pending,
    Reviewing,
    AiApproved,
    AiRejected,
    UserApproved,
    UserRejected,
    Posting,
    Posted,
    Failed,
}

impl ModerationStatus {
    pub const ALL: [ModerationStatus; 9] = [
        Self::Pending,
        Self::Reviewing,
        Self::AiApproved,
        Self::AiRejected,
        Self::UserApproved,
        Self::UserRejected,
        Self::Posting,
        Self::Posted,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reviewing => "reviewing",
            Self::AiApproved => "ai_approved",
            Self::AiRejected => "ai_rejected",
            Self::UserApproved => "user_approved",
            Self::UserRejected => "user_rejected",
            Self::Posting => "posting",
            Self::Posted => "posted",
            Self::Failed => "failed",
        }
    }

    /// Directory name for file storage
    pub fn directory_name(&self) -> &'static str {
        self.as_str()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AiRejected | Self::UserRejected | Self::Posted | Self::Failed)
    }

    /// Transition graph. Every pair is spelled out so adding a status forces a
    /// decision here.
    pub fn can_transition_to(&self, next: ModerationStatus) -> bool {
        use ModerationStatus::*;
        match self {
            Pending => matches!(next, Reviewing | Failed),
            Reviewing => matches!(next, AiApproved | AiRejected | Failed),
            AiApproved => matches!(next, UserApproved | UserRejected),
            UserApproved => matches!(next, Posting),
            Posting => matches!(next, Posted | Failed),
            AiRejected | UserRejected | Posted | Failed => false,
        }
    }
}

impl fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the AI quality gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiVerdict {
    pub approved: bool,
    pub score: f64,
    pub reason: String,
}

impl AiVerdict {
    /// Normalised verdict: score clamped to 0..=1, reason cut to the stored maximum.
    pub fn new(approved: bool, score: f64, reason: impl AsRef<str>) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self {
            approved,
            score,
            reason: reason.as_ref().chars().take(VERDICT_REASON_MAX_CHARS).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserApproval {
    pub approved: bool,
    pub at: DateTime<Utc>,
}

/// Community and post the comment is written for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostContext {
    pub subreddit: String,
    #[serde(default)]
    pub post_title: String,
    #[serde(default)]
    pub post_body: String,
}

/// Where a comment gets posted: under the post itself or as a reply to a comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentTarget {
    Post(String),
    Comment(String),
}

impl CommentTarget {
    /// Platform fullname (`t3_` posts, `t1_` comments); existing prefixes are kept.
    pub fn fullname(&self) -> String {
        let (prefix, id) = match self {
            Self::Post(id) => ("t3_", id),
            Self::Comment(id) => ("t1_", id),
        };
        if id.starts_with(prefix) {
            id.clone()
        } else {
            format!("{}{}", prefix, id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationItem {
    pub id: ModerationItemId,
    pub user_id: UserId,
    pub post_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub comment_text: String,
    #[serde(default)]
    pub context: PostContext,
    pub status: ModerationStatus,
    #[serde(default)]
    pub ai_verdict: Option<AiVerdict>,
    #[serde(default)]
    pub user_approval: Option<UserApproval>,
    #[serde(default)]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModerationItem {
    /// Create new pending draft
    pub fn new_draft(
        user_id: UserId,
        post_id: String,
        parent_id: Option<String>,
        comment_text: String,
        context: PostContext,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ModerationItemId::new(),
            user_id,
            post_id,
            parent_id,
            comment_text,
            context,
            status: ModerationStatus::Pending,
            ai_verdict: None,
            user_approval: None,
            remote_id: None,
            permalink: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Names of required fields that are empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.user_id.is_empty() {
            missing.push("user_id");
        }
        if self.post_id.trim().is_empty() {
            missing.push("post_id");
        }
        if self.comment_text.trim().is_empty() {
            missing.push("comment_text");
        }
        missing
    }

    pub fn target(&self) -> CommentTarget {
        match self.parent_id.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(parent) => CommentTarget::Comment(parent.to_string()),
            None => CommentTarget::Post(self.post_id.clone()),
        }
    }

    /// Move along the status graph, rejecting regressions and skips.
    pub fn transition_to(&mut self, next: ModerationStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Moderation { from: self.status, to: next });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition_to(ModerationStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }
}
