//! Non-critical audit trail entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AuditRecordId, LeadId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    LeadQualified,
    LinkClicked,
    UntrackedOutreach,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditRecordId,
    pub user_id: UserId,
    #[serde(default)]
    pub lead_id: Option<LeadId>,
    pub action: AuditAction,
    pub detail: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(user_id: UserId, lead_id: Option<LeadId>, action: AuditAction, detail: serde_json::Value) -> Self {
        Self {
            id: AuditRecordId::new(),
            user_id,
            lead_id,
            action,
            detail,
            recorded_at: Utc::now(),
        }
    }
}
