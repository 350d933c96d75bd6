//! Billable qualification events and billing periods

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransitionError;
use crate::ids::{AgentId, ConversationId, LeadId, LinkClickId, QualificationEventId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualificationType {
    InterestExpressed,
    TargetMatch,
    LinkClicked,
}

impl QualificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InterestExpressed => "interest_expressed",
            Self::TargetMatch => "target_match",
            Self::LinkClicked => "link_clicked",
        }
    }
}

impl fmt::Display for QualificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    Unbilled,
    Billed,
    Invoiced,
    Paid,
}

impl BillingStatus {
    /// Billing only moves forward: unbilled -> billed -> invoiced -> paid.
    pub fn can_advance_to(&self, next: BillingStatus) -> bool {
        use BillingStatus::*;
        matches!(
            (self, next),
            (Unbilled, Billed) | (Billed, Invoiced) | (Invoiced, Paid)
        )
    }
}

/// Evidence attached to a qualification, one shape per qualification type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QualificationMetadata {
    InterestExpressed {
        conversation_id: ConversationId,
        inbound_messages: usize,
    },
    TargetMatch {
        score: f64,
        #[serde(default)]
        criteria: Vec<String>,
    },
    LinkClicked {
        url: String,
        click_id: LinkClickId,
    },
}

impl QualificationMetadata {
    pub fn qualification_type(&self) -> QualificationType {
        match self {
            Self::InterestExpressed { .. } => QualificationType::InterestExpressed,
            Self::TargetMatch { .. } => QualificationType::TargetMatch,
            Self::LinkClicked { .. } => QualificationType::LinkClicked,
        }
    }

    /// Boundary validation for metadata arriving from callers.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::InterestExpressed { inbound_messages, .. } => {
                if *inbound_messages == 0 {
                    return Err("interest requires at least one inbound message".to_string());
                }
            }
            Self::TargetMatch { score, .. } => {
                if !(0.0..=1.0).contains(score) {
                    return Err(format!("target match score {} outside 0..=1", score));
                }
            }
            Self::LinkClicked { url, .. } => {
                if url.trim().is_empty() {
                    return Err("link click requires a url".to_string());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualifiedLeadEvent {
    pub id: QualificationEventId,
    pub user_id: UserId,
    pub lead_id: LeadId,
    pub agent_id: AgentId,
    pub qualification_type: QualificationType,
    pub billing_status: BillingStatus,
    /// Billing period the event was counted in.
    pub billing_period: String,
    pub metadata: QualificationMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QualifiedLeadEvent {
    pub fn new(
        user_id: UserId,
        lead_id: LeadId,
        agent_id: AgentId,
        billing_period: String,
        metadata: QualificationMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: QualificationEventId::new(),
            user_id,
            lead_id,
            agent_id,
            qualification_type: metadata.qualification_type(),
            billing_status: BillingStatus::Unbilled,
            billing_period,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn advance_billing(&mut self, next: BillingStatus) -> Result<(), TransitionError> {
        if !self.billing_status.can_advance_to(next) {
            return Err(TransitionError::Billing { from: self.billing_status, to: next });
        }
        self.billing_status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Per-type qualification counters of a billing period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationCounters {
    pub interest_expressed: u64,
    pub target_match: u64,
    pub link_clicked: u64,
    pub total: u64,
}

impl QualificationCounters {
    pub fn increment(&mut self, kind: QualificationType) {
        match kind {
            QualificationType::InterestExpressed => self.interest_expressed += 1,
            QualificationType::TargetMatch => self.target_match += 1,
            QualificationType::LinkClicked => self.link_clicked += 1,
        }
        self.total += 1;
    }

    pub fn get(&self, kind: QualificationType) -> u64 {
        match kind {
            QualificationType::InterestExpressed => self.interest_expressed,
            QualificationType::TargetMatch => self.target_match,
            QualificationType::LinkClicked => self.link_clicked,
        }
    }
}

/// Calendar-month accumulation window for qualification counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub user_id: UserId,
    /// `YYYY-MM`
    pub period_key: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub counters: QualificationCounters,
    pub updated_at: DateTime<Utc>,
}

impl BillingPeriod {
    /// The open period containing `now`.
    pub fn containing(user_id: UserId, now: DateTime<Utc>) -> Self {
        let starts_at = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now);
        let (next_year, next_month) = if now.month() == 12 {
            (now.year() + 1, 1)
        } else {
            (now.year(), now.month() + 1)
        };
        let ends_at = Utc
            .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
            .single()
            .unwrap_or(now);
        Self {
            user_id,
            period_key: Self::key_for(now),
            starts_at,
            ends_at,
            counters: QualificationCounters::default(),
            updated_at: now,
        }
    }

    pub fn key_for(at: DateTime<Utc>) -> String {
        format!("{:04}-{:02}", at.year(), at.month())
    }
}

/// Tracking details supplied with a link click.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkTracking {
    pub user_id: UserId,
    pub agent_id: AgentId,
    #[serde(default)]
    pub campaign: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// One recorded click on a tracked link. Every click is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkClick {
    pub id: LinkClickId,
    pub lead_id: LeadId,
    pub url: String,
    pub tracking: LinkTracking,
    pub clicked_at: DateTime<Utc>,
}

impl LinkClick {
    pub fn new(lead_id: LeadId, url: String, tracking: LinkTracking) -> Self {
        Self {
            id: LinkClickId::new(),
            lead_id,
            url,
            tracking,
            clicked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_is_tagged_by_type() {
        let meta = QualificationMetadata::TargetMatch { score: 0.8, criteria: vec!["saas".to_string()] };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["type"], "target_match");
        assert_eq!(meta.qualification_type(), QualificationType::TargetMatch);

        let parsed: QualificationMetadata = serde_json::from_str(
            r#"{"type":"link_clicked","url":"https://x.test","click_id":"6f1c2c4e-1a51-4d1e-9f0a-0c3f7f1d2b11"}"#,
        )
        .unwrap();
        assert_eq!(parsed.qualification_type(), QualificationType::LinkClicked);
    }

    #[test]
    fn test_metadata_validation() {
        assert!(QualificationMetadata::TargetMatch { score: 1.2, criteria: vec![] }.validate().is_err());
        assert!(QualificationMetadata::LinkClicked { url: " ".to_string(), click_id: LinkClickId::new() }
            .validate()
            .is_err());
        assert!(QualificationMetadata::InterestExpressed { conversation_id: ConversationId::new(), inbound_messages: 0 }
            .validate()
            .is_err());
    }

    #[test]
    fn test_billing_status_only_advances() {
        let mut event = QualifiedLeadEvent::new(
            UserId::new("u"),
            LeadId::new("l"),
            AgentId::new("a"),
            "2026-10".to_string(),
            QualificationMetadata::TargetMatch { score: 0.5, criteria: vec![] },
        );
        assert_eq!(event.billing_status, BillingStatus::Unbilled);
        assert!(event.advance_billing(BillingStatus::Paid).is_err());
        event.advance_billing(BillingStatus::Billed).unwrap();
        event.advance_billing(BillingStatus::Invoiced).unwrap();
        assert!(event.advance_billing(BillingStatus::Billed).is_err());
    }

    #[test]
    fn test_billing_period_bounds() {
        let at = Utc.with_ymd_and_hms(2026, 12, 15, 10, 0, 0).unwrap();
        let period = BillingPeriod::containing(UserId::new("u"), at);
        assert_eq!(period.period_key, "2026-12");
        assert_eq!(period.starts_at, Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(period.ends_at, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_counters_increment_total() {
        let mut counters = QualificationCounters::default();
        counters.increment(QualificationType::LinkClicked);
        counters.increment(QualificationType::LinkClicked);
        counters.increment(QualificationType::TargetMatch);
        assert_eq!(counters.get(QualificationType::LinkClicked), 2);
        assert_eq!(counters.total, 3);
    }
}
