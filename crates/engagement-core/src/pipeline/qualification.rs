//! Idempotent ledger of billable lead qualifications
//!
//! At most one event exists per (user, lead). The in-process cache answers repeat
//! calls without touching the store; the store's create-if-absent write settles races
//! between callers that both missed.

use engagement_types::{
    AgentId, AuditAction, BillingPeriod, BillingStatus, ConversationId, LeadId, LinkClick, LinkTracking,
    QualificationEventId, QualificationMetadata, QualifiedLeadEvent, UserId,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::audit::AuditChannel;
use super::traits::BillingCycles;
use crate::error::{EngagementError, Result};
use crate::store::{DocumentStore, InsertOutcome};

/// Result of a tracking call
#[derive(Debug, Clone, PartialEq)]
pub enum Tracked {
    /// A new billable event was written
    Created(QualifiedLeadEvent),
    /// The lead was already qualified; nothing was written
    Existing(QualifiedLeadEvent),
}

impl Tracked {
    pub fn event(&self) -> &QualifiedLeadEvent {
        match self {
            Self::Created(event) | Self::Existing(event) => event,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Result of recording a link click
#[derive(Debug, Clone)]
pub struct LinkClickOutcome {
    pub click: LinkClick,
    /// Present when this click was the lead's first qualification attempt
    pub qualification: Option<Tracked>,
}

type LedgerKey = (UserId, LeadId);

pub struct QualificationLedger {
    store: Arc<dyn DocumentStore>,
    billing: Arc<dyn BillingCycles>,
    audit: Arc<AuditChannel>,
    cache: Mutex<HashMap<LedgerKey, QualifiedLeadEvent>>,
}

impl QualificationLedger {
    pub fn new(store: Arc<dyn DocumentStore>, billing: Arc<dyn BillingCycles>, audit: Arc<AuditChannel>) -> Self {
        Self {
            store,
            billing,
            audit,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Record that `lead_id` qualified for `user_id`, unless it already did.
    ///
    /// The qualification type is carried by the metadata variant.
    pub async fn track_qualification(
        &self,
        user_id: &UserId,
        lead_id: &LeadId,
        agent_id: &AgentId,
        metadata: QualificationMetadata,
    ) -> Result<Tracked> {
        if user_id.is_empty() || lead_id.is_empty() {
            return Err(EngagementError::InvalidArgument("user_id and lead_id are required".to_string()));
        }
        metadata.validate().map_err(EngagementError::InvalidArgument)?;

        if let Some(existing) = self.known(user_id, lead_id).await? {
            log::debug!("Lead {} already qualified for user {} (event {})", lead_id, user_id, existing.id);
            return Ok(Tracked::Existing(existing));
        }

        let period = self.billing.current_period(user_id).await?;
        let event = QualifiedLeadEvent::new(
            user_id.clone(),
            lead_id.clone(),
            agent_id.clone(),
            period.period_key.clone(),
            metadata,
        );

        match self.store.insert_qualification_if_absent(&event).await? {
            InsertOutcome::Existing(existing) => {
                log::info!("Lead {} was qualified concurrently (event {})", lead_id, existing.id);
                self.remember(&existing);
                return Ok(Tracked::Existing(existing));
            }
            InsertOutcome::Inserted => {}
        }

        if let Err(e) = self.billing.record(&period, event.qualification_type).await {
            // The event is the source of truth; period counters can be rebuilt from it
            log::error!(
                "Failed to count event {} in billing period {} for user {}: {}",
                event.id, period.period_key, user_id, e
            );
        }

        self.audit
            .record(
                user_id,
                Some(lead_id),
                AuditAction::LeadQualified,
                json!({
                    "event_id": event.id,
                    "qualification_type": event.qualification_type,
                    "agent_id": event.agent_id,
                    "billing_period": event.billing_period,
                }),
            )
            .await;

        log::info!(
            "Lead {} qualified for user {} as {} (event {})",
            lead_id, user_id, event.qualification_type, event.id
        );
        self.remember(&event);
        Ok(Tracked::Created(event))
    }

    /// Qualify a lead that replied in `conversation_id`.
    ///
    /// Returns `None` without writing anything when the conversation has no inbound message.
    pub async fn mark_lead_as_expressed_interest(
        &self,
        user_id: &UserId,
        lead_id: &LeadId,
        agent_id: &AgentId,
        conversation_id: &ConversationId,
    ) -> Result<Option<Tracked>> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| EngagementError::NotFound(format!("Conversation {}", conversation_id)))?;

        if &conversation.user_id != user_id {
            return Err(EngagementError::PermissionDenied(format!(
                "Conversation {} belongs to another user",
                conversation_id
            )));
        }

        let inbound_messages = conversation.inbound_count();
        if inbound_messages == 0 {
            log::info!("Conversation {} has no reply from lead {} yet, not qualifying", conversation_id, lead_id);
            return Ok(None);
        }

        let metadata = QualificationMetadata::InterestExpressed {
            conversation_id: conversation_id.clone(),
            inbound_messages,
        };
        self.track_qualification(user_id, lead_id, agent_id, metadata).await.map(Some)
    }

    pub async fn mark_lead_as_target_match(
        &self,
        user_id: &UserId,
        lead_id: &LeadId,
        agent_id: &AgentId,
        score: f64,
        criteria: Vec<String>,
    ) -> Result<Tracked> {
        self.track_qualification(user_id, lead_id, agent_id, QualificationMetadata::TargetMatch { score, criteria })
            .await
    }

    /// Record a click on a tracked link. Every click is stored; only a lead without a
    /// qualification gets one from it.
    pub async fn track_link_click(&self, lead_id: &LeadId, url: &str, tracking: LinkTracking) -> Result<LinkClickOutcome> {
        if lead_id.is_empty() || tracking.user_id.is_empty() {
            return Err(EngagementError::InvalidArgument("lead_id and tracking user_id are required".to_string()));
        }
        if url.trim().is_empty() {
            return Err(EngagementError::InvalidArgument("url is required".to_string()));
        }

        let click = LinkClick::new(lead_id.clone(), url.to_string(), tracking);
        self.store.insert_link_click(&click).await?;
        self.audit
            .record(
                &click.tracking.user_id,
                Some(lead_id),
                AuditAction::LinkClicked,
                json!({ "click_id": click.id, "url": click.url, "campaign": click.tracking.campaign }),
            )
            .await;
        log::info!("Recorded link click {} for lead {}", click.id, lead_id);

        let user_id = click.tracking.user_id.clone();
        if self.known(&user_id, lead_id).await?.is_some() {
            return Ok(LinkClickOutcome { click, qualification: None });
        }

        let metadata = QualificationMetadata::LinkClicked {
            url: click.url.clone(),
            click_id: click.id.clone(),
        };
        let agent_id = click.tracking.agent_id.clone();
        let qualification = self.track_qualification(&user_id, lead_id, &agent_id, metadata).await?;
        Ok(LinkClickOutcome {
            click,
            qualification: Some(qualification),
        })
    }

    /// Move an event along unbilled -> billed -> invoiced -> paid
    pub async fn advance_billing_status(
        &self,
        user_id: &UserId,
        event_id: &QualificationEventId,
        next: BillingStatus,
    ) -> Result<QualifiedLeadEvent> {
        let mut event = self
            .store
            .get_qualification(user_id, event_id)
            .await?
            .ok_or_else(|| EngagementError::NotFound(format!("Qualification event {}", event_id)))?;

        let from = event.billing_status;
        event.advance_billing(next)?;
        if !self.store.update_qualification(&event, from).await? {
            return Err(EngagementError::FailedPrecondition(format!(
                "Qualification event {} is no longer {:?}",
                event_id, from
            )));
        }
        self.remember(&event);

        log::info!("Qualification event {} billing status {:?} -> {:?}", event_id, from, next);
        Ok(event)
    }

    pub async fn list_unbilled(&self, user_id: &UserId) -> Result<Vec<QualifiedLeadEvent>> {
        Ok(self
            .store
            .list_qualifications(user_id)
            .await?
            .into_iter()
            .filter(|event| event.billing_status == BillingStatus::Unbilled)
            .collect())
    }

    /// Counters of the user's open billing period
    pub async fn billing_summary(&self, user_id: &UserId) -> Result<BillingPeriod> {
        self.billing.current_period(user_id).await
    }

    /// Audit writes that failed since startup
    pub fn audit_failures(&self) -> u64 {
        self.audit.failure_count()
    }

    /// Cached event, else the stored one (which is then cached)
    async fn known(&self, user_id: &UserId, lead_id: &LeadId) -> Result<Option<QualifiedLeadEvent>> {
        let key = (user_id.clone(), lead_id.clone());
        let cached = self.cache_guard().get(&key).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let stored = self.store.find_qualification(user_id, lead_id).await?;
        if let Some(event) = &stored {
            self.remember(event);
        }
        Ok(stored)
    }

    fn remember(&self, event: &QualifiedLeadEvent) {
        self.cache_guard()
            .insert((event.user_id.clone(), event.lead_id.clone()), event.clone());
    }

    fn cache_guard(&self) -> std::sync::MutexGuard<'_, HashMap<LedgerKey, QualifiedLeadEvent>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
