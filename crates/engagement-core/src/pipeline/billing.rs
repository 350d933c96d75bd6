//! Billing periods kept in the document store (one per user and calendar month)

use async_trait::async_trait;
use chrono::Utc;
use engagement_types::{BillingPeriod, QualificationType, UserId};
use std::sync::Arc;

use super::traits::BillingCycles;
use crate::error::Result;
use crate::store::{DocumentStore, InsertOutcome};

pub struct StoreBillingCycles {
    store: Arc<dyn DocumentStore>,
}

impl StoreBillingCycles {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BillingCycles for StoreBillingCycles {
    /// Open period for the current month, created on first use
    async fn current_period(&self, user_id: &UserId) -> Result<BillingPeriod> {
        let now = Utc::now();
        let key = BillingPeriod::key_for(now);
        if let Some(period) = self.store.get_billing_period(user_id, &key).await? {
            return Ok(period);
        }

        let fresh = BillingPeriod::containing(user_id.clone(), now);
        match self.store.insert_billing_period_if_absent(&fresh).await? {
            InsertOutcome::Inserted => {
                log::info!("Opened billing period {} for user {}", fresh.period_key, user_id);
                Ok(fresh)
            }
            InsertOutcome::Existing(existing) => Ok(existing),
        }
    }

    async fn record(&self, period: &BillingPeriod, kind: QualificationType) -> Result<BillingPeriod> {
        self.store
            .increment_billing_counter(&period.user_id, &period.period_key, kind)
            .await
    }
}
