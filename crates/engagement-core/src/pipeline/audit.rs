//! Non-critical audit side channel
//!
//! Audit writes never fail the operation that triggered them. Failures are logged
//! and counted so they stay observable.

use engagement_types::{AuditAction, AuditRecord, LeadId, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::store::DocumentStore;

pub struct AuditChannel {
    store: Arc<dyn DocumentStore>,
    failures: AtomicU64,
}

impl AuditChannel {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            failures: AtomicU64::new(0),
        }
    }

    /// Best-effort write; returns whether the record was stored.
    pub async fn record(
        &self,
        user_id: &UserId,
        lead_id: Option<&LeadId>,
        action: AuditAction,
        detail: serde_json::Value,
    ) -> bool {
        let record = AuditRecord::new(user_id.clone(), lead_id.cloned(), action, detail);
        match self.store.insert_audit_record(&record).await {
            Ok(()) => {
                log::debug!("Audit record {} written ({:?})", record.id, action);
                true
            }
            Err(e) => {
                let total = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("Audit write for user {} failed ({} failures so far): {}", user_id, total, e);
                false
            }
        }
    }

    /// Number of audit writes that failed since startup
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
