//! Polling watcher for newly created drafts
//!
//! Treats the pending moderation collection like a queue: every pending item is
//! handed to the moderation pipeline, which claims it with a conditional write, so a
//! draft seen twice (or by two watchers) is reviewed once.

use engagement_types::ModerationStatus;
use log::{debug, error, info};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use super::moderation::ModerationPipeline;
use crate::error::Result;
use crate::store::DocumentStore;

pub struct DraftWatcher {
    store: Arc<dyn DocumentStore>,
    moderation: Arc<ModerationPipeline>,
    scan_interval: Duration,
}

impl DraftWatcher {
    pub fn new(store: Arc<dyn DocumentStore>, moderation: Arc<ModerationPipeline>, scan_interval: Duration) -> Self {
        Self {
            store,
            moderation,
            scan_interval,
        }
    }

    /// Scan forever
    pub async fn start(self: Arc<Self>) {
        info!("Starting draft watcher (every {:?})", self.scan_interval);

        loop {
            if let Err(e) = self.scan_once().await {
                error!("Draft scan failed: {}", e);
            }
            sleep(self.scan_interval).await;
        }
    }

    /// Review every pending draft once. Returns how many left the pending status.
    pub async fn scan_once(&self) -> Result<usize> {
        let pending = self.store.list_moderation_items(ModerationStatus::Pending).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        debug!("Found {} pending drafts", pending.len());

        let mut reviewed = 0;
        for item in pending {
            match self.moderation.on_draft_created(&item.id).await {
                Ok(ModerationStatus::Pending) => {}
                Ok(status) => {
                    info!("Draft {} is now {}", item.id, status);
                    reviewed += 1;
                }
                Err(e) => error!("Review of draft {} failed [{}]: {}", item.id, e.code().as_str(), e),
            }
        }
        Ok(reviewed)
    }
}
