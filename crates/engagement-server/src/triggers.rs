//! Trigger files: JSON commands dropped into the triggers directory by other actors
//!
//! Each file holds one command. After handling it is moved to `processed/` or
//! `failed/`; the failure log line carries the stable error code.

use engagement_core::types::{OutreachRequest, TokenGrant};
use engagement_core::{EngagementError, Result};
use engagement_types::{
    AgentId, BillingStatus, LeadId, LinkTracking, ModerationItemId, PostContext, QualificationEventId, UserId,
};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::unbounded_channel;

use crate::services::Services;

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum TriggerCommand {
    /// A draft was written by an agent; create it and run the review
    DraftCreated {
        user_id: UserId,
        post_id: String,
        #[serde(default)]
        parent_id: Option<String>,
        comment_text: String,
        #[serde(default)]
        context: PostContext,
    },
    /// Re-run the review for an existing pending item
    ReviewDraft { item_id: ModerationItemId },
    Approve { item_id: ModerationItemId, caller_id: UserId },
    Reject { item_id: ModerationItemId, caller_id: UserId },
    LinkClick { lead_id: LeadId, url: String, tracking: LinkTracking },
    StartConversation(OutreachRequest),
    TargetMatch {
        user_id: UserId,
        lead_id: LeadId,
        #[serde(default)]
        agent_id: Option<AgentId>,
        score: f64,
        #[serde(default)]
        criteria: Vec<String>,
    },
    StoreTokenGrant { user_id: UserId, grant: TokenGrant },
    AdvanceBilling { user_id: UserId, event_id: QualificationEventId, status: BillingStatus },
}

pub async fn execute(services: &Services, command: TriggerCommand) -> Result<()> {
    match command {
        TriggerCommand::DraftCreated { user_id, post_id, parent_id, comment_text, context } => {
            let item = services
                .moderation
                .create_draft(user_id, post_id, parent_id, comment_text, context)
                .await?;
            let status = services.moderation.on_draft_created(&item.id).await?;
            log::info!("Draft {} reviewed: {}", item.id, status);
        }
        TriggerCommand::ReviewDraft { item_id } => {
            let status = services.moderation.on_draft_created(&item_id).await?;
            log::info!("Draft {} is {}", item_id, status);
        }
        TriggerCommand::Approve { item_id, caller_id } => {
            let item = services.moderation.approve(&item_id, &caller_id).await?;
            match item.failure_reason.as_deref() {
                Some(reason) => log::warn!("Draft {} approved but not posted: {}", item.id, reason),
                None => log::info!("Draft {} is {}", item.id, item.status),
            }
        }
        TriggerCommand::Reject { item_id, caller_id } => {
            services.moderation.reject(&item_id, &caller_id).await?;
        }
        TriggerCommand::LinkClick { lead_id, url, tracking } => {
            let outcome = services.ledger.track_link_click(&lead_id, &url, tracking).await?;
            if let Some(tracked) = outcome.qualification {
                log::info!("Link click {} -> qualification {} (new: {})", outcome.click.id, tracked.event().id, tracked.is_created());
            }
        }
        TriggerCommand::StartConversation(request) => {
            match services.conversations.start_conversation(&request).await? {
                Some(id) => log::info!("Conversation {} started with {}", id, request.lead_username),
                None => {
                    return Err(EngagementError::ServiceUnavailable(format!(
                        "Outreach to {} was not tracked",
                        request.lead_username
                    )))
                }
            }
        }
        TriggerCommand::TargetMatch { user_id, lead_id, agent_id, score, criteria } => {
            let agent_id = agent_id.unwrap_or_else(|| services.agent_id.clone());
            services
                .ledger
                .mark_lead_as_target_match(&user_id, &lead_id, &agent_id, score, criteria)
                .await?;
        }
        TriggerCommand::StoreTokenGrant { user_id, grant } => {
            services.tokens.store_grant(&user_id, grant).await?;
        }
        TriggerCommand::AdvanceBilling { user_id, event_id, status } => {
            services.ledger.advance_billing_status(&user_id, &event_id, status).await?;
        }
    }
    Ok(())
}

/// Watches the triggers directory and executes every command file that appears
pub struct TriggerMonitor {
    services: Arc<Services>,
    triggers_dir: PathBuf,
    processed_dir: PathBuf,
    failed_dir: PathBuf,
}

impl TriggerMonitor {
    pub fn new(services: Arc<Services>, triggers_dir: PathBuf, processed_dir: PathBuf, failed_dir: PathBuf) -> Self {
        Self {
            services,
            triggers_dir,
            processed_dir,
            failed_dir,
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.triggers_dir)?;
        std::fs::create_dir_all(&self.processed_dir)?;
        std::fs::create_dir_all(&self.failed_dir)?;

        log::info!("Monitoring triggers in {}/", self.triggers_dir.display());

        let (tx, mut rx) = unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |result: std::result::Result<Event, notify::Error>| {
                if let Ok(event) = result {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(&self.triggers_dir, RecursiveMode::NonRecursive)?;

        // Files written while the monitor was down
        self.process_existing().await;

        while let Some(event) = rx.recv().await {
            log::debug!("File system event: {:?}", event);
            if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                for path in event.paths {
                    if is_trigger_file(&path) && path.is_file() {
                        self.process_file(&path).await;
                    }
                }
            }
        }

        anyhow::bail!("Trigger watcher channel closed")
    }

    pub async fn process_existing(&self) -> usize {
        let entries = match std::fs::read_dir(&self.triggers_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("Failed to read triggers directory: {}", e);
                return 0;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_trigger_file(path))
            .collect();
        paths.sort();

        for path in &paths {
            self.process_file(path).await;
        }
        paths.len()
    }

    /// Execute one trigger file and move it out of the triggers directory
    pub async fn process_file(&self, path: &Path) {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            return;
        };
        log::info!("Processing trigger file: {}", file_name);

        let result = match std::fs::read_to_string(path) {
            // Another event for the same file already moved it
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => Err(EngagementError::Io(e)),
            Ok(content) => match serde_json::from_str::<TriggerCommand>(&content) {
                Ok(command) => execute(&self.services, command).await,
                Err(e) => Err(EngagementError::InvalidArgument(format!("Unreadable trigger command: {}", e))),
            },
        };

        let destination = match &result {
            Ok(()) => self.processed_dir.join(&file_name),
            Err(e) => {
                log::error!("Trigger {} failed [{}]: {}", file_name, e.code().as_str(), e);
                self.failed_dir.join(&file_name)
            }
        };

        if let Err(e) = std::fs::rename(path, &destination) {
            log::error!("Failed to move trigger file {}: {}", file_name, e);
        }
    }
}

fn is_trigger_file(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("json")
}
