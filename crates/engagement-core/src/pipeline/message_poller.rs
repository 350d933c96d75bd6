//! Periodic inbox polling for every configured user

use engagement_types::UserId;
use futures::future::join_all;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use super::conversation::ConversationStateMachine;
use super::traits::KnowledgeSource;
use crate::types::KnowledgeContext;

pub struct MessagePoller {
    machine: Arc<ConversationStateMachine>,
    knowledge: Arc<dyn KnowledgeSource>,
    users: Vec<UserId>,
    poll_interval: Duration,
    snippet_limit: usize,
}

impl MessagePoller {
    pub fn new(
        machine: Arc<ConversationStateMachine>,
        knowledge: Arc<dyn KnowledgeSource>,
        users: Vec<UserId>,
        poll_interval: Duration,
        snippet_limit: usize,
    ) -> Self {
        Self {
            machine,
            knowledge,
            users,
            poll_interval,
            snippet_limit,
        }
    }

    pub async fn start(self: Arc<Self>) {
        info!("Polling inboxes of {} users every {:?}", self.users.len(), self.poll_interval);

        loop {
            let processed = self.poll_once().await;
            if processed > 0 {
                info!("Answered {} inbound messages", processed);
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Poll all users concurrently. A failing user is logged and skipped.
    pub async fn poll_once(&self) -> usize {
        let polls = self.users.iter().map(|user_id| async move {
            let knowledge = self.knowledge_for(user_id).await;
            match self.machine.check_and_process_new_messages(user_id, &knowledge).await {
                Ok(count) => count,
                Err(e) => {
                    error!("Inbox poll for user {} failed [{}]: {}", user_id, e.code().as_str(), e);
                    0
                }
            }
        });

        join_all(polls).await.into_iter().sum()
    }

    async fn knowledge_for(&self, user_id: &UserId) -> KnowledgeContext {
        match self.knowledge.snippets(user_id, "", self.snippet_limit).await {
            Ok(snippets) => KnowledgeContext {
                summary: String::new(),
                snippets,
            },
            Err(e) => {
                warn!("Knowledge unavailable for user {}, replying without it: {}", user_id, e);
                KnowledgeContext::default()
            }
        }
    }
}
