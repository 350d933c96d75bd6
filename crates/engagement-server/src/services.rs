//! Service wiring: clients and pipeline components built from configuration

use engagement_core::{
    AuditChannel, ConversationStateMachine, DraftWatcher, EngagementConfig, FileKnowledgeBase, FileStore,
    HeuristicAnalyzer, MessagePoller, ModerationPipeline, OpenAiClient, QualificationLedger, RedditClient,
    RedditOAuth, Result, StoreBillingCycles, TelegramClient, TokenLifecycleManager,
};
use engagement_types::{AgentId, UserId};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct Services {
    pub tokens: Arc<TokenLifecycleManager>,
    pub moderation: Arc<ModerationPipeline>,
    pub conversations: Arc<ConversationStateMachine>,
    pub ledger: Arc<QualificationLedger>,
    pub agent_id: AgentId,
    draft_watcher: Arc<DraftWatcher>,
    message_poller: Arc<MessagePoller>,
}

impl Services {
    pub fn from_config(config: &EngagementConfig, store_root: &Path) -> Result<Self> {
        let pipeline = &config.pipeline;
        let timeout = Duration::from_secs(pipeline.http_timeout_seconds);

        let store = Arc::new(FileStore::new(store_root)?);
        log::info!("Document store at {}", store.root().display());

        let oauth = Arc::new(RedditOAuth::new(&config.platform, timeout)?);
        let tokens = Arc::new(TokenLifecycleManager::with_refresh_margin(
            store.clone(),
            oauth,
            pipeline.token_refresh_margin_seconds,
        ));

        let reddit = Arc::new(RedditClient::new(&config.platform, tokens.clone(), timeout)?);
        let openai = Arc::new(OpenAiClient::new(config.openai.clone(), timeout)?);
        let telegram = Arc::new(TelegramClient::new(config.telegram.clone(), timeout)?);
        let knowledge = Arc::new(FileKnowledgeBase::new(&config.knowledge.root));

        let audit = Arc::new(AuditChannel::new(store.clone()));
        let ledger = Arc::new(QualificationLedger::new(
            store.clone(),
            Arc::new(StoreBillingCycles::new(store.clone())),
            audit.clone(),
        ));

        let moderation = Arc::new(
            ModerationPipeline::new(
                store.clone(),
                openai.clone(),
                telegram,
                knowledge.clone(),
                tokens.clone(),
                reddit.clone(),
            )
            .with_snippet_limit(pipeline.knowledge_snippet_limit),
        );

        let agent_id = AgentId::new(pipeline.agent_id.clone());
        let conversations = Arc::new(
            ConversationStateMachine::new(store.clone(), reddit, openai, Arc::new(HeuristicAnalyzer::new()?), audit)
                .with_qualification(ledger.clone(), agent_id.clone()),
        );

        let draft_watcher = Arc::new(DraftWatcher::new(
            store,
            moderation.clone(),
            Duration::from_secs(pipeline.draft_scan_interval_seconds),
        ));
        let message_poller = Arc::new(MessagePoller::new(
            conversations.clone(),
            knowledge,
            pipeline.poll_users.iter().map(UserId::new).collect(),
            Duration::from_secs(pipeline.poll_interval_seconds),
            pipeline.knowledge_snippet_limit,
        ));

        Ok(Self {
            tokens,
            moderation,
            conversations,
            ledger,
            agent_id,
            draft_watcher,
            message_poller,
        })
    }

    pub fn draft_watcher(&self) -> Arc<DraftWatcher> {
        self.draft_watcher.clone()
    }

    pub fn message_poller(&self) -> Arc<MessagePoller> {
        self.message_poller.clone()
    }
}
