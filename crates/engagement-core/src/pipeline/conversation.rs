//! Direct-message conversation state machine
//!
//! Each inbound message is committed together with the reply it produced in a single
//! conditional write. The reply is sent afterwards and the inbound item is only
//! acknowledged once the send went through, so a failed send leaves the item unread
//! and the next poll re-sends the committed reply instead of generating a new one.

use engagement_types::{
    AgentId, AuditAction, Conversation, ConversationId, ConversationStage, Message, UserId,
};
use serde_json::json;
use std::sync::Arc;

use super::audit::AuditChannel;
use super::qualification::QualificationLedger;
use super::traits::{ContentGenerator, MessageAnalyzer, MessagingTransport};
use crate::constants::{DIRECT_MESSAGE_SUBJECT, EMAIL_COLLECTED_REPLY, NOT_INTERESTED_REPLY};
use crate::error::{EngagementError, Result};
use crate::store::DocumentStore;
use crate::types::{
    InboundItem, Intent, KnowledgeContext, LeadContext, OutreachRequest, ProcessOptions, ProcessOutcome, SendOutcome,
};

pub struct ConversationStateMachine {
    store: Arc<dyn DocumentStore>,
    transport: Arc<dyn MessagingTransport>,
    generator: Arc<dyn ContentGenerator>,
    analyzer: Arc<dyn MessageAnalyzer>,
    audit: Arc<AuditChannel>,
    qualification: Option<(Arc<QualificationLedger>, AgentId)>,
}

impl ConversationStateMachine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        transport: Arc<dyn MessagingTransport>,
        generator: Arc<dyn ContentGenerator>,
        analyzer: Arc<dyn MessageAnalyzer>,
        audit: Arc<AuditChannel>,
    ) -> Self {
        Self {
            store,
            transport,
            generator,
            analyzer,
            audit,
            qualification: None,
        }
    }

    /// Qualify leads as `interest_expressed` once their reply has been answered
    pub fn with_qualification(mut self, ledger: Arc<QualificationLedger>, agent_id: AgentId) -> Self {
        self.qualification = Some((ledger, agent_id));
        self
    }

    /// Apply one inbound message to a conversation and commit the reply it produces.
    ///
    /// Email addresses and declines end the conversation with a fixed reply; anything
    /// else goes to the content generator. A collaborator failure commits nothing and
    /// returns an empty response. An inbound platform id that was already processed
    /// returns the reply committed for it the first time.
    pub async fn process_incoming_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        knowledge: &KnowledgeContext,
        options: &ProcessOptions,
    ) -> Result<ProcessOutcome> {
        let mut conversation = self.load(conversation_id).await?;

        if let Some(platform_id) = options.inbound_platform_id.as_deref() {
            if let Some(position) = conversation.inbound_position(platform_id) {
                log::info!("Inbound {} already processed in conversation {}", platform_id, conversation.id);
                return Ok(replay(&conversation, position));
            }
        }

        if conversation.is_terminal() {
            return Err(EngagementError::FailedPrecondition(format!(
                "Conversation {} is {}",
                conversation.id, conversation.stage
            )));
        }
        if text.trim().is_empty() {
            return Err(EngagementError::InvalidArgument("inbound text is empty".to_string()));
        }

        let expected_stage = conversation.stage;
        let expected_messages = conversation.messages.len();

        let analysis = match self.analyzer.analyze(text).await {
            Ok(analysis) => analysis,
            Err(e) => {
                log::warn!("Analysis failed for conversation {}, nothing committed: {}", conversation.id, e);
                return Ok(ProcessOutcome::uncommitted());
            }
        };
        let inbound = Message::inbound(text, options.inbound_platform_id.clone(), Some(analysis.sentiment));

        let (response, extracted_email) = match analysis.extracted_email.filter(|_| analysis.has_email) {
            Some(email) => {
                conversation.push_message(inbound);
                conversation.advance_stage(ConversationStage::Collected)?;
                conversation.collected_email = Some(email.clone());
                (EMAIL_COLLECTED_REPLY.to_string(), Some(email))
            }
            None if analysis.intent == Intent::NotInterested => {
                conversation.push_message(inbound);
                conversation.advance_stage(ConversationStage::NotInterested)?;
                (NOT_INTERESTED_REPLY.to_string(), None)
            }
            None => {
                let stage = conversation.stage.generation_input();
                conversation.push_message(inbound);

                let reply = match self
                    .generator
                    .generate(&conversation.messages, &options.lead, knowledge, stage)
                    .await
                {
                    Ok(reply) if !reply.text.trim().is_empty() => reply,
                    Ok(_) => {
                        log::warn!("Generator returned an empty reply for conversation {}", conversation.id);
                        return Ok(ProcessOutcome::uncommitted());
                    }
                    Err(e) => {
                        log::warn!("Generation failed for conversation {}, nothing committed: {}", conversation.id, e);
                        return Ok(ProcessOutcome::uncommitted());
                    }
                };

                let next_stage = if conversation.stage.can_transition_to(reply.next_stage) {
                    reply.next_stage
                } else {
                    log::warn!(
                        "Ignoring proposed stage {} -> {} for conversation {}",
                        conversation.stage, reply.next_stage, conversation.id
                    );
                    conversation.stage
                };
                conversation.advance_stage(next_stage)?;
                if let Some(email) = &reply.extracted_email {
                    conversation.collected_email = Some(email.clone());
                }
                (reply.text, reply.extracted_email)
            }
        };

        conversation.push_message(Message::outbound(&response));
        if !self
            .store
            .update_conversation(&conversation, expected_stage, expected_messages)
            .await?
        {
            return Err(EngagementError::FailedPrecondition(format!(
                "Conversation {} changed while the message was processed",
                conversation.id
            )));
        }

        log::info!("Conversation {} {} -> {}", conversation.id, expected_stage, conversation.stage);
        Ok(ProcessOutcome {
            response,
            new_stage: conversation.stage,
            extracted_email,
            already_delivered: false,
        })
    }

    /// Send the first message to a lead and open a conversation if it was delivered.
    ///
    /// Returns `None` when the send failed, or when it succeeded but the conversation
    /// could not be stored (recorded in the audit trail as untracked outreach).
    pub async fn start_conversation(&self, request: &OutreachRequest) -> Result<Option<ConversationId>> {
        if request.user_id.is_empty() || request.lead_username.trim().is_empty() {
            return Err(EngagementError::InvalidArgument("user_id and lead_username are required".to_string()));
        }
        if request.initial_message.trim().is_empty() {
            return Err(EngagementError::InvalidArgument("initial message is empty".to_string()));
        }

        let existing = self
            .store
            .find_conversations(&request.user_id, Some(&request.lead_username))
            .await?;
        if let Some(active) = existing.iter().find(|c| !c.is_terminal()) {
            return Err(EngagementError::FailedPrecondition(format!(
                "Conversation {} with {} is still active",
                active.id, request.lead_username
            )));
        }

        let subject = request.subject.as_deref().unwrap_or(DIRECT_MESSAGE_SUBJECT);
        let sent = self
            .transport
            .send(&request.user_id, &request.lead_username, subject, &request.initial_message)
            .await;
        if !sent.success {
            log::warn!(
                "Outreach to {} failed: {}",
                request.lead_username,
                sent.error.as_deref().unwrap_or("unknown error")
            );
            return Ok(None);
        }

        let conversation = Conversation::from_outreach(
            request.user_id.clone(),
            request.lead_id.clone(),
            request.lead_username.clone(),
            Message::delivered(&request.initial_message, sent.message_id),
        );

        if let Err(e) = self.store.insert_conversation(&conversation).await {
            log::error!(
                "Outreach to {} was sent but conversation {} could not be stored: {}",
                request.lead_username, conversation.id, e
            );
            self.audit
                .record(
                    &request.user_id,
                    Some(&request.lead_id),
                    AuditAction::UntrackedOutreach,
                    json!({
                        "lead_username": request.lead_username,
                        "message": request.initial_message,
                        "error": e.to_string(),
                    }),
                )
                .await;
            return Ok(None);
        }

        log::info!("Started conversation {} with {}", conversation.id, request.lead_username);
        Ok(Some(conversation.id))
    }

    /// Send `text` to the lead and append it to the log if the send succeeded.
    pub async fn send_response(&self, conversation_id: &ConversationId, text: &str) -> Result<bool> {
        let mut conversation = self.load(conversation_id).await?;
        if conversation.is_terminal() {
            return Err(EngagementError::FailedPrecondition(format!(
                "Conversation {} is {}",
                conversation.id, conversation.stage
            )));
        }
        if text.trim().is_empty() {
            return Err(EngagementError::InvalidArgument("response text is empty".to_string()));
        }

        let sent = self.deliver(&conversation, text).await;
        if !sent.success {
            log::warn!(
                "Response in conversation {} not sent: {}",
                conversation.id,
                sent.error.as_deref().unwrap_or("unknown error")
            );
            return Ok(false);
        }

        let expected_stage = conversation.stage;
        let expected_messages = conversation.messages.len();
        conversation.push_message(Message::delivered(text, sent.message_id));
        if !self
            .store
            .update_conversation(&conversation, expected_stage, expected_messages)
            .await?
        {
            log::error!("Response in conversation {} was sent but not recorded (concurrent update)", conversation.id);
        }
        Ok(true)
    }

    /// Poll the user's inbox and answer every item that belongs to a conversation.
    ///
    /// Returns the number of items consumed. Items from unknown authors stay unread.
    pub async fn check_and_process_new_messages(&self, user_id: &UserId, knowledge: &KnowledgeContext) -> Result<usize> {
        let items = self.transport.fetch_unread(user_id).await?;
        if items.is_empty() {
            return Ok(0);
        }
        log::info!("Fetched {} unread inbound items for user {}", items.len(), user_id);

        let mut processed = 0;
        for item in &items {
            match self.handle_inbound(user_id, item, knowledge).await {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(e) => log::error!(
                    "Inbound item {} from {} failed [{}]: {}",
                    item.id,
                    item.author,
                    e.code().as_str(),
                    e
                ),
            }
        }
        Ok(processed)
    }

    /// Conversations of a user that have not reached a terminal stage
    pub async fn list_active_conversations(&self, user_id: &UserId) -> Result<Vec<Conversation>> {
        Ok(self
            .store
            .find_conversations(user_id, None)
            .await?
            .into_iter()
            .filter(|c| !c.is_terminal())
            .collect())
    }

    pub async fn get_conversation(&self, conversation_id: &ConversationId) -> Result<Conversation> {
        self.load(conversation_id).await
    }

    async fn handle_inbound(&self, user_id: &UserId, item: &InboundItem, knowledge: &KnowledgeContext) -> Result<bool> {
        let conversations = self.store.find_conversations(user_id, Some(&item.author)).await?;
        let conversation = conversations
            .iter()
            .find(|c| c.inbound_position(&item.id).is_some())
            .or_else(|| conversations.iter().rev().find(|c| !c.is_terminal()));

        let Some(conversation) = conversation else {
            log::debug!("No active conversation with {}, leaving item {} unread", item.author, item.id);
            return Ok(false);
        };

        let options = ProcessOptions {
            lead: LeadContext {
                username: item.author.clone(),
                ..LeadContext::default()
            },
            inbound_platform_id: Some(item.id.clone()),
        };
        let outcome = self
            .process_incoming_message(&conversation.id, &item.body, knowledge, &options)
            .await?;

        if outcome.already_delivered {
            self.transport.acknowledge(user_id, &item.id).await?;
            return Ok(true);
        }
        if !outcome.is_committed() {
            log::warn!("Item {} left unread for a later retry", item.id);
            return Ok(false);
        }

        let sent = self.transport.reply(user_id, &item.id, &outcome.response).await;
        if !sent.success {
            log::error!(
                "Reply to item {} failed, not acknowledging: {}",
                item.id,
                sent.error.as_deref().unwrap_or("unknown error")
            );
            return Ok(false);
        }

        self.mark_reply_delivered(&conversation.id, &item.id, sent.message_id).await;
        self.transport.acknowledge(user_id, &item.id).await?;

        if outcome.new_stage != ConversationStage::NotInterested {
            self.qualify_interest(conversation).await;
        }
        Ok(true)
    }

    /// Threaded reply to the latest inbound message, or a direct message before the lead replied
    async fn deliver(&self, conversation: &Conversation, text: &str) -> SendOutcome {
        match conversation.last_inbound().and_then(|m| m.platform_id.as_deref()) {
            Some(parent_id) => self.transport.reply(&conversation.user_id, parent_id, text).await,
            None => {
                self.transport
                    .send(&conversation.user_id, &conversation.lead_username, DIRECT_MESSAGE_SUBJECT, text)
                    .await
            }
        }
    }

    async fn mark_reply_delivered(&self, conversation_id: &ConversationId, inbound_id: &str, message_id: Option<String>) {
        let result: Result<bool> = async {
            let mut conversation = self.load(conversation_id).await?;
            let reply = conversation
                .inbound_position(inbound_id)
                .and_then(|position| conversation.reply_position(position));
            let Some(reply) = reply else {
                return Ok(false);
            };
            conversation.messages[reply].mark_delivered(message_id);
            let (stage, count) = (conversation.stage, conversation.messages.len());
            self.store.update_conversation(&conversation, stage, count).await
        }
        .await;

        match result {
            Ok(true) => {}
            Ok(false) => log::warn!("Could not mark reply to {} as delivered in {}", inbound_id, conversation_id),
            Err(e) => log::warn!("Could not mark reply to {} as delivered in {}: {}", inbound_id, conversation_id, e),
        }
    }

    async fn qualify_interest(&self, conversation: &Conversation) {
        let Some((ledger, agent_id)) = &self.qualification else {
            return;
        };
        if let Err(e) = ledger
            .mark_lead_as_expressed_interest(&conversation.user_id, &conversation.lead_id, agent_id, &conversation.id)
            .await
        {
            log::error!("Failed to qualify lead {} from conversation {}: {}", conversation.lead_id, conversation.id, e);
        }
    }

    async fn load(&self, conversation_id: &ConversationId) -> Result<Conversation> {
        self.store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| EngagementError::NotFound(format!("Conversation {}", conversation_id)))
    }
}

/// Outcome for an inbound message that was processed before
fn replay(conversation: &Conversation, inbound_position: usize) -> ProcessOutcome {
    match conversation.reply_position(inbound_position) {
        Some(reply) => {
            let message = &conversation.messages[reply];
            ProcessOutcome {
                response: message.text.clone(),
                new_stage: conversation.stage,
                extracted_email: conversation.collected_email.clone(),
                already_delivered: message.is_delivered(),
            }
        }
        None => ProcessOutcome {
            response: String::new(),
            new_stage: conversation.stage,
            extracted_email: conversation.collected_email.clone(),
            already_delivered: true,
        },
    }
}
