//! Recording fakes for the collaborator traits, shared by the pipeline unit tests

use async_trait::async_trait;
use engagement_types::{AiVerdict, ConversationStage, Message, ModerationItem, ModerationItemId, PostContext, UserId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::traits::*;
use crate::error::{EngagementError, Result};
use crate::types::*;

pub struct FakeGenerator {
    reply: Mutex<Option<GeneratedReply>>,
    pub calls: AtomicUsize,
    pub last_stage: Mutex<Option<ConversationStage>>,
}

impl FakeGenerator {
    pub fn replying(text: &str, next_stage: ConversationStage) -> Self {
        Self {
            reply: Mutex::new(Some(GeneratedReply {
                text: text.to_string(),
                next_stage,
                extracted_email: None,
            })),
            calls: AtomicUsize::new(0),
            last_stage: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Mutex::new(None),
            calls: AtomicUsize::new(0),
            last_stage: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for FakeGenerator {
    async fn generate(
        &self,
        _history: &[Message],
        _lead: &LeadContext,
        _knowledge: &KnowledgeContext,
        stage: ConversationStage,
    ) -> Result<GeneratedReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_stage.lock().unwrap() = Some(stage);
        self.reply
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| EngagementError::ServiceUnavailable("generator down".to_string()))
    }
}

#[derive(Default)]
pub struct FakeTransport {
    pub sends: Mutex<Vec<(String, String)>>,
    pub replies: Mutex<Vec<(String, String)>>,
    pub unread: Mutex<Vec<InboundItem>>,
    pub acknowledged: Mutex<Vec<String>>,
    pub fail_sends: AtomicBool,
}

impl FakeTransport {
    pub fn push_unread(&self, id: &str, author: &str, body: &str) {
        self.unread.lock().unwrap().push(InboundItem {
            id: id.to_string(),
            kind: InboundKind::DirectMessage,
            author: author.to_string(),
            body: body.to_string(),
        });
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_sends.store(failing, Ordering::SeqCst);
    }

    pub fn sent_bodies(&self) -> Vec<String> {
        let mut bodies: Vec<String> = self.sends.lock().unwrap().iter().map(|(_, b)| b.clone()).collect();
        bodies.extend(self.replies.lock().unwrap().iter().map(|(_, b)| b.clone()));
        bodies
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingTransport for FakeTransport {
    async fn send(&self, _user_id: &UserId, recipient: &str, _subject: &str, body: &str) -> SendOutcome {
        if self.fail_sends.load(Ordering::SeqCst) {
            return SendOutcome::failed("transport down");
        }
        self.sends.lock().unwrap().push((recipient.to_string(), body.to_string()));
        SendOutcome::delivered(None)
    }

    async fn reply(&self, _user_id: &UserId, parent_id: &str, body: &str) -> SendOutcome {
        if self.fail_sends.load(Ordering::SeqCst) {
            return SendOutcome::failed("transport down");
        }
        self.replies.lock().unwrap().push((parent_id.to_string(), body.to_string()));
        SendOutcome::delivered(Some(format!("t4_{}", uuid::Uuid::new_v4().simple())))
    }

    async fn fetch_unread(&self, _user_id: &UserId) -> Result<Vec<InboundItem>> {
        let acked = self.acknowledged.lock().unwrap().clone();
        Ok(self
            .unread
            .lock()
            .unwrap()
            .iter()
            .filter(|item| !acked.contains(&item.id))
            .cloned()
            .collect())
    }

    async fn acknowledge(&self, _user_id: &UserId, item_id: &str) -> Result<()> {
        self.acknowledged.lock().unwrap().push(item_id.to_string());
        Ok(())
    }
}

pub enum JudgeBehavior {
    Verdict(bool, f64),
    MissingCredentials,
    Failing,
    Garbage,
}

pub struct FakeJudge {
    behavior: JudgeBehavior,
    pub calls: AtomicUsize,
    pub snippet_counts: Mutex<Vec<usize>>,
}

impl FakeJudge {
    pub fn new(behavior: JudgeBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            snippet_counts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AiJudge for FakeJudge {
    async fn judge(
        &self,
        _draft: &str,
        _context: &PostContext,
        snippets: &[KnowledgeSnippet],
    ) -> std::result::Result<AiVerdict, JudgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.snippet_counts.lock().unwrap().push(snippets.len());
        match self.behavior {
            JudgeBehavior::Verdict(approved, score) => Ok(AiVerdict::new(approved, score, "fake verdict")),
            JudgeBehavior::MissingCredentials => Err(JudgeError::MissingCredentials),
            JudgeBehavior::Failing => Err(JudgeError::Failed("HTTP 500".to_string())),
            JudgeBehavior::Garbage => Err(JudgeError::Unparseable("not json".to_string())),
        }
    }
}

#[derive(Default)]
pub struct FakeInbox {
    pub delivered: Mutex<Vec<ModerationItemId>>,
}

impl FakeInbox {
    pub fn delivered(&self) -> Vec<ModerationItemId> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReviewInbox for FakeInbox {
    async fn deliver(&self, item: &ModerationItem, _verdict: &AiVerdict) -> Result<()> {
        self.delivered.lock().unwrap().push(item.id.clone());
        Ok(())
    }
}

pub struct FakeKnowledge {
    pub available: usize,
    pub failing: bool,
}

#[async_trait]
impl KnowledgeSource for FakeKnowledge {
    async fn snippets(&self, _user_id: &UserId, _query: &str, limit: usize) -> Result<Vec<KnowledgeSnippet>> {
        if self.failing {
            return Err(EngagementError::ServiceUnavailable("knowledge store down".to_string()));
        }
        Ok((0..self.available.min(limit))
            .map(|i| KnowledgeSnippet {
                source: format!("doc-{}", i),
                text: format!("fact {}", i),
            })
            .collect())
    }
}

pub struct FakeTokenEndpoint {
    grant: Mutex<Option<TokenGrant>>,
    delay: Duration,
    pub calls: AtomicUsize,
    pub seen_refresh_tokens: Mutex<Vec<String>>,
}

impl FakeTokenEndpoint {
    pub fn granting(access: &str, refresh: Option<&str>, expires_in_seconds: i64) -> Self {
        Self {
            grant: Mutex::new(Some(TokenGrant {
                access_token: access.to_string(),
                refresh_token: refresh.map(str::to_string),
                expires_in_seconds,
            })),
            delay: Duration::from_millis(0),
            calls: AtomicUsize::new(0),
            seen_refresh_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            grant: Mutex::new(None),
            delay: Duration::from_millis(0),
            calls: AtomicUsize::new(0),
            seen_refresh_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenEndpoint for FakeTokenEndpoint {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_refresh_tokens.lock().unwrap().push(refresh_token.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.grant
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| EngagementError::Unauthenticated("invalid_grant".to_string()))
    }
}

pub struct FakePoster {
    result: std::result::Result<PostedComment, PostError>,
    pub calls: Mutex<Vec<(String, String, String)>>,
}

impl FakePoster {
    pub fn succeeding() -> Self {
        Self {
            result: Ok(PostedComment {
                remote_id: "t1_remote".to_string(),
                permalink: Some("/r/rust/comments/abc/_/remote/".to_string()),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(class: PostErrorClass) -> Self {
        Self {
            result: Err(PostError::new(class, "platform said no")),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PostingEndpoint for FakePoster {
    async fn post(
        &self,
        access_token: &str,
        target_fullname: &str,
        text: &str,
    ) -> std::result::Result<PostedComment, PostError> {
        self.calls
            .lock()
            .unwrap()
            .push((access_token.to_string(), target_fullname.to_string(), text.to_string()));
        self.result.clone()
    }
}

pub struct StaticTokens(pub Option<String>);

#[async_trait]
impl AccessTokenSource for StaticTokens {
    async fn valid_access_token(&self, _user_id: &UserId) -> Option<String> {
        self.0.clone()
    }
}
