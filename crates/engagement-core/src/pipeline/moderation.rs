//! Comment moderation: AI review, human approval, posting
//!
//! Every status change is written with the status it was read in as a precondition.
//! A writer whose precondition no longer holds stops instead of overwriting, which is
//! what makes duplicate triggers and double approvals harmless.

use chrono::{DateTime, Utc};
use engagement_types::{
    AiVerdict, ModerationItem, ModerationItemId, ModerationStatus, PostContext, UserApproval, UserId,
};
use std::collections::HashMap;
use std::sync::Arc;

use super::traits::{AccessTokenSource, AiJudge, KnowledgeSource, PostingEndpoint, ReviewInbox};
use crate::constants::{
    AUTH_REQUIRED_REASON, HEALTH_MAX_FAILED_ITEMS, HEALTH_MAX_PENDING_ITEMS, HEALTH_MAX_POSTING_ITEMS,
    JUDGE_FAILED_REASON, JUDGE_SKIPPED_REASON, KNOWLEDGE_SNIPPET_LIMIT,
};
use crate::error::{EngagementError, Result};
use crate::store::DocumentStore;
use crate::types::{JudgeError, KnowledgeSnippet};

/// Item counts per moderation status
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusCountMap {
    counts: HashMap<ModerationStatus, usize>,
}

impl StatusCountMap {
    pub fn increment(&mut self, status: ModerationStatus) {
        *self.counts.entry(status).or_insert(0) += 1;
    }

    pub fn get(&self, status: ModerationStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct ModerationHealth {
    pub status: HealthStatus,
    pub counts: StatusCountMap,
    pub total_items: usize,
    pub last_check: DateTime<Utc>,
}

pub struct ModerationPipeline {
    store: Arc<dyn DocumentStore>,
    judge: Arc<dyn AiJudge>,
    inbox: Arc<dyn ReviewInbox>,
    knowledge: Arc<dyn KnowledgeSource>,
    tokens: Arc<dyn AccessTokenSource>,
    poster: Arc<dyn PostingEndpoint>,
    snippet_limit: usize,
}

impl ModerationPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        judge: Arc<dyn AiJudge>,
        inbox: Arc<dyn ReviewInbox>,
        knowledge: Arc<dyn KnowledgeSource>,
        tokens: Arc<dyn AccessTokenSource>,
        poster: Arc<dyn PostingEndpoint>,
    ) -> Self {
        Self {
            store,
            judge,
            inbox,
            knowledge,
            tokens,
            poster,
            snippet_limit: KNOWLEDGE_SNIPPET_LIMIT,
        }
    }

    /// Cap on knowledge snippets handed to the judge (never above the built-in limit)
    pub fn with_snippet_limit(mut self, limit: usize) -> Self {
        self.snippet_limit = limit.clamp(1, KNOWLEDGE_SNIPPET_LIMIT);
        self
    }

    /// Validate and persist a new pending draft
    pub async fn create_draft(
        &self,
        user_id: UserId,
        post_id: String,
        parent_id: Option<String>,
        comment_text: String,
        context: PostContext,
    ) -> Result<ModerationItem> {
        let item = ModerationItem::new_draft(user_id, post_id, parent_id, comment_text, context);
        let missing = item.missing_fields();
        if !missing.is_empty() {
            return Err(EngagementError::InvalidArgument(format!(
                "draft is missing required fields: {}",
                missing.join(", ")
            )));
        }

        self.store.insert_moderation_item(&item).await?;
        log::info!("Created draft {} for user {} on post {}", item.id, item.user_id, item.post_id);
        Ok(item)
    }

    /// React to a draft creation event. Safe to deliver more than once.
    ///
    /// Returns the status the item ends up in.
    pub async fn on_draft_created(&self, item_id: &ModerationItemId) -> Result<ModerationStatus> {
        let mut item = self.load(item_id).await?;

        if item.status != ModerationStatus::Pending {
            log::info!("Draft {} is already {}, ignoring creation event", item.id, item.status);
            return Ok(item.status);
        }

        let missing = item.missing_fields();
        if !missing.is_empty() {
            let reason = format!("malformed draft: missing {}", missing.join(", "));
            log::warn!("Draft {} rejected before review: {}", item.id, reason);
            item.fail(reason)?;
            return self.commit_or_current(&item, ModerationStatus::Pending).await;
        }

        item.transition_to(ModerationStatus::Reviewing)?;
        if !self.store.transition_moderation_item(&item, ModerationStatus::Pending).await? {
            log::info!("Draft {} was claimed by another reviewer", item.id);
            return self.current_status(&item.id).await;
        }
        log::info!("Reviewing draft {} for r/{}", item.id, item.context.subreddit);

        let snippets = self.knowledge_for(&item).await;
        let verdict = self.review(&item, &snippets).await;
        log::info!(
            "AI verdict for draft {}: approved={} score={:.2} ({})",
            item.id, verdict.approved, verdict.score, verdict.reason
        );

        item.ai_verdict = Some(verdict.clone());
        if !verdict.approved {
            item.transition_to(ModerationStatus::AiRejected)?;
            return self.commit_or_current(&item, ModerationStatus::Reviewing).await;
        }

        item.transition_to(ModerationStatus::AiApproved)?;
        let status = self.commit_or_current(&item, ModerationStatus::Reviewing).await?;
        if status == ModerationStatus::AiApproved {
            if let Err(e) = self.inbox.deliver(&item, &verdict).await {
                // The item stays listable and approvable; only the notification is lost
                log::error!("Failed to deliver draft {} for human review: {}", item.id, e);
            }
        }
        Ok(status)
    }

    /// Human approval: claim the item, obtain a credential and post it.
    ///
    /// Posting outcomes are written to the item; the returned item carries them.
    pub async fn approve(&self, item_id: &ModerationItemId, caller_id: &UserId) -> Result<ModerationItem> {
        let mut item = self.load_owned(item_id, caller_id).await?;

        match item.status {
            ModerationStatus::UserApproved | ModerationStatus::Posting | ModerationStatus::Posted => {
                return Err(EngagementError::FailedPrecondition(format!(
                    "Item {} was already approved ({})",
                    item.id, item.status
                )));
            }
            ModerationStatus::AiApproved => {}
            other => {
                return Err(EngagementError::FailedPrecondition(format!(
                    "Item {} is {} and cannot be approved",
                    item.id, other
                )));
            }
        }

        item.transition_to(ModerationStatus::UserApproved)?;
        item.user_approval = Some(UserApproval { approved: true, at: Utc::now() });
        self.commit(&item, ModerationStatus::AiApproved).await?;

        item.transition_to(ModerationStatus::Posting)?;
        self.commit(&item, ModerationStatus::UserApproved).await?;
        log::info!("Posting approved item {} for user {}", item.id, item.user_id);

        let access_token = match self.tokens.valid_access_token(&item.user_id).await {
            Some(token) => token,
            None => {
                log::warn!("No valid access token for user {}, item {} failed", item.user_id, item.id);
                item.fail(AUTH_REQUIRED_REASON)?;
                self.commit(&item, ModerationStatus::Posting).await?;
                return Ok(item);
            }
        };

        let target = item.target().fullname();
        match self.poster.post(&access_token, &target, &item.comment_text).await {
            Ok(posted) => {
                item.remote_id = Some(posted.remote_id);
                item.permalink = posted.permalink;
                item.transition_to(ModerationStatus::Posted)?;
                log::info!("Posted item {} as {} under {}", item.id, item.remote_id.as_deref().unwrap_or("?"), target);
            }
            Err(e) => {
                log::error!("Posting item {} under {} failed: {}", item.id, target, e);
                item.fail(e.class.failure_reason())?;
            }
        }

        self.commit(&item, ModerationStatus::Posting).await?;
        Ok(item)
    }

    /// Human rejection of an AI-approved draft
    pub async fn reject(&self, item_id: &ModerationItemId, caller_id: &UserId) -> Result<ModerationItem> {
        let mut item = self.load_owned(item_id, caller_id).await?;

        if item.status.is_terminal() {
            return Err(EngagementError::FailedPrecondition(format!(
                "Item {} is already {}",
                item.id, item.status
            )));
        }

        let expected = item.status;
        item.transition_to(ModerationStatus::UserRejected)?;
        item.user_approval = Some(UserApproval { approved: false, at: Utc::now() });
        self.commit(&item, expected).await?;

        log::info!("Item {} rejected by user {}", item.id, caller_id);
        Ok(item)
    }

    pub async fn get_item(&self, item_id: &ModerationItemId, caller_id: &UserId) -> Result<ModerationItem> {
        self.load_owned(item_id, caller_id).await
    }

    /// Items of one user, optionally narrowed to a single status
    pub async fn list_items(&self, user_id: &UserId, status: Option<ModerationStatus>) -> Result<Vec<ModerationItem>> {
        let statuses: Vec<ModerationStatus> = match status {
            Some(status) => vec![status],
            None => ModerationStatus::ALL.to_vec(),
        };

        let mut items = Vec::new();
        for status in statuses {
            items.extend(
                self.store
                    .list_moderation_items(status)
                    .await?
                    .into_iter()
                    .filter(|item| &item.user_id == user_id),
            );
        }
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items)
    }

    pub async fn status_counts(&self) -> Result<StatusCountMap> {
        let mut counts = StatusCountMap::default();
        for status in ModerationStatus::ALL {
            for _ in self.store.list_moderation_items(status).await? {
                counts.increment(status);
            }
        }
        Ok(counts)
    }

    pub async fn health_check(&self) -> Result<ModerationHealth> {
        let counts = self.status_counts().await?;
        let total_items = counts.total();

        let status = if counts.get(ModerationStatus::Failed) > HEALTH_MAX_FAILED_ITEMS {
            HealthStatus::Unhealthy
        } else if counts.get(ModerationStatus::Pending) > HEALTH_MAX_PENDING_ITEMS
            || counts.get(ModerationStatus::Posting) > HEALTH_MAX_POSTING_ITEMS
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Ok(ModerationHealth {
            status,
            counts,
            total_items,
            last_check: Utc::now(),
        })
    }

    /// Judge the draft, applying the fail-open / fail-closed policy
    async fn review(&self, item: &ModerationItem, snippets: &[KnowledgeSnippet]) -> AiVerdict {
        match self.judge.judge(&item.comment_text, &item.context, snippets).await {
            Ok(verdict) => AiVerdict::new(verdict.approved, verdict.score, &verdict.reason),
            Err(JudgeError::MissingCredentials) => {
                log::warn!("AI judge not configured, draft {} passes unreviewed", item.id);
                AiVerdict::new(true, 0.5, JUDGE_SKIPPED_REASON)
            }
            Err(e) => {
                log::error!("AI judge failed for draft {}: {}", item.id, e);
                AiVerdict::new(false, 0.0, JUDGE_FAILED_REASON)
            }
        }
    }

    async fn knowledge_for(&self, item: &ModerationItem) -> Vec<KnowledgeSnippet> {
        let query = format!("{} {}", item.context.post_title, item.comment_text);
        match self.knowledge.snippets(&item.user_id, &query, self.snippet_limit).await {
            Ok(mut snippets) => {
                snippets.truncate(self.snippet_limit);
                snippets
            }
            Err(e) => {
                log::warn!("Knowledge lookup for draft {} failed, judging without it: {}", item.id, e);
                Vec::new()
            }
        }
    }

    async fn load(&self, item_id: &ModerationItemId) -> Result<ModerationItem> {
        self.store
            .get_moderation_item(item_id)
            .await?
            .ok_or_else(|| EngagementError::NotFound(format!("Moderation item {}", item_id)))
    }

    async fn load_owned(&self, item_id: &ModerationItemId, caller_id: &UserId) -> Result<ModerationItem> {
        let item = self.load(item_id).await?;
        if &item.user_id != caller_id {
            return Err(EngagementError::PermissionDenied(format!(
                "Moderation item {} belongs to another user",
                item_id
            )));
        }
        Ok(item)
    }

    /// Write the item; a lost precondition is a caller-visible conflict.
    async fn commit(&self, item: &ModerationItem, expected: ModerationStatus) -> Result<()> {
        if self.store.transition_moderation_item(item, expected).await? {
            log::debug!("Item {} {} -> {}", item.id, expected, item.status);
            Ok(())
        } else {
            Err(EngagementError::FailedPrecondition(format!(
                "Item {} is no longer {}",
                item.id, expected
            )))
        }
    }

    /// Write the item; on a lost precondition report whatever status won.
    async fn commit_or_current(&self, item: &ModerationItem, expected: ModerationStatus) -> Result<ModerationStatus> {
        if self.store.transition_moderation_item(item, expected).await? {
            log::debug!("Item {} {} -> {}", item.id, expected, item.status);
            return Ok(item.status);
        }
        log::warn!("Item {} changed underneath us (expected {})", item.id, expected);
        self.current_status(&item.id).await
    }

    async fn current_status(&self, item_id: &ModerationItemId) -> Result<ModerationStatus> {
        Ok(self.load(item_id).await?.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fakes::*;
    use crate::store::FileStore;
    use crate::types::PostErrorClass;
    use tempfile::TempDir;

    struct Harness {
        _tmp: TempDir,
        store: Arc<FileStore>,
        judge: Arc<FakeJudge>,
        inbox: Arc<FakeInbox>,
        poster: Arc<FakePoster>,
        pipeline: ModerationPipeline,
    }

    fn harness_with(judge: JudgeBehavior, token: Option<&str>, poster: FakePoster, knowledge: FakeKnowledge) -> Harness {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(tmp.path()).unwrap());
        let judge = Arc::new(FakeJudge::new(judge));
        let inbox = Arc::new(FakeInbox::default());
        let poster = Arc::new(poster);
        let pipeline = ModerationPipeline::new(
            store.clone(),
            judge.clone(),
            inbox.clone(),
            Arc::new(knowledge),
            Arc::new(StaticTokens(token.map(str::to_string))),
            poster.clone(),
        );
        Harness { _tmp: tmp, store, judge, inbox, poster, pipeline }
    }

    fn harness(judge: JudgeBehavior) -> Harness {
        harness_with(judge, Some("access"), FakePoster::succeeding(), FakeKnowledge { available: 3, failing: false })
    }

    fn owner() -> UserId {
        UserId::new("owner")
    }

    async fn draft(h: &Harness, parent: Option<&str>) -> ModerationItem {
        h.pipeline
            .create_draft(
                owner(),
                "abc123".to_string(),
                parent.map(str::to_string),
                "Have you tried batching the writes?".to_string(),
                PostContext { subreddit: "rust".to_string(), post_title: "Slow inserts".to_string(), post_body: String::new() },
            )
            .await
            .unwrap()
    }

    async fn reviewed(h: &Harness, parent: Option<&str>) -> ModerationItem {
        let item = draft(h, parent).await;
        assert_eq!(h.pipeline.on_draft_created(&item.id).await.unwrap(), ModerationStatus::AiApproved);
        item
    }

    #[tokio::test]
    async fn test_approved_draft_reaches_review_inbox() {
        let h = harness(JudgeBehavior::Verdict(true, 0.9));
        let item = reviewed(&h, None).await;

        let stored = h.store.get_moderation_item(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ModerationStatus::AiApproved);
        assert_eq!(stored.ai_verdict.unwrap().score, 0.9);
        assert_eq!(h.inbox.delivered(), vec![item.id.clone()]);
    }

    #[tokio::test]
    async fn test_rejected_draft_is_never_delivered() {
        let h = harness(JudgeBehavior::Verdict(false, 0.1));
        let item = draft(&h, None).await;

        assert_eq!(h.pipeline.on_draft_created(&item.id).await.unwrap(), ModerationStatus::AiRejected);
        assert!(h.inbox.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_missing_judge_credentials_fail_open() {
        let h = harness(JudgeBehavior::MissingCredentials);
        let item = reviewed(&h, None).await;

        let verdict = h.store.get_moderation_item(&item.id).await.unwrap().unwrap().ai_verdict.unwrap();
        assert!(verdict.approved);
        assert_eq!(verdict.score, 0.5);
        assert_eq!(verdict.reason, JUDGE_SKIPPED_REASON);
        assert_eq!(h.inbox.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_judge_errors_fail_closed() {
        for behavior in [JudgeBehavior::Failing, JudgeBehavior::Garbage] {
            let h = harness(behavior);
            let item = draft(&h, None).await;

            assert_eq!(h.pipeline.on_draft_created(&item.id).await.unwrap(), ModerationStatus::AiRejected);
            let verdict = h.store.get_moderation_item(&item.id).await.unwrap().unwrap().ai_verdict.unwrap();
            assert!(!verdict.approved);
            assert_eq!(verdict.score, 0.0);
            assert_eq!(verdict.reason, JUDGE_FAILED_REASON);
            assert!(h.inbox.delivered().is_empty());
        }
    }

    #[tokio::test]
    async fn test_knowledge_is_bounded_and_optional() {
        let h = harness_with(
            JudgeBehavior::Verdict(true, 0.8),
            Some("access"),
            FakePoster::succeeding(),
            FakeKnowledge { available: 50, failing: false },
        );
        reviewed(&h, None).await;
        assert_eq!(h.judge.snippet_counts.lock().unwrap().as_slice(), [KNOWLEDGE_SNIPPET_LIMIT]);

        let h = harness_with(
            JudgeBehavior::Verdict(true, 0.8),
            Some("access"),
            FakePoster::succeeding(),
            FakeKnowledge { available: 5, failing: true },
        );
        reviewed(&h, None).await;
        assert_eq!(h.judge.snippet_counts.lock().unwrap().as_slice(), [0]);
    }

    #[tokio::test]
    async fn test_duplicate_creation_event_is_ignored() {
        let h = harness(JudgeBehavior::Verdict(true, 0.9));
        let item = reviewed(&h, None).await;

        assert_eq!(h.pipeline.on_draft_created(&item.id).await.unwrap(), ModerationStatus::AiApproved);
        assert_eq!(h.judge.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(h.inbox.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_pending_draft_fails_with_reason() {
        let h = harness(JudgeBehavior::Verdict(true, 0.9));
        let item = ModerationItem::new_draft(owner(), "abc".to_string(), None, "  ".to_string(), PostContext::default());
        h.store.insert_moderation_item(&item).await.unwrap();

        assert_eq!(h.pipeline.on_draft_created(&item.id).await.unwrap(), ModerationStatus::Failed);
        let stored = h.store.get_moderation_item(&item.id).await.unwrap().unwrap();
        assert!(stored.failure_reason.unwrap().contains("comment_text"));
        assert_eq!(h.judge.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_create_draft_validates_fields() {
        let h = harness(JudgeBehavior::Verdict(true, 0.9));
        let err = h
            .pipeline
            .create_draft(owner(), String::new(), None, "text".to_string(), PostContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.code().as_str(), "invalid-argument");
    }

    #[tokio::test]
    async fn test_approve_posts_to_post_or_parent_comment() {
        let h = harness(JudgeBehavior::Verdict(true, 0.9));
        let top_level = reviewed(&h, None).await;
        let reply = reviewed(&h, Some("def456")).await;

        let posted = h.pipeline.approve(&top_level.id, &owner()).await.unwrap();
        assert_eq!(posted.status, ModerationStatus::Posted);
        assert_eq!(posted.remote_id.as_deref(), Some("t1_remote"));
        assert!(posted.user_approval.unwrap().approved);

        h.pipeline.approve(&reply.id, &owner()).await.unwrap();

        let targets: Vec<String> = h.poster.calls().into_iter().map(|(_, target, _)| target).collect();
        assert_eq!(targets, vec!["t3_abc123".to_string(), "t1_def456".to_string()]);
        assert_eq!(h.poster.calls()[0].0, "access");

        let stored = h.store.get_moderation_item(&top_level.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ModerationStatus::Posted);
    }

    #[tokio::test]
    async fn test_second_approval_does_not_post_twice() {
        let h = harness(JudgeBehavior::Verdict(true, 0.9));
        let item = reviewed(&h, None).await;

        h.pipeline.approve(&item.id, &owner()).await.unwrap();
        let err = h.pipeline.approve(&item.id, &owner()).await.unwrap_err();
        assert_eq!(err.code().as_str(), "failed-precondition");
        assert_eq!(h.poster.calls().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_approvals_post_exactly_once() {
        let h = harness(JudgeBehavior::Verdict(true, 0.9));
        let item = reviewed(&h, None).await;
        let poster = h.poster.clone();
        let pipeline = Arc::new(h.pipeline);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pipeline = pipeline.clone();
                let item_id = item.id.clone();
                tokio::spawn(async move { pipeline.approve(&item_id, &owner()).await })
            })
            .collect();

        let mut posted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(item) => {
                    assert_eq!(item.status, ModerationStatus::Posted);
                    posted += 1;
                }
                Err(e) => assert_eq!(e.code().as_str(), "failed-precondition"),
            }
        }

        assert_eq!(posted, 1);
        assert_eq!(poster.calls().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_review_events_deliver_once() {
        let h = harness(JudgeBehavior::Verdict(true, 0.9));
        let item = draft(&h, None).await;
        let inbox = h.inbox.clone();
        let pipeline = Arc::new(h.pipeline);

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let pipeline = pipeline.clone();
                let item_id = item.id.clone();
                tokio::spawn(async move { pipeline.on_draft_created(&item_id).await })
            })
            .collect();

        for task in tasks {
            let status = task.await.unwrap().unwrap();
            assert!(matches!(status, ModerationStatus::Reviewing | ModerationStatus::AiApproved));
        }
        assert_eq!(inbox.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_approval_requires_owner_and_existing_item() {
        let h = harness(JudgeBehavior::Verdict(true, 0.9));
        let item = reviewed(&h, None).await;

        let err = h.pipeline.approve(&item.id, &UserId::new("intruder")).await.unwrap_err();
        assert_eq!(err.code().as_str(), "permission-denied");

        let err = h.pipeline.approve(&ModerationItemId::new(), &owner()).await.unwrap_err();
        assert_eq!(err.code().as_str(), "not-found");
        assert!(h.poster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ai_rejected_item_cannot_be_approved() {
        let h = harness(JudgeBehavior::Verdict(false, 0.2));
        let item = draft(&h, None).await;
        h.pipeline.on_draft_created(&item.id).await.unwrap();

        let err = h.pipeline.approve(&item.id, &owner()).await.unwrap_err();
        assert_eq!(err.code().as_str(), "failed-precondition");
    }

    #[tokio::test]
    async fn test_missing_token_fails_item_without_posting() {
        let h = harness_with(
            JudgeBehavior::Verdict(true, 0.9),
            None,
            FakePoster::succeeding(),
            FakeKnowledge { available: 1, failing: false },
        );
        let item = reviewed(&h, None).await;

        let failed = h.pipeline.approve(&item.id, &owner()).await.unwrap();
        assert_eq!(failed.status, ModerationStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some(AUTH_REQUIRED_REASON));
        assert!(h.poster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_post_error_class_becomes_failure_reason() {
        for class in [
            PostErrorClass::Unauthorized,
            PostErrorClass::Forbidden,
            PostErrorClass::RateLimited,
            PostErrorClass::Other,
        ] {
            let h = harness_with(
                JudgeBehavior::Verdict(true, 0.9),
                Some("access"),
                FakePoster::failing(class),
                FakeKnowledge { available: 1, failing: false },
            );
            let item = reviewed(&h, None).await;

            let failed = h.pipeline.approve(&item.id, &owner()).await.unwrap();
            assert_eq!(failed.status, ModerationStatus::Failed);
            assert_eq!(failed.failure_reason.as_deref(), Some(class.failure_reason()));

            // No automatic retry and no way back
            let err = h.pipeline.approve(&item.id, &owner()).await.unwrap_err();
            assert_eq!(err.code().as_str(), "failed-precondition");
            assert_eq!(h.poster.calls().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_reject_only_once_and_never_after_posting() {
        let h = harness(JudgeBehavior::Verdict(true, 0.9));
        let item = reviewed(&h, None).await;

        let rejected = h.pipeline.reject(&item.id, &owner()).await.unwrap();
        assert_eq!(rejected.status, ModerationStatus::UserRejected);
        assert!(!rejected.user_approval.unwrap().approved);

        let err = h.pipeline.reject(&item.id, &owner()).await.unwrap_err();
        assert_eq!(err.code().as_str(), "failed-precondition");

        let posted = reviewed(&h, None).await;
        h.pipeline.approve(&posted.id, &owner()).await.unwrap();
        let err = h.pipeline.reject(&posted.id, &owner()).await.unwrap_err();
        assert_eq!(err.code().as_str(), "failed-precondition");
    }

    #[tokio::test]
    async fn test_listing_and_counts() {
        let h = harness(JudgeBehavior::Verdict(true, 0.9));
        let approved = reviewed(&h, None).await;
        draft(&h, None).await;
        h.pipeline.approve(&approved.id, &owner()).await.unwrap();

        let pending = h.pipeline.list_items(&owner(), Some(ModerationStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(h.pipeline.list_items(&owner(), None).await.unwrap().len(), 2);
        assert!(h.pipeline.list_items(&UserId::new("other"), None).await.unwrap().is_empty());

        let counts = h.pipeline.status_counts().await.unwrap();
        assert_eq!(counts.get(ModerationStatus::Posted), 1);
        assert_eq!(counts.get(ModerationStatus::Pending), 1);
        assert_eq!(counts.total(), 2);

        assert_eq!(h.pipeline.health_check().await.unwrap().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_pending_backlog_degrades_health() {
        let h = harness(JudgeBehavior::Verdict(true, 0.9));
        for _ in 0..HEALTH_MAX_PENDING_ITEMS {
            draft(&h, None).await;
        }
        assert_eq!(h.pipeline.health_check().await.unwrap().status, HealthStatus::Healthy);

        draft(&h, None).await;
        let health = h.pipeline.health_check().await.unwrap();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.total_items, HEALTH_MAX_PENDING_ITEMS + 1);
    }
}
