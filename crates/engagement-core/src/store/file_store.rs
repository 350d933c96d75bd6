//! File-backed document store
//!
//! One JSON document per file. Moderation items live in a directory per status and
//! change status by moving between directories, so the directory an item sits in is
//! its status. Documents are only ever replaced by renaming a complete file over them,
//! so readers always see either the old or the new version and never a gap.
//!
//! Conditional writes take a lock file (`create_new`) beside the document, re-read
//! the current version and check it before writing. A moved moderation item is
//! written to its new directory before the old copy is removed; statuses only move
//! forward, so when both copies exist the later status wins.
//! Keyed documents (qualifications, billing periods) are created through `hard_link`,
//! which refuses to replace an existing file.

use async_trait::async_trait;
use chrono::Utc;
use engagement_types::{
    AuditRecord, BillingPeriod, BillingStatus, Conversation, ConversationId, ConversationStage, LeadId, LinkClick,
    ModerationItem, ModerationItemId, ModerationStatus, QualificationEventId, QualificationType,
    QualifiedLeadEvent, TokenRecord, UserId,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{DocumentStore, InsertOutcome};
use crate::constants::{DOCUMENT_LOCK_ATTEMPTS, DOCUMENT_LOCK_RETRY_MILLIS, DOCUMENT_LOCK_STALE_SECONDS};
use crate::error::{EngagementError, Result};
use crate::paths::{document_key, StoreLayout};

/// Thread-safe file store for pipeline documents
pub struct FileStore {
    layout: StoreLayout,
    /// Serialises read-modify-write sequences inside this process
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create new FileStore with specified root path
    pub fn new<P: AsRef<Path>>(root_path: P) -> Result<Self> {
        let layout = StoreLayout::new(root_path);

        for dir in [
            layout.conversations(),
            layout.qualifications(),
            layout.billing(),
            layout.clicks(),
            layout.audit(),
            layout.tokens(),
        ] {
            fs::create_dir_all(dir)?;
        }

        for status in ModerationStatus::ALL {
            fs::create_dir_all(layout.moderation_state(status.directory_name()))?;
        }

        Ok(Self {
            layout,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| EngagementError::Store("File store lock poisoned".to_string()))
    }

    fn conversation_path(&self, id: &ConversationId) -> PathBuf {
        self.layout.conversations().join(format!("conv_{}.json", id))
    }

    fn moderation_path(&self, status: ModerationStatus, id: &ModerationItemId) -> PathBuf {
        self.layout
            .moderation_state(status.directory_name())
            .join(format!("item_{}.json", id))
    }

    fn qualification_path(&self, user_id: &UserId, lead_id: &LeadId) -> PathBuf {
        self.layout
            .qualifications()
            .join(format!("{}.json", document_key(&[user_id.as_str(), lead_id.as_str()])))
    }

    fn billing_path(&self, user_id: &UserId, period_key: &str) -> PathBuf {
        self.layout
            .billing()
            .join(format!("{}.json", document_key(&[user_id.as_str(), period_key])))
    }

    fn token_path(&self, user_id: &UserId) -> PathBuf {
        self.layout.tokens().join(format!("{}.json", document_key(&[user_id.as_str()])))
    }

    fn moderation_lock_path(&self, id: &ModerationItemId) -> PathBuf {
        self.layout.moderation().join(format!("item_{}.lock", id))
    }

    /// Find moderation item in any status directory, latest status first
    fn find_moderation_path(&self, id: &ModerationItemId) -> Option<(PathBuf, ModerationStatus)> {
        for status in ModerationStatus::ALL.into_iter().rev() {
            let path = self.moderation_path(status, id);
            if path.exists() {
                log::debug!("Found moderation item {} in status {}", id, status);
                return Some((path, status));
            }
        }
        None
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path)?;
    serde_json::from_str(&json).map_err(|e| {
        EngagementError::Deserialization(format!("Failed to deserialize {}: {}", path.display(), e))
    })
}

fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(json) => serde_json::from_str(&json).map(Some).map_err(|e| {
            EngagementError::Deserialization(format!("Failed to deserialize {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn temp_sibling(path: &Path, tag: &str) -> PathBuf {
    temp_sibling_name(path, &format!("{}-{}", tag, uuid::Uuid::new_v4()))
}

fn temp_sibling_name(path: &Path, suffix: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document");
    path.with_file_name(format!("{}.{}", file_name, suffix))
}

fn serialize<T: Serialize>(doc: &T) -> Result<String> {
    serde_json::to_string_pretty(doc)
        .map_err(|e| EngagementError::Serialization(format!("Failed to serialize document: {}", e)))
}

/// Replace `path` with `doc` without readers ever seeing a partial file
fn write_json<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    let tmp = temp_sibling(path, "tmp");
    fs::write(&tmp, serialize(doc)?)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Create `path` with `doc` unless it exists. Returns false when it already existed.
fn create_json<T: Serialize>(path: &Path, doc: &T) -> Result<bool> {
    let tmp = temp_sibling(path, "tmp");
    fs::write(&tmp, serialize(doc)?)?;
    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Exclusive claim on one document across processes, released on drop
struct DocumentLock {
    path: PathBuf,
}

impl DocumentLock {
    fn acquire(path: PathBuf) -> Result<Self> {
        for _ in 0..DOCUMENT_LOCK_ATTEMPTS {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path) {
                        log::warn!("Removing stale document lock {}", path.display());
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    std::thread::sleep(Duration::from_millis(DOCUMENT_LOCK_RETRY_MILLIS));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngagementError::Store(format!("Document lock {} is held by another writer", path.display())))
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to release document lock {}: {}", self.path.display(), e);
        }
    }
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .map_or(false, |age| age > Duration::from_secs(DOCUMENT_LOCK_STALE_SECONDS))
}

/// Conditionally replace the document at `from` with `doc` written to `to`.
///
/// `check` sees the current version under `lock` and decides whether the write goes
/// ahead. The document stays readable throughout.
fn swap_json<T, F>(lock: PathBuf, from: &Path, to: &Path, doc: &T, check: F) -> Result<bool>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&T) -> bool,
{
    let _lock = DocumentLock::acquire(lock)?;

    let Some(current) = read_json_opt::<T>(from)? else {
        return Ok(false);
    };
    if !check(&current) {
        return Ok(false);
    }

    write_json(to, doc)?;
    if from != to {
        // The new copy already wins on lookup; a leftover old copy is only clutter
        if let Err(e) = fs::remove_file(from) {
            log::warn!("Failed to remove superseded document {}: {}", from.display(), e);
        }
    }
    Ok(true)
}

fn lock_path(document: &Path) -> PathBuf {
    temp_sibling_name(document, "lock")
}

/// Read every `*.json` document in a directory, skipping locks and temp files
fn list_json<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut docs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("json") {
            match read_json(&path) {
                Ok(doc) => docs.push(doc),
                Err(e) => log::warn!("Skipping unreadable document {}: {}", path.display(), e),
            }
        }
    }
    Ok(docs)
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<()> {
        let path = self.conversation_path(&conversation.id);
        if !create_json(&path, conversation)? {
            return Err(EngagementError::Store(format!("Conversation {} already exists", conversation.id)));
        }
        log::debug!("Stored conversation {}", conversation.id);
        Ok(())
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        read_json_opt(&self.conversation_path(id))
    }

    async fn update_conversation(
        &self,
        conversation: &Conversation,
        expected_stage: ConversationStage,
        expected_messages: usize,
    ) -> Result<bool> {
        let _guard = self.lock()?;
        let path = self.conversation_path(&conversation.id);
        swap_json(lock_path(&path), &path, &path, conversation, |current: &Conversation| {
            current.stage == expected_stage && current.messages.len() == expected_messages
        })
    }

    async fn find_conversations(&self, user_id: &UserId, lead_username: Option<&str>) -> Result<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = list_json::<Conversation>(&self.layout.conversations())?
            .into_iter()
            .filter(|c| &c.user_id == user_id)
            .filter(|c| lead_username.map_or(true, |name| c.lead_username.eq_ignore_ascii_case(name)))
            .collect();
        conversations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(conversations)
    }

    async fn insert_moderation_item(&self, item: &ModerationItem) -> Result<()> {
        let _guard = self.lock()?;
        if self.find_moderation_path(&item.id).is_some() {
            return Err(EngagementError::Store(format!("Moderation item {} already exists", item.id)));
        }
        let path = self.moderation_path(item.status, &item.id);
        if !create_json(&path, item)? {
            return Err(EngagementError::Store(format!("Moderation item {} already exists", item.id)));
        }
        log::info!("Created moderation item {} in status {}", item.id, item.status);
        Ok(())
    }

    async fn get_moderation_item(&self, id: &ModerationItemId) -> Result<Option<ModerationItem>> {
        let _guard = self.lock()?;
        // A second scan covers an item moved by another process mid-scan
        for _ in 0..2 {
            if let Some((path, _)) = self.find_moderation_path(id) {
                if let Some(item) = read_json_opt(&path)? {
                    return Ok(Some(item));
                }
            }
        }
        Ok(None)
    }

    async fn transition_moderation_item(
        &self,
        item: &ModerationItem,
        expected_status: ModerationStatus,
    ) -> Result<bool> {
        let _guard = self.lock()?;
        let from = self.moderation_path(expected_status, &item.id);
        let to = self.moderation_path(item.status, &item.id);
        let moved = swap_json(self.moderation_lock_path(&item.id), &from, &to, item, |current: &ModerationItem| {
            // A leftover copy in an earlier directory never satisfies the guard
            current.status == expected_status
                && self.find_moderation_path(&item.id).map(|(_, latest)| latest) == Some(expected_status)
        })?;
        if moved {
            log::debug!("Moved moderation item {} from {} to {}", item.id, expected_status, item.status);
        }
        Ok(moved)
    }

    async fn list_moderation_items(&self, status: ModerationStatus) -> Result<Vec<ModerationItem>> {
        let _guard = self.lock()?;
        let mut items: Vec<ModerationItem> = list_json::<ModerationItem>(&self.layout.moderation_state(status.directory_name()))?
            .into_iter()
            // Skip copies a later status has already superseded
            .filter(|item| self.find_moderation_path(&item.id).map(|(_, latest)| latest) == Some(status))
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items)
    }

    async fn find_qualification(&self, user_id: &UserId, lead_id: &LeadId) -> Result<Option<QualifiedLeadEvent>> {
        read_json_opt(&self.qualification_path(user_id, lead_id))
    }

    async fn insert_qualification_if_absent(
        &self,
        event: &QualifiedLeadEvent,
    ) -> Result<InsertOutcome<QualifiedLeadEvent>> {
        let path = self.qualification_path(&event.user_id, &event.lead_id);
        if create_json(&path, event)? {
            return Ok(InsertOutcome::Inserted);
        }
        let existing = read_json(&path)?;
        Ok(InsertOutcome::Existing(existing))
    }

    async fn update_qualification(&self, event: &QualifiedLeadEvent, expected_status: BillingStatus) -> Result<bool> {
        let _guard = self.lock()?;
        let path = self.qualification_path(&event.user_id, &event.lead_id);
        swap_json(lock_path(&path), &path, &path, event, |current: &QualifiedLeadEvent| {
            current.id == event.id && current.billing_status == expected_status
        })
    }

    async fn get_qualification(&self, user_id: &UserId, id: &QualificationEventId) -> Result<Option<QualifiedLeadEvent>> {
        Ok(self
            .list_qualifications(user_id)
            .await?
            .into_iter()
            .find(|event| &event.id == id))
    }

    async fn list_qualifications(&self, user_id: &UserId) -> Result<Vec<QualifiedLeadEvent>> {
        let mut events: Vec<QualifiedLeadEvent> = list_json::<QualifiedLeadEvent>(&self.layout.qualifications())?
            .into_iter()
            .filter(|e| &e.user_id == user_id)
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(events)
    }

    async fn get_billing_period(&self, user_id: &UserId, period_key: &str) -> Result<Option<BillingPeriod>> {
        read_json_opt(&self.billing_path(user_id, period_key))
    }

    async fn insert_billing_period_if_absent(&self, period: &BillingPeriod) -> Result<InsertOutcome<BillingPeriod>> {
        let path = self.billing_path(&period.user_id, &period.period_key);
        if create_json(&path, period)? {
            return Ok(InsertOutcome::Inserted);
        }
        Ok(InsertOutcome::Existing(read_json(&path)?))
    }

    async fn increment_billing_counter(
        &self,
        user_id: &UserId,
        period_key: &str,
        kind: QualificationType,
    ) -> Result<BillingPeriod> {
        let _guard = self.lock()?;
        let path = self.billing_path(user_id, period_key);
        let mut period: BillingPeriod = read_json_opt(&path)?.ok_or_else(|| {
            EngagementError::NotFound(format!("Billing period {} for user {}", period_key, user_id))
        })?;
        let expected_total = period.counters.total;
        period.counters.increment(kind);
        period.updated_at = Utc::now();

        let swapped = swap_json(lock_path(&path), &path, &path, &period, |current: &BillingPeriod| {
            current.counters.total == expected_total
        })?;
        if !swapped {
            return Err(EngagementError::Store(format!(
                "Concurrent update of billing period {} for user {}",
                period_key, user_id
            )));
        }
        Ok(period)
    }

    async fn insert_link_click(&self, click: &LinkClick) -> Result<()> {
        let path = self.layout.clicks().join(format!("click_{}.json", click.id));
        write_json(&path, click)
    }

    async fn list_link_clicks(&self, lead_id: &LeadId) -> Result<Vec<LinkClick>> {
        let mut clicks: Vec<LinkClick> = list_json::<LinkClick>(&self.layout.clicks())?
            .into_iter()
            .filter(|c| &c.lead_id == lead_id)
            .collect();
        clicks.sort_by(|a, b| a.clicked_at.cmp(&b.clicked_at));
        Ok(clicks)
    }

    async fn insert_audit_record(&self, record: &AuditRecord) -> Result<()> {
        let path = self.layout.audit().join(format!("audit_{}.json", record.id));
        write_json(&path, record)
    }

    async fn list_audit_records(&self, user_id: &UserId) -> Result<Vec<AuditRecord>> {
        let mut records: Vec<AuditRecord> = list_json::<AuditRecord>(&self.layout.audit())?
            .into_iter()
            .filter(|r| &r.user_id == user_id)
            .collect();
        records.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(records)
    }

    async fn load_token(&self, user_id: &UserId) -> Result<Option<TokenRecord>> {
        read_json_opt(&self.token_path(user_id))
    }

    async fn save_token(&self, user_id: &UserId, record: &TokenRecord) -> Result<()> {
        write_json(&self.token_path(user_id), record)
    }
}
