/// Path constants and utilities for the engagement data directory
use std::path::{Path, PathBuf};
use once_cell::sync::OnceCell;

// Static storage for configurable data root
static DATA_ROOT: OnceCell<String> = OnceCell::new();

// Default root constant
const DEFAULT_DATA_ROOT: &str = "/data/engagement";

/// Initialize the data root directory. Can only be called once.
/// If not called, the default `/data/engagement` will be used.
pub fn init_data_root(path: String) -> Result<(), String> {
    DATA_ROOT.set(path).map_err(|_| "Data root already initialized".to_string())
}

/// Get the configured data root or the default
fn get_data_root() -> &'static str {
    DATA_ROOT.get().map(|s| s.as_str()).unwrap_or(DEFAULT_DATA_ROOT)
}

// Collection directories (relative to a store root)
pub const CONVERSATIONS_DIR_NAME: &str = "conversations";
pub const MODERATION_DIR_NAME: &str = "moderation";
pub const QUALIFICATIONS_DIR_NAME: &str = "qualifications";
pub const BILLING_DIR_NAME: &str = "billing";
pub const CLICKS_DIR_NAME: &str = "clicks";
pub const AUDIT_DIR_NAME: &str = "audit";
pub const TOKENS_DIR_NAME: &str = "tokens";

// Trigger directories
pub const TRIGGERS_DIR_NAME: &str = "triggers";
pub const PROCESSED_DIR_NAME: &str = "processed";
pub const FAILED_DIR_NAME: &str = "failed";

// Path builder functions
pub fn data_root() -> PathBuf {
    PathBuf::from(get_data_root())
}

pub fn triggers_dir() -> PathBuf {
    data_root().join(TRIGGERS_DIR_NAME)
}

pub fn triggers_processed_dir() -> PathBuf {
    triggers_dir().join(PROCESSED_DIR_NAME)
}

pub fn triggers_failed_dir() -> PathBuf {
    triggers_dir().join(FAILED_DIR_NAME)
}

/// Collection layout below an arbitrary store root
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn conversations(&self) -> PathBuf {
        self.root.join(CONVERSATIONS_DIR_NAME)
    }

    pub fn moderation(&self) -> PathBuf {
        self.root.join(MODERATION_DIR_NAME)
    }

    pub fn moderation_state(&self, state_dir: &str) -> PathBuf {
        self.moderation().join(state_dir)
    }

    pub fn qualifications(&self) -> PathBuf {
        self.root.join(QUALIFICATIONS_DIR_NAME)
    }

    pub fn billing(&self) -> PathBuf {
        self.root.join(BILLING_DIR_NAME)
    }

    pub fn clicks(&self) -> PathBuf {
        self.root.join(CLICKS_DIR_NAME)
    }

    pub fn audit(&self) -> PathBuf {
        self.root.join(AUDIT_DIR_NAME)
    }

    pub fn tokens(&self) -> PathBuf {
        self.root.join(TOKENS_DIR_NAME)
    }
}

/// Collision-free file stem for ids that come from outside the system
pub fn document_key(parts: &[&str]) -> String {
    format!("{:x}", md5::compute(parts.join("\u{1f}")))
}
