//! Configuration management for the engagement pipeline

use serde::{Deserialize, Serialize};
use crate::constants;
use crate::error::{EngagementError, Result};
use std::path::Path;

/// Raw configuration structure matching credentials.json exactly
#[derive(Debug, Deserialize)]
struct RawConfig {
    pub reddit: RawRedditConfig,

    #[serde(default)]
    pub openai: OpenAIConfig,

    pub telegram: TelegramConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,
}

#[derive(Debug, Deserialize)]
struct RawRedditConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(alias = "api_url", default = "default_platform_api_url")]
    pub base_url: String,
    #[serde(default = "default_platform_auth_url")]
    pub auth_url: String,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementConfig {
    pub platform: PlatformConfig,
    pub openai: OpenAIConfig,
    pub telegram: TelegramConfig,
    pub pipeline: PipelineConfig,
    pub knowledge: KnowledgeConfig,
}

/// Social platform API (OAuth app credentials and endpoints)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub base_url: String,
    pub auth_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Empty key disables the judge (drafts pass unreviewed).
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_openai_model")]
    pub model: String,

    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_openai_model(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_refresh_margin")]
    pub token_refresh_margin_seconds: i64,

    #[serde(default = "default_snippet_limit")]
    pub knowledge_snippet_limit: usize,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    #[serde(default = "default_draft_scan_interval")]
    pub draft_scan_interval_seconds: u64,

    /// Users whose platform inboxes are polled for replies
    #[serde(default)]
    pub poll_users: Vec<String>,

    #[serde(default = "default_agent_id")]
    pub agent_id: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            token_refresh_margin_seconds: default_refresh_margin(),
            knowledge_snippet_limit: default_snippet_limit(),
            http_timeout_seconds: default_http_timeout(),
            poll_interval_seconds: default_poll_interval(),
            draft_scan_interval_seconds: default_draft_scan_interval(),
            poll_users: Vec::new(),
            agent_id: default_agent_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_knowledge_root")]
    pub root: String,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self { root: default_knowledge_root() }
    }
}

// Default functions
fn default_user_agent() -> String {
    "engagement-pipeline/1.0".to_string()
}

fn default_platform_api_url() -> String {
    "https://oauth.reddit.com".to_string()
}

fn default_platform_auth_url() -> String {
    "https://www.reddit.com/api/v1/access_token".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_refresh_margin() -> i64 {
    constants::TOKEN_REFRESH_MARGIN_SECONDS
}

fn default_snippet_limit() -> usize {
    constants::KNOWLEDGE_SNIPPET_LIMIT
}

fn default_http_timeout() -> u64 {
    constants::HTTP_TIMEOUT_SECONDS
}

fn default_poll_interval() -> u64 {
    60
}

fn default_draft_scan_interval() -> u64 {
    5
}

fn default_agent_id() -> String {
    "engagement-agent".to_string()
}

fn default_knowledge_root() -> String {
    "/data/knowledge".to_string()
}

impl EngagementConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngagementError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_json_str(&content)
    }

    /// Load configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw_config: RawConfig = serde_json::from_str(json)
            .map_err(|e| EngagementError::Config(format!("Failed to parse config: {}", e)))?;

        let config = Self::from_raw_config(raw_config);
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON file with `ENGAGEMENT__SECTION__KEY` environment overrides on top
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_str()
            .ok_or_else(|| EngagementError::Config("Config path is not valid UTF-8".to_string()))?;

        let settings = config::Config::builder()
            .add_source(config::File::new(path_str, config::FileFormat::Json))
            .add_source(
                config::Environment::with_prefix("ENGAGEMENT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| EngagementError::Config(format!("Failed to load config: {}", e)))?;

        let raw_config: RawConfig = settings.try_deserialize()
            .map_err(|e| EngagementError::Config(format!("Failed to parse config: {}", e)))?;

        let config = Self::from_raw_config(raw_config);
        config.validate()?;
        Ok(config)
    }

    /// Convert raw config to structured config with proper field mapping
    fn from_raw_config(raw: RawConfig) -> Self {
        let reddit = raw.reddit;
        let platform = PlatformConfig {
            client_id: reddit.client_id,
            client_secret: reddit.client_secret,
            user_agent: reddit.user_agent,
            base_url: reddit.base_url.trim_end_matches('/').to_string(),
            auth_url: reddit.auth_url,
        };

        Self {
            platform,
            openai: raw.openai,
            telegram: raw.telegram,
            pipeline: raw.pipeline,
            knowledge: raw.knowledge,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.platform.client_id.is_empty() {
            return Err(EngagementError::Config("Platform client_id is required".to_string()));
        }

        if self.telegram.bot_token.is_empty() || self.telegram.chat_id.is_empty() {
            return Err(EngagementError::Config(
                "Telegram bot token and chat id are required".to_string()
            ));
        }

        if self.pipeline.token_refresh_margin_seconds < 0 {
            return Err(EngagementError::Config("Token refresh margin must not be negative".to_string()));
        }

        if self.pipeline.knowledge_snippet_limit == 0 {
            return Err(EngagementError::Config("Knowledge snippet limit must be at least 1".to_string()));
        }

        if self.openai.api_key.is_empty() {
            log::warn!("OpenAI API key not configured - drafts will skip AI review");
        }

        Ok(())
    }
}
