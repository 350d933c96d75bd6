//! Telegram client delivering AI-approved drafts for human review

use async_trait::async_trait;
use engagement_types::{AiVerdict, ModerationItem};
use reqwest::Client as HttpClient;
use serde_json::json;
use std::time::Duration;

use crate::config::TelegramConfig;
use crate::error::{EngagementError, Result};
use crate::pipeline::traits::ReviewInbox;

/// Characters of the draft shown in the review message
const PREVIEW_CHARS: usize = 600;

pub struct TelegramClient {
    bot_token: String,
    chat_id: String,
    http_client: HttpClient,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig, timeout: Duration) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngagementError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            bot_token: config.bot_token,
            chat_id: config.chat_id,
            http_client,
        })
    }

    /// Escape special characters for Telegram HTML parse mode
    fn escape_html(text: &str) -> String {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
    }

    fn review_message(item: &ModerationItem, verdict: &AiVerdict) -> String {
        let preview: String = item.comment_text.chars().take(PREVIEW_CHARS).collect();
        let ellipsis = if item.comment_text.chars().count() > PREVIEW_CHARS { "..." } else { "" };

        format!(
            "📝 <b>Comment ready for review</b>\n\n\
            <b>Community:</b> r/{}\n\
            <b>Post:</b> {}\n\
            <b>AI score:</b> {:.2} ({})\n\n\
            <b>Draft:</b>\n{}{}",
            Self::escape_html(&item.context.subreddit),
            Self::escape_html(&item.context.post_title),
            verdict.score,
            Self::escape_html(&verdict.reason),
            Self::escape_html(&preview),
            ellipsis
        )
    }

    fn review_payload(&self, item: &ModerationItem, verdict: &AiVerdict) -> serde_json::Value {
        json!({
            "chat_id": self.chat_id,
            "text": Self::review_message(item, verdict),
            "parse_mode": "HTML",
            "reply_markup": {
                "inline_keyboard": [[
                    {"text": "✅ Approve", "callback_data": format!("approve_{}", item.id)},
                    {"text": "❌ Reject", "callback_data": format!("reject_{}", item.id)}
                ]]
            }
        })
    }

    /// Send a plain notification without buttons
    pub async fn send_notification(&self, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": self.chat_id,
            "text": Self::escape_html(text),
            "parse_mode": "HTML"
        });
        self.send_message(&payload).await
    }

    async fn send_message(&self, payload: &serde_json::Value) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        let response = self.http_client
            .post(&url)
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EngagementError::ServiceUnavailable(
                format!("Telegram API error: {}", error_text)
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ReviewInbox for TelegramClient {
    async fn deliver(&self, item: &ModerationItem, verdict: &AiVerdict) -> Result<()> {
        self.send_message(&self.review_payload(item, verdict)).await?;
        log::info!("Telegram review message sent for draft {}", item.id);
        Ok(())
    }
}
