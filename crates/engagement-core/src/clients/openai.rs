//! OpenAI-compatible chat client used as AI judge and reply generator

use async_trait::async_trait;
use engagement_types::{AiVerdict, ConversationStage, Message, PostContext, Sender};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::OpenAIConfig;
use crate::error::{EngagementError, Result};
use crate::pipeline::traits::{AiJudge, ContentGenerator};
use crate::types::{GeneratedReply, JudgeError, KnowledgeContext, KnowledgeSnippet, LeadContext};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const JUDGE_RUBRIC: &str = "You review comments before they are posted in an online community. \
Score the draft from 0 to 1 on: relevance to the post, factual alignment with the provided knowledge, \
tone, value to the reader, and whether it reads like a human wrote it. \
Answer with a JSON object {\"approved\": bool, \"score\": number, \"reason\": string} where reason is \
at most 100 characters.";

const GENERATOR_PROMPT: &str = "You write short, friendly direct-message replies to a lead on behalf of \
the user. Build rapport first, offer the product guide once the lead is engaged, and ask for an email \
address only at the ready_to_ask stage. Answer with a JSON object \
{\"reply\": string, \"next_stage\": one of not_started|building_rapport|ready_to_ask|asked|collected|not_interested, \
\"extracted_email\": string or null}.";

#[derive(Debug, Deserialize)]
struct JudgeOutput {
    approved: bool,
    score: f64,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct GeneratorOutput {
    reply: String,
    next_stage: ConversationStage,
    #[serde(default)]
    extracted_email: Option<String>,
}

pub struct OpenAiClient {
    api_key: String,
    model: String,
    base_url: String,
    http_client: HttpClient,
}

impl OpenAiClient {
    pub fn new(config: OpenAIConfig, timeout: Duration) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngagementError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: config.api_key,
            model: config.model,
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            http_client,
        })
    }

    /// Overrides the API base URL (for testing with wiremock)
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Run one JSON-mode chat completion and return the assistant message content
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = json!({
            "model": self.model,
            "temperature": 0.2,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ]
        });

        let response = self.http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EngagementError::ServiceUnavailable(format!(
                "Chat completion failed: {} - {}",
                status, error_text
            )));
        }

        let body: Value = response.json().await?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| EngagementError::Deserialization("Completion without message content".to_string()))
    }
}

fn judge_prompt(draft: &str, context: &PostContext, snippets: &[KnowledgeSnippet]) -> String {
    let knowledge = if snippets.is_empty() {
        "(none)".to_string()
    } else {
        snippets
            .iter()
            .map(|s| format!("- [{}] {}", s.source, s.text))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Community: r/{}\nPost title: {}\nPost body: {}\n\nKnowledge:\n{}\n\nDraft comment:\n{}",
        context.subreddit, context.post_title, context.post_body, knowledge, draft
    )
}

fn generator_prompt(
    history: &[Message],
    lead: &LeadContext,
    knowledge: &KnowledgeContext,
    stage: ConversationStage,
) -> String {
    let transcript = history
        .iter()
        .map(|m| {
            let who = match m.sender {
                Sender::Inbound => "lead",
                Sender::Outbound => "you",
            };
            format!("{}: {}", who, m.text)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let facts = knowledge
        .snippets
        .iter()
        .map(|s| format!("- {}", s.text))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Lead: {}\nNotes: {}\nCurrent stage: {}\n\nProduct summary: {}\nFacts:\n{}\n\nConversation so far:\n{}",
        lead.display_name.as_deref().unwrap_or(&lead.username),
        lead.notes.as_deref().unwrap_or("-"),
        stage,
        knowledge.summary,
        facts,
        transcript
    )
}

#[async_trait]
impl AiJudge for OpenAiClient {
    async fn judge(
        &self,
        draft: &str,
        context: &PostContext,
        snippets: &[KnowledgeSnippet],
    ) -> std::result::Result<AiVerdict, JudgeError> {
        if !self.has_credentials() {
            return Err(JudgeError::MissingCredentials);
        }

        let content = self
            .complete(JUDGE_RUBRIC, &judge_prompt(draft, context, snippets))
            .await
            .map_err(|e| JudgeError::Failed(e.to_string()))?;

        let output: JudgeOutput =
            serde_json::from_str(&content).map_err(|e| JudgeError::Unparseable(format!("{}: {}", e, content)))?;
        Ok(AiVerdict::new(output.approved, output.score, output.reason))
    }
}

#[async_trait]
impl ContentGenerator for OpenAiClient {
    async fn generate(
        &self,
        history: &[Message],
        lead: &LeadContext,
        knowledge: &KnowledgeContext,
        stage: ConversationStage,
    ) -> Result<GeneratedReply> {
        if !self.has_credentials() {
            return Err(EngagementError::Config("OpenAI API key not configured".to_string()));
        }

        let content = self
            .complete(GENERATOR_PROMPT, &generator_prompt(history, lead, knowledge, stage))
            .await?;
        let output: GeneratorOutput = serde_json::from_str(&content)
            .map_err(|e| EngagementError::Deserialization(format!("Unexpected generator output: {}", e)))?;

        Ok(GeneratedReply {
            text: output.reply.trim().to_string(),
            next_stage: output.next_stage,
            extracted_email: output.extracted_email.filter(|e| !e.trim().is_empty()),
        })
    }
}
