//! Rule-based inbound message analyzer

use async_trait::async_trait;
use engagement_types::Sentiment;
use regex::Regex;

use crate::error::{EngagementError, Result};
use crate::pipeline::traits::MessageAnalyzer;
use crate::types::{Intent, MessageAnalysis};

const DECLINE_PHRASES: &[&str] = &[
    "not interested",
    "no thanks",
    "no thank you",
    "not for me",
    "stop messaging",
    "stop contacting",
    "please stop",
    "leave me alone",
    "unsubscribe",
    "don't contact",
    "do not contact",
    "don't message",
    "not looking",
];

const POSITIVE_WORDS: &[&str] = &[
    "sure", "yes", "yeah", "interested", "sounds good", "love", "great", "awesome", "thanks", "thank you",
];

/// Classifies replies with an email pattern and phrase lists
pub struct HeuristicAnalyzer {
    email_pattern: Regex,
}

impl HeuristicAnalyzer {
    pub fn new() -> Result<Self> {
        let email_pattern = Regex::new(r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b")
            .map_err(|e| EngagementError::Config(format!("Invalid email pattern: {}", e)))?;
        Ok(Self { email_pattern })
    }

    pub fn extract_email(&self, text: &str) -> Option<String> {
        self.email_pattern.find(text).map(|m| m.as_str().to_string())
    }

    fn classify(&self, text: &str) -> (Intent, Sentiment) {
        let lowered = text.to_lowercase();

        if DECLINE_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
            return (Intent::NotInterested, Sentiment::Negative);
        }

        let positive = POSITIVE_WORDS.iter().any(|word| lowered.contains(word));
        if text.contains('?') {
            let sentiment = if positive { Sentiment::Positive } else { Sentiment::Neutral };
            return (Intent::Question, sentiment);
        }
        if positive {
            return (Intent::Interested, Sentiment::Positive);
        }
        (Intent::Other, Sentiment::Neutral)
    }
}

#[async_trait]
impl MessageAnalyzer for HeuristicAnalyzer {
    async fn analyze(&self, text: &str) -> Result<MessageAnalysis> {
        let extracted_email = self.extract_email(text);
        let (intent, sentiment) = self.classify(text);
        Ok(MessageAnalysis {
            sentiment,
            intent,
            has_email: extracted_email.is_some(),
            extracted_email,
        })
    }
}
