//! Client modules for external services

pub mod analyzer;
pub mod knowledge;
pub mod openai;
pub mod reddit;
pub mod telegram;

// Re-export all client types
pub use analyzer::HeuristicAnalyzer;
pub use knowledge::FileKnowledgeBase;
pub use openai::OpenAiClient;
pub use reddit::{RedditClient, RedditOAuth};
pub use telegram::TelegramClient;
