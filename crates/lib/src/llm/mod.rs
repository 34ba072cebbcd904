//! LLM abstraction and Ollama client.
//!
//! `LlmBackend` is the seam the prompt, memory and processing layers talk to; `LlmClient`
//! builds the Ollama-backed implementation from config.

mod client;
mod ollama;

pub use client::{LlmClient, OllamaChatModel, RetryPolicy};
pub use ollama::{
    ChatMessage, ChatOptions, ChatResponse, OllamaClient, OllamaModel, DEFAULT_BASE_URL,
};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("ollama request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("ollama api error: {0}")]
    Api(String),
    #[error("model returned no message")]
    EmptyResponse,
}

/// How a backend counts tokens for token-budgeted memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenCounter {
    /// Rough estimate: one token per four characters, rounded up.
    #[default]
    Estimate,
    /// One token per whitespace-separated word.
    Whitespace,
}

impl TokenCounter {
    pub fn count(&self, text: &str) -> usize {
        match self {
            TokenCounter::Estimate => text.chars().count().div_ceil(4),
            TokenCounter::Whitespace => text.split_whitespace().count(),
        }
    }
}

/// A chat model that memory managers and the text processor can call.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Model name, for banners and logs.
    fn model_name(&self) -> &str;

    /// Send messages, return the assistant's text.
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError>;

    /// Streaming variant. The default delivers the whole reply as a single chunk.
    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, LlmError> {
        let content = self.chat(messages).await?;
        on_chunk(&content);
        Ok(content)
    }

    fn count_tokens(&self, text: &str) -> usize {
        TokenCounter::Estimate.count(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_counter_counts_words() {
        assert_eq!(TokenCounter::Whitespace.count("AI is   what?!\nAmazing!"), 4);
        assert_eq!(TokenCounter::Whitespace.count("   "), 0);
    }

    #[test]
    fn estimate_counter_rounds_up() {
        assert_eq!(TokenCounter::Estimate.count(""), 0);
        assert_eq!(TokenCounter::Estimate.count("abcd"), 1);
        assert_eq!(TokenCounter::Estimate.count("abcde"), 2);
    }

    struct Fixed;

    #[async_trait]
    impl LlmBackend for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn chat(&self, _messages: Vec<ChatMessage>) -> Result<String, LlmError> {
            Ok("whole reply".to_string())
        }
    }

    #[tokio::test]
    async fn default_chat_stream_delivers_one_chunk() {
        let mut chunks: Vec<String> = Vec::new();
        let mut on_chunk = |c: &str| chunks.push(c.to_string());
        let out = Fixed
            .chat_stream(vec![ChatMessage::user("hi")], &mut on_chunk)
            .await
            .unwrap();
        assert_eq!(out, "whole reply");
        assert_eq!(chunks, vec!["whole reply".to_string()]);
        assert_eq!(Fixed.count_tokens("abcdefgh"), 2);
    }
}
