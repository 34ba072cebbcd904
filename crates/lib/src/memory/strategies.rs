//! The four retention strategies.

use async_trait::async_trait;
use std::sync::Arc;

use super::history::{buffer_string, ChatHistory};
use super::{history_vars, ConversationMemory, MemoryError, MemoryKind, MemoryVariables};
use crate::llm::{ChatMessage, LlmBackend};
use crate::prompt::{vars, Template};

/// Keeps the whole conversation.
#[derive(Debug, Default)]
pub struct BufferMemory {
    history: ChatHistory,
}

impl BufferMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationMemory for BufferMemory {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Buffer
    }

    fn load_memory_variables(&self) -> MemoryVariables {
        history_vars(self.history.buffer_string())
    }

    async fn save_context(&mut self, input: &str, output: &str) -> Result<(), MemoryError> {
        self.history.add_exchange(input, output);
        Ok(())
    }

    fn clear(&mut self) {
        self.history.clear();
    }

    fn buffer(&self) -> Option<String> {
        Some(self.history.buffer_string())
    }
}

/// Stores every exchange but exposes only the last `k`.
#[derive(Debug)]
pub struct WindowMemory {
    k: usize,
    history: ChatHistory,
}

impl WindowMemory {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            history: ChatHistory::new(),
        }
    }

    pub fn window_size(&self) -> usize {
        self.k
    }

    fn window(&self) -> String {
        buffer_string(self.history.last(self.k.saturating_mul(2)))
    }
}

#[async_trait]
impl ConversationMemory for WindowMemory {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Window
    }

    fn load_memory_variables(&self) -> MemoryVariables {
        history_vars(self.window())
    }

    async fn save_context(&mut self, input: &str, output: &str) -> Result<(), MemoryError> {
        self.history.add_exchange(input, output);
        Ok(())
    }

    fn clear(&mut self) {
        self.history.clear();
    }

    fn buffer(&self) -> Option<String> {
        Some(self.window())
    }
}

/// Number of oldest messages that must go for the history to fit `limit` tokens.
fn overflow(history: &ChatHistory, llm: &dyn LlmBackend, limit: usize) -> usize {
    history.overflow(limit, |line| llm.count_tokens(line))
}

/// Keeps the most recent messages that fit a token budget.
pub struct TokenBufferMemory {
    llm: Arc<dyn LlmBackend>,
    max_token_limit: usize,
    history: ChatHistory,
}

impl TokenBufferMemory {
    pub fn new(llm: Arc<dyn LlmBackend>, max_token_limit: usize) -> Self {
        Self {
            llm,
            max_token_limit,
            history: ChatHistory::new(),
        }
    }
}

#[async_trait]
impl ConversationMemory for TokenBufferMemory {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Token
    }

    fn load_memory_variables(&self) -> MemoryVariables {
        history_vars(self.history.buffer_string())
    }

    async fn save_context(&mut self, input: &str, output: &str) -> Result<(), MemoryError> {
        self.history.add_exchange(input, output);
        let n = overflow(&self.history, self.llm.as_ref(), self.max_token_limit);
        if n > 0 {
            log::debug!("memory: token budget dropped {} messages", n);
            self.history.drop_oldest(n);
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.history.clear();
    }

    fn buffer(&self) -> Option<String> {
        Some(self.history.buffer_string())
    }
}

const SUMMARY_TEMPLATE: &str = "Progressively summarize the lines of conversation below, \
adding onto the current summary and returning a new summary. Keep every name, number and \
commitment that is mentioned.

Current summary:
{summary}

New lines of conversation:
{new_lines}

New summary:";

/// Recent messages within a token budget, plus a model-written summary of everything older.
pub struct SummaryBufferMemory {
    llm: Arc<dyn LlmBackend>,
    max_token_limit: usize,
    history: ChatHistory,
    moving_summary: String,
}

impl SummaryBufferMemory {
    pub fn new(llm: Arc<dyn LlmBackend>, max_token_limit: usize) -> Self {
        Self {
            llm,
            max_token_limit,
            history: ChatHistory::new(),
            moving_summary: String::new(),
        }
    }

    pub fn summary(&self) -> &str {
        &self.moving_summary
    }

    async fn predict_new_summary(&self, pruned: &[ChatMessage]) -> Result<String, MemoryError> {
        let template = Template::from_template(SUMMARY_TEMPLATE)?;
        let new_lines = buffer_string(pruned);
        let messages = template.format_messages(&vars([
            ("summary", self.moving_summary.as_str()),
            ("new_lines", new_lines.as_str()),
        ]))?;
        let summary = self.llm.chat(messages).await?;
        Ok(summary.trim().to_string())
    }

    fn render(&self) -> String {
        let buffer = self.history.buffer_string();
        match (self.moving_summary.is_empty(), buffer.is_empty()) {
            (true, _) => buffer,
            (false, true) => format!("System: {}", self.moving_summary),
            (false, false) => format!("System: {}\n{}", self.moving_summary, buffer),
        }
    }
}

#[async_trait]
impl ConversationMemory for SummaryBufferMemory {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Summary
    }

    fn load_memory_variables(&self) -> MemoryVariables {
        history_vars(self.render())
    }

    async fn save_context(&mut self, input: &str, output: &str) -> Result<(), MemoryError> {
        self.history.add_exchange(input, output);
        let n = overflow(&self.history, self.llm.as_ref(), self.max_token_limit);
        if n > 0 {
            log::debug!("memory: summarizing {} pruned messages", n);
            // The history keeps the messages until the summary exists.
            let pruned = self.history.oldest(n);
            self.moving_summary = self.predict_new_summary(&pruned).await?;
            self.history.drop_oldest(n);
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.history.clear();
        self.moving_summary.clear();
    }

    fn buffer(&self) -> Option<String> {
        Some(self.render())
    }
}
