//! Conversation memory: four retention strategies, a manager that runs a conversation
//! over one of them, and a config-driven factory.
//!
//! - buffer: keep everything.
//! - window: expose only the last `k` exchanges.
//! - token: drop the oldest messages once the history exceeds a token budget.
//! - summary: like token, but fold dropped messages into a running summary.

mod factory;
mod history;
mod manager;
mod strategies;

pub use factory::{MemoryFactory, MemoryOverrides};
pub use history::{buffer_string, ChatHistory};
pub use manager::{MemoryManager, MemoryParams};
pub use strategies::{BufferMemory, SummaryBufferMemory, TokenBufferMemory, WindowMemory};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::llm::LlmError;
use crate::prompt::PromptError;

/// Key under which the rendered history is exposed.
pub const HISTORY_KEY: &str = "history";

/// Variables a memory exposes to the conversation prompt (currently only `history`).
pub type MemoryVariables = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("unknown memory type: {0} (available: buffer, window, token, summary)")]
    UnknownType(String),
    #[error("{operation} is not supported by {kind} memory")]
    Unsupported {
        operation: &'static str,
        kind: MemoryKind,
    },
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Buffer,
    Window,
    Token,
    Summary,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Buffer => "buffer",
            MemoryKind::Window => "window",
            MemoryKind::Token => "token",
            MemoryKind::Summary => "summary",
        }
    }

    /// Token and summary memories count tokens with the whitespace counter.
    pub fn uses_custom_token_count(&self) -> bool {
        matches!(self, MemoryKind::Token | MemoryKind::Summary)
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buffer" => Ok(MemoryKind::Buffer),
            "window" => Ok(MemoryKind::Window),
            "token" => Ok(MemoryKind::Token),
            "summary" => Ok(MemoryKind::Summary),
            _ => Err(MemoryError::UnknownType(s.to_string())),
        }
    }
}

/// One retention strategy.
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    fn kind(&self) -> MemoryKind;

    fn load_memory_variables(&self) -> MemoryVariables;

    /// Record one exchange, then apply the strategy's pruning.
    async fn save_context(&mut self, input: &str, output: &str) -> Result<(), MemoryError>;

    fn clear(&mut self);

    /// Raw buffer, for strategies that keep one.
    fn buffer(&self) -> Option<String> {
        None
    }
}

pub(crate) fn history_vars(history: String) -> MemoryVariables {
    let mut vars = MemoryVariables::new();
    vars.insert(HISTORY_KEY.to_string(), history);
    vars
}
