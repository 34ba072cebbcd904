//! Prompt templates and the config-backed prompt manager.

mod manager;
mod template;

pub use manager::{PromptInput, PromptItem, PromptManager};
pub use template::{vars, Template, TemplateVars};

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("template variable `{0}` has no value")]
    MissingVariable(String),
    #[error("malformed template at byte {position}: {reason}")]
    Malformed {
        position: usize,
        reason: &'static str,
    },
    #[error("no `default` prompt configured")]
    NoDefaultPrompt,
}
