use super::{MemoryError, MemoryKind, MemoryManager, MemoryParams};
use crate::config::ConfigManager;
use crate::llm::LlmClient;

/// Per-call overrides of the configured memory settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryOverrides {
    pub window_size: Option<usize>,
    pub max_token_limit: Option<usize>,
    pub verbose: Option<bool>,
}

/// Builds memory managers from the `memory` config section.
#[derive(Debug, Clone)]
pub struct MemoryFactory {
    memory_type: String,
    window_size: usize,
    max_token_limit: usize,
    verbose: bool,
}

impl MemoryFactory {
    pub fn new(config: &ConfigManager) -> Self {
        let settings = config.memory_settings();
        Self {
            memory_type: settings.kind.trim().to_lowercase(),
            window_size: settings.window_size,
            max_token_limit: settings.max_token_limit,
            verbose: settings.verbose,
        }
    }

    /// Configured memory type, lowercased.
    pub fn memory_type(&self) -> &str {
        &self.memory_type
    }

    /// Build a manager of `custom_memory` (or the configured type when `None`).
    pub fn build(
        &self,
        llm: &LlmClient,
        custom_memory: Option<&str>,
        overrides: MemoryOverrides,
    ) -> Result<MemoryManager, MemoryError> {
        let kind: MemoryKind = custom_memory.unwrap_or(&self.memory_type).parse()?;
        let params = MemoryParams {
            window_size: overrides.window_size.unwrap_or(self.window_size),
            max_token_limit: overrides.max_token_limit.unwrap_or(self.max_token_limit),
        };
        let verbose = overrides.verbose.unwrap_or(self.verbose);
        log::debug!("memory: building {} memory ({:?})", kind, params);
        let backend = llm.infer(kind.uses_custom_token_count());
        Ok(MemoryManager::new(kind, backend, params, verbose))
    }
}
