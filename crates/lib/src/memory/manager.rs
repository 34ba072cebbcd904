//! Memory manager: a conversation chain over one retention strategy.

use std::sync::Arc;

use super::strategies::{BufferMemory, SummaryBufferMemory, TokenBufferMemory, WindowMemory};
use super::{ConversationMemory, MemoryError, MemoryKind, MemoryVariables, HISTORY_KEY};
use crate::llm::{ChatMessage, LlmBackend};
use crate::prompt::{vars, Template};

const CONVERSATION_TEMPLATE: &str = "The following is a friendly conversation between a human \
and an AI. The AI is talkative and provides lots of specific details from its context. If the \
AI does not know the answer to a question, it truthfully says it does not know.

Current conversation:
{history}
Human: {input}
AI:";

/// Size parameters for the strategies that take one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryParams {
    pub window_size: usize,
    pub max_token_limit: usize,
}

impl Default for MemoryParams {
    fn default() -> Self {
        Self {
            window_size: 3,
            max_token_limit: 100,
        }
    }
}

pub struct MemoryManager {
    llm: Arc<dyn LlmBackend>,
    params: MemoryParams,
    verbose: bool,
    memory: Box<dyn ConversationMemory>,
}

impl MemoryManager {
    pub fn new(
        kind: MemoryKind,
        llm: Arc<dyn LlmBackend>,
        params: MemoryParams,
        verbose: bool,
    ) -> Self {
        let memory = create_memory(kind, &llm, params);
        Self {
            llm,
            params,
            verbose,
            memory,
        }
    }

    pub fn kind(&self) -> MemoryKind {
        self.memory.kind()
    }

    pub fn params(&self) -> MemoryParams {
        self.params
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Run one conversation turn: render history + input, call the model, save the exchange.
    pub async fn predict(&mut self, input: &str) -> Result<String, MemoryError> {
        let messages = self.conversation_prompt(input)?;
        let output = self.llm.chat(messages).await?;
        self.memory.save_context(input, &output).await?;
        Ok(output)
    }

    /// Same as `predict`, forwarding reply chunks as they arrive.
    pub async fn predict_stream(
        &mut self,
        input: &str,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, MemoryError> {
        let messages = self.conversation_prompt(input)?;
        let output = self.llm.chat_stream(messages, on_chunk).await?;
        self.memory.save_context(input, &output).await?;
        Ok(output)
    }

    pub fn get_memory_content(&self) -> MemoryVariables {
        self.memory.load_memory_variables()
    }

    pub fn get_memory_buffer(&self) -> String {
        self.memory
            .buffer()
            .unwrap_or_else(|| "Buffer not available for this memory type".to_string())
    }

    /// Record an exchange without calling the model.
    pub async fn add_to_memory(&mut self, user_input: &str, ai_output: &str) -> Result<(), MemoryError> {
        self.memory.save_context(user_input, ai_output).await
    }

    pub fn clear_memory(&mut self) {
        self.memory.clear();
    }

    /// Change the window size. The history is reset.
    pub fn adjust_window_size(&mut self, new_size: usize) -> Result<(), MemoryError> {
        let kind = self.kind();
        if kind != MemoryKind::Window {
            return Err(MemoryError::Unsupported {
                operation: "adjust_window_size",
                kind,
            });
        }
        self.params.window_size = new_size;
        self.memory = create_memory(kind, &self.llm, self.params);
        Ok(())
    }

    fn conversation_prompt(&self, input: &str) -> Result<Vec<ChatMessage>, MemoryError> {
        let variables = self.memory.load_memory_variables();
        let history = variables.get(HISTORY_KEY).map(String::as_str).unwrap_or("");
        let template = Template::from_template(CONVERSATION_TEMPLATE)?;
        let messages = template.format_messages(&vars([("history", history), ("input", input)]))?;
        if self.verbose {
            log::info!(
                "memory ({}): prompt after formatting:\n{}",
                self.kind(),
                messages[0].content
            );
        }
        Ok(messages)
    }
}

fn create_memory(
    kind: MemoryKind,
    llm: &Arc<dyn LlmBackend>,
    params: MemoryParams,
) -> Box<dyn ConversationMemory> {
    match kind {
        MemoryKind::Buffer => Box::new(BufferMemory::new()),
        MemoryKind::Window => Box::new(WindowMemory::new(params.window_size)),
        MemoryKind::Token => Box::new(TokenBufferMemory::new(llm.clone(), params.max_token_limit)),
        MemoryKind::Summary => {
            Box::new(SummaryBufferMemory::new(llm.clone(), params.max_token_limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::ScriptedBackend;

    fn manager(kind: MemoryKind, llm: Arc<ScriptedBackend>, params: MemoryParams) -> MemoryManager {
        MemoryManager::new(kind, llm, params, false)
    }

    #[tokio::test]
    async fn predict_sends_history_and_saves_exchange() {
        let llm = Arc::new(ScriptedBackend::with_replies(&["Nice to meet you, Ada!", "Your name is Ada."]));
        let mut m = manager(MemoryKind::Buffer, llm.clone(), MemoryParams::default());
        assert_eq!(m.predict("Hi, my name is Ada!").await.unwrap(), "Nice to meet you, Ada!");
        assert_eq!(m.predict("What is my name?").await.unwrap(), "Your name is Ada.");

        let prompt = llm.last_prompt();
        assert!(prompt.contains(
            "Current conversation:\nHuman: Hi, my name is Ada!\nAI: Nice to meet you, Ada!\nHuman: What is my name?\nAI:"
        ));
        assert!(m.get_memory_content()[HISTORY_KEY].ends_with("AI: Your name is Ada."));
    }

    #[tokio::test]
    async fn predict_stream_forwards_chunks() {
        let llm = Arc::new(ScriptedBackend::with_replies(&["streamed"]));
        let mut m = manager(MemoryKind::Buffer, llm, MemoryParams::default());
        let mut seen = String::new();
        let out = m
            .predict_stream("hi", &mut |c: &str| seen.push_str(c))
            .await
            .unwrap();
        assert_eq!(out, "streamed");
        assert_eq!(seen, "streamed");
        assert_eq!(m.get_memory_buffer(), "Human: hi\nAI: streamed");
    }

    #[tokio::test]
    async fn add_to_memory_skips_the_model() {
        let llm = Arc::new(ScriptedBackend::default());
        let mut m = manager(MemoryKind::Window, llm.clone(), MemoryParams { window_size: 2, max_token_limit: 100 });
        m.add_to_memory("a", "1").await.unwrap();
        m.add_to_memory("b", "2").await.unwrap();
        m.add_to_memory("c", "3").await.unwrap();
        assert!(llm.requests.lock().unwrap().is_empty());
        assert_eq!(m.get_memory_buffer(), "Human: b\nAI: 2\nHuman: c\nAI: 3");
    }

    #[tokio::test]
    async fn adjust_window_size_resets_history() {
        let llm = Arc::new(ScriptedBackend::default());
        let mut m = manager(MemoryKind::Window, llm.clone(), MemoryParams::default());
        m.add_to_memory("a", "1").await.unwrap();
        m.adjust_window_size(3).unwrap();
        assert_eq!(m.params().window_size, 3);
        assert_eq!(m.get_memory_content()[HISTORY_KEY], "");

        let mut buffer = manager(MemoryKind::Buffer, llm, MemoryParams::default());
        assert!(matches!(
            buffer.adjust_window_size(2),
            Err(MemoryError::Unsupported { kind: MemoryKind::Buffer, .. })
        ));
    }

    #[tokio::test]
    async fn clear_memory_empties_buffer() {
        let llm = Arc::new(ScriptedBackend::default());
        let mut m = manager(MemoryKind::Buffer, llm, MemoryParams::default());
        m.add_to_memory("a", "1").await.unwrap();
        m.clear_memory();
        assert_eq!(m.get_memory_buffer(), "");
    }
}
