//! Config-backed chat model client.
//!
//! `LlmClient` keeps the model settings and lazily builds an `OllamaChatModel` handle the
//! first time one is needed. Setters drop the cached handle so the next call picks up the
//! new settings.

use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::{ChatMessage, ChatOptions, LlmBackend, LlmError, OllamaClient, OllamaModel, TokenCounter};
use crate::config::{ConfigManager, ModelConfig};

/// How many times a failed chat call is retried, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or `max_retries` extra attempts have failed.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(err) => {
                    if attempt >= self.max_retries {
                        if self.max_retries > 0 {
                            log::error!("{}: all {} attempts failed", label, attempt + 1);
                        }
                        return Err(err);
                    }
                    attempt += 1;
                    log::warn!(
                        "{}: attempt {} failed: {}. retrying in {} ms",
                        label,
                        attempt,
                        err,
                        self.delay.as_millis()
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

/// Ollama-backed chat handle: one model with fixed sampling options.
#[derive(Clone)]
pub struct OllamaChatModel {
    client: OllamaClient,
    model: String,
    options: ChatOptions,
    counter: TokenCounter,
    retry: RetryPolicy,
}

impl OllamaChatModel {
    pub fn new(client: OllamaClient, model: impl Into<String>, options: ChatOptions) -> Self {
        Self {
            client,
            model: model.into(),
            options,
            counter: TokenCounter::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_token_counter(mut self, counter: TokenCounter) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn token_counter(&self) -> TokenCounter {
        self.counter
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }
}

#[async_trait]
impl LlmBackend for OllamaChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        log::debug!("llm: chat with {} ({} messages)", self.model, messages.len());
        let res = self
            .retry
            .run("llm chat", || {
                self.client
                    .chat(&self.model, messages.clone(), Some(self.options.clone()))
            })
            .await?;
        res.message
            .map(|m| m.content)
            .ok_or(LlmError::EmptyResponse)
    }

    /// Streaming is not retried: chunks already delivered cannot be taken back.
    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, LlmError> {
        let res = self
            .client
            .chat_stream(&self.model, messages, Some(self.options.clone()), on_chunk)
            .await?;
        Ok(res.content().to_string())
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.counter.count(text)
    }
}

/// Client for the configured chat model.
pub struct LlmClient {
    params: ModelConfig,
    default_prompt: String,
    chat_instance: OnceLock<Arc<OllamaChatModel>>,
}

impl LlmClient {
    pub fn new(config: &ConfigManager) -> Self {
        Self {
            params: config.model_params().clone(),
            default_prompt: config.defaults().prompt.clone(),
            chat_instance: OnceLock::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.params.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.params.model = model.into();
        self.chat_instance = OnceLock::new();
    }

    pub fn temperature(&self) -> f32 {
        self.params.temperature
    }

    pub fn set_temperature(&mut self, temperature: f32) {
        self.params.temperature = temperature;
        self.chat_instance = OnceLock::new();
    }

    /// All model parameters this client was built with.
    pub fn params(&self) -> &ModelConfig {
        &self.params
    }

    /// Lazily built chat handle (estimate token counter). Cached until a setter runs.
    pub fn run(&self) -> Arc<OllamaChatModel> {
        self.chat_instance
            .get_or_init(|| Arc::new(self.build_handle(TokenCounter::Estimate)))
            .clone()
    }

    /// Chat handle for callers that need token counting; `custom_token_count` selects the
    /// whitespace counter used by the token and summary memories.
    pub fn infer(&self, custom_token_count: bool) -> Arc<dyn LlmBackend> {
        if custom_token_count {
            Arc::new(self.build_handle(TokenCounter::Whitespace))
        } else {
            self.run()
        }
    }

    /// Send a single prompt; falls back to the configured default prompt.
    pub async fn get_completion(&self, prompt: Option<&str>) -> Result<String, LlmError> {
        let prompt = prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.default_prompt);
        self.chat(vec![ChatMessage::user(prompt)]).await
    }

    /// Send a list of messages to the chat model.
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        self.run().chat(messages).await
    }

    pub async fn list_models(&self) -> Result<Vec<OllamaModel>, LlmError> {
        self.ollama().list_models().await
    }

    fn ollama(&self) -> OllamaClient {
        OllamaClient::with_timeout(
            self.params.base_url.clone(),
            self.params.timeout_secs.map(Duration::from_secs),
        )
    }

    fn build_handle(&self, counter: TokenCounter) -> OllamaChatModel {
        let options = ChatOptions {
            temperature: Some(self.params.temperature),
            top_k: self.params.top_k,
            top_p: self.params.top_p,
            num_ctx: self.params.context_length,
        };
        log::debug!(
            "llm: building handle for {} ({:?} token counter)",
            self.params.model,
            counter
        );
        OllamaChatModel::new(self.ollama(), self.params.model.clone(), options)
            .with_token_counter(counter)
            .with_retry(RetryPolicy {
                max_retries: self.params.max_retries,
                delay: Duration::from_millis(self.params.retry_delay_ms),
            })
    }
}
