//! Prompt manager: templates, examples and schemas from config, and formatting of any
//! prompt shape into a model-ready message list.

use std::collections::BTreeMap;

use super::{PromptError, Template, TemplateVars};
use crate::config::{ConfigManager, Example, SchemaField};
use crate::llm::ChatMessage;

/// Anything that can be turned into a message list.
#[derive(Debug, Clone)]
pub enum PromptInput {
    /// Use the configured `default` prompt.
    Empty,
    Text(String),
    List(Vec<PromptItem>),
    Template(Template),
    /// Already formatted; passed through.
    Messages(Vec<ChatMessage>),
}

/// One entry of a `PromptInput::List`.
#[derive(Debug, Clone)]
pub enum PromptItem {
    Text(String),
    Message(ChatMessage),
}

impl From<&str> for PromptInput {
    fn from(s: &str) -> Self {
        PromptInput::Text(s.to_string())
    }
}

impl From<String> for PromptInput {
    fn from(s: String) -> Self {
        PromptInput::Text(s)
    }
}

impl From<Template> for PromptInput {
    fn from(t: Template) -> Self {
        PromptInput::Template(t)
    }
}

impl From<Vec<ChatMessage>> for PromptInput {
    fn from(m: Vec<ChatMessage>) -> Self {
        PromptInput::Messages(m)
    }
}

impl From<&str> for PromptItem {
    fn from(s: &str) -> Self {
        PromptItem::Text(s.to_string())
    }
}

impl From<ChatMessage> for PromptItem {
    fn from(m: ChatMessage) -> Self {
        PromptItem::Message(m)
    }
}

pub struct PromptManager {
    prompt_templates: BTreeMap<String, String>,
    usecase_examples: BTreeMap<String, Vec<Example>>,
    schema_templates: BTreeMap<String, Vec<SchemaField>>,
}

impl PromptManager {
    pub fn new(config: &ConfigManager) -> Self {
        Self {
            prompt_templates: config.prompts().clone(),
            usecase_examples: config.all_examples().clone(),
            schema_templates: config.schemas().clone(),
        }
    }

    pub fn create_template(&self, template: &str) -> Result<Template, PromptError> {
        Template::from_template(template)
    }

    /// Configured template by name. `Ok(None)` when absent (the available names are logged);
    /// an error when the configured text does not parse.
    pub fn get_template(&self, name: &str) -> Result<Option<Template>, PromptError> {
        match self.prompt_templates.get(name) {
            Some(text) => Template::from_template(text).map(Some),
            None => {
                if self.prompt_templates.is_empty() {
                    log::debug!("prompt: template '{}' requested but no templates available", name);
                } else {
                    log::debug!(
                        "prompt: template '{}' not found; available: {:?}",
                        name,
                        self.prompt_templates.keys().collect::<Vec<_>>()
                    );
                }
                Ok(None)
            }
        }
    }

    pub fn get_example(&self, task: &str, name: &str) -> Option<&Example> {
        self.usecase_examples
            .get(task)?
            .iter()
            .find(|e| e.name == name)
    }

    pub fn get_schema(&self, name: &str) -> Option<&[SchemaField]> {
        let schema = self.schema_templates.get(name).map(Vec::as_slice);
        if schema.is_none() {
            if self.schema_templates.is_empty() {
                log::warn!("prompt: schema '{}' requested but no schemas available", name);
            } else {
                log::warn!(
                    "prompt: schema '{}' not found; available: {:?}",
                    name,
                    self.schema_templates.keys().collect::<Vec<_>>()
                );
            }
        }
        schema
    }

    pub fn format_simple_text(&self, prompt: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::user(prompt)]
    }

    /// Plain strings become human messages; messages are kept as they are.
    pub fn format_list_of_texts(&self, prompts: Vec<PromptItem>) -> Vec<ChatMessage> {
        prompts
            .into_iter()
            .map(|p| match p {
                PromptItem::Text(s) => ChatMessage::user(s),
                PromptItem::Message(m) => m,
            })
            .collect()
    }

    pub fn format_template_text(
        &self,
        template: &Template,
        vars: &TemplateVars,
    ) -> Result<Vec<ChatMessage>, PromptError> {
        template.format_messages(vars)
    }

    /// Format any prompt shape. `vars` only applies to templates.
    pub fn formatter(
        &self,
        prompt: PromptInput,
        vars: &TemplateVars,
    ) -> Result<Vec<ChatMessage>, PromptError> {
        match prompt {
            PromptInput::Empty => {
                let default = self
                    .prompt_templates
                    .get("default")
                    .ok_or(PromptError::NoDefaultPrompt)?;
                Ok(self.format_simple_text(default))
            }
            PromptInput::Text(s) => Ok(self.format_simple_text(&s)),
            PromptInput::List(items) => Ok(self.format_list_of_texts(items)),
            PromptInput::Template(t) => self.format_template_text(&t, vars),
            PromptInput::Messages(m) => Ok(m),
        }
    }
}
