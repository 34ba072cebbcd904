//! Text processor: generation, translation, structured extraction and an interactive chat
//! loop, composed from the config, LLM client, prompt manager, output parser and memory
//! factory.

use serde_json::{Map, Value};
use std::io::{BufRead, Write};
use std::time::Instant;

use crate::config::ConfigManager;
use crate::llm::{LlmClient, LlmError};
use crate::memory::{MemoryError, MemoryFactory, MemoryManager, MemoryOverrides};
use crate::parsing::{OutputParser, ParseError};
use crate::prompt::{vars, PromptError, PromptInput, PromptManager, Template, TemplateVars};

const TRANSLATE_TEMPLATE: &str =
    "Translate the text that is delimited by triple backticks into a style that is {style}. \
     text: ```{text}```";

const EXTRACT_TEMPLATE: &str = "For the following text, extract the requested information.\n\n\
     text: {text}\n\n{format_instructions}";

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("unknown schema: {0}")]
    UnknownSchema(String),
    #[error("{task}: no text given and no example or default source configured")]
    MissingText { task: &'static str },
    #[error("no schema given and no example or default schema configured")]
    MissingSchema,
    #[error("chat i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Log how long `what` took, at info.
fn log_elapsed(what: &str, started: Instant) {
    log::info!("{} took {:.3}s", what, started.elapsed().as_secs_f64());
}

/// Non-empty `s`, else `None`.
fn non_empty(s: &str) -> Option<&str> {
    (!s.trim().is_empty()).then_some(s)
}

pub struct TextProcessor {
    config: ConfigManager,
    llm_client: LlmClient,
    prompt_manager: PromptManager,
    output_parser: OutputParser,
    memory_factory: MemoryFactory,
}

impl TextProcessor {
    pub fn new(config: ConfigManager) -> Self {
        let llm_client = LlmClient::new(&config);
        let prompt_manager = PromptManager::new(&config);
        let output_parser = OutputParser::new(&config);
        let memory_factory = MemoryFactory::new(&config);
        Self {
            config,
            llm_client,
            prompt_manager,
            output_parser,
            memory_factory,
        }
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    pub fn llm_client(&self) -> &LlmClient {
        &self.llm_client
    }

    pub fn llm_client_mut(&mut self) -> &mut LlmClient {
        &mut self.llm_client
    }

    pub fn prompt_manager(&self) -> &PromptManager {
        &self.prompt_manager
    }

    pub fn output_parser(&self) -> &OutputParser {
        &self.output_parser
    }

    pub fn memory_factory(&self) -> &MemoryFactory {
        &self.memory_factory
    }

    /// Format `prompt` and send it. `Empty` uses the `one_shot` prompt, then `default`, then
    /// `defaults.prompt`.
    pub async fn generate(
        &self,
        prompt: PromptInput,
        vars: &TemplateVars,
    ) -> Result<String, ProcessError> {
        let started = Instant::now();
        let prompt = match prompt {
            PromptInput::Empty => PromptInput::Text(
                self.config
                    .prompt("one_shot")
                    .or_else(|| self.config.prompt("default"))
                    .unwrap_or(&self.config.defaults().prompt)
                    .to_string(),
            ),
            other => other,
        };
        let messages = self.prompt_manager.formatter(prompt, vars)?;
        let reply = self.llm_client.chat(messages).await?;
        log_elapsed("generate", started);
        Ok(reply)
    }

    /// Restyle `text` into `style`. Missing arguments come from the `translate` example named
    /// `usecase` (default "pirate"), then from `defaults.source` / `defaults.style`.
    pub async fn translate(
        &self,
        usecase: Option<&str>,
        text: Option<&str>,
        style: Option<&str>,
    ) -> Result<String, ProcessError> {
        let started = Instant::now();
        let usecase = usecase.unwrap_or("pirate");
        let example = self.prompt_manager.get_example("translate", usecase);
        let defaults = self.config.defaults();

        let text = text
            .and_then(non_empty)
            .or_else(|| example.and_then(|e| non_empty(&e.source)))
            .or_else(|| non_empty(&defaults.source))
            .ok_or(ProcessError::MissingText { task: "translate" })?;
        let style = style
            .and_then(non_empty)
            .or_else(|| example.and_then(|e| e.style.as_deref()).and_then(non_empty))
            .unwrap_or(&defaults.style);

        let template = match self.prompt_manager.get_template("translate")? {
            Some(t) => t,
            None => match self.prompt_manager.get_template("default")? {
                Some(t) if !t.input_variables().is_empty() => t,
                _ => match non_empty(&defaults.template) {
                    Some(t) => Template::from_template(t)?,
                    None => Template::from_template(TRANSLATE_TEMPLATE)?,
                },
            },
        };
        let messages = self.prompt_manager.format_template_text(
            &template,
            &vars([("text", text), ("source", text), ("style", style)]),
        )?;
        let reply = self.llm_client.chat(messages).await?;
        log_elapsed("translate", started);
        Ok(reply)
    }

    /// Extract the fields of a schema from `text` and parse the reply. Missing arguments come
    /// from the `extract` example named `schema_name` (default "product_review"), then from
    /// `defaults.source` / `defaults.schema_name`.
    pub async fn extract(
        &self,
        text: Option<&str>,
        schema_name: Option<&str>,
    ) -> Result<Map<String, Value>, ProcessError> {
        let started = Instant::now();
        let example_name = schema_name.unwrap_or("product_review");
        let example = self.prompt_manager.get_example("extract", example_name);
        let defaults = self.config.defaults();

        let text = text
            .and_then(non_empty)
            .or_else(|| example.and_then(|e| non_empty(&e.source)))
            .or_else(|| non_empty(&defaults.source))
            .ok_or(ProcessError::MissingText { task: "extract" })?;
        let schema_name = schema_name
            .and_then(non_empty)
            .or_else(|| example.and_then(|e| e.schema.as_deref()).and_then(non_empty))
            .or_else(|| non_empty(&defaults.schema_name))
            .ok_or(ProcessError::MissingSchema)?;

        if self.prompt_manager.get_schema(schema_name).is_none() {
            return Err(ProcessError::UnknownSchema(schema_name.to_string()));
        }
        let parser = self
            .output_parser
            .get_parser(schema_name)
            .ok_or_else(|| ProcessError::UnknownSchema(schema_name.to_string()))?;
        let format_instructions = OutputParser::get_format_instructions(parser);

        let template = match self.prompt_manager.get_template("extract")? {
            Some(t) => t,
            None => match non_empty(&defaults.schema_template) {
                Some(t) => Template::from_template(t)?,
                None => Template::from_template(EXTRACT_TEMPLATE)?,
            },
        };
        let messages = self.prompt_manager.format_template_text(
            &template,
            &vars([
                ("text", text),
                ("format_instructions", format_instructions.as_str()),
            ]),
        )?;
        let reply = self.llm_client.chat(messages).await?;
        let parsed = OutputParser::parse_output(parser, &reply)?;
        log_elapsed("extract", started);
        Ok(parsed)
    }

    /// Extraction with the `product_review` schema.
    pub async fn extract_review_info(
        &self,
        text: Option<&str>,
    ) -> Result<Map<String, Value>, ProcessError> {
        self.extract(text, Some("product_review")).await
    }

    /// Build the memory manager for a chat session.
    pub fn memory(
        &self,
        memory: Option<&str>,
        overrides: MemoryOverrides,
    ) -> Result<MemoryManager, ProcessError> {
        Ok(self.memory_factory.build(&self.llm_client, memory, overrides)?)
    }

    /// Interactive chat: one line per turn until `exit` or end of input. Turn errors are
    /// reported and the loop continues.
    pub async fn chat<R, W>(
        &self,
        memory: Option<&str>,
        verbose: bool,
        input: &mut R,
        output: &mut W,
    ) -> Result<(), ProcessError>
    where
        R: BufRead,
        W: Write + Send,
    {
        let started = Instant::now();
        let overrides = MemoryOverrides {
            verbose: verbose.then_some(true),
            ..Default::default()
        };
        let mut manager = self.memory(memory, overrides)?;
        let stream = self.config.model_params().stream;
        writeln!(
            output,
            "Chatting with {} ({} memory). Type 'exit' to quit.",
            manager.model_name(),
            manager.kind()
        )?;

        loop {
            write!(output, "You: ")?;
            output.flush()?;
            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                writeln!(output)?;
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.eq_ignore_ascii_case("exit") {
                break;
            }

            if stream {
                write!(output, "AI: ")?;
                output.flush()?;
                let mut write_err: Option<std::io::Error> = None;
                let result = {
                    let mut on_chunk = |chunk: &str| {
                        if write_err.is_some() {
                            return;
                        }
                        if let Err(e) = output.write_all(chunk.as_bytes()).and_then(|_| output.flush()) {
                            write_err = Some(e);
                        }
                    };
                    manager.predict_stream(line, &mut on_chunk).await
                };
                if let Some(e) = write_err {
                    return Err(e.into());
                }
                match result {
                    Ok(_) => writeln!(output)?,
                    Err(e) => writeln!(output, "\nchat error: {}", e)?,
                }
            } else {
                match manager.predict(line).await {
                    Ok(reply) => writeln!(output, "AI: {}", reply.trim())?,
                    Err(e) => writeln!(output, "chat error: {}", e)?,
                }
            }
        }
        log_elapsed("chat", started);
        Ok(())
    }
}
