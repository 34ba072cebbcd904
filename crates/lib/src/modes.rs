//! Mode dispatch for the `run` command.

use std::fmt;
use std::io::{BufRead, Write};
use std::str::FromStr;

use crate::config::ConfigManager;
use crate::llm::LlmError;
use crate::memory::{MemoryError, MemoryManager, MemoryOverrides, MemoryVariables};
use crate::processing::{ProcessError, TextProcessor};

/// Shown when no mode is given on the command line.
pub const MODE_MENU: &str = "
What do you want to do? (i.e. prompt, chat, rag, agent, evaluate)
    - prompt: Generate text based on a template you can build.
    - chat: Chat with an LLM.
    - rag: Query a document-based retrieval-augmented generator you will setup.
    - agent: Setup & converse with a specialized Agent (available: basic math solver, wikipedia searcher, python coder or custom).
    - evaluate: Setup an automated LLM-based evaluator for a simplistic RAG output.
Input your choice:";

const SCHEDULE: &str = "There is a meeting at 8am with your product team. \
You will need your powerpoint presentation prepared. 9am-12pm have time to work on your \
Rust project which will go quickly because the compiler catches mistakes early. At Noon, lunch \
at the italian restaurant with a customer who is driving from over an hour away to meet you to \
understand the latest in AI. Be sure to bring your laptop to show the latest LLM demo.";

#[derive(Debug, thiserror::Error)]
pub enum ModeError {
    #[error("mode must be specified. Available modes: 'prompt', 'chat', 'rag', 'agent' & 'evaluate'")]
    Missing,
    #[error("invalid mode '{0}'. Available modes: 'prompt', 'chat', 'rag', 'agent' & 'evaluate'")]
    Invalid(String),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Prompt,
    Chat,
    Rag,
    Agent,
    Evaluate,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Prompt => "prompt",
            Mode::Chat => "chat",
            Mode::Rag => "rag",
            Mode::Agent => "agent",
            Mode::Evaluate => "evaluate",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" => Err(ModeError::Missing),
            "prompt" => Ok(Mode::Prompt),
            "chat" => Ok(Mode::Chat),
            "rag" => Ok(Mode::Rag),
            "agent" => Ok(Mode::Agent),
            "evaluate" => Ok(Mode::Evaluate),
            _ => Err(ModeError::Invalid(s.trim().to_string())),
        }
    }
}

/// Flags of the `run` command that apply to some modes.
#[derive(Debug, Clone, Default)]
pub struct ModeOptions {
    /// Memory type for chat (overrides `memory.type`).
    pub memory: Option<String>,
    /// Run the scripted memory demo instead of the interactive chat.
    pub demo: bool,
}

pub async fn run_mode<R, W>(
    mode: Mode,
    config: &ConfigManager,
    options: &ModeOptions,
    input: &mut R,
    output: &mut W,
) -> Result<(), ModeError>
where
    R: BufRead,
    W: Write + Send,
{
    log::info!("running {} mode", mode);
    match mode {
        Mode::Prompt => prompt(config, output).await,
        Mode::Chat if options.demo => memory_demo(config, output).await,
        Mode::Chat => {
            let processor = TextProcessor::new(config.clone());
            processor
                .chat(options.memory.as_deref(), false, input, output)
                .await?;
            Ok(())
        }
        Mode::Rag | Mode::Agent | Mode::Evaluate => {
            writeln!(output, "{} mode is not implemented yet", mode)?;
            Ok(())
        }
    }
}

async fn prompt<W: Write>(config: &ConfigManager, output: &mut W) -> Result<(), ModeError> {
    let processor = TextProcessor::new(config.clone());

    let simple = processor.llm_client().get_completion(None).await?;
    writeln!(output, "\nSimple completion:\n{}", simple.trim())?;

    let translated = processor.translate(None, None, None).await?;
    writeln!(output, "\nTemplated completion (translation):\n{}", translated.trim())?;

    let review = config
        .example("extract", "product_review")
        .map(|e| e.source.trim())
        .filter(|s| !s.is_empty());
    let Some(review) = review else {
        writeln!(output, "Error: 'product_review' source not found in configuration.")?;
        return Ok(());
    };
    let extracted = processor.extract_review_info(Some(review)).await?;
    writeln!(output, "\nExtracted information from product review:")?;
    for (key, value) in &extracted {
        match value {
            serde_json::Value::String(s) => writeln!(output, "{}: {}", key, s)?,
            other => writeln!(output, "{}: {}", key, other)?,
        }
    }
    Ok(())
}

fn print_memory<W: Write>(output: &mut W, label: &str, vars: &MemoryVariables) -> std::io::Result<()> {
    writeln!(output, "{}:", label)?;
    for (key, value) in vars {
        writeln!(output, "  {}: {}", key, value.replace('\n', "\n    "))?;
    }
    Ok(())
}

/// Scripted walk through the four memory strategies.
async fn memory_demo<W: Write>(config: &ConfigManager, output: &mut W) -> Result<(), ModeError> {
    let processor = TextProcessor::new(config.clone());
    let build = |kind: &str, overrides: MemoryOverrides| -> Result<MemoryManager, ModeError> {
        Ok(processor.memory(Some(kind), overrides)?)
    };

    let mut buffer = build(
        "buffer",
        MemoryOverrides {
            verbose: Some(true),
            ..Default::default()
        },
    )?;
    buffer.predict("Hi, my name is Ferris!").await?;
    buffer.predict("What is 1+1?").await?;
    let response = buffer.predict("What is my name?").await?;
    writeln!(output, "Response: {}", response.trim())?;
    print_memory(output, "Buffer memory", &buffer.get_memory_content())?;

    let mut window = build(
        "window",
        MemoryOverrides {
            window_size: Some(2),
            ..Default::default()
        },
    )?;
    window.predict("Hi, my name is Ferris!").await?;
    window.predict("What is 1+1?").await?;
    window.predict("What is my name?").await?;
    print_memory(output, "Window memory", &window.get_memory_content())?;

    let mut token = build(
        "token",
        MemoryOverrides {
            max_token_limit: Some(50),
            ..Default::default()
        },
    )?;
    token.add_to_memory("AI is what?!", "Amazing!").await?;
    token.add_to_memory("Backpropagation is what?", "Beautiful!").await?;
    token.add_to_memory("Chatbots are what?", "Charming!").await?;
    print_memory(output, "Token memory", &token.get_memory_content())?;

    let mut summary = build(
        "summary",
        MemoryOverrides {
            max_token_limit: Some(100),
            ..Default::default()
        },
    )?;
    summary
        .add_to_memory("What is on the schedule today?", SCHEDULE)
        .await?;
    print_memory(output, "Summary memory", &summary.get_memory_content())?;
    let response = summary.predict("What would be a good demo to show?").await?;
    writeln!(output, "Response about demo: {}", response.trim())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modes() {
        assert_eq!("prompt".parse::<Mode>().unwrap(), Mode::Prompt);
        assert_eq!(" Chat\n".parse::<Mode>().unwrap(), Mode::Chat);
        assert_eq!("EVALUATE".parse::<Mode>().unwrap().to_string(), "evaluate");
        assert!(matches!("".parse::<Mode>(), Err(ModeError::Missing)));
        let err = "train".parse::<Mode>().unwrap_err();
        assert!(matches!(&err, ModeError::Invalid(m) if m == "train"));
        assert!(err.to_string().contains("'prompt', 'chat', 'rag', 'agent' & 'evaluate'"));
    }

    #[test]
    fn menu_lists_every_mode() {
        for mode in ["prompt", "chat", "rag", "agent", "evaluate"] {
            assert!(MODE_MENU.contains(&format!("- {}:", mode)));
        }
    }

    #[tokio::test]
    async fn stub_modes_report_not_implemented() {
        let config = ConfigManager::default();
        for mode in [Mode::Rag, Mode::Agent, Mode::Evaluate] {
            let mut output = Vec::new();
            run_mode(
                mode,
                &config,
                &ModeOptions::default(),
                &mut std::io::empty(),
                &mut output,
            )
            .await
            .unwrap();
            assert_eq!(
                String::from_utf8(output).unwrap(),
                format!("{} mode is not implemented yet\n", mode)
            );
        }
    }
}
