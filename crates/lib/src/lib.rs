//! Modekit core library: config, Ollama chat client, prompt templates, structured output
//! parsing, conversation memory and the modes run by the CLI.

pub mod config;
pub mod init;
pub mod llm;
pub mod memory;
pub mod modes;
pub mod parsing;
pub mod processing;
pub mod prompt;
