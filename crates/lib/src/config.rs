//! Configuration types and loading.
//!
//! Config is loaded from a YAML file (e.g. `./config.yml` or `~/.modekit/config.yml`) and
//! environment. The raw mapping is kept next to the typed view so callers can still reach
//! arbitrary `section.key` values that the typed sections do not model.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Typed view of every section modekit understands.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chat model settings (model name, sampling, endpoint, retries).
    #[serde(default)]
    pub model: ModelConfig,

    /// Legacy flat defaults (prompt, template, source text, style, schema).
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Prompt templates by name (e.g. "default", "one_shot", "translate", "extract").
    #[serde(default)]
    pub prompts: BTreeMap<String, String>,

    /// Use-case examples grouped by task (e.g. "translate", "extract").
    #[serde(default)]
    pub examples: BTreeMap<String, Vec<Example>>,

    /// Structured-output schemas: schema name -> ordered fields.
    #[serde(default)]
    pub schemas: BTreeMap<String, Vec<SchemaField>>,

    /// Conversation memory defaults.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Log level and optional log file.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Chat model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Ollama model name, exactly as listed by `ollama list` (default "gemma3:12b").
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature (default 0.0).
    #[serde(default)]
    pub temperature: f32,

    #[serde(default)]
    pub top_k: Option<u32>,

    #[serde(default)]
    pub top_p: Option<f32>,

    /// Context window in tokens, sent to Ollama as `num_ctx`.
    #[serde(default)]
    pub context_length: Option<u32>,

    /// Ollama server root. Overridden by OLLAMA_HOST env.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Extra attempts after a failed chat call (default 0: no retry).
    #[serde(default)]
    pub max_retries: u32,

    /// Pause between attempts in milliseconds (default 1000).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Stream replies token by token in chat mode.
    #[serde(default)]
    pub stream: bool,

    /// HTTP request timeout in seconds. No timeout when absent.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_model() -> String {
    "gemma3:12b".to_string()
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: 0.0,
            top_k: None,
            top_p: None,
            context_length: None,
            base_url: None,
            max_retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            stream: false,
            timeout_secs: None,
        }
    }
}

/// Flat defaults used when a call does not say otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Prompt for a bare completion (default "What is 1+1?").
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// Fallback translation template; placeholders `{source}` (or `{text}`) and `{style}`.
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub schema_name: String,
    /// Fallback extraction template; placeholders `{format_instructions}` and `{text}`.
    #[serde(default)]
    pub schema_template: String,
}

fn default_prompt() -> String {
    "What is 1+1?".to_string()
}

fn default_template() -> String {
    "Format the following message: {source} into the style: {style}".to_string()
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            template: default_template(),
            source: String::new(),
            style: String::new(),
            schema_name: String::new(),
            schema_template: String::new(),
        }
    }
}

/// One use-case example (e.g. a text to translate and the target style).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub name: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub style: Option<String>,
    /// Schema to extract with (extract examples only).
    #[serde(default)]
    pub schema: Option<String>,
}

/// One field of a structured-output schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Type shown to the model in the format instructions (default "string").
    #[serde(rename = "type", default = "default_field_type")]
    pub kind: String,
}

fn default_field_type() -> String {
    "string".to_string()
}

impl SchemaField {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: default_field_type(),
        }
    }
}

/// Memory strategy defaults for the memory factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "buffer", "window", "token" or "summary" (default "buffer").
    #[serde(rename = "type", default = "default_memory_type")]
    pub kind: String,
    /// Exchanges kept by the window strategy (default 3).
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Token budget for the token and summary strategies (default 100).
    #[serde(default = "default_max_token_limit")]
    pub max_token_limit: usize,
    #[serde(default)]
    pub verbose: bool,
}

fn default_memory_type() -> String {
    "buffer".to_string()
}

fn default_window_size() -> usize {
    3
}

fn default_max_token_limit() -> usize {
    100
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            kind: default_memory_type(),
            window_size: default_window_size(),
            max_token_limit: default_max_token_limit(),
            verbose: false,
        }
    }
}

/// Logging settings. RUST_LOG takes precedence over `level`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// When set, log lines are appended to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Settings façade: named accessors over the typed config plus generic `section.key` lookup
/// over the raw mapping.
#[derive(Debug, Clone, Default)]
pub struct ConfigManager {
    raw: Mapping,
    config: Config,
}

impl ConfigManager {
    /// Build the typed view from a loaded mapping. A section with the wrong shape is an error
    /// naming that section; absent sections fall back to defaults.
    pub fn from_mapping(raw: Mapping) -> Result<Self> {
        let config = Config {
            model: section(&raw, "model")?,
            defaults: section(&raw, "defaults")?,
            prompts: section(&raw, "prompts")?,
            examples: section(&raw, "examples")?,
            schemas: section(&raw, "schemas")?,
            memory: section(&raw, "memory")?,
            logging: section(&raw, "logging")?,
        };
        Ok(Self { raw, config })
    }

    /// Parse YAML text directly (used by `init` checks and tests).
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Self::from_mapping(mapping_from_str(s).context("parsing YAML config")?)
    }

    /// Generic access to a whole section of the raw mapping.
    pub fn get(&self, section: &str) -> Option<&Value> {
        self.raw.get(section)
    }

    /// Generic access to `section.key`. `None` when either is absent.
    pub fn get_key(&self, section: &str, key: &str) -> Option<&Value> {
        self.get(section)?.as_mapping()?.get(key)
    }

    pub fn get_str(&self, section: &str, key: &str) -> Option<&str> {
        self.get_key(section, key)?.as_str()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn model_params(&self) -> &ModelConfig {
        &self.config.model
    }

    pub fn model_name(&self) -> &str {
        &self.config.model.model
    }

    pub fn defaults(&self) -> &DefaultsConfig {
        &self.config.defaults
    }

    pub fn prompts(&self) -> &BTreeMap<String, String> {
        &self.config.prompts
    }

    /// Prompt template text by name.
    pub fn prompt(&self, name: &str) -> Option<&str> {
        self.config.prompts.get(name).map(String::as_str)
    }

    pub fn all_examples(&self) -> &BTreeMap<String, Vec<Example>> {
        &self.config.examples
    }

    /// All examples for a task; empty when the task is unknown.
    pub fn examples(&self, task: &str) -> &[Example] {
        self.config
            .examples
            .get(task)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// One example of a task by name.
    pub fn example(&self, task: &str, name: &str) -> Option<&Example> {
        self.examples(task).iter().find(|e| e.name == name)
    }

    pub fn schemas(&self) -> &BTreeMap<String, Vec<SchemaField>> {
        &self.config.schemas
    }

    pub fn schema(&self, name: &str) -> Option<&[SchemaField]> {
        self.config.schemas.get(name).map(Vec::as_slice)
    }

    pub fn memory_settings(&self) -> &MemoryConfig {
        &self.config.memory
    }

    pub fn logging(&self) -> &LoggingConfig {
        &self.config.logging
    }

    /// Apply OLLAMA_HOST and MODEKIT_MODEL when set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        if let Some(host) = non_empty_env("OLLAMA_HOST") {
            self.config.model.base_url = Some(normalize_base_url(&host));
        }
        if let Some(model) = non_empty_env("MODEKIT_MODEL") {
            self.config.model.model = model;
        }
    }
}

fn section<T: DeserializeOwned + Default>(raw: &Mapping, name: &str) -> Result<T> {
    match raw.get(name) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(v) => serde_yaml::from_value(v.clone())
            .with_context(|| format!("invalid `{}` section in config", name)),
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// OLLAMA_HOST is often given as `host:port`; add a scheme and drop trailing slashes.
pub fn normalize_base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

fn mapping_from_str(s: &str) -> Result<Mapping, serde_yaml::Error> {
    if s.trim().is_empty() {
        return Ok(Mapping::new());
    }
    match serde_yaml::from_str::<Value>(s)? {
        Value::Mapping(m) => Ok(m),
        Value::Null => Ok(Mapping::new()),
        other => {
            log::warn!("config root is not a mapping ({:?}); ignoring it", other);
            Ok(Mapping::new())
        }
    }
}

/// Resolve config path: MODEKIT_CONFIG_PATH, else `./config.yml` when present, else
/// `~/.modekit/config.yml`.
pub fn default_config_path() -> PathBuf {
    if let Some(p) = non_empty_env("MODEKIT_CONFIG_PATH") {
        return PathBuf::from(p);
    }
    let local = PathBuf::from("config.yml");
    if local.exists() {
        return local;
    }
    dirs::home_dir()
        .map(|h| h.join(".modekit").join("config.yml"))
        .unwrap_or(local)
}

/// Read a YAML file into a nested mapping. Missing file => empty mapping.
pub fn load_configurations(path: &Path) -> Result<Mapping> {
    if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        return Ok(Mapping::new());
    }
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    mapping_from_str(&s).with_context(|| format!("parsing config from {}", path.display()))
}

/// Load config from the given path (or the default one) and apply env overrides.
/// Returns the façade and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(ConfigManager, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let raw = load_configurations(&path)?;
    let mut manager = ConfigManager::from_mapping(raw)
        .with_context(|| format!("loading config from {}", path.display()))?;
    manager.apply_env_overrides();
    Ok((manager, path))
}
