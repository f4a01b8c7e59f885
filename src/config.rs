//! TOML configuration.
//!
//! A [`Config`] is built once at process start (from a file via
//! [`load_config`], or from [`Config::default`]) and passed by reference
//! into the chunker, the vector index, and the agent. It is never mutated
//! afterwards.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RagError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./rag_index")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum fragment length in chars.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Chars shared by adjacent fragments.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Break points, highest priority first. `""` means hard cut.
    #[serde(default = "default_separators")]
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            separators: default_separators(),
        }
    }
}

fn default_chunk_size() -> usize {
    100
}
fn default_chunk_overlap() -> usize {
    20
}
fn default_separators() -> Vec<String> {
    ["\n\n", "\n", ". ", " ", ""]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    crate::retriever::DEFAULT_TOP_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL of an OpenAI-compatible or Ollama endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: None,
            url: None,
            api_key_env: default_embedding_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-v1".to_string()
}
fn default_embedding_key_env() -> String {
    "DASHSCOPE_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    25
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Probe `GET {base_url}/models` when connecting.
    #[serde(default)]
    pub verify_on_connect: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            api_key_env: default_llm_key_env(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            verify_on_connect: false,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_llm_model() -> String {
    "deepseek-chat".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.deepseek.com".to_string()
}
fn default_llm_key_env() -> String {
    "DEEPSEEK_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_tool_name")]
    pub tool_name: String,
    #[serde(default = "default_tool_description")]
    pub tool_description: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Upper bound on model calls per question.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tool_name: default_tool_name(),
            tool_description: default_tool_description(),
            system_prompt: default_system_prompt(),
            max_steps: default_max_steps(),
        }
    }
}

fn default_tool_name() -> String {
    "pdf_extractor".to_string()
}
fn default_tool_description() -> String {
    "Searches the indexed PDF documents and returns the passages most relevant to the query."
        .to_string()
}
fn default_system_prompt() -> String {
    "You are an assistant that answers questions about a collection of PDF documents. \
     Give every relevant detail. If the answer is not in the retrieved context, say that \
     the answer is not in the context; never invent one.\n\
     Rules:\n\
     1. If the question concerns the content of the indexed documents, call the retrieval \
     tool and answer from its results, not from your own knowledge.\n\
     2. For any other question, answer directly without calling the tool."
        .to_string()
}
fn default_max_steps() -> usize {
    4
}

/// Read and validate a TOML configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RagError::Configuration(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| RagError::Configuration(format!("failed to parse config: {}", e)))?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(invalid("chunking.chunk_size must be > 0"));
        }
        if chunking.chunk_overlap >= chunking.chunk_size {
            return Err(invalid("chunking.chunk_overlap must be < chunking.chunk_size"));
        }
        if chunking.separators.is_empty() {
            return Err(invalid("chunking.separators must not be empty"));
        }

        if self.retrieval.top_k < 1 {
            return Err(invalid("retrieval.top_k must be >= 1"));
        }

        if self.embedding.batch_size < 1 {
            return Err(invalid("embedding.batch_size must be >= 1"));
        }
        if self.embedding.dims == Some(0) {
            return Err(invalid("embedding.dims must be > 0 when set"));
        }
        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" | "local" => {}
            other => {
                return Err(invalid(&format!(
                    "unknown embedding provider '{}'; must be disabled, openai, ollama, or local",
                    other
                )))
            }
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid("llm.temperature must be in [0.0, 2.0]"));
        }
        if self.agent.max_steps < 1 {
            return Err(invalid("agent.max_steps must be >= 1"));
        }
        if self.agent.tool_name.trim().is_empty() {
            return Err(invalid("agent.tool_name must not be empty"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> RagError {
    RagError::Configuration(msg.to_string())
}

/// Read a credential from the environment variable `var`.
pub fn require_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(RagError::Configuration(format!(
            "{} environment variable not set",
            var
        ))),
    }
}
