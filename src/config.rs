/// Configuration module for mitrerag.
///
/// Loads a JSON config file (every field defaulted), then applies environment
/// overrides. The OpenAI API key only ever comes from the environment.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Config file consulted when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "mitrerag.json";

/// Fatal configuration problems, reported before any work starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "OPENAI_API_KEY is not set; add `OPENAI_API_KEY=your_api_key_here` to .env \
         (get a key at https://platform.openai.com/api-keys)"
    )]
    MissingApiKey,

    #[error("techniques file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("vector store not found at {}; run `mitrerag index` first", .0.display())]
    MissingStore(PathBuf),

    #[error(
        "vector store was built with {stored_model} ({stored_dimensions} dims) but the selected \
         embedder is {model} ({dimensions} dims); re-index with --force or switch provider"
    )]
    StoreMismatch {
        stored_model: String,
        stored_dimensions: usize,
        model: String,
        dimensions: usize,
    },

    #[error(
        "vector store was indexed with the {stored} provider but {selected} was selected; \
         pass -p {stored} or re-index with --force"
    )]
    ProviderMismatch { stored: String, selected: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Default value functions ──────────────────────────────────────────

fn default_vector_store_path() -> String {
    "vector_store_mitre".to_string()
}

fn default_collection_name() -> String {
    "mitre_attack_techniques".to_string()
}

fn default_techniques_file() -> String {
    "data/techniques_enterprise_attack.json".to_string()
}

fn default_chunk_size() -> usize {
    1024
}

fn default_chunk_overlap() -> usize {
    64
}

fn default_local_chunk_size() -> usize {
    256
}

fn default_batch_size() -> usize {
    100
}

fn default_num_similar_docs() -> usize {
    6
}

fn default_memory_turns() -> usize {
    10
}

fn default_max_query_length() -> usize {
    500
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_local_model_name() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_local_dimensions() -> usize {
    384
}

fn default_local_model_dir() -> String {
    "models/all-MiniLM-L6-v2".to_string()
}

fn default_system_prompt() -> String {
    concat!(
        "You are an expert assistant in MITRE ATT&CK. ",
        "Provide clear and precise information about attack techniques, ",
        "tactics, and countermeasures based on the MITRE knowledge base. ",
        "You can also remember relevant details from the conversation ",
        "to respond more efficiently and contextually ",
        "in case previously seen cases are asked about. ",
        "Use simple and direct language to save tokens. ",
        "When responding, follow this structure:",
        "\n1. Relevant technique: Identify the technique or techniques related to the query. ",
        "Provide the name, technique ID, and associated tactic.",
        "\n2. Explanation: Describe how the scenario relates to the identified MITRE ATT&CK technique.",
        "\n3. Mitigations: Provide specific and practical steps to mitigate risks ",
        "related to the technique.",
        "\nStructure your responses clearly and professionally, ",
        "focusing on the user's needs.",
        "\nUse simple, clear, and direct language to ensure the user ",
        "can easily implement the recommendations."
    )
    .to_string()
}

fn default_exit_commands() -> Vec<String> {
    [":exit", ":quit", ":terminate", ":salir"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_vector_store_path")]
    pub vector_store_path: String,

    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    #[serde(default = "default_techniques_file")]
    pub techniques_file: String,

    /// Chunk size used with remote embeddings.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Smaller chunk size used with the local model.
    #[serde(default = "default_local_chunk_size")]
    pub local_chunk_size: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_num_similar_docs")]
    pub num_similar_docs: usize,

    /// Number of user/assistant turns kept in conversation memory.
    #[serde(default = "default_memory_turns")]
    pub memory_turns: usize,

    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_exit_commands")]
    pub exit_commands: Vec<String>,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub local: LocalModelConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OpenAiConfig {
    #[serde(skip)]
    pub api_key: Option<Secret<String>>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LocalModelConfig {
    #[serde(default = "default_local_model_name")]
    pub model_name: String,

    #[serde(default = "default_local_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_local_model_dir")]
    pub model_dir: String,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            vector_store_path: default_vector_store_path(),
            collection_name: default_collection_name(),
            techniques_file: default_techniques_file(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            local_chunk_size: default_local_chunk_size(),
            batch_size: default_batch_size(),
            num_similar_docs: default_num_similar_docs(),
            memory_turns: default_memory_turns(),
            max_query_length: default_max_query_length(),
            system_prompt: default_system_prompt(),
            exit_commands: default_exit_commands(),
            openai: OpenAiConfig::default(),
            local: LocalModelConfig::default(),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
        }
    }
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            model_name: default_local_model_name(),
            dimensions: default_local_dimensions(),
            model_dir: default_local_model_dir(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file, then apply process environment
    /// overrides.
    ///
    /// A missing file yields defaults. Invalid JSON is reported and the
    /// defaults are used instead.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let mut cfg = if path.exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            match serde_json::from_str::<Config>(&data) {
                Ok(c) => {
                    info!("Loaded configuration from {}", path.display());
                    c
                }
                Err(e) => {
                    warn!("Invalid JSON in {}: {e}", path.display());
                    warn!("Using default configuration");
                    Self::default()
                }
            }
        } else {
            if config_path.is_some() {
                warn!("{} not found, using defaults", path.display());
            }
            Self::default()
        };

        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// Apply overrides from an environment lookup.
    ///
    /// Numeric variables that fail to parse are ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.openai.api_key = Some(Secret::new(key));
        }
        if let Some(v) = non_empty("OPENAI_BASE_URL") {
            self.openai.base_url = v;
        }
        if let Some(v) = non_empty("CHAT_MODEL") {
            self.openai.chat_model = v;
        }
        if let Some(v) = non_empty("EMBEDDING_MODEL") {
            self.openai.embedding_model = v;
        }
        if let Some(v) = non_empty("VECTOR_STORE_PATH") {
            self.vector_store_path = v;
        }
        if let Some(v) = non_empty("COLLECTION_NAME") {
            self.collection_name = v;
        }
        if let Some(v) = non_empty("LOCAL_MODEL_DIR") {
            self.local.model_dir = v;
        }

        let numeric = [
            ("CHUNK_SIZE", &mut self.chunk_size),
            ("CHUNK_OVERLAP", &mut self.chunk_overlap),
            ("NUM_SIMILAR_DOCS", &mut self.num_similar_docs),
        ];
        for (key, slot) in numeric {
            if let Some(raw) = non_empty(key) {
                match raw.trim().parse::<usize>() {
                    Ok(v) => *slot = v,
                    Err(e) => warn!("Ignoring {key}={raw}: {e}"),
                }
            }
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid =
            |msg: &str| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg.to_string())) };

        if self.chunk_size == 0 || self.local_chunk_size == 0 {
            return invalid("chunk sizes must be positive");
        }
        if self.chunk_overlap >= self.chunk_size.min(self.local_chunk_size) {
            return invalid("chunk_overlap must be smaller than every chunk size");
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be positive");
        }
        if self.num_similar_docs == 0 {
            return invalid("num_similar_docs must be positive");
        }
        if self.openai.embedding_dimensions == 0 || self.local.dimensions == 0 {
            return invalid("embedding dimensions must be positive");
        }
        if self.collection_name.trim().is_empty() {
            return invalid("collection_name must not be empty");
        }
        if self.exit_commands.is_empty() {
            return invalid("at least one exit command must be specified");
        }
        Ok(())
    }

    /// The API key, or [`ConfigError::MissingApiKey`].
    pub fn require_api_key(&self) -> Result<&Secret<String>, ConfigError> {
        self.openai.api_key.as_ref().ok_or(ConfigError::MissingApiKey)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
