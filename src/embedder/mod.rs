/// Embedder trait, shared error type and provider selection.
pub mod download;
pub mod mock;
pub mod onnx;
pub mod openai;
pub mod tokenizer;

use std::fmt;
use std::path::Path;

use anyhow::Result;
use clap::ValueEnum;
use secrecy::{ExposeSecret, Secret};
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::openai::ApiError;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow use behind `Box<dyn _>`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors, preserving order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;

    /// Model identifier recorded in the vector store.
    fn model_name(&self) -> &str;
}

/// Where embeddings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    /// OpenAI embeddings API (needs OPENAI_API_KEY)
    Openai,
    /// Local sentence-transformers model via ONNX Runtime
    Local,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Openai => "openai",
            Provider::Local => "local",
        }
    }

    /// Chunk size appropriate for this provider.
    pub fn chunk_size(self, config: &Config) -> usize {
        match self {
            Provider::Openai => config.chunk_size,
            Provider::Local => config.local_chunk_size,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the embedder for `provider`.
///
/// The remote provider fails with `ConfigError::MissingApiKey` before any
/// network traffic when no key is configured. The local provider downloads
/// its model files on first use.
pub fn build(provider: Provider, config: &Config) -> Result<Box<dyn Embedder>> {
    match provider {
        Provider::Openai => {
            let api_key = Secret::new(config.require_api_key()?.expose_secret().clone());
            let embedder = openai::OpenAiEmbedder::new(api_key, &config.openai.base_url)
                .with_model(
                    config.openai.embedding_model.clone(),
                    config.openai.embedding_dimensions,
                );
            info!("Using OpenAI embeddings: {}", embedder.model_name());
            Ok(Box::new(embedder))
        }
        Provider::Local => {
            let model_dir = Path::new(&config.local.model_dir);
            download::download_model_files(model_dir)?;
            let embedder = onnx::OnnxEmbedder::new(
                model_dir,
                &config.local.model_name,
                config.local.dimensions,
            )?;
            info!("Using local embeddings: {}", embedder.model_name());
            Ok(Box::new(embedder))
        }
    }
}

/// L2-normalize a vector, returning the normalized copy.
pub(crate) fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq == 0.0 {
        return vec.to_vec();
    }

    let inv_norm = 1.0 / norm_sq.sqrt();
    vec.iter().map(|v| v * inv_norm).collect()
}
