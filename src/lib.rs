//! # mitrerag: MITRE ATT&CK RAG chatbot
//!
//! Indexes a JSON corpus of ATT&CK techniques into a local vector store and
//! answers questions about them with an OpenAI chat model, grounding every
//! answer in the most similar technique chunks.
//!
//! ## Architecture
//!
//! - **[`config`]**: JSON config file, environment overrides, validation
//! - **[`techniques`]**: Technique records and the corpus loader
//! - **[`db`]**: SQLite + sqlite-vec vector store (techniques, chunks, search)
//! - **[`embedder`]**: OpenAI and local ONNX (all-MiniLM-L6-v2) embeddings
//! - **[`indexer`]**: Recursive text splitting and the batched indexing pipeline
//! - **[`chat`]**: Conversation memory, prompt assembly, chat model, session loop
//! - **[`openai`]**: Blocking HTTP client shared by embeddings and chat
//! - **[`text`]**: Query validation, technique-ID extraction, formatting
//! - **[`logging`]**: `tracing` subscriber set-up

pub mod chat;
pub mod config;
pub mod db;
pub mod embedder;
pub mod indexer;
pub mod logging;
pub mod openai;
pub mod techniques;
pub mod text;
