//! Interactive retrieval-augmented chat over an indexed store.
pub mod llm;
pub mod memory;
pub mod prompt;
pub mod session;

pub use llm::{ChatMessage, ChatModel, OpenAiChat};
pub use memory::ConversationMemory;
pub use session::{ChatSession, Reply, SessionSettings};
