pub mod core;
pub mod splitter;

pub use self::core::{IndexOptions, IndexOutcome, IndexStats, Indexer};
