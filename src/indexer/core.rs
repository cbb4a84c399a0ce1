use crate::config::Config;
use crate::db::models::Chunk;
use crate::db::{Db, StoreInfo};
use crate::embedder::{Embedder, Provider};
use crate::indexer::splitter::RecursiveSplitter;
use crate::techniques::{self, Technique};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub techniques: usize,
    pub chunks: usize,
    pub batches: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The store already existed and `force` was not set.
    Skipped,
    Indexed(IndexStats),
}

/// The chunks produced from one technique's description.
#[derive(Debug)]
pub struct TechniqueChunks<'a> {
    pub technique: &'a Technique,
    pub chunks: Vec<String>,
}

/// Splits every description. A technique whose description is empty still
/// gets a single chunk built from its id and name.
pub fn split_techniques<'a>(
    techniques: &'a [Technique],
    splitter: &RecursiveSplitter,
) -> Vec<TechniqueChunks<'a>> {
    techniques
        .iter()
        .map(|technique| {
            let mut chunks = splitter.split(&technique.description);
            if chunks.is_empty() {
                chunks.push(technique.fallback_text());
            }
            TechniqueChunks { technique, chunks }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub techniques_file: PathBuf,
    pub store_dir: PathBuf,
    pub collection: String,
    pub provider: Provider,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub force: bool,
}

impl IndexOptions {
    pub fn from_config(config: &Config, provider: Provider, force: bool) -> Self {
        Self {
            techniques_file: PathBuf::from(&config.techniques_file),
            store_dir: PathBuf::from(&config.vector_store_path),
            collection: config.collection_name.clone(),
            provider,
            chunk_size: provider.chunk_size(config),
            chunk_overlap: config.chunk_overlap,
            batch_size: config.batch_size,
            force,
        }
    }
}

/// Runs the whole indexing pipeline.
///
/// The embedder is built only after the store directory has been checked and
/// the corpus loaded and split. No store directory exists until the embedder
/// is ready.
pub fn run<F>(options: &IndexOptions, make_embedder: F) -> Result<IndexOutcome>
where
    F: FnOnce() -> Result<Box<dyn Embedder>>,
{
    let store_dir = &options.store_dir;
    if store_dir.exists() {
        if !options.force {
            warn!(
                "Vector store already exists at {}; use --force to rebuild it",
                store_dir.display()
            );
            return Ok(IndexOutcome::Skipped);
        }
        info!("Removing existing vector store at {}", store_dir.display());
        fs::remove_dir_all(store_dir)
            .with_context(|| format!("failed to remove {}", store_dir.display()))?;
    }

    let techniques = techniques::load_techniques(&options.techniques_file)?;

    let splitter = RecursiveSplitter::new(options.chunk_size, options.chunk_overlap);
    let sets = split_techniques(&techniques, &splitter);
    info!(
        "Split {} techniques into {} chunks (chunk size {}, overlap {})",
        sets.len(),
        sets.iter().map(|s| s.chunks.len()).sum::<usize>(),
        options.chunk_size,
        options.chunk_overlap
    );

    let embedder = make_embedder()?;
    let store_info = StoreInfo::new(
        options.provider.as_str(),
        embedder.model_name(),
        embedder.dimensions(),
        &options.collection,
    );
    fs::create_dir_all(store_dir)
        .with_context(|| format!("failed to create {}", store_dir.display()))?;
    let mut db = Db::create(store_dir, &store_info)
        .with_context(|| format!("failed to create vector store in {}", store_dir.display()))?;

    let indexer = Indexer::new(embedder.as_ref(), options.batch_size);
    let stats = indexer.index(&mut db, &sets)?;

    info!(
        "Indexed {} techniques ({} chunks in {} batches) into {}",
        stats.techniques,
        stats.chunks,
        stats.batches,
        store_dir.display()
    );
    Ok(IndexOutcome::Indexed(stats))
}

pub struct Indexer<'a, E: Embedder + ?Sized> {
    pub embedder: &'a E,
    pub batch_size: usize,
}

impl<'a, E: Embedder + ?Sized> Indexer<'a, E> {
    pub fn new(embedder: &'a E, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    /// Stores the techniques, then embeds and stores their chunks one batch
    /// per transaction.
    pub fn index(&self, db: &mut Db, sets: &[TechniqueChunks<'_>]) -> Result<IndexStats> {
        let records: Vec<Technique> = sets.iter().map(|s| s.technique.clone()).collect();
        let rows = db
            .insert_techniques(&records)
            .context("failed to store technique records")?;

        // (technique row, position, stored content, embedded text)
        let pending: Vec<(i64, usize, &str, String)> = sets
            .iter()
            .zip(&rows)
            .flat_map(|(set, &row)| {
                let prefix = set.technique.embedding_prefix();
                set.chunks
                    .iter()
                    .enumerate()
                    .map(move |(position, content)| {
                        (row, position, content.as_str(), format!("{prefix}{content}"))
                    })
            })
            .collect();

        let pb = ProgressBar::new(pending.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {bar:40.cyan/blue} {pos}/{len} chunks {msg}")
                .context("invalid progress template")?
                .progress_chars("█▓░"),
        );

        let total_batches = pending.len().div_ceil(self.batch_size);
        let mut stats = IndexStats {
            techniques: rows.len(),
            ..Default::default()
        };

        for (i, batch) in pending.chunks(self.batch_size).enumerate() {
            let texts: Vec<&str> = batch.iter().map(|(_, _, _, text)| text.as_str()).collect();
            let vectors = self
                .embedder
                .embed_batch(&texts)
                .with_context(|| format!("failed to embed batch {}/{}", i + 1, total_batches))?;

            anyhow::ensure!(
                vectors.len() == batch.len(),
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            );
            if let Some(v) = vectors.iter().find(|v| v.len() != db.dimensions()) {
                anyhow::bail!(
                    "embedder returned a {}-dimensional vector, store expects {}",
                    v.len(),
                    db.dimensions()
                );
            }

            let chunks: Vec<Chunk<'_>> = batch
                .iter()
                .map(|&(technique_row, position, content, _)| Chunk {
                    technique_row,
                    position,
                    content,
                })
                .collect();
            db.insert_chunks(&chunks, &vectors)
                .with_context(|| format!("failed to store batch {}/{}", i + 1, total_batches))?;

            stats.chunks += batch.len();
            stats.batches += 1;
            pb.inc(batch.len() as u64);
            info!("Stored batch {}/{} ({} chunks)", i + 1, total_batches, batch.len());
        }

        pb.finish_and_clear();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::embedder::mock::MockEmbedder;
    use std::path::Path;
    use tempfile::tempdir;

    const CORPUS: &str = r#"[
        {"id": "T1059", "name": "Command and Scripting Interpreter",
         "description": "Adversaries may abuse command and script interpreters to execute commands, scripts, or binaries."},
        {"id": "T1566", "name": "Phishing",
         "description": "Adversaries may send phishing messages to gain access to victim systems."},
        {"id": "T1000", "name": "Empty", "description": ""}
    ]"#;

    fn options(dir: &Path, force: bool) -> IndexOptions {
        let corpus = dir.join("techniques.json");
        fs::write(&corpus, CORPUS).unwrap();
        IndexOptions {
            techniques_file: corpus,
            store_dir: dir.join("store"),
            collection: "mitre".to_string(),
            provider: Provider::Local,
            chunk_size: 40,
            chunk_overlap: 8,
            batch_size: 2,
            force,
        }
    }

    fn mock() -> Result<Box<dyn Embedder>> {
        Ok(Box::new(MockEmbedder::new(32)))
    }

    #[test]
    fn test_split_techniques_fallback_chunk() {
        let techniques = techniques::parse_techniques(CORPUS).unwrap();
        let sets = split_techniques(&techniques, &RecursiveSplitter::new(40, 8));

        assert_eq!(sets.len(), 3);
        assert!(sets[0].chunks.len() > 1);
        assert_eq!(sets[2].chunks, vec!["T1000 Empty".to_string()]);
    }

    #[test]
    fn test_run_indexes_in_batches() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), false);

        let outcome = run(&opts, mock).unwrap();
        let IndexOutcome::Indexed(stats) = outcome else {
            panic!("expected a fresh index");
        };
        assert_eq!(stats.techniques, 3);
        assert_eq!(stats.batches, stats.chunks.div_ceil(2));

        let db = Db::open(&opts.store_dir, "mitre").unwrap();
        assert_eq!(db.count_techniques().unwrap(), 3);
        assert_eq!(db.count_chunks().unwrap(), stats.chunks);
        let info = db.store_info().unwrap();
        assert_eq!(info.provider, "local");
        assert_eq!(info.model, "mock-hashing-32");
        assert_eq!(info.dimensions, 32);
    }

    #[test]
    fn test_existing_store_is_skipped_without_force() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), false);
        run(&opts, mock).unwrap();

        let outcome = run(&opts, || panic!("embedder must not be built")).unwrap();
        assert_eq!(outcome, IndexOutcome::Skipped);
    }

    #[test]
    fn test_force_rebuilds_store() {
        let dir = tempdir().unwrap();
        run(&options(dir.path(), false), mock).unwrap();

        let opts = options(dir.path(), true);
        let outcome = run(&opts, mock).unwrap();
        assert!(matches!(outcome, IndexOutcome::Indexed(_)));

        let db = Db::open(&opts.store_dir, "mitre").unwrap();
        assert_eq!(db.count_techniques().unwrap(), 3);
    }

    #[test]
    fn test_missing_corpus_is_config_error() {
        let dir = tempdir().unwrap();
        let mut opts = options(dir.path(), false);
        opts.techniques_file = dir.path().join("missing.json");

        let err = run(&opts, mock).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::MissingInput(_))
        ));
        assert!(!opts.store_dir.exists());
    }
}
