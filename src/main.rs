use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mitrerag::chat::{ChatSession, OpenAiChat, SessionSettings};
use mitrerag::config::Config;
use mitrerag::db;
use mitrerag::embedder::{self, Provider};
use mitrerag::indexer::core::{self as index, IndexOptions, IndexOutcome};
use mitrerag::{logging, text};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "mitrerag", version, about = "MITRE ATT&CK expert chatbot")]
struct Cli {
    /// JSON configuration file [default: mitrerag.json]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging of the retrieval steps
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a techniques JSON file into a vector store
    Index {
        /// Path to the MITRE ATT&CK techniques JSON file
        #[arg(short, long)]
        techniques: Option<PathBuf>,

        /// Vector store directory (created if missing)
        #[arg(short, long)]
        vector_store: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = Provider::Openai)]
        provider: Provider,

        /// Rebuild the store even if it already exists
        #[arg(long)]
        force: bool,
    },
    /// Start an interactive chat session
    Chat {
        #[arg(short, long)]
        vector_store: Option<PathBuf>,

        /// Provider the store was indexed with
        #[arg(short, long, value_enum, default_value_t = Provider::Openai)]
        provider: Provider,

        /// Number of similar chunks to put in the context
        #[arg(short, long)]
        num_similar: Option<usize>,
    },
    /// Print a stored technique by ID
    Show {
        /// Technique ID, e.g. T1059.001
        id: String,

        #[arg(short, long)]
        vector_store: Option<PathBuf>,
    },
    /// Print store metadata and counts
    Info {
        #[arg(short, long)]
        vector_store: Option<PathBuf>,

        /// Also list every stored technique
        #[arg(short, long)]
        list: bool,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.debug)?;

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Index {
            techniques,
            vector_store,
            provider,
            force,
        } => {
            if let Some(path) = techniques {
                config.techniques_file = path.to_string_lossy().into_owned();
            }
            override_store(&mut config, vector_store);
            config.validate()?;
            run_index(&config, provider, force)
        }
        Command::Chat {
            vector_store,
            provider,
            num_similar,
        } => {
            override_store(&mut config, vector_store);
            if let Some(n) = num_similar {
                config.num_similar_docs = n;
            }
            config.validate()?;
            run_chat(&config, provider)
        }
        Command::Show { id, vector_store } => {
            override_store(&mut config, vector_store);
            run_show(&config, &id)
        }
        Command::Info { vector_store, list } => {
            override_store(&mut config, vector_store);
            run_info(&config, list)
        }
    }
}

fn override_store(config: &mut Config, vector_store: Option<PathBuf>) {
    if let Some(dir) = vector_store {
        config.vector_store_path = dir.to_string_lossy().into_owned();
    }
}

fn banner(title: &str) {
    println!("{}", "=".repeat(60));
    println!("{title}");
    println!("{}", "=".repeat(60));
}

fn run_index(config: &Config, provider: Provider, force: bool) -> Result<()> {
    banner("MITRE ATT&CK TECHNIQUES INDEXER");
    let options = IndexOptions::from_config(config, provider, force);

    match index::run(&options, || embedder::build(provider, config))? {
        IndexOutcome::Skipped => {
            println!(
                "Vector store already exists at {}. Use --force to re-index.",
                options.store_dir.display()
            );
        }
        IndexOutcome::Indexed(stats) => {
            println!(
                "Indexed {} techniques ({} chunks, {} batches) into {}",
                stats.techniques,
                stats.chunks,
                stats.batches,
                options.store_dir.display()
            );
            println!("Run `mitrerag chat -p {provider}` to start asking questions.");
        }
    }
    Ok(())
}

fn run_chat(config: &Config, provider: Provider) -> Result<()> {
    let model = OpenAiChat::from_config(config)?;

    let store_dir = Path::new(&config.vector_store_path);
    let db = db::open_store(store_dir, &config.collection_name)?;
    db::ensure_provider(&db, provider.as_str())?;
    let embedder = embedder::build(provider, config)?;
    db::ensure_compatible(&db, embedder.model_name(), embedder.dimensions())?;

    info!("Language model configured: {}", model.model());
    banner("MITRE ATT&CK EXPERT CHATBOT");

    let settings = SessionSettings::from_config(config, config.num_similar_docs);
    let mut session = ChatSession::new(&db, embedder.as_ref(), &model, settings);
    session
        .run(io::stdin().lock(), io::stdout().lock())
        .context("chat session failed")
}

fn run_show(config: &Config, id: &str) -> Result<()> {
    let db = db::open_store(Path::new(&config.vector_store_path), &config.collection_name)?;
    let technique = db
        .find_technique(id)?
        .with_context(|| format!("technique {id} not found in the vector store"))?;

    println!("{}", text::format_technique(&technique));
    Ok(())
}

fn run_info(config: &Config, list: bool) -> Result<()> {
    let store_dir = Path::new(&config.vector_store_path);
    let db = db::open_store(store_dir, &config.collection_name)?;
    let info = db.store_info()?;

    println!("Store:       {}", db::store_file(store_dir, &info.collection).display());
    println!("Provider:    {}", info.provider);
    println!("Model:       {} ({} dimensions)", info.model, info.dimensions);
    println!("Created:     {}", info.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Techniques:  {}", db.count_techniques()?);
    println!("Chunks:      {}", db.count_chunks()?);

    if list {
        println!();
        for t in db.list_techniques()? {
            println!("{:<12} {} ({} chunks)", t.technique_id, t.name, t.chunks);
        }
    }
    Ok(())
}
