mod input;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use semsearch_common::{logger, AppConfig};
use semsearch_embed::{EmbedPool, OllamaEmbedder, RetryPolicy};
use semsearch_vector::{
    Filter, IngestConfig, IngestReport, IngestionPipeline, KMeansOptions, QueryConfig, QueryEngine,
    QueryOptions, VectorStore, VectorStoreOptions,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Find project root by looking for .git directory
fn find_project_root() -> Option<PathBuf> {
    let mut current_dir = std::env::current_dir().ok()?;

    loop {
        if current_dir.join(".git").exists() {
            return Some(current_dir);
        }

        if !current_dir.pop() {
            break;
        }
    }

    None
}

/// Load .env file from project root
fn load_dotenv_from_project_root() {
    if let Some(root) = find_project_root() {
        let env_path = root.join(".env");
        if env_path.exists() {
            dotenv::from_path(&env_path).ok();
        }
    } else {
        dotenv::dotenv().ok();
    }
}

#[derive(Parser)]
#[command(name = "semsearch")]
#[command(about = "semsearch - embedding-indexed similarity search", long_about = None)]
struct Cli {
    /// Collection name (overrides COLLECTION)
    #[arg(long, global = true)]
    collection: Option<String>,

    /// Data directory (overrides DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SourceArgs {
    /// JSON array or JSON lines file of records
    file: PathBuf,

    /// Payload field(s) joined into the embedded text
    #[arg(long = "text-field", required = true)]
    text_fields: Vec<String>,

    /// Payload field used as record id (UUIDs are generated otherwise)
    #[arg(long)]
    id_field: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Clear the collection and repopulate it from a file
    Reseed(SourceArgs),

    /// Add or update records from a file, skipping unchanged ones
    Ingest(SourceArgs),

    /// Similarity search
    Query {
        text: String,

        #[arg(long, default_value = "10")]
        limit: usize,

        /// Vectors examined (default derived from limit)
        #[arg(long)]
        num_candidates: Option<usize>,

        /// Payload filter: field=value, field!=value, field>=3, field<10, field?
        #[arg(long = "filter", short = 'f')]
        filters: Vec<String>,

        /// Payload fields to return
        #[arg(long = "field")]
        fields: Vec<String>,
    },

    /// Print one record
    Get { id: String },

    /// Delete records by id
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Delete every record
    Clear,

    /// Retrain the cluster layout
    RebuildClusters {
        #[arg(long, default_value = "16")]
        clusters: usize,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long, default_value = "25")]
        max_iters: usize,
    },

    /// Rewrite the record log with live records only
    Compact,

    /// Collection statistics and consistency
    Stats,
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

async fn embed_pool(config: &AppConfig) -> Result<EmbedPool> {
    let embedder = OllamaEmbedder::from_config(config)?;
    if !embedder.test_connection().await {
        tracing::warn!(
            "Ollama is not reachable at {} - embedding calls will be retried and may fail",
            config.ollama_base_url
        );
    }
    Ok(EmbedPool::new(
        Arc::new(embedder),
        config.embed_max_concurrency,
        RetryPolicy::from_config(config),
    ))
}

/// Token cancelled on Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted - finishing in-flight writes");
            token.cancel();
        }
    });
    cancel
}

fn progress_bar(total: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} records ({eta})")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

async fn run_ingest(
    config: &AppConfig,
    collection: Arc<VectorStore>,
    args: SourceArgs,
    reseed: bool,
) -> Result<IngestReport> {
    let records = input::read_records(&args.file, &args.text_fields, args.id_field.as_deref())?;
    let pb = progress_bar(records.len())?;
    let bar = pb.clone();

    let pipeline = IngestionPipeline::new(collection, embed_pool(config).await?, IngestConfig::from_config(config))
        .with_progress(move |done, _| bar.set_position(done as u64));

    let cancel = cancel_on_ctrl_c();
    let report = if reseed {
        pipeline.reseed(records, &cancel).await?
    } else {
        pipeline.ingest(records, &cancel).await?
    };
    pb.finish_and_clear();
    Ok(report)
}

async fn execute(command: Commands, config: &AppConfig, collection: &Arc<VectorStore>) -> Result<()> {
    match command {
        Commands::Reseed(args) => {
            let report = run_ingest(config, collection.clone(), args, true).await?;
            print_json(&report)?;
        }
        Commands::Ingest(args) => {
            let report = run_ingest(config, collection.clone(), args, false).await?;
            print_json(&report)?;
        }
        Commands::Query {
            text,
            limit,
            num_candidates,
            filters,
            fields,
        } => {
            let engine = QueryEngine::new(
                collection.clone(),
                embed_pool(config).await?,
                QueryConfig::from_config(config),
            );
            let options = QueryOptions {
                limit,
                num_candidates,
                filter: Filter::parse_all(&filters)?,
                projection: (!fields.is_empty()).then_some(fields),
            };

            let results = engine
                .query_cancellable(&text, &options, &cancel_on_ctrl_c())
                .await?;
            for result in &results {
                print_json(result)?;
            }
        }
        Commands::Get { id } => {
            let record = collection.get(&id)?;
            print_json(&json!({
                "id": record.id,
                "payload": record.payload,
                "version": record.version,
                "updated_at": record.updated_at,
                "dimension": record.vector.len(),
            }))?;
        }
        Commands::Delete { ids } => {
            let deleted = collection.delete_many(&ids)?;
            print_json(&json!({ "deleted": deleted }))?;
        }
        Commands::Clear => {
            let deleted = collection.delete_all()?;
            print_json(&json!({ "deleted": deleted }))?;
        }
        Commands::RebuildClusters {
            clusters,
            seed,
            max_iters,
        } => {
            let options = KMeansOptions {
                max_iters,
                seed,
                ..KMeansOptions::default()
            };
            let stats = collection.rebuild_clusters(clusters, &options)?;
            print_json(&stats)?;
        }
        Commands::Compact => {
            collection.compact()?;
            print_json(&json!({ "compacted": collection.len() }))?;
        }
        Commands::Stats => {
            print_json(&json!({
                "stats": collection.stats(),
                "consistency": collection.check_consistency(),
            }))?;
        }
    }

    Ok(())
}

/// Close the collection whatever `outcome` was; the command's own error wins
fn finish(collection: &VectorStore, outcome: Result<()>) -> Result<()> {
    let closed = collection.close().context("Failed to close collection");
    match outcome {
        Ok(()) => closed,
        Err(e) => {
            if let Err(close_err) = closed {
                tracing::error!("{:#}", close_err);
            }
            Err(e)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    load_dotenv_from_project_root();

    // Override with CLI arguments
    if let Some(collection) = &cli.collection {
        std::env::set_var("COLLECTION", collection);
    }
    if let Some(data_dir) = &cli.data_dir {
        std::env::set_var("DATA_DIR", data_dir);
    }

    let config = AppConfig::from_env()?;
    logger::setup_logging(&config.log_dir, &config.log_level)?;

    tracing::info!("semsearch starting...");
    tracing::info!("  Collection: {}", config.collection);
    tracing::info!("  Data: {}", config.collection_dir().display());
    tracing::info!("  Model: {}", config.embedding_model);

    let collection = Arc::new(
        VectorStore::open(VectorStoreOptions::from_config(&config))
            .context("Failed to open collection")?,
    );

    let outcome = execute(cli.command, &config, &collection).await;
    finish(&collection, outcome)
}
