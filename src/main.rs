use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use citemerge::Config;
use citemerge::generate::generate_keys;
use citemerge::index::{ClusterFilter, DedupStore, SqliteStore};
use citemerge::keys::{KeyGenerator, SchemeTag};
use citemerge::merge::{ArtifactWriter, IndexSink, MergeEngine, MergeSink};
use citemerge::search::MemorySearchIndex;
use citemerge::source::{DocumentFilter, JsonLinesSource};
use citemerge::standardizer::MemoryStandardizer;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Deduplicate cited references and merge their search-index entries
#[derive(Parser, Debug)]
#[command(name = "citemerge", version)]
#[command(about = "Deduplicate cited references and merge their search-index entries", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite dedup store (overrides the configuration)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Schemes to process, comma separated (overrides the configuration)
    #[arg(long, global = true, value_delimiter = ',')]
    schemes: Option<Vec<SchemeTag>>,

    /// Log level, overridden by RUST_LOG
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate dedup keys for citing documents and upsert them into the store
    Keys {
        /// Citing documents, one JSON document per line
        documents: PathBuf,

        /// Standardized journal records, one JSON record per line
        #[arg(long)]
        standardized: Option<PathBuf>,

        /// Only documents processed on or after this day (YYYY-MM-DD)
        #[arg(long)]
        from_date: Option<NaiveDate>,

        /// Only documents processed on or before this day (YYYY-MM-DD)
        #[arg(long)]
        until_date: Option<NaiveDate>,

        /// Only documents whose id is >= this value
        #[arg(long)]
        from_id: Option<String>,

        /// Only documents whose id is <= this value
        #[arg(long)]
        until_id: Option<String>,
    },

    /// Merge the search documents of clusters with more than one citation
    Merge {
        /// Search index snapshot, one JSON document per line
        index: PathBuf,

        /// Artifact directory (overrides the configuration)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Only clusters updated on or after this day (YYYY-MM-DD)
        #[arg(short, long)]
        from_date: Option<NaiveDate>,

        /// Apply batches to the snapshot and save it when done
        #[arg(long)]
        apply: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = Config::load(args.config.as_deref())
        .with_context(|| format!("failed to load configuration {:?}", args.config))?;
    if let Some(store) = args.store {
        config.store_path = store;
    }
    if let Some(schemes) = args.schemes {
        config.schemes = schemes;
    }
    if let Command::Merge {
        output_dir, apply, ..
    } = &args.command
    {
        if let Some(dir) = output_dir {
            config.output_dir = dir.clone();
        }
        config.apply_to_index |= *apply;
    }
    config.validate()?;

    info!("Starting citemerge v{}", env!("CARGO_PKG_VERSION"));
    let store = SqliteStore::open(&config.store_path)
        .with_context(|| format!("failed to open dedup store {}", config.store_path.display()))?;

    match args.command {
        Command::Keys {
            documents,
            standardized,
            from_date,
            until_date,
            from_id,
            until_id,
        } => {
            let standardizer = match standardized {
                Some(path) => MemoryStandardizer::from_json_lines(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
                None => MemoryStandardizer::new(),
            };
            let generator = KeyGenerator::new(&config.schemes, &standardizer);
            let source = JsonLinesSource::new(&documents);
            let filter = DocumentFilter {
                from_date,
                until_date,
                from_id,
                until_id,
            };

            let stats = generate_keys(&source, &filter, &generator, &store, &config)?;
            info!(
                "Generated {} keys for {} citations of {} documents",
                stats.keys, stats.citations, stats.documents
            );
        }
        Command::Merge {
            index, from_date, ..
        } => {
            let search = MemorySearchIndex::from_json_lines(&index)
                .with_context(|| format!("failed to load search index {}", index.display()))?;
            let filter = ClusterFilter {
                updated_since: from_date,
            };

            let writer = ArtifactWriter::new(&config.output_dir, Utc::now())?;
            let mut sink: Box<dyn MergeSink + '_> = if config.apply_to_index {
                Box::new((writer, IndexSink::new(&search)))
            } else {
                Box::new(writer)
            };

            let mut engine = MergeEngine::new(&search, &config);
            for &scheme in &config.schemes {
                info!("Collecting clusters of {scheme}");
                let clusters = store.list_clusters(scheme, &filter)?;
                engine.merge_clusters(scheme, clusters, sink.as_mut())?;
            }
            sink.finish()?;

            if config.apply_to_index {
                search
                    .save_json_lines(&index)
                    .with_context(|| format!("failed to save search index {}", index.display()))?;
            }
            let stats = engine.stats();
            info!(
                "Merged {} clusters into {} batches, removed {} documents",
                stats.merged, stats.batches, stats.removed
            );
        }
    }

    Ok(())
}
