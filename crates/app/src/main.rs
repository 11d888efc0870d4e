use chrono::Utc;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand};
use rfi_search_core::{
    CharacterNgramEmbedder, ContentStore, ElasticConfig, ElasticsearchStore, Embedder,
    HttpEmbedder, IndexManager, IndexSettings, IngestCoordinator, IngestionOptions, KeywordSet,
    SearchQuery, DEFAULT_EMBEDDING_DIMENSIONS, PROCESSING_VERSION,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rfi-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Elasticsearch base URL
    #[arg(long, env = "ELASTIC_HOST", default_value = "http://localhost:9200")]
    elastic_url: String,

    /// Elasticsearch user for basic auth
    #[arg(long, env = "ELASTIC_USERNAME", default_value = "elastic")]
    elastic_user: String,

    /// Elasticsearch password; basic auth is skipped when empty
    #[arg(long, env = "ELASTIC_PASSWORD", hide_env_values = true)]
    elastic_password: Option<String>,

    /// Index holding the chunks
    #[arg(long, env = "ELASTICSEARCH_INDEX", default_value = "rfi_rag")]
    index: String,

    /// Directory receiving `<sha256>__<basename>` copies of ingested files
    #[arg(long, env = "SOURCE_STORE_DIR", default_value = "data/source_store")]
    source_store: PathBuf,

    /// OpenAI-compatible embeddings endpoint; the offline trigram embedder is used when unset
    #[arg(long, env = "EMBEDDING_URL")]
    embedding_url: Option<String>,

    /// Model name sent to the embeddings endpoint
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "nomic-embed-text")]
    embedding_model: String,

    /// Vector dimension of the index and the embedder
    #[arg(long, env = "EMBEDDING_DIMS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dims: usize,

    /// Extra header keywords marking the requirement column
    #[arg(long = "requirement-keyword", value_delimiter = ',')]
    requirement_keywords: Vec<String>,

    /// Extra header keywords marking response columns
    #[arg(long = "response-keyword", value_delimiter = ',')]
    response_keywords: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every spreadsheet under a folder.
    Ingest {
        /// Folder scanned recursively for spreadsheets.
        #[arg(long, env = "DOCS_DIR")]
        folder: PathBuf,
        /// Drop and recreate the index before ingesting.
        #[arg(
            long,
            env = "REINDEX_DROP",
            action = ArgAction::SetTrue,
            value_parser = BoolishValueParser::new()
        )]
        reindex_drop: bool,
    },
    /// Show the requirement/response sections found in one file.
    Detect {
        #[arg(long)]
        file: PathBuf,
    },
    /// Query the index; obsolete chunks are excluded.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Print the chunk text under each hit.
        #[arg(long, default_value_t = false)]
        show_content: bool,
    },
    /// Mark a chunk obsolete, or active again with --restore.
    Obsolete {
        #[arg(long)]
        chunk_id: String,
        #[arg(long, default_value_t = false)]
        restore: bool,
    },
    /// Print document count and storage figures for the index.
    Stats,
    /// Look up the stored copy of a source file.
    Resolve {
        #[arg(long)]
        sha: Option<String>,
        #[arg(long)]
        basename: Option<String>,
        #[arg(long)]
        relpath: Option<String>,
    },
}

fn build_embedder(cli: &Cli) -> Box<dyn Embedder> {
    match &cli.embedding_url {
        Some(url) => Box::new(HttpEmbedder::new(url, &cli.embedding_model, cli.embedding_dims)),
        None => Box::new(CharacterNgramEmbedder {
            dimensions: cli.embedding_dims,
        }),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let backend = ElasticsearchStore::new(ElasticConfig {
        endpoint: cli.elastic_url.clone(),
        username: cli.elastic_user.clone(),
        password: cli.elastic_password.clone().filter(|password| !password.is_empty()),
        ..ElasticConfig::default()
    })?;
    let index = IndexManager::new(
        backend,
        IndexSettings {
            index_name: cli.index.clone(),
            dimensions: cli.embedding_dims,
            ..IndexSettings::default()
        },
    );
    let options = IngestionOptions {
        requirement_keywords: KeywordSet::default_requirement().extended(&cli.requirement_keywords),
        response_keywords: KeywordSet::default_response().extended(&cli.response_keywords),
        ..IngestionOptions::default()
    };
    let coordinator = IngestCoordinator::new(
        index,
        build_embedder(&cli),
        ContentStore::new(&cli.source_store),
        options,
    );

    info!(
        version = PROCESSING_VERSION,
        index = %cli.index,
        started_at = %Utc::now().to_rfc3339(),
        "rfi-search boot"
    );

    if matches!(
        cli.command,
        Command::Ingest { .. } | Command::Search { .. } | Command::Obsolete { .. } | Command::Stats
    ) {
        coordinator.index().backend().ping().await?;
    }

    match cli.command {
        Command::Ingest {
            folder,
            reindex_drop,
        } => {
            if reindex_drop {
                warn!(index = %cli.index, "index will be dropped before ingestion");
            }

            let report = coordinator.ingest_folder(&folder, reindex_drop).await?;
            for incident in &report.incidents {
                println!(
                    "incident [{}] {}: {}",
                    incident.stage,
                    incident.path.display(),
                    incident.reason
                );
            }
            println!(
                "{} of {} files processed, {} chunks produced, {} indexed, {} incidents",
                report.files_processed,
                report.files_seen,
                report.chunks_produced,
                report.chunks_indexed,
                report.incidents.len()
            );
        }
        Command::Detect { file } => {
            let sections = coordinator.preview(&file)?;
            if sections.is_empty() {
                println!("no requirement/response section in {}", file.display());
            }
            for section in sections {
                let responses: Vec<String> = section
                    .responses
                    .iter()
                    .map(|response| format!("{} (col {})", response.content, response.column))
                    .collect();
                println!(
                    "sheet={} header_row={} requirement={} (col {}) responses=[{}] chunks={}",
                    section.sheet_name,
                    section.header_row + 1,
                    section.requirement.content,
                    section.requirement.column,
                    responses.join(", "),
                    section.chunk_count
                );
            }
        }
        Command::Search {
            query,
            top_k,
            show_content,
        } => {
            let hits = coordinator.search(&SearchQuery { text: query, top_k }).await?;
            if hits.is_empty() {
                println!("no results");
            }

            for hit in &hits {
                println!(
                    "[{}] {} - {} (rows {}) score={:.4} chunk={}{}",
                    hit.record.chunk_type.as_str(),
                    hit.file_label(),
                    hit.record.sheet_name,
                    hit.rows_label(),
                    hit.score,
                    hit.record.chunk_id,
                    if hit.record.obsolete { " obsolete" } else { "" }
                );
                if let Some(path) = coordinator.resolve_source(hit) {
                    println!("  source={}", path.display());
                }
                if show_content {
                    println!("{}\n", hit.record.content);
                }
            }
        }
        Command::Obsolete { chunk_id, restore } => {
            let status = coordinator.set_obsolete(&chunk_id, !restore).await?;
            println!("{chunk_id}: {status:?}");
        }
        Command::Stats => {
            let stats = coordinator.index().stats().await?;
            if !stats.exists {
                println!("index {} does not exist", cli.index);
                return Ok(());
            }

            let show =
                |value: Option<u64>| value.map_or_else(|| "n/a".to_string(), |v| v.to_string());
            println!("index={}", cli.index);
            println!("documents={}", show(stats.document_count));
            println!("store_size_bytes={}", show(stats.store_size_bytes));
            println!("indexing_total={}", show(stats.indexing_total));
            println!("search_total={}", show(stats.search_total));
        }
        Command::Resolve {
            sha,
            basename,
            relpath,
        } => {
            let metadata: BTreeMap<String, String> = [
                ("source_sha256", sha),
                ("source_basename", basename),
                ("source_relpath", relpath),
            ]
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| (key.to_string(), value)))
            .collect();

            match coordinator.store().resolve(&metadata) {
                Some(path) => println!("{}", path.display()),
                None => println!("no stored copy found under {}", cli.source_store.display()),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn reindex_drop(args: &[&str]) -> Result<bool, clap::Error> {
        let cli = Cli::try_parse_from(args)?;
        match cli.command {
            Command::Ingest { reindex_drop, .. } => Ok(reindex_drop),
            _ => Ok(false),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn reindex_drop_accepts_boolish_env_values() -> Result<(), clap::Error> {
        let args = ["rfi-search", "ingest", "--folder", "docs"];

        for (value, expected) in [
            ("1", true),
            ("true", true),
            ("yes", true),
            ("y", true),
            ("0", false),
            ("no", false),
            ("false", false),
        ] {
            std::env::set_var("REINDEX_DROP", value);
            assert_eq!(reindex_drop(&args)?, expected, "REINDEX_DROP={value}");
        }

        std::env::remove_var("REINDEX_DROP");
        assert!(!reindex_drop(&args)?);
        assert!(reindex_drop(&["rfi-search", "ingest", "--folder", "docs", "--reindex-drop"])?);
        Ok(())
    }
}
