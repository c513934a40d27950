//! Fusion CLI - Command-line interface for the hybrid search engine.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fusion_core::{
    FilterValue, Filters, FusionConfig, Rewrite, ScoringMode, SearchRequest, TenantScope,
};
use fusion_index::UpsertRequest;
use fusion_mcp::{DeadLetterParams, FusionServer, RequeueParams, StatusParams, ToolResult};
use fusion_worker::{run_pool, EmbeddingWorker};

/// Fusion - multi-tenant hybrid search with rank fusion
#[derive(Parser)]
#[command(name = "fusion")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: user config dir, then ./fusion.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overriding the config file
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Index or update one object
    Upsert {
        /// Object type
        #[arg(long = "type")]
        object_type: String,

        /// Object id
        #[arg(long = "id")]
        object_id: String,

        #[arg(long)]
        yacht: String,

        #[arg(long)]
        org: Option<String>,

        /// Searchable text
        #[arg(long)]
        text: String,

        /// Filter attribute as key=value (repeatable)
        #[arg(short, long = "filter")]
        filters: Vec<String>,

        /// Opaque JSON payload returned with hits
        #[arg(long)]
        payload: Option<String>,

        /// Monotonic source version; older writes are ignored
        #[arg(long)]
        source_version: Option<i64>,

        /// Embedding queue priority
        #[arg(long, default_value = "0")]
        priority: i32,
    },

    /// Search one tenant
    Search {
        /// Query rewrites (1 to 3)
        #[arg(required = true)]
        rewrites: Vec<String>,

        #[arg(long)]
        yacht: String,

        #[arg(long)]
        org: Option<String>,

        /// Restrict to object types (repeatable)
        #[arg(short = 't', long = "type")]
        object_types: Vec<String>,

        /// Filter attribute as key=value (repeatable)
        #[arg(short, long = "filter")]
        filters: Vec<String>,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<u32>,

        /// RRF constant
        #[arg(short = 'k', long)]
        rrf_k: Option<u32>,

        /// Minimum trigram similarity for the fuzzy signal
        #[arg(long)]
        fuzzy_threshold: Option<f32>,

        /// Use weighted vector + entity scoring instead of RRF
        #[arg(long)]
        weighted: bool,

        /// Entity for weighted scoring (repeatable)
        #[arg(short, long = "entity")]
        entities: Vec<String>,
    },

    /// Run embedding workers until interrupted
    Worker {
        /// Number of concurrent workers (default: from config)
        #[arg(short = 'n', long)]
        concurrency: Option<usize>,

        /// Process everything claimable, then exit
        #[arg(long)]
        drain: bool,
    },

    /// Show embedding queue status
    Status {
        #[arg(long)]
        yacht: Option<String>,

        /// List rows in this status
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value = "50")]
        limit: u32,
    },

    /// List dead-lettered embedding jobs
    Dlq {
        #[arg(long)]
        yacht: Option<String>,

        #[arg(long, default_value = "50")]
        limit: u32,
    },

    /// Move a dead-lettered object back to pending
    Requeue {
        /// Object type
        object_type: String,

        /// Object id
        object_id: String,
    },

    /// Show statistics
    Stats,
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn load_config(
    path: Option<PathBuf>,
    database: Option<PathBuf>,
) -> Result<FusionConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => FusionConfig::load(&path)?,
        None => FusionConfig::load_default()?,
    };

    if let Some(database) = database {
        config.database.path = database;
    }

    Ok(config)
}

/// Parse `key=value`; booleans and numbers are typed, anything else is text.
fn parse_filters(raw: &[String]) -> Result<Filters, String> {
    let mut filters = Filters::new();

    for item in raw {
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| format!("Filter '{}' must be key=value", item))?;

        let value = if let Ok(b) = value.parse::<bool>() {
            FilterValue::Bool(b)
        } else if let Ok(i) = value.parse::<i64>() {
            FilterValue::Integer(i)
        } else if let Ok(f) = value.parse::<f64>() {
            FilterValue::Float(f)
        } else {
            FilterValue::Text(value.to_string())
        };

        filters.insert(key.to_string(), value);
    }

    Ok(filters)
}

fn tenant(yacht: String, org: Option<String>) -> TenantScope {
    match org {
        Some(org) => TenantScope::new(yacht).with_org(org),
        None => TenantScope::new(yacht),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(cli.config, cli.database)?;

    match cli.command {
        Commands::Init => {
            init_database(&config)?;
        }
        Commands::Upsert {
            object_type,
            object_id,
            yacht,
            org,
            text,
            filters,
            payload,
            source_version,
            priority,
        } => {
            let server = get_server(&config)?;

            let mut request = UpsertRequest::new(object_type, object_id, yacht, text);
            request.org_id = org;
            request.filters = parse_filters(&filters)?;
            if let Some(payload) = payload {
                request.payload = serde_json::from_str(&payload)?;
            }
            request.source_version = source_version;
            request.priority = priority;

            report(server.upsert(request).await);
        }
        Commands::Search {
            rewrites,
            yacht,
            org,
            object_types,
            filters,
            limit,
            rrf_k,
            fuzzy_threshold,
            weighted,
            entities,
        } => {
            let server = get_server(&config)?;

            let mut request = SearchRequest::new(
                tenant(yacht, org),
                rewrites.into_iter().map(Rewrite::text).collect(),
            );
            request.object_types = object_types;
            request.filters = parse_filters(&filters)?;
            request.limit = limit;
            request.rrf_k = rrf_k;
            request.fuzzy_threshold = fuzzy_threshold;
            request.entities = entities;
            if weighted {
                request.scoring = ScoringMode::Weighted;
            }

            report(server.search(request).await);
        }
        Commands::Worker { concurrency, drain } => {
            let server = get_server(&config)?;
            run_workers(&server, &config, concurrency, drain).await?;
        }
        Commands::Status {
            yacht,
            status,
            limit,
        } => {
            let server = get_server(&config)?;
            let params = StatusParams {
                yacht_id: yacht,
                status,
                limit,
            };
            report(server.embedding_status(params).await);
        }
        Commands::Dlq { yacht, limit } => {
            let server = get_server(&config)?;
            let params = DeadLetterParams {
                yacht_id: yacht,
                limit,
            };
            report(server.dead_letters(params).await);
        }
        Commands::Requeue {
            object_type,
            object_id,
        } => {
            let server = get_server(&config)?;
            let params = RequeueParams {
                object_type,
                object_id,
            };
            report(server.requeue(params).await);
        }
        Commands::Stats => {
            let server = get_server(&config)?;
            report(server.stats().await);
        }
    }

    Ok(())
}

fn init_database(config: &FusionConfig) -> Result<(), Box<dyn std::error::Error>> {
    let db_path = &config.database.path;

    // Create parent directory if needed
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let _server = FusionServer::from_config(config)?;
    println!("Initialized database at: {}", db_path.display());
    Ok(())
}

fn get_server(config: &FusionConfig) -> Result<FusionServer, Box<dyn std::error::Error>> {
    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            eprintln!(
                "Database directory does not exist. Run 'fusion init' first, or specify a path with -d."
            );
            std::process::exit(1);
        }
    }

    Ok(FusionServer::from_config(config)?)
}

async fn run_workers(
    server: &FusionServer,
    config: &FusionConfig,
    concurrency: Option<usize>,
    drain: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let worker = Arc::new(EmbeddingWorker::new(
        server.store().clone(),
        server.embedder().clone(),
        config.worker.clone(),
    ));

    if drain {
        worker.maintain().await?;
        let report = worker.drain().await?;
        println!(
            "Indexed {}, retrying {}, dead-lettered {}, superseded {}",
            report.indexed, report.retrying, report.dead_lettered, report.superseded
        );
        return Ok(());
    }

    let concurrency = concurrency.unwrap_or(config.worker.concurrency);
    let (tx, rx) = watch::channel(false);

    let pool = tokio::spawn(run_pool(worker, concurrency, rx));
    eprintln!("Running {} embedding worker(s); press Ctrl-C to stop", concurrency);

    tokio::signal::ctrl_c().await?;
    eprintln!("Shutting down...");
    tx.send(true).ok();

    pool.await??;
    info!("Worker pool stopped");
    Ok(())
}

fn report(result: ToolResult) {
    if result.success {
        println!("{}", result.message);
    } else {
        eprintln!("Error: {}", result.message);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filters_types_values() {
        let raw = vec![
            "deck=main".to_string(),
            "severity=3".to_string(),
            "ratio=0.5".to_string(),
            "open=true".to_string(),
        ];
        let filters = parse_filters(&raw).unwrap();

        assert_eq!(filters["deck"], FilterValue::Text("main".into()));
        assert_eq!(filters["severity"], FilterValue::Integer(3));
        assert_eq!(filters["ratio"], FilterValue::Float(0.5));
        assert_eq!(filters["open"], FilterValue::Bool(true));
    }

    #[test]
    fn test_parse_filters_rejects_missing_value() {
        assert!(parse_filters(&["deck".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_search() {
        let cli = Cli::try_parse_from([
            "fusion", "search", "--yacht", "y1", "-t", "fault", "pump leak", "bilge pump",
        ])
        .unwrap();

        match cli.command {
            Commands::Search {
                rewrites,
                object_types,
                ..
            } => {
                assert_eq!(rewrites, vec!["pump leak", "bilge pump"]);
                assert_eq!(object_types, vec!["fault"]);
            }
            _ => panic!("expected search"),
        }
    }
}
