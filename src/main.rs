use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use cloudmap::cache::{MemoryCache, PersistentCache};
use cloudmap::cluster::{Clusterer, DiagramVariant};
use cloudmap::config::Config;
use cloudmap::filter::{apply_filters, parse_filters};
use cloudmap::report::Report;
use cloudmap::resource::{AvailabilityGate, Collector, Snapshot, UnitContext, UnitRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Collect, filter and cluster a cloud resource graph
#[derive(Parser, Debug)]
#[command(name = "cloudmap", version = cloudmap::VERSION, about, long_about = None)]
struct Args {
    /// Inventory snapshot (JSON, or YAML by extension)
    snapshot: PathBuf,

    /// Domain to collect (defaults to the snapshot's, then the last used)
    #[arg(short, long)]
    domain: Option<String>,

    /// Region override
    #[arg(short, long)]
    region: Option<String>,

    /// Filter expression, e.g. "Name=tags.costCenter;Value=20000"
    #[arg(short, long = "filter")]
    filters: Vec<String>,

    /// Diagram flavor
    #[arg(long, value_enum, default_value = "default")]
    variant: Variant,

    /// Only draw these resource types (aggregates are always drawn)
    #[arg(long, value_delimiter = ',')]
    renderable: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: Format,

    /// Units in flight at once
    #[arg(long)]
    pool_size: Option<usize>,

    /// Persistent cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Drop every persistent cache entry before collecting
    #[arg(long)]
    clear_cache: bool,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    Default,
    Network,
    Principal,
}

impl From<Variant> for DiagramVariant {
    fn from(variant: Variant) -> Self {
        match variant {
            Variant::Default => DiagramVariant::Default,
            Variant::Network => DiagramVariant::NetworkTopology,
            Variant::Principal => DiagramVariant::PrincipalAggregation,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Logging disabled, cannot open {}: {}", log_path.display(), e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing_level.as_str().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloudmap {} started with log level: {:?}", cloudmap::VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("cloudmap").join("cloudmap.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cloudmap").join("cloudmap.log");
    }
    PathBuf::from("cloudmap.log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let mut config = Config::load();
    let snapshot = Snapshot::load(&args.snapshot)?;

    let domain = config.effective_domain(args.domain.as_deref(), &snapshot.domain);
    let region = args.region.clone().unwrap_or_else(|| snapshot.region.clone());
    tracing::info!("Using domain: {}, region: {}", domain, region);

    let persistent = Arc::new(PersistentCache::open(
        config.effective_cache_dir(args.cache_dir.clone()),
    )?);
    tracing::debug!("Persistent cache at {}", persistent.dir().display());
    if args.clear_cache {
        let removed = persistent.clear()?;
        tracing::info!("Cleared {} persistent cache entries", removed);
    } else if let Err(e) = persistent.purge_expired() {
        tracing::warn!("Failed to purge persistent cache: {:#}", e);
    }

    let memory = Arc::new(MemoryCache::new(config.memory_ttl()));
    let ctx = UnitContext::new(region.clone(), memory, persistent.clone());

    let mut registry = UnitRegistry::new();
    snapshot.register(&mut registry, &domain)?;
    let units = registry.discover(&domain, &ctx)?;

    let mut collector =
        Collector::new(config.effective_pool_size(args.pool_size)).for_domain(domain.clone());
    if let Some(probe) = snapshot.probe() {
        let gate = AvailabilityGate::new(Arc::new(probe), persistent.clone())
            .with_ttl(config.availability_ttl());
        collector = collector.with_gate(gate, region.clone());
    }

    let collection = collector
        .collect(units)
        .await
        .context("Collection aborted")?;

    let filters = parse_filters(&args.filters);
    let graph = apply_filters(collection.graph, &filters);
    if graph.is_empty() {
        tracing::warn!("No resources left after collection and filtering");
    }

    let mut clusterer = Clusterer::default();
    if !args.renderable.is_empty() {
        clusterer = clusterer.with_renderable(args.renderable.iter().cloned());
    }
    let grouping = clusterer.group(&graph.nodes, &graph.edges, args.variant.into());

    let report = Report {
        domain: &domain,
        region: &region,
        grouping: &grouping,
        warnings: &collection.warnings,
    };
    match args.format {
        Format::Text => print!("{}", report.to_text()),
        Format::Json => println!("{}", report.to_json()?),
    }

    if let Err(e) = config.set_last_domain(&domain) {
        tracing::warn!("Failed to save config: {:#}", e);
    }

    Ok(())
}
