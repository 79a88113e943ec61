// src/main.rs
//
// animehub-resolver CLI
//
// resolve  - resolve release files and record their mappings
// lookup   - show the mapping stored for a fingerprint
// find     - find the fingerprint stored for a media/episode
// stats    - check the mapping database and show its size

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use animehub_resolver::config::ResolverConfig;
use animehub_resolver::db::{
    create_connection_pool, get_connection, get_database_path, get_database_stats,
    initialize_database, verify_database_integrity, ConnectionPool,
};
use animehub_resolver::fingerprint::{collect_video_files, fingerprint_file};
use animehub_resolver::integrations::{AniListClient, StreamingEpisodeHeuristic};
use animehub_resolver::repositories::SqliteMappingRepository;
use animehub_resolver::services::{
    MappingCache, MappingLookup, MappingQuery, ResolutionService, TitleCorrections,
    TitleNormalizer,
};
use animehub_resolver::ResolvedEpisode;

#[derive(Debug, Parser)]
#[command(name = "animehub-resolver", version, about = "Resolve anime release files to catalog entries")]
struct Cli {
    /// Config file (TOML)
    #[arg(long, env = "ANIMEHUB_RESOLVER_CONFIG")]
    config: Option<PathBuf>,

    /// Mapping database, overrides the config
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve files or directories of release files
    Resolve {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Resolve only, do not record mappings
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the mapping stored for a fingerprint
    Lookup {
        fingerprint: String,

        /// File-level fingerprint inside a batch record
        #[arg(long)]
        file: Option<String>,

        #[arg(long)]
        ignore_expiry: bool,
    },

    /// Find the fingerprint recorded for a media and episode
    Find {
        media_id: i64,

        #[arg(short, long)]
        episode: Option<u32>,

        /// Accept batch records without an episode
        #[arg(long)]
        batch: bool,

        #[arg(long)]
        ignore_expiry: bool,
    },

    /// Check the mapping database and show its statistics
    Stats,
}

fn init_logger(config: &ResolverConfig) {
    let level = config.log_level.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_config(cli: &Cli) -> anyhow::Result<ResolverConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => ResolverConfig::default_path()?,
    };
    ResolverConfig::load(&path).with_context(|| format!("loading config {}", path.display()))
}

fn open_database(cli: &Cli, config: &ResolverConfig) -> anyhow::Result<Arc<ConnectionPool>> {
    let configured = cli.database.as_deref().or(config.database_path.as_deref());
    let db_path = get_database_path(configured)?;
    log::debug!("Using mapping database {}", db_path.display());
    let pool = Arc::new(create_connection_pool(&db_path)?);
    {
        let conn = get_connection(&pool)?;
        initialize_database(&conn)?;
    }
    Ok(pool)
}

fn show_stats(pool: &ConnectionPool) -> anyhow::Result<()> {
    let conn = get_connection(pool)?;
    verify_database_integrity(&conn)?;
    let stats = get_database_stats(&conn)?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn build_resolver(config: &ResolverConfig) -> anyhow::Result<ResolutionService> {
    let catalog = Arc::new(AniListClient::new(&config.catalog)?);
    let mut service = ResolutionService::new(
        catalog,
        Arc::new(StreamingEpisodeHeuristic::new()),
        &config.resolution,
    );
    if let Some(path) = &config.title_corrections {
        let corrections = TitleCorrections::load(path)
            .with_context(|| format!("loading title corrections {}", path.display()))?;
        service = service.with_normalizer(TitleNormalizer::new(corrections));
    }
    Ok(service)
}

async fn resolve(
    config: &ResolverConfig,
    cache: &MappingCache,
    paths: &[PathBuf],
    dry_run: bool,
) -> anyhow::Result<()> {
    let mut files = Vec::new();
    for path in paths {
        files.extend(collect_video_files(path)?);
    }
    if files.is_empty() {
        log::warn!("No video files found");
        return Ok(());
    }

    let names: Vec<String> = files
        .iter()
        .map(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect();

    let resolver = build_resolver(config)?;
    let results = resolver.resolve_files(&names).await;

    for ((path, name), result) in files.iter().zip(&names).zip(&results) {
        let title = result
            .media
            .as_ref()
            .and_then(|m| m.display_title())
            .unwrap_or("-");
        let episode = result
            .episode
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        let status = match (result.failed, result.is_upstream_failure()) {
            (_, true) => "ERROR",
            (true, false) => "FAILED",
            (false, false) => "ok",
        };
        println!("{}\t{}\t{}\t{}", status, title, episode, name);

        if dry_run {
            continue;
        }
        let fingerprint = match fingerprint_file(path) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                log::warn!("Could not fingerprint {}: {}", path.display(), e);
                continue;
            }
        };
        cache.record(&fingerprint, None, result).await?;
    }

    if let Some(result) = results.iter().find(|r| r.is_upstream_failure()) {
        let unreachable = results.iter().filter(|r| r.is_upstream_failure()).count();
        anyhow::bail!(
            "{} file(s) could not be resolved, catalog unavailable: {}",
            unreachable,
            result.upstream_error.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logger(&config);

    let pool = open_database(&cli, &config)?;
    let repository = Arc::new(SqliteMappingRepository::new(pool.clone()));
    let cache = MappingCache::new(repository, config.mapping.clone());

    match &cli.command {
        Command::Resolve { paths, dry_run } => {
            resolve(&config, &cache, paths, *dry_run).await?;
        }
        Command::Lookup {
            fingerprint,
            file,
            ignore_expiry,
        } => match cache.get_id(fingerprint, file.as_deref(), *ignore_expiry)? {
            Some(MappingLookup::Batch(mapping)) => {
                println!("{}", serde_json::to_string_pretty(&mapping)?);
            }
            Some(MappingLookup::File(file)) => {
                println!("{}", serde_json::to_string_pretty(&file)?);
            }
            None => println!("No mapping for {}", fingerprint),
        },
        Command::Find {
            media_id,
            episode,
            batch,
            ignore_expiry,
        } => {
            let mut query = MappingQuery {
                episode: episode.map(ResolvedEpisode::Number),
                ..MappingQuery::default()
            };
            if *batch {
                query = query.batch_guess();
            }
            match cache.get_hash(*media_id, &query, true, *ignore_expiry)? {
                Some(hash) => println!("{}", hash),
                None => println!("No mapping for media {}", media_id),
            }
        }
        Command::Stats => show_stats(&pool)?,
    }

    Ok(())
}
