//! sitewatch CLI
//!
//! Local execution entry point. For AWS Lambda, use `sitewatch-lambda`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sitewatch::{
    config::load_config,
    error::{AppError, Result},
    models::{BatchOptions, Config, DiffOptions, SiteConfig},
    pipeline::{BatchCrawler, DiffClassifier, max_safe_batch_size},
    storage::{KvStore, LocalStorage, keys, list_all},
    utils::report,
};

/// sitewatch - Batched website change monitor
#[derive(Parser, Debug)]
#[command(
    name = "sitewatch",
    version,
    about = "Batched website crawler with noise-tolerant change detection"
)]
struct Cli {
    /// Path to storage directory (snapshots live under {storage_dir}/kv)
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Path to config file (default: {storage_dir}/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one batch for a site (or the whole cycle with --all)
    Crawl {
        /// Site id from the config
        #[arg(long)]
        site: String,

        /// URLs per batch (clamped to the call budget)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Start offset into the URL set
        #[arg(long)]
        offset: Option<usize>,

        /// Resume from the stored checkpoint
        #[arg(long = "continue")]
        continue_from_last: bool,

        /// Keep running batches until the cycle completes
        #[arg(long)]
        all: bool,
    },

    /// Clear batch progress, today's scan marker and the cached URL set
    Reset {
        #[arg(long)]
        site: String,
    },

    /// Diff the two most recent stored versions of a page
    Diff {
        #[arg(long)]
        site: String,

        #[arg(long)]
        url: String,

        /// Cap on reported changes
        #[arg(long)]
        max_changes: Option<usize>,
    },

    /// Validate configuration
    Validate,

    /// Show stored state for a site
    Info {
        #[arg(long)]
        site: String,
    },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn find_site<'a>(config: &'a Config, id: &str) -> Result<&'a SiteConfig> {
    config
        .site(id)
        .ok_or_else(|| AppError::config(format!("site '{}' not found in config", id)))
}

/// Load config and build a crawler whose values live in `{storage_dir}/kv`.
fn open(config_path: &Path, storage_dir: &Path) -> Result<(Config, BatchCrawler)> {
    let config = load_config(config_path)?;
    log::info!("Loaded configuration from {}", config_path.display());

    let kv: Arc<dyn KvStore> = Arc::new(LocalStorage::new(storage_dir));
    let crawler = BatchCrawler::new(kv, config.crawler.clone())?;
    Ok((config, crawler))
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.storage_dir.join("config.toml"));

    match cli.command {
        Command::Crawl {
            site,
            batch_size,
            offset,
            continue_from_last,
            all,
        } => {
            let (config, crawler) = open(&config_path, &cli.storage_dir)?;
            let site = find_site(&config, &site)?;
            report::header(&format!("Crawling {}", site.id));

            let mut options = BatchOptions {
                batch_size,
                batch_offset: offset,
                continue_from_last,
            };
            loop {
                let result = crawler.perform_batch(site, options.clone()).await;
                report::batch(&result);
                if !(all && result.has_more) {
                    break;
                }
                report::separator();
                options = BatchOptions {
                    batch_size,
                    ..BatchOptions::resume()
                };
            }
        }

        Command::Reset { site } => {
            let (config, crawler) = open(&config_path, &cli.storage_dir)?;
            let site = find_site(&config, &site)?;
            crawler.reset_progress(&site.id).await?;
            log::info!("Progress for {} reset", site.id);
        }

        Command::Diff {
            site,
            url,
            max_changes,
        } => {
            let (config, crawler) = open(&config_path, &cli.storage_dir)?;
            let site = find_site(&config, &site)?;
            let options = DiffOptions {
                max_changes,
                ..DiffOptions::default()
            };
            let classifier = DiffClassifier::new(crawler.store().clone());
            match classifier.diff_latest(&site.id, &url, &options).await? {
                Some(diff) => report::diff(&diff),
                None => log::warn!("Fewer than two stored versions of {}", url),
            }
        }

        Command::Info { site } => {
            let (config, crawler) = open(&config_path, &cli.storage_dir)?;
            let site = find_site(&config, &site)?;
            let store = crawler.store();

            let progress = store.progress(&site.id).await?;
            let full_scan = store.full_scan(&site.id).await?;
            let sitemap = store.sitemap_state(&site.id).await?;
            let listener = store.listener(&site.id).await?;
            let backups = list_all(store.kv(), &keys::backup_prefix(&site.id)).await?;

            report::summary(
                &format!("Site {}", site.id),
                &[
                    (
                        "Source",
                        site.sitemap_url
                            .clone()
                            .unwrap_or_else(|| format!("{} explicit URL(s)", site.urls.len())),
                    ),
                    (
                        "Progress",
                        progress
                            .map(|p| format!("{}/{}", p.next_offset, p.total_urls))
                            .unwrap_or_else(|| "idle".to_string()),
                    ),
                    (
                        "Last full scan",
                        full_scan
                            .map(|s| format!("{} ({} URLs)", s.date, s.total_urls))
                            .unwrap_or_else(|| "never".to_string()),
                    ),
                    (
                        "Sitemap",
                        sitemap
                            .map(|s| format!("{} URLs, checked {}", s.url_count, s.checked_at))
                            .unwrap_or_else(|| "-".to_string()),
                    ),
                    ("Stored backups", backups.len().to_string()),
                    (
                        "Listener mode",
                        listener
                            .map(|l| format!("since {}", l.enabled_at))
                            .unwrap_or_else(|| "off".to_string()),
                    ),
                ],
            );
        }

        Command::Validate => {
            log::info!("Validating {}...", config_path.display());
            let config = Config::load(&config_path)?;
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!(
                "✓ Config OK ({} site(s), max safe batch size {})",
                config.sites.len(),
                max_safe_batch_size(config.crawler.call_budget)
            );
        }
    }

    log::info!("Done!");

    Ok(())
}
