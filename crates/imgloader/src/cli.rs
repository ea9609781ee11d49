//! Exposes the command line application.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use imgloader_service::config::Config;
use imgloader_service::fetch::HttpFetcher;
use imgloader_service::loader::{BatchOptions, ImageLoader, PreloadPriority};
use imgloader_service::metrics;

use crate::logging;
use crate::output::{self, OutputFormat};

/// How often `preload` checks whether its hints have settled.
const PRELOAD_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum Priority {
    #[default]
    Low,
    High,
}

impl From<Priority> for PreloadPriority {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Low => PreloadPriority::Low,
            Priority::High => PreloadPriority::High,
        }
    }
}

/// Imgloader commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Load images with caching, retries and fallbacks, and report the outcome of each.
    Fetch {
        /// The URLs to load.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Number of images loaded at the same time.
        ///
        /// Defaults to the configured concurrency.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Stop after the first window of images containing a failure.
        #[arg(long)]
        fail_fast: bool,

        /// The output format.
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Issue preload hints and wait until they settled.
    Preload {
        /// The URLs to preload.
        #[arg(required = true)]
        urls: Vec<String>,

        #[arg(long, value_enum, default_value_t)]
        priority: Priority,
    },
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: We are still single-threaded, the runtime is created below.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags: BTreeMap<_, _> = config.metrics.custom_tags.clone();
        if let Some(tag) = config.metrics.hostname_tag.clone() {
            if let Some(name) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
                tags.insert(tag, name);
            }
        }
        metrics::configure_statsd(&config.metrics.prefix, statsd, tags)
            .context("failed to configure metrics")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("imgloader")
        .build()
        .context("failed to create the runtime")?;

    runtime.block_on(run(config, cli.command))
}

async fn run(config: Config, command: Command) -> Result<()> {
    let fetcher = HttpFetcher::new(&config.loader).context("failed to create the HTTP client")?;
    let loader = ImageLoader::new(config.loader, Arc::new(fetcher));
    let _janitor = loader.start_janitor();

    match command {
        Command::Fetch {
            urls,
            concurrency,
            fail_fast,
            format,
        } => {
            let options = BatchOptions {
                concurrency,
                fail_fast,
                ..Default::default()
            };
            let outcome = loader.load_all(urls, options).await;
            let stats = loader.get_stats();
            output::print_batch(format, &outcome, &stats)?;
        }
        Command::Preload { urls, priority } => {
            let issued = loader.preload_images(urls, priority.into());
            tracing::info!(issued, "Issued preload hints");
            while loader.active_hints() > 0 {
                tokio::time::sleep(PRELOAD_POLL_INTERVAL).await;
            }
            println!("{issued} preload hints settled");
        }
    }

    Ok(())
}
