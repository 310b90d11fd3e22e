// SPDX-License-Identifier: MPL-2.0
use std::{
    error::Error,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use clap::Parser;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};
use wikibias::{
    config::{
        ClassifierConfig, PipelineConfig, SourceConfig, DEFAULT_CLASSIFIER_ENDPOINT,
        DEFAULT_DB_PATH, DEFAULT_USER_AGENT,
    },
    model::Article,
    pipeline::run_pipeline,
    significance::{SignificanceFilter, DEFAULT_DELTA_THRESHOLD, DEFAULT_SCORE_THRESHOLD},
    store::Store,
};

#[derive(Debug, clap::Parser)]
#[command(version, about)]
struct CommandLine {
    /// SQLite database file
    #[arg(long, global = true, env = "WIKIBIAS_DB", default_value = DEFAULT_DB_PATH)]
    db: PathBuf,
    /// Log every revision and stored change
    #[arg(long, global = true, env = "WIKIBIAS_DEBUG")]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Create the database tables
    InitDb,
    /// Register an article to be processed
    AddArticle {
        url: String,
        /// location of the article's subject as WKT, e.g. `POINT(120.97 24.80)`
        #[arg(long)]
        coord: Option<String>,
    },
    /// Fetch, diff, classify and store the revisions of all registered articles
    RevisionFetch(FetchArgs),
}

#[derive(Debug, clap::Args)]
struct FetchArgs {
    /// Process at most this many articles
    #[arg(long, env = "WIKIBIAS_LIMIT")]
    limit: Option<usize>,
    #[arg(
        long,
        alias = "workers-per-gpu",
        env = "WIKIBIAS_WORKERS_PER_DEVICE",
        default_value_t = 1
    )]
    workers_per_device: usize,
    /// Number of accelerator devices; detected from CUDA_VISIBLE_DEVICES if omitted
    #[arg(long, env = "WIKIBIAS_DEVICES")]
    devices: Option<usize>,
    /// Classification service base URLs, assigned to devices round robin
    #[arg(
        long = "classifier-endpoint",
        env = "WIKIBIAS_CLASSIFIER_ENDPOINTS",
        value_delimiter = ',',
        default_value = DEFAULT_CLASSIFIER_ENDPOINT
    )]
    classifier_endpoints: Vec<String>,
    #[arg(long, env = "WIKIBIAS_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    user_agent: String,
    /// Seconds a writer waits for a locked database
    #[arg(long, env = "WIKIBIAS_LOCK_TIMEOUT", default_value_t = 30)]
    lock_timeout: u64,
    #[arg(long, env = "WIKIBIAS_DELTA_THRESHOLD", default_value_t = DEFAULT_DELTA_THRESHOLD)]
    delta_threshold: f64,
    #[arg(long, env = "WIKIBIAS_SCORE_THRESHOLD", default_value_t = DEFAULT_SCORE_THRESHOLD)]
    score_threshold: f64,
}

impl FetchArgs {
    fn into_config(self, db_path: PathBuf) -> PipelineConfig {
        PipelineConfig {
            db_path,
            limit: self.limit,
            workers_per_device: self.workers_per_device,
            devices: self.devices,
            lock_timeout: Duration::from_secs(self.lock_timeout),
            filter: SignificanceFilter {
                delta_threshold: self.delta_threshold,
                score_threshold: self.score_threshold,
            },
            source: SourceConfig {
                user_agent: self.user_agent,
                ..SourceConfig::default()
            },
            classifier: ClassifierConfig {
                endpoints: self.classifier_endpoints,
                ..ClassifierConfig::default()
            },
        }
    }
}

fn open_store(path: &Path) -> Result<Store, Box<dyn Error>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Store::open(path, Duration::from_secs(30))?)
}

fn run(args: CommandLine) -> Result<(), Box<dyn Error>> {
    match args.command {
        Command::InitDb => {
            open_store(&args.db)?;
            tracing::info!(message = "Database initialized", path = %args.db.display());
        }
        Command::AddArticle { url, coord } => {
            let store = open_store(&args.db)?;
            let added = store.insert_article(&Article { url, coord })?;
            if !added {
                tracing::info!(message = "Article already registered");
            }
        }
        Command::RevisionFetch(fetch) => {
            open_store(&args.db)?;
            let config = fetch.into_config(args.db);
            let summary = run_pipeline(&config)?;
            let total = summary.total;
            println!(
                "workers: {} ({} failed)\narticles: {} processed, {} not found, {} failed\nrevisions: {} diffed, {} unchanged\nchanges: {} extracted, {} stored, {} not saved",
                summary.workers,
                summary.failed_workers,
                total.articles_processed,
                total.articles_not_found,
                total.articles_failed,
                total.revisions_diffed,
                total.revisions_unchanged,
                total.changes_extracted,
                total.changes_stored,
                total.store_failures,
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = CommandLine::parse();

    let level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::builder()
        .with_default_directive(
            format!("wikibias={level}")
                .parse()
                .unwrap_or_else(|_| LevelFilter::INFO.into()),
        )
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(message = "Aborting", %error);
            ExitCode::FAILURE
        }
    }
}
