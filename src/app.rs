use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity, log::LevelFilter};
use metrics::counter;
use tracing::{error, info, warn};

use crate::{
    config::AppConfig,
    db::{Db, establish_pool},
    domains::Domain,
    metrics::DOMAIN_FAILURES,
    session::{ProcessLauncher, SessionLauncher},
    toxicity::{PerspectiveClient, ToxicityScorer},
    vk::{VkClient, VkDirectory},
};

/// The application user agent. Concatenates the package name and version. e.g. `groupwarden/0.1.0`.
pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[derive(Parser, Debug, Clone)]
/// Command line arguments.
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "default.toml")]
    pub config: PathBuf,
    /// The verbosity level.
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
    /// Run a single moderation cycle and exit.
    #[arg(long)]
    pub once: bool,
}

#[derive(Clone)]
/// Everything a moderation cycle needs, shared by every session worker.
pub struct AppState {
    /// The application configuration.
    pub config: Arc<AppConfig>,
    /// The moderation database.
    pub db: Db,
    /// Spawns scrape sessions.
    pub launcher: Arc<dyn SessionLauncher>,
    /// Scores comment toxicity.
    pub scorer: Arc<dyn ToxicityScorer>,
    /// Resolves profiles and probes group sites.
    pub vk: Arc<dyn VkDirectory>,
}

/// Run every domain once, in order, and return the ones that failed.
///
/// A failing domain is logged and counted; the cycle moves on to the next one.
pub async fn run_cycle(state: &AppState) -> Vec<Domain> {
    info!("starting moderation cycle");
    let mut failed = Vec::new();
    for domain in Domain::ORDER {
        if let Err(e) = domain.run(state).await {
            error!(%domain, "domain failed: {e:?}");
            counter!(DOMAIN_FAILURES, "domain" => domain.name()).increment(1);
            failed.push(domain);
        }
    }
    info!(failed = failed.len(), "moderation cycle finished");
    failed
}

/// The main application entry point.
pub async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set up trace logging to console and account for the user-provided verbosity flag.
    if args.verbosity.log_level_filter() != LevelFilter::Off {
        let lvl = match args.verbosity.log_level_filter() {
            LevelFilter::Error => tracing::Level::ERROR,
            LevelFilter::Warn => tracing::Level::WARN,
            LevelFilter::Info | LevelFilter::Off => tracing::Level::INFO,
            LevelFilter::Debug => tracing::Level::DEBUG,
            LevelFilter::Trace => tracing::Level::TRACE,
        };
        tracing_subscriber::fmt().with_max_level(lvl).init();
    }

    if !args.config.exists() {
        // Every setting can come from the environment, so this is not fatal.
        warn!(
            "configuration file {} does not exist",
            args.config.display()
        );
    }

    // Read and parse the user-provided configuration.
    let config: AppConfig = AppConfig::figment(&args.config)
        .extract()
        .context("failed to load configuration")?;

    // Initialize metrics reporting.
    crate::metrics::setup(config.metrics.as_ref()).context("failed to set up metrics exporter")?;

    // Create a reqwest client that will be used for all outbound requests.
    let client = reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .build()
        .context("failed to build requester client")?;

    let db = establish_pool(&config.db)
        .await
        .context("failed to establish database connection pool")?;

    let state = AppState {
        launcher: Arc::new(ProcessLauncher::new(config.launcher.clone())),
        scorer: Arc::new(PerspectiveClient::new(client.clone(), &config.toxicity)),
        vk: Arc::new(VkClient::new(client, &config.vk)),
        db,
        config: Arc::new(config),
    };

    loop {
        _ = run_cycle(&state).await;
        if args.once {
            return Ok(());
        }

        let interval = state.config.cycle_interval();
        info!(?interval, "sleeping until the next cycle");
        tokio::time::sleep(interval).await;
    }
}
