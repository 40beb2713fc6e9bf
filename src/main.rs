mod cli;

use anyhow::{Context, Result};
use bridge_desktop::{ReqwestHttpClient, UnionFsAttributeProvider, UnionFsOptions};
use bridge_traits::catalog::CatalogAdapter;
use bridge_traits::http::HttpClient;
use clap::Parser;
use cli::{Cli, Commands, ReportFormat, SyncArgs};
use core_runtime::config::Settings;
use core_runtime::logging::{init_logging, LogLevel, LoggingConfig};
use core_sync::{
    AttributeResolver, ConflictPolicy, ConflictResolver, ItemOutcome, PathMapper, RunReport,
    SyncConfig, SyncCoordinator, SyncError, ThrottledCatalog,
};
use provider_jellyfin::{JellyfinConfig, JellyfinConnector};
use provider_plex::{PlexConfig, PlexConnector};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Pass completed, even with per-item failures
const EXIT_OK: u8 = 0;
/// Invalid configuration or a server failed setup
const EXIT_FATAL: u8 = 1;
/// Cancelled by Ctrl-C before every pair was reconciled
const EXIT_INTERRUPTED: u8 = 10;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Sync(args) => {
            if let Err(err) = setup_logging(&args) {
                eprintln!("Error: {}", err);
                return ExitCode::from(EXIT_FATAL);
            }

            match run_sync(args).await {
                Ok(code) => ExitCode::from(code),
                Err(err) => {
                    error!("Error: {:#}", err);
                    ExitCode::from(EXIT_FATAL)
                }
            }
        }
    }
}

fn setup_logging(args: &SyncArgs) -> Result<()> {
    let mut config = LoggingConfig::default()
        .with_level(LogLevel::from_flags(args.verbose, args.debug))
        .with_target(args.verbose || args.debug)
        .with_spans(args.debug)
        .with_thread_info(args.debug)
        .with_env_filter();
    if let Some(format) = args.log_format {
        config = config.with_format(format.into());
    }
    init_logging(config).context("Failed to initialize logging")
}

/// Settings from file and environment, with command-line overrides on top
fn load_settings(args: &SyncArgs) -> Result<Settings> {
    let mut settings = Settings::load(args.config.as_deref()).context("Error loading configuration")?;

    if let Some(strategy) = args.strategy {
        settings.sync.strategy = strategy.into();
    }
    if args.dry_run {
        settings.sync.dry_run = true;
    }
    if !args.jellyfin_libraries.is_empty() {
        settings.jellyfin.libraries = args.jellyfin_libraries.clone();
    }
    if !args.plex_libraries.is_empty() {
        settings.plex.libraries = args.plex_libraries.clone();
    }

    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

fn build_coordinator(settings: &Settings) -> Result<SyncCoordinator> {
    let config = SyncConfig::from_settings(settings);

    let http_client: Arc<dyn HttpClient> = Arc::new(
        ReqwestHttpClient::with_timeout(Duration::from_secs(settings.sync.request_timeout_secs))
            .context("Failed to build HTTP client")?,
    );

    let per_server = settings.sync.max_requests_per_server;
    let jellyfin: Arc<dyn CatalogAdapter> = Arc::new(ThrottledCatalog::new(
        Arc::new(JellyfinConnector::new(
            http_client.clone(),
            JellyfinConfig::from_settings(settings, config.retry.clone()),
        )),
        per_server,
    ));
    let plex: Arc<dyn CatalogAdapter> = Arc::new(ThrottledCatalog::new(
        Arc::new(PlexConnector::new(
            http_client,
            PlexConfig::from_settings(settings, config.retry.clone()),
        )),
        per_server,
    ));

    let attributes = UnionFsAttributeProvider::new(UnionFsOptions {
        union_roots: settings.filesystem.union_roots.clone(),
        branches: settings.filesystem.branches.clone(),
        partial_hash: settings.filesystem.partial_hash,
    });
    let resolver = AttributeResolver::new(
        Arc::new(attributes),
        PathMapper::from_map(&settings.path_mappings.jellyfin),
        PathMapper::from_map(&settings.path_mappings.plex),
    );

    let strategy: Arc<dyn ConflictResolver> = Arc::new(ConflictPolicy::from_settings(
        settings.sync.strategy,
        settings.sync.bidirectional_tiebreak,
    ));

    SyncCoordinator::new(config, jellyfin, plex, resolver, strategy).context("Invalid sync configuration")
}

async fn run_sync(args: SyncArgs) -> Result<u8> {
    let settings = load_settings(&args)?;
    info!(
        jellyfin = %settings.jellyfin.url,
        plex = %settings.plex.url,
        strategy = %settings.sync.strategy,
        dry_run = settings.sync.dry_run,
        "Starting sync pass"
    );

    let coordinator = build_coordinator(&settings)?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received, finishing in-flight work; press Ctrl-C again to exit now");
        signal_token.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            error!("Second interrupt received, exiting without a report");
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
    });

    let report = match coordinator.run_pass(cancel).await {
        Ok(report) => report,
        Err(err @ SyncError::FatalSetup { .. }) => {
            error!("{}", err);
            return Ok(EXIT_FATAL);
        }
        Err(err) => return Err(err.into()),
    };

    print_report(&report, args.report)?;

    if report.has_failures() {
        warn!(failed = report.actions_failed, "Some actions failed and will be retried on the next pass");
    }

    if report.cancelled {
        return Ok(EXIT_INTERRUPTED);
    }
    Ok(EXIT_OK)
}

fn print_report(report: &RunReport, format: ReportFormat) -> Result<()> {
    match format {
        ReportFormat::Json => {
            let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
            println!("{}", json);
        }
        ReportFormat::Summary => {
            println!("{}", report.summary());
            if !report.has_failures() {
                return Ok(());
            }
            for item in &report.items {
                if let ItemOutcome::Failed { title, error, .. } = item {
                    println!("  failed: {} ({})", title, error);
                }
            }
        }
    }
    Ok(())
}
