use anyhow::{Context, Result};
use clap::CommandFactory;
use pci::capture::{CaptureMode, TsharkSource};
use pci::cli::Cli;
use pci::config::{parse_duration, Config, LoggingConfig};
use pci::enrichment::{DnsHostnameLookup, EnrichmentResolver, HostnameLookup, MaxMindGeoLookup};
use pci::graph::{GraphStore, RunRecord};
use pci::ingest::{spawn_signal_listener, IngestReport, Ingestor, Pipeline, ShutdownToken};
use pci::storage::Database;
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Some(path) = &cli.write_default_config {
        return match Config::default().save(path) {
            Ok(()) => {
                println!("✓ Default configuration written to {}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to write configuration: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    if !cli.has_mode() {
        let _ = Cli::command().print_help();
        println!();
        return ExitCode::SUCCESS;
    }

    let config = Config::resolve(cli.config.as_deref());
    let filter = match &config {
        Ok(config) => config.logging.filter.clone(),
        Err(_) => LoggingConfig::default().filter,
    };
    init_logging(&filter, cli.verbose);

    let result = config
        .context("Failed to load configuration")
        .and_then(|config| cmd_capture(&cli, config));

    match result {
        Ok(report) if report.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(filter: &str, verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "pci=debug" } else { filter };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

/// Open every collaborator, then run the capture to completion
fn cmd_capture(cli: &Cli, config: Config) -> Result<IngestReport> {
    let mode = CaptureMode::from_selection(
        cli.file.clone(),
        cli.interface.clone(),
        cli.ring,
        &config.capture.ring,
    )?
    .context("No capture mode selected")?;

    tracing::info!("{}", mode);

    let database = Database::open(&config.store)
        .with_context(|| format!("Failed to open graph store at {:?}", config.store.path))?;
    let store: Arc<dyn GraphStore> = Arc::new(database);

    let geo = MaxMindGeoLookup::open(&config.enrichment.geoip_db).with_context(|| {
        format!(
            "Failed to open GeoIP database at {:?}",
            config.enrichment.geoip_db
        )
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(async move {
        let hostnames: Option<Arc<dyn HostnameLookup>> = if config.enrichment.resolve_hostnames {
            let timeout = parse_duration(&config.enrichment.dns_timeout)
                .context("Invalid enrichment.dns_timeout")?;
            Some(Arc::new(DnsHostnameLookup::new(timeout)))
        } else {
            tracing::info!("Hostname resolution disabled");
            None
        };
        let resolver = Arc::new(EnrichmentResolver::new(hostnames, Some(Arc::new(geo))));

        let pipeline = Pipeline::new(store.clone(), resolver)?;
        let source = TsharkSource::spawn(&mode, &config.capture).context("Failed to start capture")?;

        let shutdown = ShutdownToken::new();
        let listener = spawn_signal_listener(shutdown.clone())?;

        let run = RunRecord::start(mode.name(), mode.target());
        let report = Ingestor::new(Box::new(source), pipeline, store, shutdown, run)
            .run()
            .await;

        listener.abort();
        Ok::<_, anyhow::Error>(report)
    })
}
