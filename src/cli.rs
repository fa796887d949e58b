//! CLI helper functions
//!
//! Wiring between [`Settings`], the sources file and the runtime
//! components. The binary calls these; tests build the same pieces with
//! in-memory connectors instead.

use crate::{
    client::{Auth, PgConnector, SheetsClient},
    config::{Settings, SourceConfig, load_sources},
    pool::PoolManager,
    publish::{Publisher, QuotaLimiter},
    resilience::Resilience,
    scheduler::{Scheduler, SchedulerOptions},
};
use eyre::{Context, Result};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;

/// Load settings from the environment, optionally overriding the
/// sources file location.
pub fn load_settings(sources_file: Option<PathBuf>) -> Result<Settings> {
    let mut settings = Settings::from_env().context("Invalid configuration")?;
    if let Some(path) = sources_file {
        settings.sources_file = path;
    }
    log::debug!("Settings: {:?}", settings);
    Ok(settings)
}

/// Load and resolve every enabled source.
pub fn load_source_configs(settings: &Settings) -> Result<Vec<Arc<SourceConfig>>> {
    let sources = load_sources(settings).context("Invalid sources file")?;
    Ok(sources.into_iter().map(Arc::new).collect())
}

/// One PostgreSQL pool per source.
pub fn build_pools(sources: &[Arc<SourceConfig>], settings: &Settings) -> PoolManager<PgConnector> {
    let mut pools = PoolManager::new();
    for source in sources {
        let connector = PgConnector::new(&source.connection, settings.command_timeout);
        pools.register(&source.name, connector, source.pool);
        log::debug!(
            "Pool for '{}' → {} (min {}, max {})",
            source.name,
            source.connection,
            source.pool.min_size,
            source.pool.max_size
        );
    }
    pools
}

/// Google Sheets client for the configured spreadsheet.
pub fn build_sheets_client(settings: &Settings) -> Result<SheetsClient> {
    let auth = Auth::from_credentials(&settings.sheets_credentials)
        .context("Failed to load Google credentials")?;
    log::debug!("Sheets auth: {}", auth);
    SheetsClient::try_new(
        settings.sheets_api_url.clone(),
        &settings.spreadsheet_id,
        auth,
    )
    .context("Failed to create Sheets client")
}

/// The shared publisher every pipeline writes through.
pub fn build_publisher(settings: &Settings) -> Result<Publisher<SheetsClient>> {
    let client = build_sheets_client(settings)?;
    let limiter = QuotaLimiter::new(settings.quota)?;
    let resilience = Resilience::new(settings.retry.clone(), settings.slow_publish);
    Ok(Publisher::new(client, limiter, resilience))
}

/// Build the full scheduler: pools, publisher and one pipeline per source.
pub async fn build_scheduler(
    settings: &Settings,
    sources: Vec<Arc<SourceConfig>>,
) -> Result<Scheduler<PgConnector, SheetsClient>> {
    let pools = build_pools(&sources, settings);
    for (source, result) in pools.warm_up_all().await {
        if let Ok(opened) = result {
            log::debug!("Warmed up {} connection(s) for '{}'", opened, source);
        }
    }

    let publisher = build_publisher(settings)?;
    let extraction = Resilience::new(settings.retry.clone(), settings.slow_extract);
    let options = SchedulerOptions {
        cycle_timeout: settings.cycle_timeout,
        close_grace: settings.close_grace,
    };

    Ok(Scheduler::new(
        sources,
        Arc::new(pools),
        Arc::new(publisher),
        extraction,
        options,
    ))
}

/// Print the resolved sources and, with `connect`, probe every database
/// and the spreadsheet.
///
/// Returns the number of failed probes.
pub async fn check(settings: &Settings, sources: &[Arc<SourceConfig>], connect: bool) -> Result<usize> {
    println!(
        "{} → spreadsheet {}",
        "tabsync".bold(),
        settings.spreadsheet_id.cyan()
    );
    println!(
        "  interval {:?}, quota {}/{:?}, {} source(s)",
        settings.interval,
        settings.quota.requests,
        settings.quota.window,
        sources.len()
    );
    for source in sources {
        println!(
            "  {:<20} {} {:<24} {}",
            source.name.green(),
            "→".bright_black(),
            source.tab,
            source.connection.bright_black()
        );
    }

    if !connect {
        return Ok(0);
    }

    let mut failures = 0;
    let pools = build_pools(sources, settings);
    for source in sources {
        let probe = async {
            let mut connection = pools.acquire(&source.name).await?;
            connection.query("SELECT 1").await?;
            Ok::<_, eyre::Report>(())
        };
        match probe.await {
            Ok(()) => println!("  {} {}", "✓".green(), source.name),
            Err(e) => {
                failures += 1;
                println!("  {} {}: {}", "✗".red(), source.name, e);
            }
        }
    }
    pools.close_all(settings.close_grace).await;

    match build_sheets_client(settings)?.test_connection().await {
        Ok(title) => println!("  {} spreadsheet '{}'", "✓".green(), title),
        Err(e) => {
            failures += 1;
            println!("  {} spreadsheet: {}", "✗".red(), e);
        }
    }

    Ok(failures)
}
