use clap::{Parser, Subcommand, builder::styling};
use eyre::Result;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use tabsync::cli;

// CLI Styling
const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::BrightWhite.on_default())
    .usage(styling::AnsiColor::BrightWhite.on_default())
    .literal(styling::AnsiColor::Green.on_default())
    .placeholder(styling::AnsiColor::Cyan.on_default());

/// tabsync: keep Google Sheets tabs in step with PostgreSQL queries
#[derive(Parser)]
#[command(name = "tabsync", version, styles = STYLES)]
struct Cli {
    /// The dotenv file to source settings and credentials from
    #[arg(short, long, global = true, default_value = ".env")]
    env: String,

    /// Sources file to use instead of SOURCES_FILE
    #[arg(short, long, global = true)]
    sources: Option<PathBuf>,

    /// More verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync every source on the configured interval until interrupted
    Run,

    /// Run a single cycle and exit; fails if any source failed
    Once,

    /// Validate configuration and list the resolved sources
    Check {
        /// Also open a connection to every database and the spreadsheet
        #[arg(short, long)]
        connect: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(e) = dotenvy::from_filename(&cli.env) {
        // Settings may come from the real environment instead
        if !e.not_found() {
            return Err(e.into());
        }
    }

    let log_level = match cli.debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().filter_or("LOG_LEVEL", log_level);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();

    let settings = cli::load_settings(cli.sources)?;
    let sources = cli::load_source_configs(&settings)?;

    match cli.command {
        Commands::Run => {
            log::info!(
                "Syncing {} source(s) into spreadsheet {} every {} minute(s)",
                sources.len(),
                settings.spreadsheet_id.bright_black(),
                settings.interval.as_secs() / 60
            );
            let scheduler = cli::build_scheduler(&settings, sources).await?;

            let stop = scheduler.stop_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("Interrupt received, stopping after the current cycle");
                    stop.cancel();
                }
            });

            let cycles = scheduler.run_forever(settings.interval).await;
            log::info!("✓ Stopped after {} cycle(s)", cycles);
        }
        Commands::Once => {
            let scheduler = cli::build_scheduler(&settings, sources).await?;
            let report = scheduler.run_cycle().await;
            scheduler.shutdown().await;

            if !report.is_success() {
                eyre::bail!("{}", report);
            }
            log::info!("✓ {}", report);
        }
        Commands::Check { connect } => {
            let failures = cli::check(&settings, &sources, connect).await?;
            if failures > 0 {
                eyre::bail!("{} connectivity check(s) failed", failures);
            }
            log::info!("✓ Configuration is valid");
        }
    }

    Ok(())
}
