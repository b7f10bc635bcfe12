use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use race_radar::config::Config;
use race_radar::error::Result;
use race_radar::geocode::Geocoder;
use race_radar::logging;
use race_radar::notify::TelegramNotifier;
use race_radar::pipeline::Pipeline;
use race_radar::registry::SheetsRegistry;
use race_radar::render::{Browser, WebDriverBrowser};

#[derive(Parser)]
#[command(name = "race_radar")]
#[command(about = "Incremental discovery monitor for race-event listings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one discovery pass
    Run {
        /// Compute and log everything, but skip all writes and sends
        #[arg(long)]
        dry_run: bool,
    },
}

fn log_startup(config: &Config) {
    info!(
        sheet_id = %config.sheets.sheet_id,
        worksheet = %config.sheets.worksheet_name,
        url_column = %config.sheets.url_column,
        "starting with registry settings"
    );
    let specs = config.sources();
    let sources: Vec<&str> = specs.iter().map(|spec| spec.name()).collect();
    info!(
        ?sources,
        dry_run = config.dry_run,
        headless = config.renderer.headless,
        "run parameters"
    );
}

async fn run(dry_run: bool) -> Result<i32> {
    let mut config = Config::from_env()?;
    if dry_run {
        config.dry_run = true;
    }
    logging::init_logging(&config.log_level);
    log_startup(&config);

    let browser = Arc::new(WebDriverBrowser::connect(&config.renderer).await?);
    let registry = Arc::new(SheetsRegistry::new(&config.sheets));
    let notifier = Arc::new(TelegramNotifier::new(&config.telegram));
    let geocoder = Arc::new(Geocoder::new(&config.geocoder));

    let pipeline = Pipeline::new(
        config,
        registry,
        notifier,
        browser.clone() as Arc<dyn Browser>,
        geocoder,
    );
    let outcome = pipeline.run().await;
    let _ = browser.quit().await;

    match outcome {
        Ok(report) => {
            info!(
                scraped = report.total_scraped,
                notified = report.notified,
                sent = report.notification_sent,
                source_errors = report.source_errors.len(),
                "run finished"
            );
            Ok(report.exit_code())
        }
        Err(err) => {
            error!("run failed: {err}");
            Ok(1)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let Commands::Run { dry_run } = cli.command;

    let code = match run(dry_run).await {
        Ok(code) => code,
        Err(err) => {
            // Config/bootstrap failures can land before logging is up.
            eprintln!("race_radar: {err}");
            1
        }
    };
    std::process::exit(code);
}
