use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use punch_core::config::PunchConfig;
use punch_core::types::{AttemptReport, PunchKind};
use punch_scheduler::{PunchScheduler, SlotFire, SystemClock};
use punch_session::chrome::ChromeSession;
use punch_session::notify::PageNotifier;
use punch_session::ExecutionPipeline;

#[derive(Parser)]
#[command(name = "punch", about = "Scheduled attendance punch automation", version)]
struct Cli {
    /// Path to the TOML configuration file (default: punch.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single punch attempt — the surface a cron trigger invokes.
    Run {
        /// Punch kind to submit ("on" or "off"); without it an open
        /// clock-in slot is preferred over a clock-out one.
        #[arg(long)]
        kind: Option<PunchKind>,
    },
    /// Run the embedded scheduler until interrupted.
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "punch_cli=info,punch_session=info,punch_scheduler=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = PunchConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        PunchConfig::default()
    });

    match cli.command {
        Command::Run { kind } => {
            let report = attempt(&config, kind).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                std::process::exit(1);
            }
        }
        Command::Watch => watch(config).await?,
    }

    Ok(())
}

/// One end-to-end attempt: launch, navigate, run the pipeline, close.
async fn attempt(config: &PunchConfig, kind: Option<PunchKind>) -> anyhow::Result<AttemptReport> {
    let session = ChromeSession::launch(&config.browser).await?;
    let result = run_attempt(&session, config, kind).await;
    session.close().await;
    result
}

async fn run_attempt(
    session: &ChromeSession,
    config: &PunchConfig,
    kind: Option<PunchKind>,
) -> anyhow::Result<AttemptReport> {
    let page = session.open(&config.target_url).await?;
    let notifier = PageNotifier::default();
    let pipeline = ExecutionPipeline::new(&page, &config.login, &config.pipeline, &notifier);
    let mut report = pipeline.run(kind).await;
    report.page_title = page.title().await;
    Ok(report)
}

/// Embedded-scheduler mode: the engine fires slots, this loop runs one
/// attempt per fire.
async fn watch(config: PunchConfig) -> anyhow::Result<()> {
    let (fired_tx, mut fired_rx) = tokio::sync::mpsc::channel::<SlotFire>(8);
    let mut scheduler = PunchScheduler::new();
    scheduler
        .start(config.schedule.clone(), SystemClock, fired_tx)
        .await;
    info!("watch mode started — press Ctrl-C to stop");

    loop {
        tokio::select! {
            Some(fire) = fired_rx.recv() => {
                info!(
                    slot = %fire.spec.name,
                    kind = %fire.spec.kind,
                    compensated = fire.compensated,
                    "slot fired — running punch attempt"
                );
                match attempt(&config, Some(fire.spec.kind)).await {
                    Ok(report) => info!(success = report.success, "attempt finished"),
                    Err(e) => error!("attempt failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received — stopping scheduler");
                break;
            }
        }
    }

    scheduler.stop().await;
    Ok(())
}
