use anyhow::Result;
use lib_quakefeed::FeedRuntime;
use lib_quakefeed::reports::{LoadState, ReportKind};
use tokio::signal;

mod feed_logic;
use feed_logic::{config, console, logger};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = config::load_config();
    logger::setup_logging(&cli.log_dir(), &cli.log_level())?;
    let feed_config = cli.feed_config()?;

    let runtime = FeedRuntime::from_config(feed_config)?;
    if let Err(e) = runtime.start().await {
        log::warn!("Initial fetch failed, continuing with live updates: {}", e);
    }

    if cli.dump {
        let events = runtime.controller().working_set();
        println!("{}", serde_json::to_string_pretty(events.events())?);
        runtime.shutdown().await;
        return Ok(());
    }

    if cli.reports {
        runtime.reports().load_all().await;
        for kind in ReportKind::ALL {
            match runtime.reports().state(kind) {
                LoadState::Success(report) => log::info!(
                    "{} report: {} event(s), max M{}, avg depth {:.1} km",
                    kind,
                    report.total_events,
                    report.magnitude_max,
                    report.depth_avg
                ),
                LoadState::Error(e) => log::warn!("{} report unavailable: {}", kind, e),
                other => log::debug!("{} report: {:?}", kind, other),
            }
        }
    }

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let console_handle = tokio::spawn(console::run(runtime.controller().clone(), shutdown_tx.subscribe()));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            log::info!("SIGTERM received, initiating shutdown.");
        }
    }

    let _ = shutdown_tx.send(());
    runtime.shutdown().await;
    let _ = console_handle.await;

    log::info!("Shutdown complete.");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term_signal) => {
            term_signal.recv().await;
        }
        Err(e) => {
            log::warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    // On non-unix platforms, just wait forever.
    std::future::pending::<()>().await;
}
