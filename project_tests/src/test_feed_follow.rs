//! # Feed Follower
//!
//! Connects to a running events service through `lib_quakefeed`, follows the
//! feed for a while and prints what it saw.

use clap::Parser;
use lib_quakefeed::{FeedConfig, FeedRuntime};
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(about = "Follow a live earthquake feed for a few seconds")]
struct Args {
    /// Base URL of the events service.
    #[clap(long, env = "QUAKEFEED_BASE_URL", default_value = "http://localhost:8080/")]
    base_url: String,

    /// How long to follow the live stream.
    #[clap(long, default_value_t = 30)]
    seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // // Statement: Console-only logging for the follower
    fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("[{}] {}", record.level(), message)))
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .apply()?;

    let config = FeedConfig { base_url: args.base_url, ..FeedConfig::default() };
    let runtime = FeedRuntime::from_config(config)?;

    println!("[*] Loading the current month...");
    match runtime.start().await {
        Ok(()) => println!("[SUCCESS] {} event(s) loaded", runtime.controller().working_set().len()),
        Err(e) => eprintln!("[ERROR] Initial fetch failed: {}", e),
    }

    println!("[*] Following the live stream for {}s...", args.seconds);
    tokio::time::sleep(Duration::from_secs(args.seconds)).await;

    let state = runtime.controller().state();
    println!("-----------------------------------------------");
    println!("Connectivity: {:?}", runtime.controller().connectivity());
    println!("Held: {} event(s), last error: {:?}", state.working_set.len(), state.last_error);
    for event in state.working_set.iter().take(10) {
        println!("  M{:<4} {}  {}", event.magnitude, event.occurred_at, event.place);
    }
    println!("-----------------------------------------------");

    runtime.shutdown().await;
    Ok(())
}
