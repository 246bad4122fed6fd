// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use clap::Parser;

use monitor_relay::Core;
use monitor_relay::collector::tcp::TcpProbe;
use monitor_relay::config::{Args, load_config};

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Standalone runtime of the relay.
//
// Responsibilities:
// - Parse flags and initialize logging
// - Load destinations and monitors from the config file
// - Register built-in collectors and start their tasks
// - Run until interrupted, then shut down gracefully
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .parse_filters(&args.log_level)
        .format_timestamp_millis()
        .init();

    // --------------------------------------------------------
    // Load configuration from disk
    //
    // NOTE:
    // - Destination credentials live in this file.
    // - It must not be committed to version control.
    // --------------------------------------------------------
    let config = load_config(&args.config)?;

    log::info!(
        "starting {} {} (region={}, leader_elect={}, metrics={}, health={})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        args.region,
        args.leader_elect,
        args.metrics_bind_address,
        args.health_probe_bind_address,
    );

    let core = Core::new(config.core_settings(&args));

    // --------------------------------------------------------
    // Built-in collectors
    // --------------------------------------------------------
    core.register_collector(Box::new(TcpProbe::default()));

    // --------------------------------------------------------
    // Destinations first, so the first ticks have somewhere to go
    //
    // A bad object is logged and skipped; the rest still start.
    // --------------------------------------------------------
    for dest in &config.destinations {
        if let Err(e) = core.apply_destination(&dest.name, dest.options.clone()) {
            log::error!("destination `{}` rejected: {e}", dest.name);
        }
    }

    for monitor in &config.monitors {
        if let Err(e) = core.apply_monitor(monitor).await {
            log::error!("monitor `{}` rejected: {e}", monitor.name);
        }
    }

    core.start_self_metrics(&args.region, config.self_metrics_interval());

    // --------------------------------------------------------
    // Run until interrupted
    // --------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    log::info!("interrupt received");

    core.shutdown().await;
    Ok(())
}
