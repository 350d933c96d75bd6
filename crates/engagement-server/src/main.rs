//! Lead engagement pipeline executable

mod services;
mod triggers;

use clap::{Arg, ArgAction, Command};
use engagement_core::{paths, EngagementConfig};
use std::sync::Arc;

use services::Services;
use triggers::TriggerMonitor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with INFO as default if RUST_LOG not set
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let matches = Command::new("engagement-server")
        .version("1.0.0")
        .about("Lead engagement pipeline")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/app/config/credentials.json")
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Data directory for the document store and trigger files")
                .default_value("/data/engagement")
        )
        .arg(
            Arg::new("monitor-triggers")
                .long("monitor-triggers")
                .help("Execute trigger files only")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("poll-messages")
                .long("poll-messages")
                .help("Poll inboxes and answer replies only")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("serve")
                .long("serve")
                .help("Run trigger monitor, draft watcher and message poller together")
                .action(ArgAction::SetTrue)
        )
        .get_matches();

    let data_dir = matches
        .get_one::<String>("data-dir")
        .cloned()
        .unwrap_or_else(|| "/data/engagement".to_string());
    if let Err(e) = paths::init_data_root(data_dir.clone()) {
        log::warn!("Data root initialization warning: {}", e);
    }
    log::info!("Using data directory: {}", data_dir);

    let config_path = matches
        .get_one::<String>("config")
        .cloned()
        .unwrap_or_else(|| "/app/config/credentials.json".to_string());
    let config = EngagementConfig::load(&config_path)?;
    log::info!("Loaded configuration from {}", config_path);

    let services = Arc::new(Services::from_config(&config, &paths::data_root())?);
    log::info!("Initialized all services");

    let monitor = TriggerMonitor::new(
        services.clone(),
        paths::triggers_dir(),
        paths::triggers_processed_dir(),
        paths::triggers_failed_dir(),
    );

    if matches.get_flag("serve") {
        let watcher = services.draft_watcher();
        let poller = services.message_poller();

        let monitor_handle = tokio::spawn(async move { monitor.run().await });
        let watcher_handle = tokio::spawn(async move { watcher.start().await });
        let poller_handle = tokio::spawn(async move { poller.start().await });

        // The loops only return on failure
        tokio::select! {
            result = monitor_handle => {
                match result {
                    Ok(Ok(())) => log::info!("Trigger monitor exited normally"),
                    Ok(Err(e)) => {
                        log::error!("Trigger monitor failed: {}", e);
                        std::process::exit(1);
                    }
                    Err(e) => {
                        log::error!("Trigger monitor task panicked: {}", e);
                        std::process::exit(1);
                    }
                }
            }
            result = watcher_handle => {
                if let Err(e) = result {
                    log::error!("Draft watcher task panicked: {}", e);
                    std::process::exit(1);
                }
            }
            result = poller_handle => {
                if let Err(e) = result {
                    log::error!("Message poller task panicked: {}", e);
                    std::process::exit(1);
                }
            }
        }
    } else if matches.get_flag("monitor-triggers") {
        log::info!("Starting trigger monitor mode");
        monitor.run().await?;
    } else if matches.get_flag("poll-messages") {
        log::info!("Starting message poller mode");
        services.message_poller().start().await;
    } else {
        log::error!("No action specified. Use --help for options.");
        std::process::exit(1);
    }

    Ok(())
}
