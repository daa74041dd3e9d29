//! Watch-side trigger CLI.
//!
//! Simulates one activation of the watch alert screen: syncs the
//! confirmation mode from the relay, arms the coordinator, and reports how
//! the attempt ended. With `--confirm` the countdown is skipped and the
//! alert is confirmed immediately; with `--cancel-after-ms` the attempt is
//! cancelled mid-countdown (useful for exercising the cancel path).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use wristlink::logging;
use wristlink::prefsync::ConfirmationSyncListener;
use wristlink::storage::Storage;
use wristlink::transport::{PairingTransport, RelayTransport};
use wristlink::trigger::{ConfirmationMode, TriggerConfig, TriggerCoordinator, TriggerOutcome};
use wristlink::wlog;

/// Watch-side trigger CLI for wristlink.
#[derive(Parser, Debug)]
#[command(name = "watchctl", version, about)]
struct Cli {
    /// Pairing relay URL [default: http://127.0.0.1:8080]
    #[arg(long, short = 'r', default_value = "http://127.0.0.1:8080")]
    relay_url: String,

    /// Device ID this endpoint registers with the relay
    #[arg(long, short = 'i', default_value = "watch")]
    device_id: String,

    /// Preference database path [default: wristlink-watch.db]
    #[arg(long, short = 'd', default_value = "wristlink-watch.db")]
    db: PathBuf,

    /// Confirm immediately instead of waiting out the countdown
    #[arg(long, short = 'y')]
    confirm: bool,

    /// Cancel the attempt this many milliseconds into the countdown
    #[arg(long, conflicts_with = "confirm")]
    cancel_after_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    let transport = RelayTransport::new(cli.relay_url.clone(), cli.device_id.clone());
    let storage =
        Storage::open(&cli.db).unwrap_or_else(|error| panic!("failed to open preferences: {error}"));

    // Mark this endpoint reachable and pull the synced confirmation mode.
    let sync_transport = transport.clone();
    let mode = tokio::task::spawn_blocking(move || {
        if let Err(error) = sync_transport.heartbeat() {
            wlog!("watchctl: heartbeat failed: {error}");
        }
        let mut listener = ConfirmationSyncListener::new(sync_transport, storage);
        if let Err(error) = listener.poll_once() {
            wlog!("watchctl: preference sync failed: {error}");
        }
        ConfirmationMode::load(listener.storage())
    })
    .await
    .expect("sync task panicked")
    .unwrap_or_else(|error| panic!("failed to read confirmation mode: {error}"));

    wlog!(
        "watchctl: {} armed, require_button={}",
        logging::device_id(&cli.device_id),
        mode.require_button
    );

    let coordinator = TriggerCoordinator::new(
        Arc::new(transport) as Arc<dyn PairingTransport>,
        TriggerConfig::default(),
        mode,
    );
    coordinator.activate();

    if cli.confirm {
        coordinator.confirm().await;
    } else if let Some(cancel_after_ms) = cli.cancel_after_ms {
        tokio::time::sleep(Duration::from_millis(cancel_after_ms)).await;
        coordinator.cancel();
    }

    let outcome = coordinator.wait_terminal().await;
    match outcome {
        TriggerOutcome::Sent => {
            wlog!("watchctl: alert sent");
            ExitCode::SUCCESS
        }
        TriggerOutcome::Cancelled => {
            wlog!("watchctl: alert cancelled");
            ExitCode::SUCCESS
        }
        TriggerOutcome::NoReachableCompanion => {
            wlog!("watchctl: no reachable companion");
            ExitCode::FAILURE
        }
        TriggerOutcome::AllSendsFailed => {
            wlog!("watchctl: every send failed");
            ExitCode::FAILURE
        }
    }
}
