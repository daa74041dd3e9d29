//! Handset-side alert daemon.
//!
//! Polls the pairing relay for alert signals and runs each through the
//! dispatch pipeline: debounce, SMS, notification, and the bounded
//! live-location fetch. Console stand-ins back the SMS, notification, and
//! wake seams; a fixed coordinate supplied on the command line backs the
//! location seam.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;

use wristlink::dispatcher::{AlertDispatcher, DispatcherConfig};
use wristlink::location::{FetcherConfig, LocationFetcher};
use wristlink::logging;
use wristlink::prefsync::publish_confirmation_mode;
use wristlink::protocol::ALERT_CHANNEL;
use wristlink::sim::{ConsoleNotifier, ConsoleSmsSender, ConsoleWakeSource, StaticLocationSource};
use wristlink::sms::Fix;
use wristlink::storage::{Storage, PREF_KEY_SMS_MESSAGE, PREF_KEY_SMS_NUMBER};
use wristlink::transport::{PairingTransport, RelayTransport};
use wristlink::wlog;

/// Handset-side alert daemon for wristlink.
#[derive(Parser, Debug)]
#[command(name = "alertd", version, about)]
struct Cli {
    /// Pairing relay URL [default: http://127.0.0.1:8080]
    #[arg(long, short = 'r', default_value = "http://127.0.0.1:8080")]
    relay_url: String,

    /// Device ID this endpoint registers with the relay
    #[arg(long, short = 'i', default_value = "handset")]
    device_id: String,

    /// Preference database path [default: wristlink-handset.db]
    #[arg(long, short = 'd', default_value = "wristlink-handset.db")]
    db: PathBuf,

    /// Inbox poll interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Require a button press to confirm on the watch (published on startup)
    #[arg(long)]
    require_button: bool,

    /// Store this destination number before starting
    #[arg(long)]
    sms_number: Option<String>,

    /// Store this alert message before starting
    #[arg(long)]
    sms_message: Option<String>,

    /// Fixed latitude reported by the location seam
    #[arg(long, requires = "lon")]
    lat: Option<f64>,

    /// Fixed longitude reported by the location seam
    #[arg(long, requires = "lat")]
    lon: Option<f64>,
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();

    let storage =
        Storage::open(&cli.db).unwrap_or_else(|error| panic!("failed to open preferences: {error}"));
    if let Some(number) = &cli.sms_number {
        storage
            .set(PREF_KEY_SMS_NUMBER, number)
            .unwrap_or_else(|error| panic!("failed to store number: {error}"));
    }
    if let Some(message) = &cli.sms_message {
        storage
            .set(PREF_KEY_SMS_MESSAGE, message)
            .unwrap_or_else(|error| panic!("failed to store message: {error}"));
    }
    let storage = Arc::new(Mutex::new(storage));

    let transport = RelayTransport::new(cli.relay_url.clone(), cli.device_id.clone());

    // Let a freshly paired watch pick the mode up without waiting for a
    // settings change.
    {
        let transport = transport.clone();
        let require_button = cli.require_button;
        tokio::task::spawn_blocking(move || {
            if let Err(error) = publish_confirmation_mode(&transport, require_button) {
                wlog!("alertd: failed to publish confirmation mode: {error}");
            }
        })
        .await
        .ok();
    }

    let fix = cli.lat.zip(cli.lon).map(|(latitude, longitude)| Fix {
        latitude,
        longitude,
        timestamp_millis: now_millis(),
    });
    let location = Arc::new(StaticLocationSource::new(fix));
    let sms = Arc::new(ConsoleSmsSender);
    let fetcher = Arc::new(LocationFetcher::new(
        FetcherConfig::default(),
        location.clone(),
        Arc::new(ConsoleWakeSource),
        sms.clone(),
    ));
    let dispatcher = Arc::new(AlertDispatcher::new(
        DispatcherConfig::default(),
        storage,
        sms,
        Arc::new(ConsoleNotifier),
        location,
        fetcher,
    ));

    wlog!(
        "alertd running as {} against {}",
        logging::device_id(&cli.device_id),
        cli.relay_url
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(cli.poll_interval_ms.max(100)));
    loop {
        ticker.tick().await;
        let transport = transport.clone();
        let signals = tokio::task::spawn_blocking(move || {
            if let Err(error) = transport.heartbeat() {
                wlog!("alertd: heartbeat failed: {error}");
            }
            transport.drain_inbox()
        })
        .await;

        let signals = match signals {
            Ok(Ok(signals)) => signals,
            Ok(Err(error)) => {
                wlog!("alertd: inbox poll failed: {error}");
                continue;
            }
            Err(_) => continue,
        };

        for signal in signals {
            if signal.channel != ALERT_CHANNEL {
                wlog!("alertd: ignoring signal on channel {}", signal.channel);
                continue;
            }
            wlog!(
                "alertd: alert signal from {}",
                logging::device_id(&signal.sender_id)
            );
            dispatcher.on_trigger_signal();
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
