//! Full-chain tests: a watch coordinator talking through an in-process
//! relay to a handset dispatcher backed by simulated device seams.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use tokio::sync::oneshot;

use wristlink::dispatcher::{AlertDispatcher, DispatcherConfig};
use wristlink::location::{FetcherConfig, LocationFetcher};
use wristlink::prefsync::{publish_confirmation_mode, ConfirmationSyncListener};
use wristlink::protocol::ALERT_CHANNEL;
use wristlink::relay::{app, RelayConfig, RelayState};
use wristlink::sim::{SimLocationSource, SimNotifier, SimSmsSender, SimWakeSource};
use wristlink::storage::{Storage, PREF_KEY_SEND_LOCATION, PREF_KEY_SMS_NUMBER};
use wristlink::transport::{PairingTransport, RelayTransport};
use wristlink::trigger::{
    ConfirmationMode, TriggerConfig, TriggerCoordinator, TriggerOutcome,
};

async fn start_relay() -> (String, oneshot::Sender<()>) {
    let state = RelayState::new(RelayConfig::default());
    let app: Router = app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind relay");
    let addr = listener.local_addr().expect("relay addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (format!("http://{}", addr), shutdown_tx)
}

async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.expect("blocking task")
}

struct Handset {
    transport: RelayTransport,
    dispatcher: Arc<AlertDispatcher>,
    sms: Arc<SimSmsSender>,
}

impl Handset {
    /// A handset with a configured destination number and the location
    /// feature switched off, so a complete alert is exactly one SMS.
    fn new(base_url: &str, device_id: &str) -> Self {
        let storage = Storage::open_in_memory().expect("open storage");
        storage
            .set(PREF_KEY_SMS_NUMBER, "+15551230000")
            .expect("set number");
        storage
            .set_bool(PREF_KEY_SEND_LOCATION, false)
            .expect("set flag");
        let storage = Arc::new(Mutex::new(storage));

        let sms = Arc::new(SimSmsSender::new());
        let location = Arc::new(SimLocationSource::without_provider());
        let fetcher = Arc::new(LocationFetcher::new(
            FetcherConfig::default(),
            location.clone(),
            Arc::new(SimWakeSource::new()),
            sms.clone(),
        ));
        let dispatcher = Arc::new(AlertDispatcher::new(
            DispatcherConfig {
                debounce_delay: Duration::from_millis(40),
            },
            storage,
            sms.clone(),
            Arc::new(SimNotifier::new()),
            location,
            fetcher,
        ));

        Self {
            transport: RelayTransport::new(base_url, device_id),
            dispatcher,
            sms,
        }
    }

    async fn heartbeat(&self) {
        let transport = self.transport.clone();
        blocking(move || transport.heartbeat().expect("heartbeat")).await;
    }

    /// One poll cycle: drain the inbox and feed alert signals to the
    /// dispatcher, the way the daemon's poll loop does.
    async fn poll(&self) {
        let transport = self.transport.clone();
        let signals = blocking(move || transport.drain_inbox().expect("drain")).await;
        for signal in signals {
            assert_eq!(signal.channel, ALERT_CHANNEL);
            self.dispatcher.on_trigger_signal();
        }
    }
}

fn watch_coordinator(
    base_url: &str,
    device_id: &str,
    require_button: bool,
) -> Arc<TriggerCoordinator> {
    let transport = RelayTransport::new(base_url, device_id);
    TriggerCoordinator::new(
        Arc::new(transport) as Arc<dyn PairingTransport>,
        TriggerConfig {
            confirmation_delay: Duration::from_millis(30),
        },
        ConfirmationMode { require_button },
    )
}

#[tokio::test]
async fn confirmed_trigger_reaches_handset_as_one_sms() {
    let (base_url, shutdown_tx) = start_relay().await;
    let handset = Handset::new(&base_url, "handset-a");
    handset.heartbeat().await;

    let coordinator = watch_coordinator(&base_url, "watch-a", false);
    coordinator.activate();
    let outcome = coordinator.wait_terminal().await;
    assert_eq!(outcome, TriggerOutcome::Sent);

    handset.poll().await;
    // Wait out the debounce window plus the pipeline.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let sent = handset.sms.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "+15551230000");

    handset.dispatcher.shutdown();
    shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn cancelled_trigger_reaches_nobody() {
    let (base_url, shutdown_tx) = start_relay().await;
    let handset = Handset::new(&base_url, "handset-b");
    handset.heartbeat().await;

    let coordinator = watch_coordinator(&base_url, "watch-b", false);
    coordinator.activate();
    coordinator.cancel();
    assert_eq!(coordinator.wait_terminal().await, TriggerOutcome::Cancelled);

    handset.poll().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(handset.sms.sent().is_empty());

    shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn rapid_double_trigger_collapses_to_one_alert() {
    let (base_url, shutdown_tx) = start_relay().await;
    let handset = Handset::new(&base_url, "handset-c");
    handset.heartbeat().await;

    // Two gestures in quick succession, each its own signal.
    for device in ["watch-c", "watch-c"] {
        let coordinator = watch_coordinator(&base_url, device, false);
        coordinator.activate();
        assert_eq!(coordinator.wait_terminal().await, TriggerOutcome::Sent);
    }

    handset.poll().await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(
        handset.sms.sent().len(),
        1,
        "burst of signals must run the pipeline once"
    );

    handset.dispatcher.shutdown();
    shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn trigger_without_companion_fails_fast() {
    let (base_url, shutdown_tx) = start_relay().await;

    // Nobody heartbeats, so the watch has no reachable peer.
    let coordinator = watch_coordinator(&base_url, "watch-d", false);
    coordinator.activate();
    assert_eq!(
        coordinator.wait_terminal().await,
        TriggerOutcome::NoReachableCompanion
    );

    shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn confirmation_mode_syncs_from_handset_to_watch() {
    let (base_url, shutdown_tx) = start_relay().await;

    let handset_transport = RelayTransport::new(base_url.clone(), "handset-e");
    blocking(move || publish_confirmation_mode(&handset_transport, true).expect("publish")).await;

    let watch_transport = RelayTransport::new(base_url, "watch-e");
    let mode = blocking(move || {
        let storage = Storage::open_in_memory().expect("open storage");
        let mut listener = ConfirmationSyncListener::new(watch_transport, storage);
        assert!(listener.poll_once().expect("poll"), "expected a change");
        ConfirmationMode::load(listener.storage()).expect("load mode")
    })
    .await;

    assert!(mode.require_button, "watch must pick up the synced flag");

    shutdown_tx.send(()).ok();
}
