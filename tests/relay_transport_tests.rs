use std::time::Duration;

use axum::Router;
use serde_json::json;
use tokio::sync::oneshot;

use wristlink::protocol::{
    build_alert_signal, AlertSignal, ALERT_CHANNEL, PREFERENCES_RECORD_PATH,
};
use wristlink::relay::{app, RelayConfig, RelayState};
use wristlink::transport::{PairingTransport, RelayTransport};

async fn start_relay(config: RelayConfig) -> (String, oneshot::Sender<()>) {
    let state = RelayState::new(config);
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

fn short_ttl_config() -> RelayConfig {
    RelayConfig {
        signal_ttl: Duration::from_millis(80),
        presence_window: Duration::from_millis(120),
        max_queued_signals: 8,
    }
}

async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.expect("blocking task")
}

#[tokio::test]
async fn signal_travels_watch_to_handset() {
    let (base_url, shutdown_tx) = start_relay(RelayConfig::default()).await;
    let watch = RelayTransport::new(base_url.clone(), "watch-a");
    let handset = RelayTransport::new(base_url, "handset-a");

    blocking({
        let watch = watch.clone();
        move || watch.send_signal("handset-a", ALERT_CHANNEL).expect("send")
    })
    .await;

    let inbox = blocking({
        let handset = handset.clone();
        move || handset.drain_inbox().expect("drain")
    })
    .await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].sender_id, "watch-a");
    assert_eq!(inbox[0].recipient_id, "handset-a");
    assert_eq!(inbox[0].channel, ALERT_CHANNEL);

    // Drained means gone.
    let inbox = blocking(move || handset.drain_inbox().expect("drain")).await;
    assert!(inbox.is_empty());

    shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn replayed_signal_is_delivered_once() {
    let (base_url, shutdown_tx) = start_relay(RelayConfig::default()).await;

    let signal =
        build_alert_signal("watch-a".to_string(), "handset-a", ALERT_CHANNEL, 42).expect("signal");

    // A transport retry re-posts the identical signal.
    blocking({
        let base_url = base_url.clone();
        let signal = signal.clone();
        move || {
            for _ in 0..2 {
                let body = serde_json::to_string(&signal).expect("serialize signal");
                ureq::post(&format!("{}/signals", base_url))
                    .set("Content-Type", "application/json")
                    .send_string(&body)
                    .expect("post signal");
            }
        }
    })
    .await;

    let handset = RelayTransport::new(base_url, "handset-a");
    let inbox = blocking(move || handset.drain_inbox().expect("drain")).await;
    assert_eq!(inbox.len(), 1, "duplicate send must not be delivered twice");

    shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn queued_signals_expire_after_ttl() {
    let (base_url, shutdown_tx) = start_relay(short_ttl_config()).await;
    let watch = RelayTransport::new(base_url.clone(), "watch-a");

    blocking(move || watch.send_signal("handset-a", ALERT_CHANNEL).expect("send")).await;

    tokio::time::sleep(Duration::from_millis(150)).await;

    let handset = RelayTransport::new(base_url, "handset-a");
    let inbox = blocking(move || handset.drain_inbox().expect("drain")).await;
    assert!(inbox.is_empty(), "expected expired inbox");

    shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn invalid_channel_is_rejected() {
    let (base_url, shutdown_tx) = start_relay(RelayConfig::default()).await;

    let signal = AlertSignal {
        signal_id: wristlink::protocol::SignalId("bogus".to_string()),
        sender_id: "watch-a".to_string(),
        recipient_id: "handset-a".to_string(),
        channel: "not-a-path".to_string(),
        timestamp: 1,
    };

    let status = blocking({
        let base_url = base_url.clone();
        move || {
            let body = serde_json::to_string(&signal).expect("serialize signal");
            match ureq::post(&format!("{}/signals", base_url))
                .set("Content-Type", "application/json")
                .send_string(&body)
            {
                Ok(response) => response.status(),
                Err(ureq::Error::Status(code, _)) => code,
                Err(other) => panic!("transport failure: {other}"),
            }
        }
    })
    .await;
    assert_eq!(status, 400);

    shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn presence_window_governs_peer_listing() {
    let (base_url, shutdown_tx) = start_relay(short_ttl_config()).await;
    let watch = RelayTransport::new(base_url.clone(), "watch-a");
    let handset = RelayTransport::new(base_url, "handset-a");

    blocking({
        let handset = handset.clone();
        move || handset.heartbeat().expect("heartbeat")
    })
    .await;

    let peers = blocking({
        let watch = watch.clone();
        move || watch.connected_peers().expect("peers")
    })
    .await;
    assert_eq!(peers, vec!["handset-a".to_string()]);

    // The handset goes quiet past the presence window.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let peers = blocking(move || watch.connected_peers().expect("peers")).await;
    assert!(peers.is_empty(), "stale peer still listed");

    shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn record_revisions_advance_only_on_change() {
    let (base_url, shutdown_tx) = start_relay(RelayConfig::default()).await;
    let handset = RelayTransport::new(base_url, "handset-a");

    let missing = blocking({
        let handset = handset.clone();
        move || handset.fetch_record(PREFERENCES_RECORD_PATH).expect("fetch")
    })
    .await;
    assert!(missing.is_none(), "unwritten record must be absent");

    blocking({
        let handset = handset.clone();
        move || {
            handset
                .put_record(PREFERENCES_RECORD_PATH, json!({ "use_button_confirmation": true }))
                .expect("put")
        }
    })
    .await;
    let first = blocking({
        let handset = handset.clone();
        move || {
            handset
                .fetch_record(PREFERENCES_RECORD_PATH)
                .expect("fetch")
                .expect("snapshot")
        }
    })
    .await;
    assert_eq!(first.revision, 1);

    // Same value again: no new revision, so pollers see no change event.
    blocking({
        let handset = handset.clone();
        move || {
            handset
                .put_record(PREFERENCES_RECORD_PATH, json!({ "use_button_confirmation": true }))
                .expect("put")
        }
    })
    .await;
    let second = blocking({
        let handset = handset.clone();
        move || {
            handset
                .fetch_record(PREFERENCES_RECORD_PATH)
                .expect("fetch")
                .expect("snapshot")
        }
    })
    .await;
    assert_eq!(second.revision, 1);

    blocking({
        let handset = handset.clone();
        move || {
            handset
                .put_record(PREFERENCES_RECORD_PATH, json!({ "use_button_confirmation": false }))
                .expect("put")
        }
    })
    .await;
    let third = blocking(move || {
        handset
            .fetch_record(PREFERENCES_RECORD_PATH)
            .expect("fetch")
            .expect("snapshot")
    })
    .await;
    assert_eq!(third.revision, 2);
    assert_eq!(third.value, json!({ "use_button_confirmation": false }));

    shutdown_tx.send(()).ok();
}
