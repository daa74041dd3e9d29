//! Pairing relay: the store-and-forward hub between watch and handset.
//!
//! The relay keeps three structures:
//! - per-recipient signal queues, pruned by TTL and drained on fetch;
//! - a dedup map keyed by signal ID, giving reliably-once delivery per send;
//! - last-write-wins data records with monotonic revisions, used by the
//!   preference sync channel.
//!
//! Presence is tracked by `peer_last_seen`: any authenticated request (or an
//! explicit heartbeat) marks a peer reachable for the presence window, and
//! `GET /peers/:id` lists everyone else currently inside that window.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;

use crate::protocol::{AlertSignal, RecordSnapshot};
use crate::wlog;

#[derive(Clone)]
pub struct RelayConfig {
    /// How long a queued signal stays deliverable.
    pub signal_ttl: Duration,
    /// How long after last contact a peer counts as reachable.
    pub presence_window: Duration,
    /// Per-recipient queue cap; oldest entries are dropped first.
    pub max_queued_signals: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            signal_ttl: Duration::from_secs(300),
            presence_window: Duration::from_secs(30),
            max_queued_signals: 64,
        }
    }
}

#[derive(Clone)]
pub struct RelayState {
    config: RelayConfig,
    inner: Arc<Mutex<RelayStateInner>>,
}

struct RelayStateInner {
    queues: HashMap<String, VecDeque<StoredSignal>>,
    dedup: HashMap<String, Instant>,
    peer_last_seen: HashMap<String, Instant>,
    records: HashMap<String, StoredRecord>,
}

struct StoredSignal {
    signal: AlertSignal,
    expires_at: Instant,
}

struct StoredRecord {
    revision: u64,
    value: Value,
    updated_at: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum StoreStatus {
    Accepted,
    Duplicate,
}

#[derive(Serialize)]
struct StoreResponse {
    signal_id: String,
    status: StoreStatus,
}

pub fn app(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/signals", post(store_signal))
        .route("/inbox/:peer_id", get(drain_inbox))
        .route("/peers/:peer_id", get(list_peers))
        .route("/presence/:peer_id", post(heartbeat))
        .route("/records/*path", put(put_record).get(get_record))
        .with_state(state)
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(RelayStateInner {
                queues: HashMap::new(),
                dedup: HashMap::new(),
                peer_last_seen: HashMap::new(),
                records: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RelayStateInner> {
        self.inner.lock().expect("relay state poisoned")
    }
}

impl RelayStateInner {
    fn prune(&mut self, now: Instant) {
        for queue in self.queues.values_mut() {
            queue.retain(|stored| stored.expires_at > now);
        }
        self.queues.retain(|_, queue| !queue.is_empty());
        self.dedup.retain(|_, expires_at| *expires_at > now);
    }

    fn touch(&mut self, peer_id: &str, now: Instant) {
        self.peer_last_seen.insert(peer_id.to_string(), now);
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

async fn healthcheck() -> impl IntoResponse {
    StatusCode::OK
}

async fn store_signal(
    State(state): State<RelayState>,
    Json(signal): Json<AlertSignal>,
) -> impl IntoResponse {
    if !signal.channel.starts_with('/') {
        return (StatusCode::BAD_REQUEST, "invalid channel path").into_response();
    }
    if signal.sender_id.trim().is_empty() || signal.recipient_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "missing sender or recipient").into_response();
    }

    let now = Instant::now();
    let signal_id = signal.signal_id.0.clone();
    let config = state.config.clone();
    let mut inner = state.lock();
    inner.prune(now);
    inner.touch(&signal.sender_id, now);

    if inner.dedup.contains_key(&signal_id) {
        // Transport retry of an already-queued send. Reliably-once: accept
        // without enqueueing a second copy.
        return Json(StoreResponse {
            signal_id,
            status: StoreStatus::Duplicate,
        })
        .into_response();
    }
    inner.dedup.insert(signal_id.clone(), now + config.signal_ttl);

    let queue = inner.queues.entry(signal.recipient_id.clone()).or_default();
    while queue.len() >= config.max_queued_signals {
        queue.pop_front();
    }
    queue.push_back(StoredSignal {
        signal,
        expires_at: now + config.signal_ttl,
    });

    Json(StoreResponse {
        signal_id,
        status: StoreStatus::Accepted,
    })
    .into_response()
}

/// Drains the queue: the relay hands each signal to a recipient at most once.
async fn drain_inbox(
    State(state): State<RelayState>,
    Path(peer_id): Path<String>,
) -> impl IntoResponse {
    let now = Instant::now();
    let mut inner = state.lock();
    inner.prune(now);
    inner.touch(&peer_id, now);

    let signals: Vec<AlertSignal> = inner
        .queues
        .remove(&peer_id)
        .map(|queue| queue.into_iter().map(|stored| stored.signal).collect())
        .unwrap_or_default();

    if !signals.is_empty() {
        wlog!(
            "relay: delivered {} signal(s) to {}",
            signals.len(),
            crate::logging::device_id(&peer_id)
        );
    }
    Json(signals)
}

/// Lists reachable peers, excluding the caller itself.
async fn list_peers(
    State(state): State<RelayState>,
    Path(peer_id): Path<String>,
) -> impl IntoResponse {
    let now = Instant::now();
    let window = state.config.presence_window;
    let mut inner = state.lock();
    inner.touch(&peer_id, now);

    let mut peers: Vec<String> = inner
        .peer_last_seen
        .iter()
        .filter(|(id, last_seen)| {
            **id != peer_id && now.duration_since(**last_seen) <= window
        })
        .map(|(id, _)| id.clone())
        .collect();
    peers.sort();
    Json(peers)
}

async fn heartbeat(
    State(state): State<RelayState>,
    Path(peer_id): Path<String>,
) -> impl IntoResponse {
    if peer_id.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    state.lock().touch(&peer_id, Instant::now());
    StatusCode::OK
}

/// Last-write-wins record store. The revision only advances when the stored
/// value actually changes, so pollers can treat a higher revision as a
/// "changed" event.
async fn put_record(
    State(state): State<RelayState>,
    Path(path): Path<String>,
    Json(value): Json<Value>,
) -> impl IntoResponse {
    let path = normalize_record_path(&path);
    let mut inner = state.lock();
    let record = inner.records.entry(path.clone()).or_insert(StoredRecord {
        revision: 0,
        value: Value::Null,
        updated_at: 0,
    });
    if record.revision == 0 || record.value != value {
        record.revision += 1;
        record.value = value;
        record.updated_at = now_unix();
        wlog!("relay: record {} now at revision {}", path, record.revision);
    }
    StatusCode::OK
}

async fn get_record(
    State(state): State<RelayState>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    let path = normalize_record_path(&path);
    let inner = state.lock();
    match inner.records.get(&path) {
        Some(record) => Json(RecordSnapshot {
            revision: record.revision,
            value: record.value.clone(),
            updated_at: record.updated_at,
        })
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Axum wildcard captures strip the leading slash; record paths keep it.
fn normalize_record_path(raw: &str) -> String {
    if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("/{raw}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_path_normalization() {
        assert_eq!(normalize_record_path("preferencesdata"), "/preferencesdata");
        assert_eq!(normalize_record_path("/preferencesdata"), "/preferencesdata");
    }

    #[test]
    fn default_config_is_sane() {
        let config = RelayConfig::default();
        assert!(config.presence_window < config.signal_ttl);
        assert!(config.max_queued_signals > 0);
    }
}
