//! Client-side pairing transport.
//!
//! [`PairingTransport`] is the narrow contract both endpoints program
//! against: enumerate reachable peers, deliver a small message on a named
//! channel, and read/write the synced preference records. [`RelayTransport`]
//! implements it over HTTP against the pairing relay.
//!
//! All methods block; async components must run them through
//! `tokio::task::spawn_blocking` so the event loop is never stalled on I/O.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::protocol::{build_alert_signal, AlertSignal, RecordSnapshot, SignalError};

#[derive(Debug)]
pub enum TransportError {
    Http(String),
    Serde(serde_json::Error),
    Signal(SignalError),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Http(error) => write!(f, "http error: {error}"),
            TransportError::Serde(error) => write!(f, "serde error: {error}"),
            TransportError::Signal(error) => write!(f, "signal error: {error}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<serde_json::Error> for TransportError {
    fn from(error: serde_json::Error) -> Self {
        TransportError::Serde(error)
    }
}

impl From<SignalError> for TransportError {
    fn from(error: SignalError) -> Self {
        TransportError::Signal(error)
    }
}

/// The pairing transport as seen by an endpoint (watch or handset).
pub trait PairingTransport: Send + Sync {
    /// This endpoint's device ID on the transport.
    fn local_id(&self) -> &str;

    /// Currently reachable companion devices. Queried fresh, never cached.
    fn connected_peers(&self) -> Result<Vec<String>, TransportError>;

    /// Deliver a zero-payload signal to `peer` on `channel`, reliably-once
    /// for this send. Success means the transport accepted it, nothing more.
    fn send_signal(&self, peer: &str, channel: &str) -> Result<(), TransportError>;

    /// Drain this endpoint's inbox.
    fn drain_inbox(&self) -> Result<Vec<AlertSignal>, TransportError>;

    /// Publish a data record at a logical path, last-write-wins.
    fn put_record(&self, path: &str, value: Value) -> Result<(), TransportError>;

    /// Fetch the current snapshot of a record. `Ok(None)` when the record
    /// has never been written (or was deleted).
    fn fetch_record(&self, path: &str) -> Result<Option<RecordSnapshot>, TransportError>;
}

/// HTTP implementation of [`PairingTransport`] against the pairing relay.
#[derive(Debug, Clone)]
pub struct RelayTransport {
    relay_url: String,
    local_id: String,
}

impl RelayTransport {
    pub fn new(relay_url: impl Into<String>, local_id: impl Into<String>) -> Self {
        let relay_url = relay_url.into();
        Self {
            relay_url: relay_url.trim_end_matches('/').to_string(),
            local_id: local_id.into(),
        }
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    /// Mark this endpoint reachable without any other side effect.
    pub fn heartbeat(&self) -> Result<(), TransportError> {
        let url = format!("{}/presence/{}", self.relay_url, self.local_id);
        ureq::post(&url)
            .call()
            .map_err(|e| TransportError::Http(format!("heartbeat failed: {e}")))?;
        Ok(())
    }

    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

impl PairingTransport for RelayTransport {
    fn local_id(&self) -> &str {
        &self.local_id
    }

    fn connected_peers(&self) -> Result<Vec<String>, TransportError> {
        let url = format!("{}/peers/{}", self.relay_url, self.local_id);
        let peers: Vec<String> = ureq::get(&url)
            .call()
            .map_err(|e| TransportError::Http(format!("peer query failed: {e}")))?
            .into_json()
            .map_err(|e| TransportError::Http(format!("deserialize peers: {e}")))?;
        Ok(peers)
    }

    fn send_signal(&self, peer: &str, channel: &str) -> Result<(), TransportError> {
        let signal = build_alert_signal(self.local_id.clone(), peer, channel, self.now_unix())?;
        let url = format!("{}/signals", self.relay_url);
        let body = serde_json::to_value(&signal)?;
        ureq::post(&url)
            .send_json(body)
            .map_err(|e| TransportError::Http(format!("signal POST failed: {e}")))?;
        Ok(())
    }

    fn drain_inbox(&self) -> Result<Vec<AlertSignal>, TransportError> {
        let url = format!("{}/inbox/{}", self.relay_url, self.local_id);
        let signals: Vec<AlertSignal> = ureq::get(&url)
            .call()
            .map_err(|e| TransportError::Http(format!("inbox fetch failed: {e}")))?
            .into_json()
            .map_err(|e| TransportError::Http(format!("deserialize inbox: {e}")))?;
        Ok(signals)
    }

    fn put_record(&self, path: &str, value: Value) -> Result<(), TransportError> {
        let url = format!("{}/records{}", self.relay_url, path);
        ureq::put(&url)
            .send_json(value)
            .map_err(|e| TransportError::Http(format!("record PUT failed: {e}")))?;
        Ok(())
    }

    fn fetch_record(&self, path: &str) -> Result<Option<RecordSnapshot>, TransportError> {
        let url = format!("{}/records{}", self.relay_url, path);
        match ureq::get(&url).call() {
            Ok(response) => {
                let snapshot: RecordSnapshot = response
                    .into_json()
                    .map_err(|e| TransportError::Http(format!("deserialize record: {e}")))?;
                Ok(Some(snapshot))
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(e) => Err(TransportError::Http(format!("record fetch failed: {e}"))),
        }
    }
}
