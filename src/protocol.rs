//! Wire types for the watch-to-handset pairing protocol.
//!
//! ## Wire conventions
//! - Signals are serialized with serde-compatible formats (JSON on the wire).
//! - Signal IDs are derived from salted serialization bytes and encoded as
//!   URL-safe base64 without padding; the relay uses them for reliably-once
//!   dedup, so two sends of the "same" gesture still get distinct IDs.
//! - `AlertSignal` carries no payload: the channel path is the entire
//!   meaning of the message.
//! - `ConfirmationRecord` is the single preference record synced from the
//!   handset to the watch, last-write-wins.
//!
//! These types are intentionally small and self-contained so both endpoints
//! and the relay share one definition.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Channel path for the "trigger the emergency alert" signal, watch → phone.
pub const ALERT_CHANNEL: &str = "/start/sendEmergencyAlert";

/// Record path for the synced confirmation-button preference, phone → watch.
pub const PREFERENCES_RECORD_PATH: &str = "/preferencesdata";

/// Field name inside the preferences record.
pub const FIELD_USE_BUTTON_CONFIRMATION: &str = "use_button_confirmation";

/// A content-addressed identifier derived from serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalId(pub String);

impl SignalId {
    /// Compute a signal ID from arbitrary bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        SignalId(URL_SAFE_NO_PAD.encode(digest))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    EmptySender,
    InvalidChannel(String),
}

impl std::fmt::Display for SignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalError::EmptySender => write!(f, "sender_id must not be empty"),
            SignalError::InvalidChannel(path) => {
                write!(f, "channel path must start with '/': {path}")
            }
        }
    }
}

impl std::error::Error for SignalError {}

/// A zero-payload message on a well-known channel.
///
/// Any number may arrive in quick succession (double taps, transport
/// retries); the dispatcher collapses bursts, the relay dedups by
/// `signal_id` only within a single send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AlertSignal {
    pub signal_id: SignalId,
    pub sender_id: String,
    pub recipient_id: String,
    pub channel: String,
    pub timestamp: u64,
}

/// Build an alert signal with a salted content-derived ID.
///
/// The salt keeps two identical gestures from colliding in the relay's
/// dedup map while still letting a single transport retry be recognised.
pub fn build_alert_signal(
    sender_id: impl Into<String>,
    recipient_id: impl Into<String>,
    channel: impl Into<String>,
    timestamp: u64,
) -> Result<AlertSignal, SignalError> {
    let sender_id = sender_id.into();
    let recipient_id = recipient_id.into();
    let channel = channel.into();
    if sender_id.trim().is_empty() {
        return Err(SignalError::EmptySender);
    }
    if !channel.starts_with('/') {
        return Err(SignalError::InvalidChannel(channel));
    }

    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut bytes = Vec::with_capacity(sender_id.len() + channel.len() + 24);
    bytes.extend_from_slice(sender_id.as_bytes());
    bytes.extend_from_slice(recipient_id.as_bytes());
    bytes.extend_from_slice(channel.as_bytes());
    bytes.extend_from_slice(&timestamp.to_le_bytes());
    bytes.extend_from_slice(&salt);

    Ok(AlertSignal {
        signal_id: SignalId::from_bytes(&bytes),
        sender_id,
        recipient_id,
        channel,
        timestamp,
    })
}

/// The one-field preference record propagated from phone to watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConfirmationRecord {
    pub use_button_confirmation: bool,
}

impl ConfirmationRecord {
    pub fn to_value(self) -> serde_json::Value {
        serde_json::json!({ FIELD_USE_BUTTON_CONFIRMATION: self.use_button_confirmation })
    }

    /// Extract the flag from a raw record value. Unknown shapes fall back to
    /// the auto-confirm default rather than failing the listener.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let use_button_confirmation = value
            .get(FIELD_USE_BUTTON_CONFIRMATION)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        ConfirmationRecord {
            use_button_confirmation,
        }
    }
}

/// A record snapshot as served by the relay: the value plus a monotonic
/// revision used by listeners to apply only "changed" events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RecordSnapshot {
    pub revision: u64,
    pub value: serde_json::Value,
    pub updated_at: u64,
}
