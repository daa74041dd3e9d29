//! Watch-side trigger coordinator.
//!
//! One confirmed gesture becomes one alert signal fanned out to every
//! reachable companion. The coordinator is a short-lived state machine:
//!
//! ```text
//! Idle -> AwaitingConfirmation -> Sending -> Terminal(Success|Failure|Cancelled)
//! ```
//!
//! With the confirmation button disabled (the default), entering
//! `AwaitingConfirmation` arms a countdown whose natural expiry counts as an
//! explicit confirm; cancelling during the countdown ends the attempt.
//! Backgrounding the screen must not leak the countdown: it is torn down
//! and re-armed from scratch on resume.
//!
//! The coordinator holds no state across invocations; callers construct a
//! fresh one per screen activation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::logging;
use crate::protocol::ALERT_CHANNEL;
use crate::storage::{Storage, StorageError};
use crate::transport::PairingTransport;
use crate::wlog;

/// Matches the delayed-confirmation control on the watch face.
pub const CONFIRMATION_DELAY: Duration = Duration::from_millis(3500);

/// Whether confirmation needs an explicit button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationMode {
    pub require_button: bool,
}

impl ConfirmationMode {
    /// Last value synced from the handset; auto-confirm when never received.
    pub fn load(storage: &Storage) -> Result<Self, StorageError> {
        Ok(Self {
            require_button: storage.use_confirmation_button()?,
        })
    }
}

/// Why a trigger attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// At least one reachable peer accepted the signal.
    Sent,
    /// No companion device was reachable on the transport.
    NoReachableCompanion,
    /// Peers were reachable but every send failed.
    AllSendsFailed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    AwaitingConfirmation,
    Sending,
    Terminal(TriggerOutcome),
}

#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub confirmation_delay: Duration,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            confirmation_delay: CONFIRMATION_DELAY,
        }
    }
}

/// Drives one alert attempt on the watch.
pub struct TriggerCoordinator {
    transport: Arc<dyn PairingTransport>,
    config: TriggerConfig,
    mode: ConfirmationMode,
    state_tx: watch::Sender<TriggerState>,
    countdown: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerCoordinator {
    pub fn new(
        transport: Arc<dyn PairingTransport>,
        config: TriggerConfig,
        mode: ConfirmationMode,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(TriggerState::Idle);
        Arc::new(Self {
            transport,
            config,
            mode,
            state_tx,
            countdown: Mutex::new(None),
        })
    }

    pub fn state(&self) -> TriggerState {
        self.state_tx.borrow().clone()
    }

    /// Screen activation: enter `AwaitingConfirmation` and, unless a button
    /// press is required, arm the auto-confirm countdown.
    pub fn activate(self: &Arc<Self>) {
        let entered = self.state_tx.send_if_modified(|state| {
            if *state == TriggerState::Idle {
                *state = TriggerState::AwaitingConfirmation;
                true
            } else {
                false
            }
        });
        if !entered {
            return;
        }
        if !self.mode.require_button {
            self.arm_countdown();
        }
    }

    fn arm_countdown(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        let delay = self.config.confirmation_delay;
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            coordinator.confirm().await;
        });
        let mut countdown = self.countdown.lock().expect("countdown poisoned");
        if let Some(previous) = countdown.replace(handle) {
            previous.abort();
        }
    }

    fn disarm_countdown(&self) {
        if let Some(handle) = self.countdown.lock().expect("countdown poisoned").take() {
            handle.abort();
        }
    }

    /// The screen left the foreground while awaiting confirmation: tear the
    /// countdown down so it cannot fire unattended.
    pub fn background(&self) {
        self.disarm_countdown();
    }

    /// Back in the foreground: re-arm as if freshly entered.
    pub fn resume(self: &Arc<Self>) {
        if self.state() != TriggerState::AwaitingConfirmation {
            return;
        }
        if !self.mode.require_button {
            self.arm_countdown();
        }
    }

    /// Explicit cancel (or tapping the countdown ring in auto mode).
    pub fn cancel(&self) {
        let cancelled = self.state_tx.send_if_modified(|state| {
            if *state == TriggerState::AwaitingConfirmation {
                *state = TriggerState::Terminal(TriggerOutcome::Cancelled);
                true
            } else {
                false
            }
        });
        if cancelled {
            self.disarm_countdown();
            wlog!("trigger: alert cancelled before sending");
        }
    }

    /// Explicit confirm, or the countdown's natural expiry.
    pub async fn confirm(self: &Arc<Self>) {
        let confirmed = self.state_tx.send_if_modified(|state| {
            if *state == TriggerState::AwaitingConfirmation {
                *state = TriggerState::Sending;
                true
            } else {
                false
            }
        });
        if !confirmed {
            return;
        }
        // Drop the countdown handle without aborting: confirm may be running
        // on the countdown task itself, and aborting our own task would
        // cancel the send mid-flight. A still-pending countdown that fires
        // later is a no-op, the state is already past AwaitingConfirmation.
        self.countdown.lock().expect("countdown poisoned").take();

        let transport = Arc::clone(&self.transport);
        let outcome = tokio::task::spawn_blocking(move || send_alert(transport.as_ref()))
            .await
            .unwrap_or(TriggerOutcome::AllSendsFailed);

        self.state_tx
            .send_replace(TriggerState::Terminal(outcome));
    }

    /// Wait for the attempt to reach a terminal state.
    pub async fn wait_terminal(&self) -> TriggerOutcome {
        let mut rx = self.state_tx.subscribe();
        let state = rx
            .wait_for(|state| matches!(state, TriggerState::Terminal(_)))
            .await
            .map(|state| state.clone());
        match state {
            Ok(TriggerState::Terminal(outcome)) => outcome,
            // The sender lives in self, so the channel cannot close first.
            _ => TriggerOutcome::Cancelled,
        }
    }
}

/// Enumerate reachable peers and fan the alert signal out to all of them.
///
/// The attempt succeeds if at least one peer accepts the send; per-peer
/// failures are logged and never retried.
fn send_alert(transport: &dyn PairingTransport) -> TriggerOutcome {
    let peers = match transport.connected_peers() {
        Ok(peers) => peers,
        Err(error) => {
            wlog!("trigger: peer enumeration failed: {error}");
            return TriggerOutcome::NoReachableCompanion;
        }
    };
    if peers.is_empty() {
        wlog!("trigger: no reachable companion");
        return TriggerOutcome::NoReachableCompanion;
    }

    let mut sent = false;
    for peer in &peers {
        match transport.send_signal(peer, ALERT_CHANNEL) {
            Ok(()) => {
                wlog!("trigger: alert signal sent to {}", logging::device_id(peer));
                sent = true;
            }
            Err(error) => {
                wlog!(
                    "trigger: failed to send alert to {}: {error}",
                    logging::device_id(peer)
                );
            }
        }
    }

    if sent {
        TriggerOutcome::Sent
    } else {
        TriggerOutcome::AllSendsFailed
    }
}
