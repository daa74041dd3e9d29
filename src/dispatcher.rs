//! Handset-side alert dispatcher.
//!
//! Receives "trigger alert" signals from the pairing transport, collapses
//! bursts with a restartable debounce window, and runs the alert pipeline:
//! notification, primary SMS, last-known-location SMS, then the bounded
//! fresh-fix sub-task. Every step after the preference check is independent
//! and best-effort; nothing may prevent the primary SMS from being
//! attempted.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::location::{LocationFetcher, LocationSource};
use crate::sms::{format_last_location_message, SmsSender};
use crate::storage::{AlertPreferences, Storage};
use crate::wlog;

/// Fixed notification identity; posting replaces any prior instance.
pub const ALERT_NOTIFICATION_ID: u32 = 0x6001;

/// Where tapping the notification takes the user.
pub const NOTIFICATION_TAP_TARGET: &str = "wristlink://preferences";

const NOTIFICATION_TITLE: &str = "Emergency alert sent";
const NOTIFICATION_BODY: &str = "An emergency SMS was sent to your contact";

#[derive(Debug)]
pub enum NotifyError {
    Post(String),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Post(error) => write!(f, "notification error: {error}"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// Local notification primitive, idempotent by id.
pub trait Notifier: Send + Sync {
    fn post(&self, id: u32, title: &str, body: &str, tap_target: &str) -> Result<(), NotifyError>;
    fn cancel(&self, id: u32);
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Debounce window: each incoming signal restarts it, and only the
    /// survivor executes the pipeline.
    pub debounce_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            debounce_delay: Duration::from_millis(500),
        }
    }
}

/// Owns the debounce state and the pipeline's collaborators.
pub struct AlertDispatcher {
    config: DispatcherConfig,
    storage: Arc<Mutex<Storage>>,
    sms: Arc<dyn SmsSender>,
    notifier: Arc<dyn Notifier>,
    location: Arc<dyn LocationSource>,
    fetcher: Arc<LocationFetcher>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl AlertDispatcher {
    pub fn new(
        config: DispatcherConfig,
        storage: Arc<Mutex<Storage>>,
        sms: Arc<dyn SmsSender>,
        notifier: Arc<dyn Notifier>,
        location: Arc<dyn LocationSource>,
        fetcher: Arc<LocationFetcher>,
    ) -> Self {
        Self {
            config,
            storage,
            sms,
            notifier,
            location,
            fetcher,
            pending: Mutex::new(None),
        }
    }

    /// Called once per inbound alert signal. Fire-and-forget: cancels any
    /// scheduled-but-not-yet-run execution and schedules a fresh one after
    /// the debounce delay.
    pub fn on_trigger_signal(self: &Arc<Self>) {
        let mut pending = self.pending.lock().expect("debounce state poisoned");
        if let Some(previous) = pending.take() {
            previous.abort();
            wlog!("dispatcher: debounce window restarted");
        }

        let dispatcher = Arc::clone(self);
        let delay = self.config.debounce_delay;
        *pending = Some(tokio::spawn(async move {
            sleep(delay).await;
            let worker = Arc::clone(&dispatcher);
            // The pipeline does blocking I/O (storage, SMS); keep it off
            // the event thread.
            let _ = tokio::task::spawn_blocking(move || worker.trigger_alert()).await;
        }));
    }

    /// The alert pipeline. Runs on a blocking worker.
    fn trigger_alert(&self) {
        let prefs = {
            let storage = self.storage.lock().expect("storage poisoned");
            match AlertPreferences::load(&storage) {
                Ok(prefs) => prefs,
                Err(error) => {
                    wlog!("dispatcher: failed to load preferences: {error}");
                    return;
                }
            }
        };

        if prefs.is_incomplete() {
            // Configuration error, not a transport error: nothing is sent
            // and nothing is surfaced.
            wlog!("dispatcher: no destination number or message configured, ignoring trigger");
            return;
        }

        if prefs.show_notification {
            self.notifier.cancel(ALERT_NOTIFICATION_ID);
            if let Err(error) = self.notifier.post(
                ALERT_NOTIFICATION_ID,
                NOTIFICATION_TITLE,
                NOTIFICATION_BODY,
                NOTIFICATION_TAP_TARGET,
            ) {
                wlog!("dispatcher: notification post failed: {error}");
            }
        }

        match self.sms.send(&prefs.sms_number, &prefs.sms_message) {
            Ok(()) => wlog!(
                "dispatcher: alert SMS handed off to {}",
                crate::logging::device_id(&prefs.sms_number)
            ),
            Err(error) => wlog!("dispatcher: alert SMS failed: {error}"),
        }

        if prefs.include_location {
            if let Some(fix) = self.location.last_known() {
                let body = format_last_location_message(&fix);
                if let Err(error) = self.sms.send(&prefs.sms_number, &body) {
                    wlog!("dispatcher: last-known location SMS failed: {error}");
                }
            }
            self.fetcher.start(&prefs.sms_number);
        }
    }

    /// Teardown: drop any scheduled execution and stop the fetch sub-task.
    pub fn shutdown(&self) {
        if let Some(pending) = self.pending.lock().expect("debounce state poisoned").take() {
            pending.abort();
        }
        self.fetcher.stop();
    }
}
