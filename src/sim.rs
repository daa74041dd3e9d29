//! Simulated platform backends.
//!
//! The crate's seams (SMS, notifications, geolocation, wake locks) are
//! traits; these implementations back them with in-memory recording for
//! tests and console logging for the demo binaries. Real deployments plug
//! platform bindings into the same traits.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::dispatcher::{NotifyError, Notifier};
use crate::location::{Criteria, LocationSource, WakeGuard, WakeSource};
use crate::sms::{Fix, SmsError, SmsSender};
use crate::wlog;

/// Shared ordered log of side effects, for asserting pipeline ordering.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().expect("event log poisoned").push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("event log poisoned").clone()
    }
}

/// Recording SMS sender. Optionally fails every send.
pub struct SimSmsSender {
    log: EventLog,
    sent: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl SimSmsSender {
    pub fn new() -> Self {
        Self::with_log(EventLog::new())
    }

    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// (number, body) pairs in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sms log poisoned").clone()
    }
}

impl Default for SimSmsSender {
    fn default() -> Self {
        Self::new()
    }
}

impl SmsSender for SimSmsSender {
    fn send(&self, number: &str, body: &str) -> Result<(), SmsError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SmsError::Dispatch("simulated send failure".to_string()));
        }
        self.log.record(format!("sms:{number}"));
        self.sent
            .lock()
            .expect("sms log poisoned")
            .push((number.to_string(), body.to_string()));
        Ok(())
    }
}

/// Recording notifier. Optionally fails every post.
pub struct SimNotifier {
    log: EventLog,
    posted: Mutex<Vec<(u32, String)>>,
    cancelled: Mutex<Vec<u32>>,
    fail: AtomicBool,
}

impl SimNotifier {
    pub fn new() -> Self {
        Self::with_log(EventLog::new())
    }

    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            posted: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail_posts(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn posted(&self) -> Vec<(u32, String)> {
        self.posted.lock().expect("notifier log poisoned").clone()
    }

    pub fn cancelled(&self) -> Vec<u32> {
        self.cancelled.lock().expect("notifier log poisoned").clone()
    }
}

impl Default for SimNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for SimNotifier {
    fn post(&self, id: u32, title: &str, _body: &str, _tap_target: &str) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Post("simulated post failure".to_string()));
        }
        self.log.record(format!("notify:{id:#x}"));
        self.posted
            .lock()
            .expect("notifier log poisoned")
            .push((id, title.to_string()));
        Ok(())
    }

    fn cancel(&self, id: u32) {
        self.cancelled.lock().expect("notifier log poisoned").push(id);
    }
}

/// Counting wake source; `held()` is the resource-safety oracle.
pub struct SimWakeSource {
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl SimWakeSource {
    pub fn new() -> Self {
        Self {
            acquired: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn held(&self) -> bool {
        self.acquired() > self.released()
    }
}

impl Default for SimWakeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeSource for SimWakeSource {
    fn acquire(&self) -> WakeGuard {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let released = Arc::clone(&self.released);
        WakeGuard::new(move || {
            released.fetch_add(1, Ordering::SeqCst);
        })
    }
}

/// Manually driven location source: tests call [`SimLocationSource::deliver`]
/// to resolve the outstanding single-fix request.
pub struct SimLocationSource {
    last_known: Mutex<Option<Fix>>,
    provider: Option<String>,
    pending: Mutex<Vec<oneshot::Sender<Fix>>>,
    request_count: AtomicUsize,
}

impl SimLocationSource {
    pub fn with_provider(provider: &str) -> Self {
        Self {
            last_known: Mutex::new(None),
            provider: Some(provider.to_string()),
            pending: Mutex::new(Vec::new()),
            request_count: AtomicUsize::new(0),
        }
    }

    /// A platform with no provider matching any criteria.
    pub fn without_provider() -> Self {
        Self {
            last_known: Mutex::new(None),
            provider: None,
            pending: Mutex::new(Vec::new()),
            request_count: AtomicUsize::new(0),
        }
    }

    pub fn set_last_known(&self, fix: Option<Fix>) {
        *self.last_known.lock().expect("location state poisoned") = fix;
    }

    /// Resolve the most recent outstanding request. Abandoned (dropped)
    /// receivers are ignored, matching a cancelled platform request.
    pub fn deliver(&self, fix: Fix) {
        if let Some(sender) = self
            .pending
            .lock()
            .expect("location state poisoned")
            .pop()
        {
            let _ = sender.send(fix);
        }
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }
}

impl LocationSource for SimLocationSource {
    fn last_known(&self) -> Option<Fix> {
        *self.last_known.lock().expect("location state poisoned")
    }

    fn best_provider(&self, _criteria: &Criteria) -> Option<String> {
        self.provider.clone()
    }

    fn request_single_fix(&self, _provider: &str) -> oneshot::Receiver<Fix> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("location state poisoned")
            .push(tx);
        rx
    }
}

/// Location source that resolves every request instantly with a fixed fix.
/// Used by the demo daemon where no real GPS exists.
pub struct StaticLocationSource {
    fix: Option<Fix>,
}

impl StaticLocationSource {
    pub fn new(fix: Option<Fix>) -> Self {
        Self { fix }
    }
}

impl LocationSource for StaticLocationSource {
    fn last_known(&self) -> Option<Fix> {
        self.fix
    }

    fn best_provider(&self, _criteria: &Criteria) -> Option<String> {
        self.fix.map(|_| "static".to_string())
    }

    fn request_single_fix(&self, _provider: &str) -> oneshot::Receiver<Fix> {
        let (tx, rx) = oneshot::channel();
        if let Some(fix) = self.fix {
            let _ = tx.send(fix);
        }
        rx
    }
}

/// SMS sender that only logs; the demo daemon's stand-in for a modem.
pub struct ConsoleSmsSender;

impl SmsSender for ConsoleSmsSender {
    fn send(&self, number: &str, body: &str) -> Result<(), SmsError> {
        wlog!("sms -> {number}: {body}");
        Ok(())
    }
}

/// Notifier that only logs.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn post(&self, id: u32, title: &str, body: &str, tap_target: &str) -> Result<(), NotifyError> {
        wlog!("notification {id:#x}: {title} - {body} (opens {tap_target})");
        Ok(())
    }

    fn cancel(&self, id: u32) {
        wlog!("notification {id:#x} cancelled");
    }
}

/// Wake source that only logs; holds nothing.
pub struct ConsoleWakeSource;

impl WakeSource for ConsoleWakeSource {
    fn acquire(&self) -> WakeGuard {
        wlog!("wake lock acquired");
        WakeGuard::new(|| {
            wlog!("wake lock released");
        })
    }
}
